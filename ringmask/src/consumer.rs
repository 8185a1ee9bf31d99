//! Consumer worker and launcher, symmetric to [`crate::producer`].

use std::fs::{ File, OpenOptions };
use std::io::{ Seek, SeekFrom, Write };
use std::path::Path;

use nix::sys::wait::waitpid;
use nix::unistd::{ fork, ForkResult };

use crate::config::{ LaunchConfig, Mode };
use crate::error::Result;
use crate::naming::Names;
use crate::region::SharedRegion;
use crate::sync::{ ControlGuard, SyncObjects };

/// Create (or truncate) the output file once, before any consumer worker
/// attaches.
pub fn prepare_output_file(path: &Path) -> Result<()> {
    OpenOptions::new().write(true).create(true).truncate(true).open(path)?;
    Ok(())
}

/// Run the consumer launcher: bump `consumers_total`, truncate the output
/// file, fork `n` workers, and wait for them all.
pub fn run_launcher(config: &LaunchConfig, output_path: &Path) -> Result<()> {
    let names = Names::derive(&config.base_name)?;

    prepare_output_file(output_path)?;

    {
        let mut region = SharedRegion::open(&names)?;
        let sync = SyncObjects::open(&names)?;
        let _guard = ControlGuard::acquire(&sync.control)?;
        region.header_mut().register_consumers_total(config.worker_count);
    }

    let mut children = Vec::with_capacity(config.worker_count as usize);
    for _ in 0..config.worker_count {
        match unsafe { fork()? } {
            ForkResult::Parent { child } => children.push(child),
            ForkResult::Child => {
                let code = match run_worker(&config.base_name, config.mode, output_path) {
                    Ok(()) => 0,
                    Err(err) => {
                        tracing::error!(error = %err, "consumer worker exiting with error");
                        1
                    }
                };
                std::process::exit(code);
            }
        }
    }

    for pid in children {
        waitpid(pid, None)?;
    }
    tracing::info!(count = config.worker_count, "all consumer workers reaped");
    Ok(())
}

/// Run a single consumer worker's main loop end to end.
pub fn run_worker(base_name: &str, mode: Mode, output_path: &Path) -> Result<()> {
    let names = Names::derive(base_name)?;
    let mut region = SharedRegion::open(&names)?;
    let sync = SyncObjects::open(&names)?;

    let mut output_file = OpenOptions::new().read(true).write(true).open(output_path)?;

    {
        let _guard = ControlGuard::acquire(&sync.control)?;
        region.header_mut().register_consumer_active_only();
    }

    let loop_result = worker_loop(&mut region, &sync, &mut output_file, mode);

    let (producers_active, consumers_active) = {
        let _guard = ControlGuard::acquire(&sync.control)?;
        region.header_mut().unregister_consumer()
    };
    if producers_active == 0 && consumers_active == 0 {
        tracing::info!("last worker leaving, signaling finalizer");
        sync.done.post()?;
    }

    loop_result
}

fn worker_loop(
    region: &mut SharedRegion,
    sync: &SyncObjects,
    output_file: &mut File,
    mode: Mode
) -> Result<()> {
    loop {
        sync.full.wait()?;

        if mode == Mode::Manual {
            prompt_manual_step();
        }

        let mut shutdown = false;
        let mut payload = None;
        {
            let _guard = ControlGuard::acquire(&sync.control)?;
            if region.header().shutdown_flag() {
                shutdown = true;
            } else {
                let slot = region.header_mut().take_read_slot();
                let record = region.read_record(slot);
                let out_offset = region.header_mut().take_write_offset();
                payload = Some((record.masked_byte, out_offset));
            }
        }
        if shutdown {
            sync.full.post()?; // restore the credit we consumed
            return Ok(());
        }

        sync.empty.post()?;

        let (masked_byte, out_offset) = payload.expect("payload set when not shutting down");
        let raw_byte = masked_byte ^ region.header().mask_byte();
        output_file.seek(SeekFrom::Start(out_offset))?;
        output_file.write_all(&[raw_byte])?;
        output_file.flush()?;
    }
}

fn prompt_manual_step() {
    print!("[consumer] press ENTER to consume next byte...");
    let _ = std::io::stdout().flush();
    let mut line = String::new();
    let _ = std::io::stdin().read_line(&mut line);
}
