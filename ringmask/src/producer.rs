//! Producer worker and launcher.

use std::fs::File;
use std::io::{ Read, Seek, SeekFrom };

use nix::sys::wait::waitpid;
use nix::unistd::{ fork, ForkResult };

use crate::config::{ LaunchConfig, Mode };
use crate::error::Result;
use crate::naming::Names;
use crate::region::{ Record, SharedRegion };
use crate::sync::{ ControlGuard, SyncObjects };

/// Bytes the skip policy discards unconditionally.
fn is_skipped(byte: u8) -> bool {
    byte == 0x0a || byte == 0x0d
}

fn now_secs() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

/// Run the producer launcher: bump `producers_total` once on behalf of all
/// `n` children, fork them, then wait for every child to exit.
pub fn run_launcher(config: &LaunchConfig) -> Result<()> {
    let names = Names::derive(&config.base_name)?;

    {
        let mut region = SharedRegion::open(&names)?;
        let sync = SyncObjects::open(&names)?;
        let _guard = ControlGuard::acquire(&sync.control)?;
        region.header_mut().register_producers_total(config.worker_count);
    }

    let mut children = Vec::with_capacity(config.worker_count as usize);
    for _ in 0..config.worker_count {
        // Safety: single-threaded at this point; the child immediately
        // re-opens every IPC resource from scratch rather than relying on
        // anything inherited across the fork.
        match unsafe { fork()? } {
            ForkResult::Parent { child } => children.push(child),
            ForkResult::Child => {
                let code = match run_worker(&config.base_name, config.mode) {
                    Ok(()) => 0,
                    Err(err) => {
                        tracing::error!(error = %err, "producer worker exiting with error");
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
    tracing::info!(count = config.worker_count, "all producer workers reaped");
    Ok(())
}

/// Run a single producer worker's main loop end to end.
pub fn run_worker(base_name: &str, mode: Mode) -> Result<()> {
    let names = Names::derive(base_name)?;
    let mut region = SharedRegion::open(&names)?;
    let sync = SyncObjects::open(&names)?;

    let source_path = region.header().source_path().to_string();
    let mut source_file = File::open(&source_path)?;

    {
        let _guard = ControlGuard::acquire(&sync.control)?;
        region.header_mut().register_producer_active_only();
    }

    let loop_result = worker_loop(&mut region, &sync, &mut source_file, mode);

    let (producers_active, consumers_active) = {
        let _guard = ControlGuard::acquire(&sync.control)?;
        region.header_mut().unregister_producer()
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
    source_file: &mut File,
    mode: Mode
) -> Result<()> {
    loop {
        let mut shutdown = false;
        let mut offset = 0u64;
        {
            let _guard = ControlGuard::acquire(&sync.control)?;
            if region.header().shutdown_flag() {
                shutdown = true;
            } else {
                offset = region.header_mut().take_read_offset();
            }
        }
        if shutdown {
            return Ok(());
        }

        source_file.seek(SeekFrom::Start(offset))?;
        let mut byte_buf = [0u8; 1];
        let bytes_read = source_file.read(&mut byte_buf)?;
        if bytes_read == 0 {
            // Our ticket never reaches the ring, but it still has to be
            // resolved in turn so a later producer isn't stuck waiting on it.
            wait_for_turn(region, sync, offset)?;
            let _guard = ControlGuard::acquire(&sync.control)?;
            region.header_mut().advance_turn();
            return Ok(());
        }
        let byte = byte_buf[0];

        if is_skipped(byte) {
            wait_for_turn(region, sync, offset)?;
            let _guard = ControlGuard::acquire(&sync.control)?;
            region.header_mut().advance_turn();
            continue;
        }

        if mode == Mode::Manual {
            prompt_manual_step(byte);
        }

        // Ring insertions must happen in the same order producers acquired
        // their file offsets. Gate on the ticket *before* taking an `empty`
        // credit: with capacity < producer count, a later ticket could
        // otherwise win the race for a scarce credit ahead of the producer
        // whose turn is actually next, starving it forever since nothing is
        // in the ring yet for a consumer to drain.
        wait_for_turn(region, sync, offset)?;

        sync.empty.wait()?;

        let mut shutdown = false;
        {
            let _guard = ControlGuard::acquire(&sync.control)?;
            if region.header().shutdown_flag() {
                shutdown = true;
                region.header_mut().advance_turn();
            } else {
                let slot = region.header_mut().take_write_slot();
                let masked = byte ^ region.header().mask_byte();
                region.write_record(slot, Record {
                    masked_byte: masked,
                    slot_index: slot,
                    insert_time: now_secs(),
                });
                region.header_mut().advance_turn();
            }
        }
        if shutdown {
            sync.empty.post()?; // restore the credit we consumed
            return Ok(());
        }

        sync.full.post()?;
    }
}

/// Block (spin, then yield, then briefly sleep) until `my_offset` is the next
/// ticket due to resolve into the ring, preserving the offset-acquisition
/// order across concurrent producers.
fn wait_for_turn(region: &SharedRegion, sync: &SyncObjects, my_offset: u64) -> Result<()> {
    let mut spins = 0u32;
    loop {
        let turn = {
            let _guard = ControlGuard::acquire(&sync.control)?;
            region.header().current_turn()
        };
        if turn == my_offset {
            return Ok(());
        }
        if spins < 200 {
            std::hint::spin_loop();
        } else if spins < 400 {
            std::thread::yield_now();
        } else {
            std::thread::sleep(std::time::Duration::from_micros(200));
        }
        spins = spins.saturating_add(1);
    }
}

fn prompt_manual_step(byte: u8) {
    use std::io::Write;
    print!("[producer] press ENTER to insert '{}'...", byte as char);
    let _ = std::io::stdout().flush();
    let mut line = String::new();
    let _ = std::io::stdin().read_line(&mut line);
}
