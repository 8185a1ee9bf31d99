//! The finalizer: waits for an external interrupt, orchestrates the drain
//! protocol, reports stats, and destroys shared resources.

use std::sync::{ Arc, Condvar, Mutex };

use crate::error::Result;
use crate::naming::Names;
use crate::region::SharedRegion;
use crate::stats::Report;
use crate::sync::{ ControlGuard, SyncObjects };

/// Block until SIGINT (or another external stop signal) arrives, without
/// busy-looping — the `ctrlc` handler only flips a flag and notifies a
/// condvar.
fn wait_for_interrupt() -> Result<()> {
    let pair = Arc::new((Mutex::new(false), Condvar::new()));
    let handler_pair = Arc::clone(&pair);

    ctrlc::set_handler(move || {
        let (lock, cvar) = &*handler_pair;
        let mut fired = lock.lock().unwrap();
        *fired = true;
        cvar.notify_one();
    }).map_err(|e| crate::error::RingMaskError::ResourceError {
        message: format!("failed to install signal handler: {e}"),
    })?;

    let (lock, cvar) = &*pair;
    let mut fired = lock.lock().unwrap();
    while !*fired {
        fired = cvar.wait(fired).unwrap();
    }
    Ok(())
}

/// Run the finalizer end to end: attach, wait for the signal, drain, report,
/// destroy (IDLE -> SIGNALED -> DRAINING -> REPORTING -> DONE).
pub fn run(base_name: &str) -> Result<Report> {
    let names = Names::derive(base_name)?;
    let mut region = SharedRegion::open(&names)?;
    let sync = SyncObjects::open(&names)?;

    tracing::info!(base_name, "finalizer ready, waiting for interrupt");
    wait_for_interrupt()?;
    tracing::info!("interrupt received, starting graceful shutdown");

    let total_workers = {
        let _guard = ControlGuard::acquire(&sync.control)?;
        region.header_mut().set_shutdown();
        region.header().total_workers()
    };

    tracing::info!(total_workers, "broadcasting shutdown to all workers");
    for _ in 0..total_workers {
        sync.empty.post()?;
        sync.full.post()?;
    }

    tracing::info!("waiting for the last worker to leave");
    sync.done.wait()?;
    tracing::info!("all workers have exited");

    let total_bytes = region.total_bytes();
    let snapshot = {
        let _guard = ControlGuard::acquire(&sync.control)?;
        region.header().check_invariants()?;
        region.header().snapshot()
    };
    let report = Report {
        base_name: base_name.to_string(),
        total_bytes,
        snapshot,
    };
    report.log();

    drop(region);
    SyncObjects::unlink_all(&names);
    SharedRegion::unlink(&names);
    tracing::info!("shared resources unlinked, shutdown complete");

    Ok(report)
}

