//! The Initializer: creates the shared region and the four named
//! synchronization objects, then exits.

use crate::config::InitConfig;
use crate::error::Result;
use crate::naming::Names;
use crate::region::SharedRegion;
use crate::sync::SyncObjects;

/// Run the initializer end to end.
pub fn run(config: &InitConfig) -> Result<()> {
    let names = Names::derive(&config.base_name)?;

    // Best-effort unlink of any residual objects (absence is fine).
    SyncObjects::unlink_all(&names);
    SharedRegion::unlink(&names);

    // Create the region and populate the header. Fail-fast: if anything
    // below fails, unlink whatever we had already created.
    let source_path = config.source_path.to_string_lossy().into_owned();
    let region = match
        SharedRegion::create(&names, config.capacity, config.mask, &source_path)
    {
        Ok(region) => region,
        Err(err) => {
            SharedRegion::unlink(&names);
            return Err(err);
        }
    };

    // Create the four synchronization objects with their initial values
    // (control=1, empty=capacity, full=0, done=0).
    let _sync = match SyncObjects::create(&names, config.capacity) {
        Ok(sync) => sync,
        Err(err) => {
            drop(region);
            SharedRegion::unlink(&names);
            SyncObjects::unlink_all(&names);
            return Err(err);
        }
    };

    tracing::info!(
        base_name = %config.base_name,
        capacity = config.capacity,
        mask = config.mask,
        source = %source_path,
        total_bytes = region.total_bytes(),
        "initialization complete, IPC resources ready"
    );

    // Handles drop here, releasing this process's local view.
    Ok(())
}
