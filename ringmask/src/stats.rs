//! Finalizer report: the final counters printed when the pipeline tears down.

use crate::region::Snapshot;

/// Stats printed once, in a fixed line order, when the finalizer tears down.
#[derive(Debug, Clone)]
pub struct Report {
    pub base_name: String,
    pub total_bytes: usize,
    pub snapshot: Snapshot,
}

impl Report {
    /// Emit the report as a block of `tracing::info!` lines, in a fixed
    /// order.
    pub fn log(&self) {
        tracing::info!(base_name = %self.base_name, "shared region base name");
        tracing::info!(total_bytes = self.total_bytes, "shared region size");
        tracing::info!(total_produced = self.snapshot.total_produced, "bytes produced");
        tracing::info!(total_consumed = self.snapshot.total_consumed, "bytes consumed");
        tracing::info!(
            in_flight = self.snapshot.total_produced - self.snapshot.total_consumed,
            "bytes still in the ring"
        );
        tracing::info!(
            producers = format!("{}/{}", self.snapshot.producers_active, self.snapshot.producers_total),
            "producers (active/total)"
        );
        tracing::info!(
            consumers = format!("{}/{}", self.snapshot.consumers_active, self.snapshot.consumers_total),
            "consumers (active/total)"
        );
    }
}
