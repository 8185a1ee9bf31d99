//! Error types for the ring-mask IPC core.

use thiserror::Error;

/// Result type alias for ringmask operations.
pub type Result<T> = std::result::Result<T, RingMaskError>;

/// Error taxonomy for the shared-region lifecycle and worker loops.
///
/// Interrupted syscalls and observed shutdown are deliberately not variants
/// here: an interrupted syscall is retried locally (see
/// [`crate::sync::NamedSemaphore::wait`]), and an observed shutdown flag is
/// normal loop-ending control flow, not an error.
#[derive(Error, Debug)]
pub enum RingMaskError {
    /// Invalid user input: empty base name, non-positive capacity, mask out
    /// of range, missing source file, or a derived name that would truncate.
    #[error("config error: {message}")]
    ConfigError {
        /// Description of the invalid input.
        message: String,
    },

    /// A region with the same name already exists with incompatible config.
    #[error("config mismatch: {message}")]
    ConfigMismatch {
        /// Description of the mismatch (e.g. capacity).
        message: String,
    },

    /// Failure to create, open, map, or destroy shared kernel resources.
    #[error("resource error: {message}")]
    ResourceError {
        /// Description of the failed resource operation.
        message: String,
    },

    /// Creation failed because an incompatible prior object exists and could
    /// not be unlinked.
    #[error("resource already in use: {message}")]
    ResourceInUse {
        /// Description of the conflicting resource.
        message: String,
    },

    /// Seek/read/write failure on the source or output file.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Header values violate an invariant after `control` was acquired
    /// (e.g. an index out of `[0, capacity)`). Fatal.
    #[error("corrupt shared state: {message}")]
    CorruptState {
        /// Description of the violated invariant.
        message: String,
    },

    /// A `fork`/`waitpid` call failed.
    #[error("process error: {0}")]
    Process(#[from] nix::Error),
}
