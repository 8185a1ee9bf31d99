//! Derivation of the shared region name and the four synchronization-object
//! names from a single user-supplied base name.

use crate::error::{ RingMaskError, Result };

/// Suffix appended to the base name for the `control` mutex.
pub const CONTROL_SUFFIX: &str = "_control";
/// Suffix appended to the base name for the `empty` semaphore.
pub const EMPTY_SUFFIX: &str = "_empty";
/// Suffix appended to the base name for the `full` semaphore.
pub const FULL_SUFFIX: &str = "_full";
/// Suffix appended to the base name for the `done` semaphore.
pub const DONE_SUFFIX: &str = "_done";

/// POSIX named semaphores and `shm_open` names are capped at `NAME_MAX` (255)
/// on Linux; leave headroom below that shared by every derived name.
pub const MAX_NAME_LEN: usize = 200;

/// The four names derived from a base name, plus the shared-region name
/// itself (which is the base name, unsuffixed).
#[derive(Debug, Clone)]
pub struct Names {
    /// Name of the shared memory region (equal to the base name).
    pub region: String,
    /// Name of the `control` binary semaphore.
    pub control: String,
    /// Name of the `empty` counting semaphore.
    pub empty: String,
    /// Name of the `full` counting semaphore.
    pub full: String,
    /// Name of the `done` signaling semaphore.
    pub done: String,
}

impl Names {
    /// Derive all names from `base`, failing with [`RingMaskError::ConfigError`]
    /// if `base` is empty or any derived name would exceed [`MAX_NAME_LEN`].
    pub fn derive(base: &str) -> Result<Self> {
        if base.is_empty() {
            return Err(RingMaskError::ConfigError {
                message: "base name must not be empty".into(),
            });
        }
        if base.contains('/') {
            return Err(RingMaskError::ConfigError {
                message: "base name must not contain '/'".into(),
            });
        }

        let suffixed = |suffix: &str| -> Result<String> {
            let name = format!("{base}{suffix}");
            if name.len() > MAX_NAME_LEN {
                return Err(RingMaskError::ConfigError {
                    message: format!(
                        "derived name '{name}' exceeds the {MAX_NAME_LEN}-byte limit"
                    ),
                });
            }
            Ok(name)
        };

        Ok(Names {
            region: base.to_string(),
            control: suffixed(CONTROL_SUFFIX)?,
            empty: suffixed(EMPTY_SUFFIX)?,
            full: suffixed(FULL_SUFFIX)?,
            done: suffixed(DONE_SUFFIX)?,
        })
    }

    /// `/`-prefixed shared-memory object name, as required by `shm_open(3)`.
    pub fn shm_path(&self) -> String {
        format!("/{}", self.region)
    }

    /// `/`-prefixed semaphore name, as required by `sem_open(3)`.
    pub fn sem_path(name: &str) -> String {
        format!("/{name}")
    }
}
