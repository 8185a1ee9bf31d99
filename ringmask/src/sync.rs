//! Named POSIX semaphore wrapper: `control` (binary), `empty`/`full`
//! (counting), and `done` (single-signal).
//!
//! A sync call interrupted by a signal (`EINTR`) is retried transparently —
//! workers retry the wait itself, never the enclosing logical step.

use std::ffi::CString;
use std::io;

use crate::error::{ RingMaskError, Result };
use crate::naming::Names;

/// A single named semaphore, opened or created via `sem_open(3)`.
pub struct NamedSemaphore {
    handle: *mut libc::sem_t,
    name: CString,
}

// The underlying sem_t lives in shared memory maintained by the kernel; the
// handle itself is just a process-local pointer into that mapping.
unsafe impl Send for NamedSemaphore {}

impl NamedSemaphore {
    /// Create a new named semaphore with `initial_value`, failing if one by
    /// this name already exists (`O_CREAT | O_EXCL`).
    pub fn create(name: &str, initial_value: u32) -> Result<Self> {
        let cname = to_cstring(name)?;
        let handle = unsafe {
            libc::sem_open(
                cname.as_ptr(),
                libc::O_CREAT | libc::O_EXCL,
                0o666u32,
                initial_value
            )
        };
        if handle == libc::SEM_FAILED {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::AlreadyExists {
                return Err(RingMaskError::ResourceInUse {
                    message: format!("semaphore '{name}' already exists and could not be unlinked"),
                });
            }
            return Err(RingMaskError::ResourceError {
                message: format!("sem_open(create {name}): {err}"),
            });
        }
        Ok(Self { handle, name: cname })
    }

    /// Open an existing named semaphore.
    pub fn open(name: &str) -> Result<Self> {
        let cname = to_cstring(name)?;
        let handle = unsafe { libc::sem_open(cname.as_ptr(), 0) };
        if handle == libc::SEM_FAILED {
            let err = io::Error::last_os_error();
            return Err(RingMaskError::ResourceError {
                message: format!("sem_open(open {name}): {err}"),
            });
        }
        Ok(Self { handle, name: cname })
    }

    /// Best-effort unlink; absence of the object is not an error.
    pub fn unlink(name: &str) {
        if let Ok(cname) = to_cstring(name) {
            unsafe {
                libc::sem_unlink(cname.as_ptr());
            }
        }
    }

    /// Blocking wait, retrying locally on `EINTR`.
    pub fn wait(&self) -> Result<()> {
        loop {
            let rc = unsafe { libc::sem_wait(self.handle) };
            if rc == 0 {
                return Ok(());
            }
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::Interrupted {
                continue;
            }
            return Err(RingMaskError::ResourceError {
                message: format!("sem_wait({:?}): {err}", self.name),
            });
        }
    }

    /// Release one credit.
    pub fn post(&self) -> Result<()> {
        let rc = unsafe { libc::sem_post(self.handle) };
        if rc != 0 {
            let err = io::Error::last_os_error();
            return Err(RingMaskError::ResourceError {
                message: format!("sem_post({:?}): {err}", self.name),
            });
        }
        Ok(())
    }
}

impl Drop for NamedSemaphore {
    fn drop(&mut self) {
        unsafe {
            libc::sem_close(self.handle);
        }
    }
}

fn to_cstring(name: &str) -> Result<CString> {
    CString::new(name).map_err(|_| RingMaskError::ConfigError {
        message: format!("name '{name}' contains an interior NUL byte"),
    })
}

/// The four named synchronization objects a participant holds open.
pub struct SyncObjects {
    /// Binary mutex protecting the header and ring indices.
    pub control: NamedSemaphore,
    /// Counting semaphore tracking free ring slots.
    pub empty: NamedSemaphore,
    /// Counting semaphore tracking occupied ring slots.
    pub full: NamedSemaphore,
    /// Released exactly once, by the last-leaver worker.
    pub done: NamedSemaphore,
}

impl SyncObjects {
    /// Create all four objects with their initial values: `control` a
    /// binary mutex, `empty` seeded to `capacity`, `full` and `done` at zero.
    pub fn create(names: &Names, capacity: usize) -> Result<Self> {
        Ok(Self {
            control: NamedSemaphore::create(&Names::sem_path(&names.control), 1)?,
            empty: NamedSemaphore::create(&Names::sem_path(&names.empty), capacity as u32)?,
            full: NamedSemaphore::create(&Names::sem_path(&names.full), 0)?,
            done: NamedSemaphore::create(&Names::sem_path(&names.done), 0)?,
        })
    }

    /// Open all four existing objects by name.
    pub fn open(names: &Names) -> Result<Self> {
        Ok(Self {
            control: NamedSemaphore::open(&Names::sem_path(&names.control))?,
            empty: NamedSemaphore::open(&Names::sem_path(&names.empty))?,
            full: NamedSemaphore::open(&Names::sem_path(&names.full))?,
            done: NamedSemaphore::open(&Names::sem_path(&names.done))?,
        })
    }

    /// Best-effort unlink of all four names.
    pub fn unlink_all(names: &Names) {
        NamedSemaphore::unlink(&Names::sem_path(&names.control));
        NamedSemaphore::unlink(&Names::sem_path(&names.empty));
        NamedSemaphore::unlink(&Names::sem_path(&names.full));
        NamedSemaphore::unlink(&Names::sem_path(&names.done));
    }
}

/// RAII guard holding `control` for the duration of a critical section,
/// mirroring the `sem_wait(mutex) ... sem_post(mutex)` bracketing every
/// worker uses around its shared-state accesses.
pub struct ControlGuard<'a> {
    control: &'a NamedSemaphore,
}

impl<'a> ControlGuard<'a> {
    /// Acquire `control`, blocking until available.
    pub fn acquire(control: &'a NamedSemaphore) -> Result<Self> {
        control.wait()?;
        Ok(Self { control })
    }
}

impl Drop for ControlGuard<'_> {
    fn drop(&mut self) {
        let _ = self.control.post();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unique_name(tag: &str) -> String {
        format!("/ringmask-sync-test-{tag}-{}", std::process::id())
    }

    #[test]
    fn create_over_existing_semaphore_is_resource_in_use() {
        let name = unique_name("already-exists");
        NamedSemaphore::unlink(&name);

        let _first = NamedSemaphore::create(&name, 1).unwrap();
        let second = NamedSemaphore::create(&name, 1);
        assert!(matches!(second, Err(RingMaskError::ResourceInUse { .. })));

        NamedSemaphore::unlink(&name);
    }

    #[test]
    fn control_guard_releases_on_drop() {
        let name = unique_name("guard-release");
        NamedSemaphore::unlink(&name);
        let control = NamedSemaphore::create(&name, 1).unwrap();

        {
            let _guard = ControlGuard::acquire(&control).unwrap();
        }
        // If the guard failed to release on drop, this would block forever.
        control.wait().unwrap();
        control.post().unwrap();

        NamedSemaphore::unlink(&name);
    }
}
