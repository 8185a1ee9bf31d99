//! Configuration types for each of the four executables.

use std::path::{ Path, PathBuf };

use crate::error::{ RingMaskError, Result };

/// Stepping mode shared by producer and consumer workers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Workers process without pausing.
    Automatic,
    /// Each worker prints a prompt and waits for a line of input before
    /// every produce/consume iteration.
    Manual,
}

impl std::str::FromStr for Mode {
    type Err = RingMaskError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "automatic" => Ok(Mode::Automatic),
            "manual" => Ok(Mode::Manual),
            other =>
                Err(RingMaskError::ConfigError {
                    message: format!("mode must be 'automatic' or 'manual', got '{other}'"),
                }),
        }
    }
}

/// Inputs to the Initializer.
#[derive(Debug, Clone)]
pub struct InitConfig {
    pub base_name: String,
    pub capacity: usize,
    pub mask: u8,
    pub source_path: PathBuf,
}

impl InitConfig {
    /// Validate raw inputs, rejecting an empty base name, non-positive
    /// capacity, out-of-range mask, or unreadable source file.
    pub fn new(base_name: String, capacity: i64, mask: i64, source_path: PathBuf) -> Result<Self> {
        if base_name.is_empty() {
            return Err(RingMaskError::ConfigError {
                message: "base name must not be empty".into(),
            });
        }
        if capacity <= 0 {
            return Err(RingMaskError::ConfigError {
                message: "capacity must be greater than 0".into(),
            });
        }
        if !(0..=255).contains(&mask) {
            return Err(RingMaskError::ConfigError {
                message: format!("mask must be in [0, 255], got {mask}"),
            });
        }
        if !source_path.is_file() {
            return Err(RingMaskError::ConfigError {
                message: format!("source file does not exist: {}", source_path.display()),
            });
        }
        std::fs::File::open(&source_path).map_err(|e| RingMaskError::ConfigError {
            message: format!("source file is not readable: {e}"),
        })?;

        Ok(Self {
            base_name,
            capacity: capacity as usize,
            mask: mask as u8,
            source_path,
        })
    }
}

/// Inputs to the Producer/Consumer launchers.
#[derive(Debug, Clone)]
pub struct LaunchConfig {
    pub base_name: String,
    pub mode: Mode,
    pub worker_count: u32,
}

impl LaunchConfig {
    pub fn new(base_name: String, mode: Mode, worker_count: u32) -> Result<Self> {
        if base_name.is_empty() {
            return Err(RingMaskError::ConfigError {
                message: "base name must not be empty".into(),
            });
        }
        if worker_count == 0 {
            return Err(RingMaskError::ConfigError {
                message: "worker count must be 1 or more".into(),
            });
        }
        Ok(Self { base_name, mode, worker_count })
    }
}

/// The fixed, implementation-known output path: the consumer launcher
/// creates/truncates this file once before spawning workers.
/// Overridable via `RINGMASK_OUTPUT_PATH` for tests; defaults to
/// `./output.txt`.
pub fn default_output_path() -> PathBuf {
    std::env::var_os("RINGMASK_OUTPUT_PATH")
        .map(PathBuf::from)
        .unwrap_or_else(|| Path::new("output.txt").to_path_buf())
}
