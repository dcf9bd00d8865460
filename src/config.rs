// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! Journal configuration.

use crate::error::{JournalError, Result};
use std::path::PathBuf;
use std::time::Duration;

/// Default rotation threshold for a data file (100 MiB).
pub const DEFAULT_ROTATE_SIZE_BYTES: u64 = 100 * 1024 * 1024;

/// Default period of the background flush task.
pub const DEFAULT_FLUSH_INTERVAL: Duration = Duration::from_secs(1);

/// Data file size is only checked every this many writes.
pub const DEFAULT_SIZE_CHECK_EVERY: u64 = 100;

pub const DEFAULT_DIR_MODE: u32 = 0o774;
pub const DEFAULT_FILE_MODE: u32 = 0o664;

#[derive(Debug, Clone)]
pub struct JournalConfig {
    pub buffer_dir: PathBuf,
    pub rotate_size_bytes: u64,
    pub flush_interval: Duration,
    pub size_check_every: u64,
    /// Applied on unix only.
    pub dir_mode: u32,
    /// Applied on unix only.
    pub file_mode: u32,
}

impl JournalConfig {
    pub fn new(buffer_dir: impl Into<PathBuf>) -> Self {
        Self {
            buffer_dir: buffer_dir.into(),
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.flush_interval.is_zero() {
            return Err(JournalError::InvalidConfig(
                "flush_interval must be greater than zero".into(),
            ));
        }
        if self.size_check_every == 0 {
            return Err(JournalError::InvalidConfig(
                "size_check_every must be at least 1".into(),
            ));
        }
        if self.buffer_dir.as_os_str().is_empty() {
            return Err(JournalError::InvalidConfig("buffer_dir is empty".into()));
        }
        Ok(())
    }
}

impl Default for JournalConfig {
    fn default() -> Self {
        Self {
            buffer_dir: PathBuf::from("buffer"),
            rotate_size_bytes: DEFAULT_ROTATE_SIZE_BYTES,
            flush_interval: DEFAULT_FLUSH_INTERVAL,
            size_check_every: DEFAULT_SIZE_CHECK_EVERY,
            dir_mode: DEFAULT_DIR_MODE,
            file_mode: DEFAULT_FILE_MODE,
        }
    }
}
