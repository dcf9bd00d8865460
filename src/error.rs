// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! Error types.

use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum JournalError {
    /// The live generation is held by a writer or a rotation. Retry shortly.
    #[error("rotation in progress, retry the write")]
    RotationInProgress,

    #[error("journal is closed")]
    Closed,

    #[error("buffer path {path:?} exists but is not a directory")]
    NotADirectory { path: PathBuf },

    #[error("failed to {action} {path:?}: {source}")]
    Fs {
        action: &'static str,
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("malformed buffer filename {name:?}: {reason}")]
    MalformedFilename { name: String, reason: String },

    #[error("sequence exhausted for date {date}: cannot go past {max}")]
    SequenceExhausted { date: String, max: u32 },

    #[error("id must be non-negative, got {0}")]
    NegativeId(i64),

    #[error("record encoding failed: {0}")]
    Encode(String),

    #[error("record decoding failed at offset {offset}: {reason}")]
    Decode { offset: u64, reason: String },

    #[error("checksum mismatch at offset {offset}: expected {expected:#018x}, found {found:#018x}")]
    ChecksumMismatch {
        offset: u64,
        expected: u64,
        found: u64,
    },

    #[error("frame at offset {offset} claims {len} bytes, limit is {limit}")]
    FrameTooLarge { offset: u64, len: u32, limit: u32 },

    #[error("id log corrupted: {0}")]
    CorruptIds(String),

    #[error("legacy replay has not been drained, refusing to clean")]
    ReplayInProgress,

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("no tokio runtime available: {0}")]
    Runtime(String),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

impl JournalError {
    pub(crate) fn fs(action: &'static str, path: &Path, source: io::Error) -> Self {
        JournalError::Fs {
            action,
            path: path.to_path_buf(),
            source,
        }
    }

    /// True for the contention signal callers are expected to retry on.
    pub fn is_retryable(&self) -> bool {
        matches!(self, JournalError::RotationInProgress)
    }
}

pub type Result<T> = std::result::Result<T, JournalError>;
