// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! Legacy Replay
//!
//! After a restart or rotation, the generations that are no longer being
//! written still hold records that may never have been delivered. The
//! replayer streams those records back, skipping every record whose id shows
//! up in any of the legacy id files.
//!
//! # States
//! ```text
//! Uninitialized -> IdsLoaded -> Draining(file i) -> Exhausted
//! ```
//!
//! Ids are loaded lazily on the first `load()`, so constructing a replayer is
//! free. The replayer has a single consumer.

use crate::codec::{IdDecoder, RecordDecoder};
use crate::error::{JournalError, Result};
use crate::record::Record;
use crate::telemetry;
use roaring::RoaringTreemap;
use std::fs;
use std::io;
use std::mem;
use std::path::{Path, PathBuf};

enum ReplayState<R> {
    Uninitialized,
    IdsLoaded,
    Draining {
        index: usize,
        decoder: RecordDecoder<R>,
    },
    Exhausted,
}

pub struct LegacyReplayer<R> {
    data_files: Vec<PathBuf>,
    id_files: Vec<PathBuf>,
    committed: RoaringTreemap,
    state: ReplayState<R>,
    replayed: u64,
    skipped: u64,
}

impl<R: Record> LegacyReplayer<R> {
    pub fn new(data_files: Vec<PathBuf>, id_files: Vec<PathBuf>) -> Self {
        Self {
            data_files,
            id_files,
            committed: RoaringTreemap::new(),
            state: ReplayState::Uninitialized,
            replayed: 0,
            skipped: 0,
        }
    }

    /// Next record that was written but never committed, or `None` once every
    /// legacy data file has been read.
    pub fn load(&mut self) -> Result<Option<R>> {
        loop {
            match mem::replace(&mut self.state, ReplayState::Exhausted) {
                ReplayState::Uninitialized => {
                    if self.data_files.is_empty() {
                        return Ok(None);
                    }
                    self.committed = match self.load_committed() {
                        Ok(committed) => committed,
                        Err(e) => {
                            self.state = ReplayState::Uninitialized;
                            return Err(e);
                        }
                    };
                    tracing::info!(
                        data_files = self.data_files.len(),
                        id_files = self.id_files.len(),
                        committed = self.committed.len(),
                        "starting legacy replay"
                    );
                    self.state = ReplayState::IdsLoaded;
                }
                ReplayState::IdsLoaded => match self.open_data_file(0) {
                    Ok(decoder) => self.state = ReplayState::Draining { index: 0, decoder },
                    Err(e) => {
                        self.state = ReplayState::IdsLoaded;
                        return Err(e);
                    }
                },
                ReplayState::Draining { index, mut decoder } => match decoder.read() {
                    Ok(Some(record)) => {
                        self.state = ReplayState::Draining { index, decoder };
                        let id = record.id();
                        if id >= 0 && self.committed.contains(id as u64) {
                            self.skipped += 1;
                            metrics::increment_counter!(telemetry::LEGACY_SKIPPED);
                            continue;
                        }
                        self.replayed += 1;
                        metrics::increment_counter!(telemetry::LEGACY_REPLAYED);
                        return Ok(Some(record));
                    }
                    Ok(None) => {
                        let next = index + 1;
                        if next >= self.data_files.len() {
                            tracing::info!(
                                replayed = self.replayed,
                                skipped = self.skipped,
                                "legacy replay exhausted"
                            );
                            return Ok(None);
                        }
                        match self.open_data_file(next) {
                            Ok(next_decoder) => {
                                self.state = ReplayState::Draining {
                                    index: next,
                                    decoder: next_decoder,
                                };
                            }
                            Err(e) => {
                                self.state = ReplayState::Draining { index, decoder };
                                return Err(e);
                            }
                        }
                    }
                    Err(e) => {
                        self.state = ReplayState::Draining { index, decoder };
                        return Err(e);
                    }
                },
                ReplayState::Exhausted => return Ok(None),
            }
        }
    }

    /// Deletes every legacy data and id file. Only valid once `load` has
    /// returned `None`.
    pub fn clean(&mut self) -> Result<()> {
        if !self.is_exhausted() {
            return Err(JournalError::ReplayInProgress);
        }

        let mut first_err = None;
        for path in self.data_files.iter().chain(self.id_files.iter()) {
            if let Err(e) = remove_if_present(path) {
                tracing::warn!(file = %path.display(), error = %e, "failed to remove legacy file");
                first_err.get_or_insert(e);
            }
        }
        if first_err.is_none() {
            tracing::debug!(
                data_files = self.data_files.len(),
                id_files = self.id_files.len(),
                "removed legacy files"
            );
        }
        first_err.map_or(Ok(()), Err)
    }

    pub fn is_exhausted(&self) -> bool {
        matches!(self.state, ReplayState::Exhausted)
    }

    /// Records handed back by `load` so far.
    pub fn replayed(&self) -> u64 {
        self.replayed
    }

    /// Records dropped because their id was already committed.
    pub fn skipped(&self) -> u64 {
        self.skipped
    }

    pub fn data_files(&self) -> &[PathBuf] {
        &self.data_files
    }

    pub fn id_files(&self) -> &[PathBuf] {
        &self.id_files
    }

    fn load_committed(&self) -> Result<RoaringTreemap> {
        let mut committed = RoaringTreemap::new();
        for path in &self.id_files {
            committed |= IdDecoder::open(path)?.load_bitmap()?;
        }
        Ok(committed)
    }

    fn open_data_file(&self, index: usize) -> Result<RecordDecoder<R>> {
        let path = &self.data_files[index];
        tracing::debug!(file = %path.display(), index, "replaying legacy data file");
        RecordDecoder::open(path)
    }
}

fn remove_if_present(path: &Path) -> Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(JournalError::fs("remove", path, e)),
    }
}
