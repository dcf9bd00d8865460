// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! Commit Markers (`.ids`)
//!
//! A sequence of fixed 8-byte big-endian signed integers. Slot 0 holds the
//! first committed id verbatim (the file's base). Every later slot holds
//! `id - base`, which may be negative because commits arrive in any order.
//!
//! ```text
//! [base][id1 - base][id2 - base]...
//! ```

use crate::codec::read_full;
use crate::error::{JournalError, Result};
use byteorder::{BigEndian, ByteOrder, WriteBytesExt};
use roaring::RoaringTreemap;
use rustc_hash::FxHashSet;
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

pub const ID_WIDTH: usize = 8;

/// Appends commit markers to an id file.
pub struct IdEncoder {
    file: BufWriter<File>,
    base: Option<i64>,
    count: u64,
}

impl IdEncoder {
    /// Wraps an open id file. If the file already holds markers, its base is
    /// read back so new markers stay relative to it.
    pub fn new(mut file: File) -> Result<Self> {
        let len = file.metadata()?.len();
        let base = if len >= ID_WIDTH as u64 {
            let mut slot = [0u8; ID_WIDTH];
            file.seek(SeekFrom::Start(0))?;
            file.read_exact(&mut slot)?;
            Some(BigEndian::read_i64(&slot))
        } else {
            None
        };
        file.seek(SeekFrom::End(0))?;

        Ok(Self {
            file: BufWriter::new(file),
            base,
            count: len / ID_WIDTH as u64,
        })
    }

    /// Buffers one commit marker. Negative ids are rejected without touching
    /// the encoder.
    pub fn write(&mut self, id: i64) -> Result<()> {
        if id < 0 {
            return Err(JournalError::NegativeId(id));
        }
        let slot = match self.base {
            Some(base) => id - base,
            None => id,
        };
        self.file.write_i64::<BigEndian>(slot)?;
        if self.base.is_none() {
            self.base = Some(id);
        }
        self.count += 1;
        Ok(())
    }

    pub fn flush(&mut self) -> Result<()> {
        self.file.flush()?;
        Ok(())
    }

    pub fn base(&self) -> Option<i64> {
        self.base
    }

    /// Markers in the file, including ones written before it was reopened.
    pub fn count(&self) -> u64 {
        self.count
    }

    /// Flushes, fsyncs and hands back the file handle.
    pub fn into_file(self) -> Result<File> {
        let file = self.file.into_inner().map_err(|e| e.into_error())?;
        file.sync_all()?;
        Ok(file)
    }
}

/// Reads commit markers back, resolving each against the file's base.
pub struct IdDecoder {
    reader: BufReader<File>,
    path: PathBuf,
    base: Option<i64>,
    decoded: u64,
}

impl IdDecoder {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = File::open(&path).map_err(|e| JournalError::fs("open", &path, e))?;
        Ok(Self {
            reader: BufReader::new(file),
            path,
            base: None,
            decoded: 0,
        })
    }

    /// Next absolute id, or `None` at end of file.
    pub fn next_id(&mut self) -> Result<Option<i64>> {
        let mut slot = [0u8; ID_WIDTH];
        let got = read_full(&mut self.reader, &mut slot)?;
        if got == 0 {
            return Ok(None);
        }
        if got < ID_WIDTH {
            tracing::warn!(
                file = %self.path.display(),
                slot = self.decoded,
                partial_bytes = got,
                "ignoring incomplete id at end of id file"
            );
            return Ok(None);
        }

        let value = BigEndian::read_i64(&slot);
        let id = match self.base {
            None => {
                self.base = Some(value);
                value
            }
            Some(base) => base.checked_add(value).ok_or_else(|| {
                JournalError::CorruptIds(format!(
                    "{}: slot {} overflows (base {}, offset {})",
                    self.path.display(),
                    self.decoded,
                    base,
                    value
                ))
            })?,
        };
        if id < 0 {
            return Err(JournalError::CorruptIds(format!(
                "{}: slot {} decodes to negative id {}",
                self.path.display(),
                self.decoded,
                id
            )));
        }

        self.decoded += 1;
        Ok(Some(id))
    }

    /// Base id, known once the first slot has been read.
    pub fn base(&self) -> Option<i64> {
        self.base
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Largest committed id in the file.
    pub fn load_max_id(mut self) -> Result<Option<i64>> {
        let mut max = None;
        while let Some(id) = self.next_id()? {
            max = Some(max.map_or(id, |m: i64| m.max(id)));
        }
        Ok(max)
    }

    /// All committed ids as a compressed bitmap, suited to large sparse sets.
    pub fn load_bitmap(mut self) -> Result<RoaringTreemap> {
        let mut bitmap = RoaringTreemap::new();
        while let Some(id) = self.next_id()? {
            bitmap.insert(id as u64);
        }
        Ok(bitmap)
    }

    /// All committed ids as a plain hash set.
    pub fn load_set(mut self) -> Result<FxHashSet<i64>> {
        let mut set = FxHashSet::default();
        while let Some(id) = self.next_id()? {
            set.insert(id);
        }
        Ok(set)
    }
}

impl Iterator for IdDecoder {
    type Item = Result<i64>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_id().transpose()
    }
}
