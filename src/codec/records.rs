// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! Record Frames (`.buf`)
//!
//! # Frame Format
//! ```text
//! [len: u32 LE][crc64: u64 LE][bincode payload: len bytes]
//! ```
//!
//! Frames are written into a `BufWriter` and only reach the file on
//! [`RecordEncoder::flush`]. A crash can therefore leave a partial frame at the
//! end of the file; the decoder treats that as end of stream. Anything wrong
//! with a complete frame is a hard error.

use crate::codec::read_full;
use crate::error::{JournalError, Result};
use crate::record::Record;
use byteorder::{ByteOrder, LittleEndian};
use crc64fast::Digest;
use std::fs::File;
use std::io::{self, BufReader, BufWriter, Write};
use std::marker::PhantomData;
use std::path::{Path, PathBuf};

pub const FRAME_HEADER_LEN: usize = 4 + 8;

/// Upper bound on a single encoded record.
pub const MAX_FRAME_LEN: u32 = 64 * 1024 * 1024;

fn checksum(payload: &[u8]) -> u64 {
    let mut digest = Digest::new();
    digest.write(payload);
    digest.sum64()
}

/// Appends framed records to a data file.
pub struct RecordEncoder<R> {
    file: BufWriter<File>,
    bytes_written: u64,
    records_written: u64,
    _record: PhantomData<fn(&R)>,
}

impl<R: Record> RecordEncoder<R> {
    pub fn new(file: File) -> Result<Self> {
        let bytes_written = file.metadata()?.len();
        Ok(Self {
            file: BufWriter::new(file),
            bytes_written,
            records_written: 0,
            _record: PhantomData,
        })
    }

    /// Buffers one record. Does not flush.
    pub fn write(&mut self, record: &R) -> Result<()> {
        let payload = bincode::serde::encode_to_vec(record, bincode::config::standard())
            .map_err(|e| JournalError::Encode(e.to_string()))?;

        let len = u32::try_from(payload.len())
            .ok()
            .filter(|len| *len <= MAX_FRAME_LEN)
            .ok_or_else(|| {
                JournalError::Encode(format!(
                    "record of {} bytes exceeds frame limit of {}",
                    payload.len(),
                    MAX_FRAME_LEN
                ))
            })?;

        let mut frame = Vec::with_capacity(FRAME_HEADER_LEN + payload.len());
        frame.extend_from_slice(&len.to_le_bytes());
        frame.extend_from_slice(&checksum(&payload).to_le_bytes());
        frame.extend_from_slice(&payload);

        self.file.write_all(&frame)?;
        self.bytes_written += frame.len() as u64;
        self.records_written += 1;
        Ok(())
    }

    pub fn flush(&mut self) -> Result<()> {
        self.file.flush()?;
        Ok(())
    }

    /// Size of the data file once everything buffered has been flushed.
    pub fn bytes_written(&self) -> u64 {
        self.bytes_written
    }

    /// Records written through this encoder (not counting pre-existing ones).
    pub fn records_written(&self) -> u64 {
        self.records_written
    }

    /// Flushes, fsyncs and hands back the file handle.
    pub fn into_file(self) -> Result<File> {
        let file = self.file.into_inner().map_err(|e| e.into_error())?;
        file.sync_all()?;
        Ok(file)
    }
}

/// Hard failure at `offset`, replayed on every later read.
#[derive(Clone, Debug)]
enum Fault {
    Checksum { expected: u64, found: u64 },
    TooLarge { len: u32 },
    Decode(String),
    Io(io::ErrorKind, String),
}

impl Fault {
    fn to_error(&self, offset: u64) -> JournalError {
        match self {
            Fault::Checksum { expected, found } => JournalError::ChecksumMismatch {
                offset,
                expected: *expected,
                found: *found,
            },
            Fault::TooLarge { len } => JournalError::FrameTooLarge {
                offset,
                len: *len,
                limit: MAX_FRAME_LEN,
            },
            Fault::Decode(reason) => JournalError::Decode {
                offset,
                reason: reason.clone(),
            },
            Fault::Io(kind, msg) => JournalError::Io(io::Error::new(*kind, msg.clone())),
        }
    }
}

/// Streams framed records back out of a data file.
///
/// Once a frame fails, the reader position inside the file is unknown, so
/// the decoder stops there: every later `read` returns the same error and
/// `offset` stays at the start of the bad frame.
pub struct RecordDecoder<R> {
    reader: BufReader<File>,
    path: PathBuf,
    offset: u64,
    fault: Option<Fault>,
    _record: PhantomData<fn() -> R>,
}

impl<R: Record> RecordDecoder<R> {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = File::open(&path).map_err(|e| JournalError::fs("open", &path, e))?;
        Ok(Self {
            reader: BufReader::new(file),
            path,
            offset: 0,
            fault: None,
            _record: PhantomData,
        })
    }

    /// Next record, or `None` once the file is exhausted.
    pub fn read(&mut self) -> Result<Option<R>> {
        if let Some(fault) = &self.fault {
            return Err(fault.to_error(self.offset));
        }
        match self.read_frame() {
            Ok(record) => Ok(record),
            Err(fault) => {
                let err = fault.to_error(self.offset);
                tracing::error!(
                    file = %self.path.display(),
                    offset = self.offset,
                    error = %err,
                    "unreadable frame, decoder stopped"
                );
                self.fault = Some(fault);
                Err(err)
            }
        }
    }

    fn read_frame(&mut self) -> std::result::Result<Option<R>, Fault> {
        let io_fault = |e: io::Error| Fault::Io(e.kind(), e.to_string());
        let mut header = [0u8; FRAME_HEADER_LEN];
        let got = read_full(&mut self.reader, &mut header).map_err(io_fault)?;
        if got == 0 {
            return Ok(None);
        }
        if got < FRAME_HEADER_LEN {
            self.torn_tail(got);
            return Ok(None);
        }

        let len = LittleEndian::read_u32(&header[0..4]);
        let expected = LittleEndian::read_u64(&header[4..12]);
        if len > MAX_FRAME_LEN {
            return Err(Fault::TooLarge { len });
        }

        let mut payload = vec![0u8; len as usize];
        let got = read_full(&mut self.reader, &mut payload).map_err(io_fault)?;
        if got < payload.len() {
            self.torn_tail(FRAME_HEADER_LEN + got);
            return Ok(None);
        }

        let found = checksum(&payload);
        if found != expected {
            return Err(Fault::Checksum { expected, found });
        }

        let (record, used) =
            bincode::serde::decode_from_slice::<R, _>(&payload, bincode::config::standard())
                .map_err(|e| Fault::Decode(e.to_string()))?;
        if used != payload.len() {
            return Err(Fault::Decode(format!(
                "{} trailing bytes in frame",
                payload.len() - used
            )));
        }

        self.offset += (FRAME_HEADER_LEN + payload.len()) as u64;
        Ok(Some(record))
    }

    /// Byte offset of the next frame.
    pub fn offset(&self) -> u64 {
        self.offset
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn torn_tail(&self, partial: usize) {
        tracing::warn!(
            file = %self.path.display(),
            offset = self.offset,
            partial_bytes = partial,
            "ignoring incomplete record at end of buffer file"
        );
    }
}

impl<R: Record> Iterator for RecordDecoder<R> {
    type Item = Result<R>;

    /// Yields a hard error once, then ends.
    fn next(&mut self) -> Option<Self::Item> {
        if self.fault.is_some() {
            return None;
        }
        self.read().transpose()
    }
}
