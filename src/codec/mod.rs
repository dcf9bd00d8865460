// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! On-disk encodings for buffer generations.
//!
//! - `.buf`: framed records, see [`records`]
//! - `.ids`: fixed-width base-relative commit markers, see [`ids`]

pub mod ids;
pub mod records;

pub use ids::{IdDecoder, IdEncoder};
pub use records::{RecordDecoder, RecordEncoder};

use std::io::{self, Read};

/// Reads until `buf` is full or the reader is exhausted.
///
/// Returns the number of bytes read. Anything short of `buf.len()` means the
/// stream ended, possibly in the middle of a torn trailing write.
pub(crate) fn read_full<R: Read>(reader: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}
