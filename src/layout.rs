// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! Buffer Directory Layout
//!
//! A buffer directory holds generations of paired files:
//!
//! ```text
//! {YYYYMMDD}{NNNN}.buf   framed records
//! {YYYYMMDD}{NNNN}.ids   commit markers
//! ```
//!
//! Both the date and the sequence are fixed width, so the lexical order of
//! names is the order in which generations were created. The latest file of a
//! kind is simply the lexically greatest name.

use crate::error::{JournalError, Result};
use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use std::fs::{self, DirBuilder};
use std::io;
use std::path::{Path, PathBuf};

pub const DATA_EXTENSION: &str = "buf";
pub const IDS_EXTENSION: &str = "ids";

const DATE_FORMAT: &str = "%Y%m%d";
const DATE_WIDTH: usize = 8;
const SEQ_WIDTH: usize = 4;
const STEM_WIDTH: usize = DATE_WIDTH + SEQ_WIDTH;

pub const FIRST_SEQ: u32 = 1;
/// Largest sequence that still fits in `SEQ_WIDTH` digits.
pub const MAX_SEQ: u32 = 9999;

/// Sequence restarts once the latest file is at least this old.
const RESET_AFTER_HOURS: i64 = 24;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FileKind {
    Data,
    Ids,
}

impl FileKind {
    pub fn extension(self) -> &'static str {
        match self {
            FileKind::Data => DATA_EXTENSION,
            FileKind::Ids => IDS_EXTENSION,
        }
    }
}

/// Returns the kind of a generation file, or `None` for anything that does
/// not follow the `{date}{seq}.{ext}` grammar.
pub fn classify(name: &str) -> Option<FileKind> {
    let (stem, ext) = name.split_once('.')?;
    if stem.len() != STEM_WIDTH || !stem.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    match ext {
        DATA_EXTENSION => Some(FileKind::Data),
        IDS_EXTENSION => Some(FileKind::Ids),
        _ => None,
    }
}

pub fn generation_name(date: NaiveDate, seq: u32, kind: FileKind) -> String {
    format!(
        "{}{:0width$}.{}",
        date.format(DATE_FORMAT),
        seq,
        kind.extension(),
        width = SEQ_WIDTH
    )
}

/// Computes the name that follows `latest` for the given kind.
///
/// `latest` must already have passed [`classify`].
pub fn next_name(latest: Option<&str>, kind: FileKind, now: NaiveDateTime) -> Result<String> {
    let Some(latest) = latest else {
        return Ok(generation_name(now.date(), FIRST_SEQ, kind));
    };

    let malformed = |reason: String| JournalError::MalformedFilename {
        name: latest.to_string(),
        reason,
    };

    let date_part = latest
        .get(..DATE_WIDTH)
        .ok_or_else(|| malformed("name too short for a date".into()))?;
    let seq_part = latest
        .get(DATE_WIDTH..STEM_WIDTH)
        .ok_or_else(|| malformed("name too short for a sequence".into()))?;

    let date = NaiveDate::parse_from_str(date_part, DATE_FORMAT)
        .map_err(|e| malformed(format!("bad date {:?}: {}", date_part, e)))?;

    if now - date.and_time(NaiveTime::MIN) >= chrono::Duration::hours(RESET_AFTER_HOURS) {
        return Ok(generation_name(now.date(), FIRST_SEQ, kind));
    }

    let seq: u32 = seq_part
        .parse()
        .map_err(|e| malformed(format!("bad sequence {:?}: {}", seq_part, e)))?;
    if seq >= MAX_SEQ {
        return Err(JournalError::SequenceExhausted {
            date: date_part.to_string(),
            max: MAX_SEQ,
        });
    }

    Ok(generation_name(date, seq + 1, kind))
}

/// Creates `path` (and its parents) if it does not exist yet.
#[cfg_attr(not(unix), allow(unused_variables))]
pub fn ensure_dir(path: &Path, mode: u32) -> Result<()> {
    match fs::metadata(path) {
        Ok(meta) if meta.is_dir() => Ok(()),
        Ok(_) => Err(JournalError::NotADirectory {
            path: path.to_path_buf(),
        }),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            let mut builder = DirBuilder::new();
            builder.recursive(true);
            #[cfg(unix)]
            {
                use std::os::unix::fs::DirBuilderExt;
                builder.mode(mode);
            }
            builder
                .create(path)
                .map_err(|e| JournalError::fs("create directory", path, e))?;
            tracing::info!(dir = %path.display(), "created buffer directory");
            Ok(())
        }
        Err(e) => Err(JournalError::fs("stat", path, e)),
    }
}

/// Result of scanning a buffer directory.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ScanPlan {
    /// Existing data files, oldest first.
    pub old_data_files: Vec<PathBuf>,
    /// Existing id files, oldest first.
    pub old_id_files: Vec<PathBuf>,
    pub next_data_file: PathBuf,
    pub next_id_file: PathBuf,
}

impl ScanPlan {
    pub fn has_legacy(&self) -> bool {
        !self.old_data_files.is_empty() || !self.old_id_files.is_empty()
    }
}

/// Lists the generation files in `dir` and plans the next generation.
pub fn scan_and_plan(dir: &Path, now: NaiveDateTime) -> Result<ScanPlan> {
    let dir = fs::canonicalize(dir).map_err(|e| JournalError::fs("resolve", dir, e))?;

    let mut data_names = Vec::new();
    let mut id_names = Vec::new();

    let entries = fs::read_dir(&dir).map_err(|e| JournalError::fs("read directory", &dir, e))?;
    for entry in entries {
        let entry = entry.map_err(|e| JournalError::fs("read directory", &dir, e))?;
        let file_type = entry
            .file_type()
            .map_err(|e| JournalError::fs("stat", &entry.path(), e))?;
        if file_type.is_dir() {
            continue;
        }
        let Some(name) = entry.file_name().to_str().map(str::to_owned) else {
            continue;
        };
        match classify(&name) {
            Some(FileKind::Data) => data_names.push(name),
            Some(FileKind::Ids) => id_names.push(name),
            None => {}
        }
    }

    data_names.sort();
    id_names.sort();

    let next_data = next_name(data_names.last().map(String::as_str), FileKind::Data, now)?;
    let next_ids = next_name(id_names.last().map(String::as_str), FileKind::Ids, now)?;

    Ok(ScanPlan {
        old_data_files: data_names.iter().map(|n| dir.join(n)).collect(),
        old_id_files: id_names.iter().map(|n| dir.join(n)).collect(),
        next_data_file: dir.join(next_data),
        next_id_file: dir.join(next_ids),
    })
}
