// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! bufjournal: a crash-recoverable, append-only buffering journal.
//!
//! Records are appended to a size-rotated `.buf` data file while delivery
//! acknowledgements go to a paired `.ids` file. After a restart or rotation,
//! superseded generations are replayed, minus every record whose id was
//! committed, and then deleted.
//!
//! ```text
//! buffer/
//!   202610160001.buf   <- legacy, replayed then removed
//!   202610160001.ids
//!   202610160002.buf   <- live generation
//!   202610160002.ids
//! ```

pub mod codec;
pub mod config;
pub mod error;
pub mod journal;
pub mod layout;
pub mod legacy;
pub mod record;
pub mod telemetry;

pub use config::JournalConfig;
pub use error::{JournalError, Result};
pub use journal::Journal;
pub use layout::{FileKind, ScanPlan};
pub use legacy::LegacyReplayer;
pub use record::{Entry, Record, Value};
