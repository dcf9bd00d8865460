// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! Metric descriptions. Installing a recorder/exporter is left to the binary.

use std::sync::Once;

pub const RECORDS_WRITTEN: &str = "bufjournal_records_written_total";
pub const IDS_COMMITTED: &str = "bufjournal_ids_committed_total";
pub const WRITES_REJECTED: &str = "bufjournal_writes_rejected_total";
pub const ROTATIONS: &str = "bufjournal_rotations_total";
pub const ROTATION_DURATION: &str = "bufjournal_rotation_duration_seconds";
pub const LEGACY_REPLAYED: &str = "bufjournal_legacy_replayed_total";
pub const LEGACY_SKIPPED: &str = "bufjournal_legacy_skipped_total";

static DESCRIBE: Once = Once::new();

/// Registers help text for every journal metric with the installed recorder.
pub fn describe_metrics() {
    DESCRIBE.call_once(|| {
        metrics::describe_counter!(RECORDS_WRITTEN, "Records accepted into the live buffer file");
        metrics::describe_counter!(IDS_COMMITTED, "Commit markers appended to the live id file");
        metrics::describe_counter!(
            WRITES_REJECTED,
            "Writes rejected because a rotation or another writer held the buffer"
        );
        metrics::describe_counter!(ROTATIONS, "Completed buffer generation rotations");
        metrics::describe_histogram!(ROTATION_DURATION, "Time taken to rotate a buffer generation");
        metrics::describe_counter!(LEGACY_REPLAYED, "Uncommitted records replayed from legacy files");
        metrics::describe_counter!(
            LEGACY_SKIPPED,
            "Legacy records skipped because their id was already committed"
        );
    });
}
