// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
use anyhow::Context;
use bufjournal::{layout, Entry, LegacyReplayer, Value};
use serde_json::json;
use std::io::Write;
use std::path::Path;

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ReplaySummary {
    pub replayed: u64,
    pub skipped: u64,
    pub cleaned: bool,
}

/// Streams every uncommitted record in `dir` to `out` as JSON lines.
///
/// All files in the directory are treated as legacy, so this must not run
/// while a journal is writing there.
pub fn run(
    dir: &Path,
    clean: bool,
    limit: Option<usize>,
    out: &mut impl Write,
) -> anyhow::Result<ReplaySummary> {
    let now = chrono::Local::now().naive_local();
    let plan = layout::scan_and_plan(dir, now)
        .with_context(|| format!("failed to scan {}", dir.display()))?;
    let mut replayer = LegacyReplayer::<Entry>::new(plan.old_data_files, plan.old_id_files);

    let mut emitted = 0usize;
    while limit.map_or(true, |max| emitted < max) {
        let Some(entry) = replayer.load()? else {
            break;
        };
        serde_json::to_writer(&mut *out, &entry_to_json(&entry))?;
        out.write_all(b"\n")?;
        emitted += 1;
    }
    out.flush()?;

    let mut cleaned = false;
    if clean {
        if replayer.is_exhausted() {
            replayer.clean().context("failed to remove replayed files")?;
            cleaned = true;
        } else {
            tracing::warn!(emitted, "replay stopped early, leaving files in place");
        }
    }

    Ok(ReplaySummary {
        replayed: replayer.replayed(),
        skipped: replayer.skipped(),
        cleaned,
    })
}

fn entry_to_json(entry: &Entry) -> serde_json::Value {
    let fields: serde_json::Map<String, serde_json::Value> = entry
        .fields
        .iter()
        .map(|(k, v)| (k.clone(), value_to_json(v)))
        .collect();
    json!({ "id": entry.id, "fields": fields })
}

fn value_to_json(value: &Value) -> serde_json::Value {
    match value {
        Value::Null => serde_json::Value::Null,
        Value::Bool(b) => json!(b),
        Value::Int(i) => json!(i),
        Value::Float(f) => json!(f),
        Value::Text(s) => json!(s),
        Value::Bytes(b) => json!(b),
    }
}
