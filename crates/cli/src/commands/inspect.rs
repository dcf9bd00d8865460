// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
use anyhow::{bail, Context};
use bufjournal::codec::{IdDecoder, RecordDecoder};
use bufjournal::layout::{self, FileKind};
use bufjournal::Entry;
use comfy_table::presets::UTF8_FULL;
use comfy_table::{ContentArrangement, Table};
use std::collections::HashSet;
use std::fs;
use std::path::Path;

pub fn run(path: &Path) -> anyhow::Result<()> {
    let name = path
        .file_name()
        .and_then(|n| n.to_str())
        .with_context(|| format!("{} has no usable file name", path.display()))?;
    let Some(kind) = layout::classify(name) else {
        bail!("{name} is not a buffer file (expected YYYYMMDDNNNN.buf or .ids)");
    };
    let size = fs::metadata(path)
        .with_context(|| format!("failed to stat {}", path.display()))?
        .len();

    println!("\nBuffer File Report");
    println!("------------------");

    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec!["Property", "Value"]);
    table.add_row(vec!["File".to_string(), name.to_string()]);
    table.add_row(vec!["Size".to_string(), format!("{size} B")]);

    match kind {
        FileKind::Data => inspect_data(path, &mut table)?,
        FileKind::Ids => inspect_ids(path, &mut table)?,
    }

    println!("{table}");
    Ok(())
}

fn inspect_data(path: &Path, table: &mut Table) -> anyhow::Result<()> {
    let mut decoder = RecordDecoder::<Entry>::open(path)?;
    let mut count = 0u64;
    let mut range: Option<(i64, i64)> = None;
    let mut status = "OK".to_string();

    loop {
        match decoder.read() {
            Ok(Some(entry)) => {
                count += 1;
                range = Some(match range {
                    None => (entry.id, entry.id),
                    Some((lo, hi)) => (lo.min(entry.id), hi.max(entry.id)),
                });
            }
            Ok(None) => break,
            Err(e) => {
                status = format!("CORRUPT: {e}");
                break;
            }
        }
    }

    table.add_row(vec!["Kind".to_string(), "data".to_string()]);
    table.add_row(vec!["Records".to_string(), count.to_string()]);
    table.add_row(vec![
        "Id range".to_string(),
        range.map_or("-".to_string(), |(lo, hi)| format!("{lo}..={hi}")),
    ]);
    table.add_row(vec!["Readable bytes".to_string(), decoder.offset().to_string()]);
    table.add_row(vec!["Status".to_string(), status]);
    Ok(())
}

fn inspect_ids(path: &Path, table: &mut Table) -> anyhow::Result<()> {
    let mut decoder = IdDecoder::open(path)?;
    let mut count = 0u64;
    let mut distinct = HashSet::new();
    let mut max = None;
    let mut status = "OK".to_string();

    loop {
        match decoder.next_id() {
            Ok(Some(id)) => {
                count += 1;
                distinct.insert(id);
                max = Some(max.map_or(id, |m: i64| m.max(id)));
            }
            Ok(None) => break,
            Err(e) => {
                status = format!("CORRUPT: {e}");
                break;
            }
        }
    }

    table.add_row(vec!["Kind".to_string(), "ids".to_string()]);
    table.add_row(vec![
        "Base id".to_string(),
        decoder.base().map_or("-".to_string(), |b| b.to_string()),
    ]);
    table.add_row(vec!["Markers".to_string(), count.to_string()]);
    table.add_row(vec!["Distinct ids".to_string(), distinct.len().to_string()]);
    table.add_row(vec![
        "Max id".to_string(),
        max.map_or("-".to_string(), |m| m.to_string()),
    ]);
    table.add_row(vec!["Status".to_string(), status]);
    Ok(())
}
