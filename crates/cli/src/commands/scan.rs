// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
use anyhow::Context;
use bufjournal::layout;
use comfy_table::presets::UTF8_FULL;
use comfy_table::{ContentArrangement, Table};
use std::fs;
use std::path::Path;

pub fn run(dir: &Path) -> anyhow::Result<()> {
    let now = chrono::Local::now().naive_local();
    let plan = layout::scan_and_plan(dir, now)
        .with_context(|| format!("failed to scan {}", dir.display()))?;

    println!("\nBuffer Directory Report");
    println!("-----------------------");
    println!("Directory: {}", dir.display());

    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec!["File", "Kind", "Size", "Modified"]);

    for (kind, files) in [("data", &plan.old_data_files), ("ids", &plan.old_id_files)] {
        for path in files {
            let name = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            match fs::metadata(path) {
                Ok(meta) => {
                    let modified = meta
                        .modified()
                        .map(|t| chrono::DateTime::<chrono::Local>::from(t).to_rfc3339())
                        .unwrap_or_default();
                    table.add_row(vec![name, kind.to_string(), format!("{} B", meta.len()), modified]);
                }
                Err(e) => {
                    table.add_row(vec![name, kind.to_string(), "ERROR".to_string(), e.to_string()]);
                }
            }
        }
    }

    if plan.has_legacy() {
        println!("{table}");
    } else {
        println!("No buffer generations found.");
    }

    println!("\nNext data file: {}", plan.next_data_file.display());
    println!("Next id file:   {}", plan.next_id_file.display());
    Ok(())
}
