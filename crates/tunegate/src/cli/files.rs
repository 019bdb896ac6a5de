//! `tunegate files`: per-file classification from files_status.json.

use super::output::print_table_colored;
use anyhow::{Context, Result};
use comfy_table::Color;
use std::path::Path;
use tunegate_filter::status::{PersistedStatus, FILES_STATUS_FILE};
use tunegate_filter::{FileRecord, FileStatus};

fn status_color(status: FileStatus) -> Color {
    match status {
        FileStatus::Accepted => Color::Green,
        FileStatus::Rejected => Color::Red,
        FileStatus::Unclassified => Color::Grey,
    }
}

pub fn run(data_dir: &Path, status: Option<FileStatus>, json: bool) -> Result<()> {
    let path = data_dir.join(FILES_STATUS_FILE);
    let persisted = tunegate_filter::FileStatusRegistry::read_persisted(&path)
        .with_context(|| format!("Failed to read {}", path.display()))?;

    let Some(persisted) = persisted else {
        if json {
            println!("[]");
        } else {
            println!("No file statuses recorded in {}", data_dir.display());
        }
        return Ok(());
    };

    let records = select(&persisted, status);
    if json {
        println!("{}", serde_json::to_string_pretty(&records)?);
        return Ok(());
    }

    if records.is_empty() {
        println!("No matching train files");
    } else {
        let rows = records
            .iter()
            .map(|record| {
                vec![
                    (record.path.clone(), None),
                    (
                        record.status.to_string(),
                        Some(status_color(record.status)),
                    ),
                    (record.reason.clone(), None),
                ]
            })
            .collect();
        print_table_colored(&["PATH", "STATUS", "REASON"], rows);
    }
    println!(
        "{} train files shown, {} test files",
        records.len(),
        persisted.test.len()
    );
    Ok(())
}

fn select(persisted: &PersistedStatus, status: Option<FileStatus>) -> Vec<&FileRecord> {
    persisted
        .train
        .iter()
        .filter(|record| status.map_or(true, |wanted| record.status == wanted))
        .collect()
}
