//! Merge every persisted stage document into `consolidated.json`.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Serialize;
use serde_json::Value;
use tracing::{info, warn};

pub const CONSOLIDATED_DOCUMENT: &str = "consolidated.json";

#[derive(Debug, Default, Serialize)]
pub struct Consolidated {
    pub foreign_keys: Vec<Value>,
    pub columns: Vec<Value>,
    pub tables: Vec<Value>,
}

#[derive(Debug)]
pub struct ConsolidationSummary {
    pub path: PathBuf,
    pub merged_files: Vec<String>,
    pub skipped_files: Vec<String>,
    pub duplicate_foreign_keys: usize,
    pub tables: usize,
    pub columns: usize,
    pub foreign_keys: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Section {
    ForeignKeys,
    Columns,
    Tables,
}

fn section_for(file_name: &str) -> Option<Section> {
    let name = file_name.to_lowercase();
    if name == CONSOLIDATED_DOCUMENT || name.ends_with(".report.json") {
        None
    } else if name.ends_with("relationships.json") {
        Some(Section::ForeignKeys)
    } else if name.ends_with("schema.json") {
        Some(Section::Columns)
    } else if name == "tables.json" {
        Some(Section::Tables)
    } else {
        None
    }
}

fn foreign_key_identity(fk: &Value) -> String {
    ["table", "column", "ref_table", "ref_column"]
        .iter()
        .map(|k| fk.get(*k).map(Value::to_string).unwrap_or_default())
        .collect::<Vec<_>>()
        .join("\u{1f}")
}

/// Read the stage documents in `dir` (in file-name order) and write
/// `consolidated.json` next to them.
pub async fn consolidate(dir: &Path) -> Result<ConsolidationSummary> {
    let mut names = Vec::new();
    let mut entries = tokio::fs::read_dir(dir)
        .await
        .with_context(|| format!("Failed to read output directory {}", dir.display()))?;
    while let Some(entry) = entries.next_entry().await? {
        if let Some(name) = entry.file_name().to_str()
            && name.ends_with(".json")
        {
            names.push(name.to_string());
        }
    }
    names.sort();

    let mut out = Consolidated::default();
    let mut merged_files = Vec::new();
    let mut skipped_files = Vec::new();

    for name in names {
        let Some(section) = section_for(&name) else {
            continue;
        };
        let path = dir.join(&name);
        let content = tokio::fs::read_to_string(&path)
            .await
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let records = match serde_json::from_str::<Value>(&content) {
            Ok(Value::Array(items)) => items,
            Ok(obj @ Value::Object(_)) => vec![obj],
            Ok(_) | Err(_) => {
                warn!("Skipping invalid JSON file: {}", name);
                skipped_files.push(name);
                continue;
            }
        };
        match section {
            Section::ForeignKeys => out.foreign_keys.extend(records),
            Section::Columns => out.columns.extend(records),
            Section::Tables => out.tables.extend(records),
        }
        info!("Merged {} into {:?}", name, section);
        merged_files.push(name);
    }

    let before = out.foreign_keys.len();
    let mut seen = HashSet::new();
    out.foreign_keys
        .retain(|fk| seen.insert(foreign_key_identity(fk)));
    let duplicate_foreign_keys = before - out.foreign_keys.len();

    let path = dir.join(CONSOLIDATED_DOCUMENT);
    let mut body = serde_json::to_string_pretty(&out)?;
    body.push('\n');
    tokio::fs::write(&path, body)
        .await
        .with_context(|| format!("Failed to write {}", path.display()))?;
    info!("Consolidated JSON saved to {}", path.display());

    Ok(ConsolidationSummary {
        path,
        merged_files,
        skipped_files,
        duplicate_foreign_keys,
        tables: out.tables.len(),
        columns: out.columns.len(),
        foreign_keys: out.foreign_keys.len(),
    })
}
