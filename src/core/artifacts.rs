//! Stage documents on disk.
//!
//! Every terminal stage run produces the stage document (a bare JSON array of
//! records) plus a `<stem>.report.json` side artifact carrying the verdict.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Serialize;
use tracing::{info, warn};

use crate::core::error::ExtractError;
use crate::core::extraction::StageRunResult;
use crate::core::schema::{StageKind, StageTarget, TableRecord};

pub const TABLES_DOCUMENT: &str = "tables.json";

#[derive(Serialize)]
struct ReportDocument<'a> {
    stage: StageKind,
    database: &'a str,
    table: Option<&'a str>,
    converged: bool,
    attempts_used: u32,
    validation_passed: bool,
    issues: &'a [String],
    message: &'a str,
}

#[derive(Debug, Clone)]
pub struct ArtifactWriter {
    output_dir: PathBuf,
}

impl ArtifactWriter {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
        }
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// File stem of the stage document: `tables`, `<table>_schema`,
    /// `<table>_relationships`.
    pub fn document_stem(target: &StageTarget) -> String {
        let table = target.table.as_deref().map(sanitize).unwrap_or_default();
        match target.stage {
            StageKind::Tables => "tables".to_string(),
            StageKind::Columns => format!("{}_schema", table),
            StageKind::Relationships => format!("{}_relationships", table),
        }
    }

    pub fn document_path(&self, target: &StageTarget) -> PathBuf {
        self.output_dir
            .join(format!("{}.json", Self::document_stem(target)))
    }

    pub fn report_path(&self, target: &StageTarget) -> PathBuf {
        self.output_dir
            .join(format!("{}.report.json", Self::document_stem(target)))
    }

    /// Write the final candidate and its report, replacing earlier files.
    /// Returns the document path.
    pub async fn persist(&self, result: &StageRunResult) -> Result<PathBuf, ExtractError> {
        tokio::fs::create_dir_all(&self.output_dir)
            .await
            .map_err(|source| ExtractError::Persist {
                path: self.output_dir.clone(),
                source,
            })?;

        let target = &result.target;
        let document_path = self.document_path(target);
        write_json(&document_path, &result.final_candidate.to_document()).await?;

        let report = ReportDocument {
            stage: target.stage,
            database: &target.database,
            table: target.table.as_deref(),
            converged: result.converged,
            attempts_used: result.attempts_used,
            validation_passed: result.final_report.validation_passed,
            issues: &result.final_report.issues,
            message: &result.final_report.message,
        };
        write_json(&self.report_path(target), &report).await?;

        if result.converged {
            info!(stage = %target.stage, "Saved {}", document_path.display());
        } else {
            warn!(
                stage = %target.stage,
                "Saved unconverged {} ({} open issue(s))",
                document_path.display(),
                result.final_report.issues.len()
            );
        }
        Ok(document_path)
    }

    /// Table names listed in an earlier `tables.json`.
    pub async fn load_tables(&self) -> Result<Vec<TableRecord>> {
        let path = self.output_dir.join(TABLES_DOCUMENT);
        let content = tokio::fs::read_to_string(&path)
            .await
            .with_context(|| format!("Failed to read {}", path.display()))?;
        serde_json::from_str(&content)
            .with_context(|| format!("{} is not a valid table list", path.display()))
    }
}

fn sanitize(table: &str) -> String {
    table
        .trim()
        .chars()
        .map(|c| if matches!(c, '/' | '\\') { '_' } else { c })
        .collect()
}

async fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<(), ExtractError> {
    let mut body = serde_json::to_string_pretty(value).map_err(|e| ExtractError::Persist {
        path: path.to_path_buf(),
        source: std::io::Error::other(e),
    })?;
    body.push('\n');
    tokio::fs::write(path, body)
        .await
        .map_err(|source| ExtractError::Persist {
            path: path.to_path_buf(),
            source,
        })
}
