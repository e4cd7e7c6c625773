use anyhow::Result;

use crate::core::config::ScoutConfig;
use crate::core::consolidate::consolidate;
use crate::core::terminal::{GuideSection, print_warn};

pub async fn run_consolidate(config: &ScoutConfig) -> Result<()> {
    let summary = consolidate(&config.extraction.output_dir).await?;

    for name in &summary.skipped_files {
        print_warn(&format!("Skipped invalid JSON file: {}", name));
    }

    GuideSection::new("Consolidated")
        .status("Document", &summary.path.display().to_string())
        .status("Merged files", &summary.merged_files.len().to_string())
        .status("Tables", &summary.tables.to_string())
        .status("Columns", &summary.columns.to_string())
        .status(
            "Foreign keys",
            &format!(
                "{} ({} duplicate(s) removed)",
                summary.foreign_keys, summary.duplicate_foreign_keys
            ),
        )
        .print();
    println!();
    Ok(())
}
