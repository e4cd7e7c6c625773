use std::sync::Arc;

use anyhow::{Context, Result};
use console::style;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::core::agents::{Analyst, GroundTruthValidator, ModelAnalyst, ModelValidator, Validator};
use crate::core::artifacts::ArtifactWriter;
use crate::core::config::{ScoutConfig, ValidatorMode};
use crate::core::consolidate::consolidate;
use crate::core::extraction::{RetryController, StageRunResult, run_stage};
use crate::core::llm::LlmManager;
use crate::core::mcp::McpClient;
use crate::core::schema::{StageKind, StageTarget};
use crate::core::terminal::{
    GuideSection, print_execution_summary, print_info, print_step, print_success, print_warn,
};
use crate::core::transport::{McpSchemaTransport, SchemaTransport};

/// Everything one invocation needs to run stage after stage.
struct Pipeline {
    controller: RetryController,
    writer: ArtifactWriter,
    database: String,
    cancel: CancellationToken,
    _client: Arc<McpClient>,
}

impl Pipeline {
    async fn connect(config: &ScoutConfig) -> Result<Self> {
        let database = config.database.database_name()?.to_string();

        let spec = config.mcp_server_spec()?;
        print_step("Connecting to MCP Server...");
        let client = McpClient::connect(&spec)
            .await
            .context("Failed to connect to the schema service")?;
        print_success("MCP Server connection established");

        let transport: Arc<dyn SchemaTransport> = Arc::new(McpSchemaTransport::new(
            client.clone(),
            config.mcp.tools.clone(),
        ));
        let llm = LlmManager::from_config(&config.llm)?;
        print_info(&format!("Using model {}", llm.describe()));

        let analyst: Arc<dyn Analyst> = Arc::new(ModelAnalyst::new(llm.clone()));
        let validator: Arc<dyn Validator> = match config.extraction.validator {
            ValidatorMode::GroundTruth => Arc::new(GroundTruthValidator::new(transport.clone())),
            ValidatorMode::Model => Arc::new(ModelValidator::new(transport.clone(), llm)),
        };

        let cancel = CancellationToken::new();
        let on_interrupt = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Interrupt received, stopping after the current attempt");
                on_interrupt.cancel();
            }
        });

        Ok(Self {
            controller: RetryController::new(
                transport,
                analyst,
                validator,
                config.call_timeout(),
            ),
            writer: ArtifactWriter::new(&config.extraction.output_dir),
            database,
            cancel,
            _client: client,
        })
    }

    async fn run(&self, target: StageTarget) -> Result<StageRunResult> {
        print_step(&format!(
            "Running {} stage for {}",
            target.stage,
            target.describe()
        ));
        let (result, path) = run_stage(&self.controller, &self.writer, &target, &self.cancel).await?;
        print_execution_summary(&result, &path);
        Ok(result)
    }

    /// One run per table listed in `tables.json`, or only `table` when given.
    async fn run_per_table(&self, stage: StageKind, table: Option<&str>) -> Result<Vec<StageRunResult>> {
        let tables = tables_to_process(&self.writer, stage, table).await?;
        if tables.is_empty() {
            print_warn(&format!("No tables to process for the {} stage.", stage));
            return Ok(Vec::new());
        }
        info!(stage = %stage, "Processing {} table(s)", tables.len());

        let mut results = Vec::with_capacity(tables.len());
        for table in tables {
            let target = match stage {
                StageKind::Columns => StageTarget::columns(&self.database, table),
                StageKind::Relationships => StageTarget::relationships(&self.database, table),
                StageKind::Tables => StageTarget::tables(&self.database),
            };
            results.push(self.run(target).await?);
        }
        Ok(results)
    }
}

/// Table names for a per-table stage. An empty `tables.json` yields no
/// names; a missing or unreadable one is an error.
async fn tables_to_process(
    writer: &ArtifactWriter,
    stage: StageKind,
    table: Option<&str>,
) -> Result<Vec<String>> {
    if let Some(t) = table {
        return Ok(vec![t.to_string()]);
    }
    let records = writer.load_tables().await.with_context(|| {
        format!("Run 'schemascout tables' first or pass --table to run {}", stage)
    })?;
    let mut names: Vec<String> = Vec::new();
    for record in records {
        if !names.iter().any(|n| n.eq_ignore_ascii_case(&record.table)) {
            names.push(record.table);
        }
    }
    if names.is_empty() {
        warn!(stage = %stage, "tables.json lists no tables, nothing to extract");
    }
    Ok(names)
}

fn print_run_summary(results: &[StageRunResult]) {
    let converged = results.iter().filter(|r| r.converged).count();
    let exhausted = results.len() - converged;
    let mut section = GuideSection::new("Run Summary")
        .status("Stage runs", &results.len().to_string())
        .status("Converged", &format!("{}", style(converged).green().bold()));
    if exhausted == 0 {
        section = section.blank().success("Every stage run passed validation.");
    } else {
        section = section
            .status("Exhausted", &format!("{}", style(exhausted).red().bold()))
            .blank();
        for r in results.iter().filter(|r| !r.converged) {
            section = section.warn(&format!(
                "{} {}: {} open issue(s)",
                r.target.stage,
                r.target.describe(),
                r.final_report.issues.len()
            ));
        }
    }
    section.print();
    println!();
}

pub async fn run_stage_command(
    config: &ScoutConfig,
    stage: StageKind,
    table: Option<&str>,
) -> Result<()> {
    let pipeline = Pipeline::connect(config).await?;
    let results = match stage {
        StageKind::Tables => vec![pipeline.run(StageTarget::tables(&pipeline.database)).await?],
        StageKind::Columns | StageKind::Relationships => {
            pipeline.run_per_table(stage, table).await?
        }
    };
    print_run_summary(&results);
    Ok(())
}

pub async fn run_all(config: &ScoutConfig) -> Result<()> {
    let pipeline = Pipeline::connect(config).await?;
    let mut results = Vec::new();
    for stage in StageKind::ALL {
        match stage {
            StageKind::Tables => {
                results.push(pipeline.run(StageTarget::tables(&pipeline.database)).await?)
            }
            StageKind::Columns | StageKind::Relationships => {
                results.extend(pipeline.run_per_table(stage, None).await?)
            }
        }
    }

    let summary = consolidate(pipeline.writer.output_dir()).await?;
    print_success(&format!(
        "Consolidated JSON saved to {}",
        summary.path.display()
    ));
    print_run_summary(&results);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn explicit_table_skips_tables_json() {
        let dir = tempfile::tempdir().unwrap();
        let writer = ArtifactWriter::new(dir.path());
        let names = tables_to_process(&writer, StageKind::Columns, Some("Orders"))
            .await
            .unwrap();
        assert_eq!(names, vec!["Orders"]);
    }

    #[tokio::test]
    async fn table_names_are_deduplicated_ignoring_case() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("tables.json"),
            r#"[{"schema": "dbo", "table": "Orders"}, {"schema": "sales", "table": "ORDERS"}, {"schema": "dbo", "table": "Items"}]"#,
        )
        .unwrap();
        let writer = ArtifactWriter::new(dir.path());
        let names = tables_to_process(&writer, StageKind::Relationships, None)
            .await
            .unwrap();
        assert_eq!(names, vec!["Orders", "Items"]);
    }

    #[tokio::test]
    async fn empty_tables_json_is_not_an_error() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("tables.json"), "[]\n").unwrap();
        let writer = ArtifactWriter::new(dir.path());
        let names = tables_to_process(&writer, StageKind::Columns, None)
            .await
            .unwrap();
        assert!(names.is_empty());
    }

    #[tokio::test]
    async fn missing_tables_json_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let writer = ArtifactWriter::new(dir.path());
        let err = tables_to_process(&writer, StageKind::Columns, None)
            .await
            .unwrap_err();
        assert!(format!("{:#}", err).contains("Run 'schemascout tables' first"));
    }
}
