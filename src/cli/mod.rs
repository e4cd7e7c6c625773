mod consolidate;
mod doctor;
mod extract;

use std::path::PathBuf;

use anyhow::{Result, anyhow};
use console::style;

use crate::core::config::ScoutConfig;
use crate::core::schema::StageKind;
use crate::core::terminal::{self, GuideSection};
use crate::logging::{self, LogOptions};

fn print_help() {
    terminal::print_banner();

    GuideSection::new("Extraction")
        .command("tables", "Extract and validate every schema and table")
        .command("columns", "Extract and validate columns (per table)")
        .command("relationships", "Extract and validate foreign keys (per table)")
        .command("all", "Run every stage, then consolidate")
        .print();

    GuideSection::new("Output")
        .command("consolidate", "Merge stage documents into consolidated.json")
        .print();

    GuideSection::new("Diagnostics")
        .command("doctor", "Check configuration and the schema service")
        .command("help", "Show this guide")
        .print();

    GuideSection::new("Options")
        .command("--config <path>", "Configuration file (default ./schemascout.toml)")
        .command("--table <name>", "Limit columns/relationships to one table")
        .command("--output <dir>", "Output directory (default output/)")
        .command("--verbose", "Debug logging")
        .command("--quiet", "Log to the run log only")
        .blank()
        .text("Settings come from schemascout.toml, .env and DB_* variables.")
        .print();

    println!(
        "\n {} {} <command> [options]\n",
        style("Usage:").bold(),
        style("schemascout").green()
    );
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct CommandFlags {
    pub config: Option<PathBuf>,
    pub table: Option<String>,
    pub output: Option<PathBuf>,
    pub verbose: bool,
    pub quiet: bool,
}

pub(crate) fn parse_command_flags(args: &[String], start: usize) -> CommandFlags {
    let mut flags = CommandFlags::default();
    let mut i = start;
    while i < args.len() {
        match args[i].as_str() {
            "--config" | "-c" => {
                if i + 1 < args.len() {
                    flags.config = Some(PathBuf::from(&args[i + 1]));
                    i += 2;
                } else {
                    i += 1;
                }
            }
            "--table" | "-t" => {
                if i + 1 < args.len() {
                    flags.table = Some(args[i + 1].clone());
                    i += 2;
                } else {
                    i += 1;
                }
            }
            "--output" | "-o" => {
                if i + 1 < args.len() {
                    flags.output = Some(PathBuf::from(&args[i + 1]));
                    i += 2;
                } else {
                    i += 1;
                }
            }
            "--verbose" | "-v" => {
                flags.verbose = true;
                i += 1;
            }
            "--quiet" | "-q" => {
                flags.quiet = true;
                i += 1;
            }
            _ => i += 1,
        }
    }
    flags
}

/// Load configuration, apply command-line overrides and start logging.
async fn prepare(flags: &CommandFlags) -> Result<ScoutConfig> {
    let mut config = ScoutConfig::load(flags.config.as_deref()).await?;
    if let Some(output) = &flags.output {
        config.extraction.output_dir = output.clone();
    }
    logging::init(&LogOptions {
        verbose: flags.verbose,
        quiet: flags.quiet,
        output_dir: Some(config.extraction.output_dir.clone()),
    })?;
    Ok(config)
}

pub async fn run_main() -> Result<()> {
    let args: Vec<String> = std::env::args().collect();
    let Some(cmd) = args.get(1).map(String::as_str) else {
        print_help();
        return Ok(());
    };
    let flags = parse_command_flags(&args, 2);

    match cmd {
        "tables" | "columns" | "relationships" => {
            let Some(stage) = StageKind::from_name(cmd) else {
                return Ok(());
            };
            let config = prepare(&flags).await?;
            extract::run_stage_command(&config, stage, flags.table.as_deref()).await
        }
        "all" => {
            let config = prepare(&flags).await?;
            extract::run_all(&config).await
        }
        "consolidate" => {
            let config = prepare(&flags).await?;
            consolidate::run_consolidate(&config).await
        }
        "doctor" => {
            let config = prepare(&flags).await?;
            doctor::run_doctor(&config).await
        }
        "help" | "--help" | "-h" => {
            print_help();
            Ok(())
        }
        other => {
            print_help();
            Err(anyhow!("Unknown command '{}'", other))
        }
    }
}
