use anyhow::Result;

use crate::core::config::ScoutConfig;
use crate::core::llm::registry::ProviderRegistry;
use crate::core::mcp::McpClient;
use crate::core::terminal::{print_error, print_info, print_step, print_success, print_warn};

/// Names of required settings that are missing.
pub(crate) fn missing_database_settings(config: &ScoutConfig) -> Vec<&'static str> {
    let db = &config.database;
    let mut missing = Vec::new();
    if db.server.as_deref().is_none_or(|s| s.trim().is_empty()) {
        missing.push("DB_SERVER");
    }
    if db.name.as_deref().is_none_or(|s| s.trim().is_empty()) {
        missing.push("DB_NAME");
    }
    if db.user.is_none() {
        missing.push("DB_USER");
    }
    if db.password.is_none() {
        missing.push("DB_PASSWORD");
    }
    missing
}

pub async fn run_doctor(config: &ScoutConfig) -> Result<()> {
    print_step("Checking configuration...");
    println!();

    let missing = missing_database_settings(config);
    if missing.is_empty() {
        print_success("Database settings are complete.");
    } else {
        print_warn(&format!("Missing database settings: {}", missing.join(", ")));
    }

    let registry = ProviderRegistry::load()?;
    match registry.get_provider(&config.llm.provider) {
        Some(provider) => {
            let key_env = config
                .llm
                .api_key_env
                .clone()
                .unwrap_or_else(|| provider.auth.api_key_env.clone());
            if std::env::var(&key_env).is_ok_and(|v| !v.trim().is_empty()) {
                print_success(&format!("API key for {} found in {}.", provider.name, key_env));
            } else {
                print_warn(&format!("API key for {} not set ({}).", provider.name, key_env));
            }
        }
        None => print_error(&format!("Unknown LLM provider '{}'.", config.llm.provider)),
    }

    print_info(&format!(
        "Output directory: {}",
        config.extraction.output_dir.display()
    ));

    if !missing.iter().all(|m| *m == "DB_USER" || *m == "DB_PASSWORD") {
        print_warn("Skipping MCP Server check until DB_SERVER and DB_NAME are set.");
        return Ok(());
    }

    println!();
    print_step("Connecting to MCP Server...");
    let spec = config.mcp_server_spec()?;
    match McpClient::connect(&spec).await {
        Ok(client) => {
            print_success("MCP Server connection established");
            match client.list_tools().await {
                Ok(tools) => {
                    let names: Vec<&str> = tools.iter().map(|t| t.name.as_str()).collect();
                    print_info(&format!("Available MCP tools: {}", names.join(", ")));
                    let wanted = [
                        &config.mcp.tools.list_tables,
                        &config.mcp.tools.list_columns,
                        &config.mcp.tools.list_foreign_keys,
                    ];
                    for tool in wanted {
                        if !names.contains(&tool.as_str()) {
                            print_warn(&format!("Configured tool '{}' is not offered by the server.", tool));
                        }
                    }
                }
                Err(e) => print_error(&format!("Listing tools failed: {}", e)),
            }
        }
        Err(e) => print_error(&format!("Could not reach the schema service: {}", e)),
    }
    println!();
    Ok(())
}
