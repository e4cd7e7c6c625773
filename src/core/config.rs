use anyhow::{Result, anyhow};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

use crate::core::mcp::McpServerSpec;

pub const CONFIG_FILE_NAME: &str = "schemascout.toml";

#[derive(Debug, Clone, Deserialize, Default)]
pub struct ScoutConfig {
    #[serde(default)]
    pub database: DatabaseConfig,

    #[serde(default)]
    pub mcp: McpConfig,

    #[serde(default)]
    pub llm: LlmConfig,

    #[serde(default)]
    pub extraction: ExtractionConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default)]
    pub server: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub user: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    /// ODBC driver name; only emitted when a driver is requested.
    #[serde(default)]
    pub driver: Option<String>,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_true")]
    pub encrypt: bool,
    #[serde(default = "default_true")]
    pub trust_server_certificate: bool,
    #[serde(default = "default_connection_timeout")]
    pub connection_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct McpConfig {
    #[serde(default = "default_mcp_command")]
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default = "default_mcp_connect_timeout")]
    pub connect_timeout_secs: u64,
    /// Environment variable through which the server receives the connection string.
    #[serde(default = "default_connection_string_env")]
    pub connection_string_env: String,
    #[serde(default)]
    pub env: HashMap<String, String>,
    #[serde(default)]
    pub tools: McpToolNames,
}

/// Tool and argument names for the three logical introspection operations.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct McpToolNames {
    #[serde(default = "default_list_tables")]
    pub list_tables: String,
    #[serde(default = "default_list_columns")]
    pub list_columns: String,
    #[serde(default = "default_list_foreign_keys")]
    pub list_foreign_keys: String,
    #[serde(default = "default_database_arg")]
    pub database_arg: String,
    #[serde(default = "default_table_arg")]
    pub table_arg: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LlmConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    /// Falls back to the provider's default model.
    #[serde(default)]
    pub model: Option<String>,
    /// Environment variable holding the API key; falls back to the provider's.
    #[serde(default)]
    pub api_key_env: Option<String>,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub temperature: f32,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_top_p")]
    pub top_p: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ValidatorMode {
    #[default]
    GroundTruth,
    Model,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExtractionConfig {
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
    #[serde(default = "default_call_timeout")]
    pub call_timeout_secs: u64,
    #[serde(default)]
    pub validator: ValidatorMode,
}

fn default_true() -> bool {
    true
}
fn default_port() -> u16 {
    1433
}
fn default_connection_timeout() -> u64 {
    30
}
fn default_mcp_command() -> String {
    "dotnet".to_string()
}
fn default_mcp_connect_timeout() -> u64 {
    60
}
fn default_connection_string_env() -> String {
    "CONNECTION_STRING".to_string()
}
fn default_list_tables() -> String {
    "list_tables".to_string()
}
fn default_list_columns() -> String {
    "list_columns".to_string()
}
fn default_list_foreign_keys() -> String {
    "list_foreign_keys".to_string()
}
fn default_database_arg() -> String {
    "database".to_string()
}
fn default_table_arg() -> String {
    "table".to_string()
}
fn default_provider() -> String {
    "openai".to_string()
}
fn default_max_tokens() -> u32 {
    4000
}
fn default_top_p() -> f32 {
    0.05
}
fn default_output_dir() -> PathBuf {
    PathBuf::from("output")
}
fn default_call_timeout() -> u64 {
    180
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            server: None,
            name: None,
            user: None,
            password: None,
            driver: None,
            port: default_port(),
            encrypt: true,
            trust_server_certificate: true,
            connection_timeout_secs: default_connection_timeout(),
        }
    }
}

impl Default for McpConfig {
    fn default() -> Self {
        Self {
            command: default_mcp_command(),
            args: Vec::new(),
            connect_timeout_secs: default_mcp_connect_timeout(),
            connection_string_env: default_connection_string_env(),
            env: HashMap::new(),
            tools: McpToolNames::default(),
        }
    }
}

impl Default for McpToolNames {
    fn default() -> Self {
        Self {
            list_tables: default_list_tables(),
            list_columns: default_list_columns(),
            list_foreign_keys: default_list_foreign_keys(),
            database_arg: default_database_arg(),
            table_arg: default_table_arg(),
        }
    }
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: None,
            api_key_env: None,
            base_url: None,
            temperature: 0.0,
            max_tokens: default_max_tokens(),
            top_p: default_top_p(),
        }
    }
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            output_dir: default_output_dir(),
            call_timeout_secs: default_call_timeout(),
            validator: ValidatorMode::default(),
        }
    }
}

impl DatabaseConfig {
    /// ODBC-style connection string handed to the MCP server.
    pub fn connection_string(&self, include_driver: bool) -> Result<String> {
        let server = self
            .server
            .as_deref()
            .ok_or_else(|| anyhow!("Database server is not configured (DB_SERVER)"))?;
        let name = self.database_name()?;

        let mut parts = Vec::new();
        if include_driver && let Some(driver) = &self.driver {
            parts.push(format!("DRIVER={{{}}}", driver));
        }
        parts.push(format!("SERVER=tcp:{},{}", server, self.port));
        parts.push(format!("DATABASE={}", name));
        parts.push(format!("Encrypt={}", yes_no(self.encrypt)));
        parts.push(format!(
            "TrustServerCertificate={}",
            yes_no(self.trust_server_certificate)
        ));
        parts.push(format!("Connection Timeout={}", self.connection_timeout_secs));
        if let Some(user) = &self.user {
            parts.push(format!("UID={}", user));
        }
        if let Some(password) = &self.password {
            parts.push(format!("PWD={}", password));
        }
        Ok(format!("{};", parts.join(";")))
    }

    pub fn database_name(&self) -> Result<&str> {
        self.name
            .as_deref()
            .filter(|n| !n.trim().is_empty())
            .ok_or_else(|| anyhow!("Database name is not configured (DB_NAME)"))
    }
}

fn yes_no(flag: bool) -> &'static str {
    if flag { "yes" } else { "no" }
}

impl ScoutConfig {
    /// Load `.env`, then the TOML file (explicit path, `./schemascout.toml`,
    /// or the user config directory), then environment overrides.
    pub async fn load(explicit: Option<&Path>) -> Result<Self> {
        let _ = dotenv::dotenv();

        let mut config = match Self::resolve_path(explicit) {
            Some(path) => {
                let content = tokio::fs::read_to_string(&path)
                    .await
                    .map_err(|e| anyhow!("Failed to read {}: {}", path.display(), e))?;
                let config = Self::from_toml_str(&content)
                    .map_err(|e| anyhow!("Invalid config {}: {}", path.display(), e))?;
                info!("Loaded configuration from {}", path.display());
                config
            }
            None => {
                if let Some(path) = explicit {
                    return Err(anyhow!("Config file {} does not exist", path.display()));
                }
                info!("No {} found, using defaults.", CONFIG_FILE_NAME);
                Self::default()
            }
        };

        config.apply_env_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    fn resolve_path(explicit: Option<&Path>) -> Option<PathBuf> {
        if let Some(path) = explicit {
            return path.exists().then(|| path.to_path_buf());
        }
        let local = PathBuf::from(CONFIG_FILE_NAME);
        if local.exists() {
            return Some(local);
        }
        dirs::config_dir()
            .map(|d| d.join("schemascout").join("config.toml"))
            .filter(|p| p.exists())
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    pub fn apply_env_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        if let Some(v) = get("DB_SERVER") {
            self.database.server = Some(v);
        }
        if let Some(v) = get("DB_NAME") {
            self.database.name = Some(v);
        }
        if let Some(v) = get("DB_USER") {
            self.database.user = Some(v);
        }
        if let Some(v) = get("DB_PASSWORD") {
            self.database.password = Some(v);
        }
        if let Some(v) = get("DB_DRIVER") {
            self.database.driver = Some(v);
        }
        if let Some(v) = get("SCHEMASCOUT_OUTPUT_DIR") {
            self.extraction.output_dir = PathBuf::from(v);
        }
        if let Some(v) = get("SCHEMASCOUT_PROVIDER") {
            self.llm.provider = v;
        }
        if let Some(v) = get("SCHEMASCOUT_MODEL") {
            self.llm.model = Some(v);
        }
    }

    pub fn call_timeout(&self) -> Duration {
        Duration::from_secs(self.extraction.call_timeout_secs)
    }

    /// Launch description for the MCP server. The server inherits the
    /// process environment plus the configured extras and connection string.
    pub fn mcp_server_spec(&self) -> Result<McpServerSpec> {
        let mut env: HashMap<String, String> = std::env::vars().collect();
        env.extend(self.mcp.env.clone());
        env.insert(
            self.mcp.connection_string_env.clone(),
            self.database.connection_string(false)?,
        );
        Ok(McpServerSpec {
            name: "schema".to_string(),
            command: self.mcp.command.clone(),
            args: self.mcp.args.clone(),
            env,
            connect_timeout: Duration::from_secs(self.mcp.connect_timeout_secs),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let config = ScoutConfig::default();
        assert_eq!(config.database.port, 1433);
        assert_eq!(config.mcp.command, "dotnet");
        assert_eq!(config.mcp.connect_timeout_secs, 60);
        assert_eq!(config.mcp.tools.list_foreign_keys, "list_foreign_keys");
        assert_eq!(config.llm.max_tokens, 4000);
        assert_eq!(config.llm.temperature, 0.0);
        assert_eq!(config.extraction.output_dir, PathBuf::from("output"));
        assert_eq!(config.extraction.validator, ValidatorMode::GroundTruth);
    }

    #[test]
    fn partial_toml_keeps_defaults() {
        let config = ScoutConfig::from_toml_str(
            r#"
            [database]
            server = "db.example.net"
            name = "SalesDb"

            [mcp]
            args = ["MssqlMcp.dll"]

            [mcp.tools]
            list_tables = "ListTables"

            [extraction]
            validator = "model"
            "#,
        )
        .unwrap();
        assert_eq!(config.database.name.as_deref(), Some("SalesDb"));
        assert_eq!(config.mcp.args, vec!["MssqlMcp.dll".to_string()]);
        assert_eq!(config.mcp.tools.list_tables, "ListTables");
        assert_eq!(config.mcp.tools.list_columns, "list_columns");
        assert_eq!(config.extraction.validator, ValidatorMode::Model);
        assert_eq!(config.extraction.call_timeout_secs, 180);
    }

    #[test]
    fn env_overrides_win_over_file_values() {
        let mut config = ScoutConfig::from_toml_str("[database]\nname = \"FromFile\"\n").unwrap();
        config.apply_env_overrides(|key| match key {
            "DB_NAME" => Some("FromEnv".to_string()),
            "DB_SERVER" => Some("sql01".to_string()),
            "DB_USER" => Some("   ".to_string()),
            _ => None,
        });
        assert_eq!(config.database.name.as_deref(), Some("FromEnv"));
        assert_eq!(config.database.server.as_deref(), Some("sql01"));
        assert_eq!(config.database.user, None);
    }

    #[test]
    fn connection_string_matches_odbc_layout() {
        let db = DatabaseConfig {
            server: Some("sql01".into()),
            name: Some("SalesDb".into()),
            user: Some("app".into()),
            password: Some("secret".into()),
            driver: Some("ODBC Driver 18 for SQL Server".into()),
            ..Default::default()
        };
        assert_eq!(
            db.connection_string(false).unwrap(),
            "SERVER=tcp:sql01,1433;DATABASE=SalesDb;Encrypt=yes;TrustServerCertificate=yes;Connection Timeout=30;UID=app;PWD=secret;"
        );
        assert!(
            db.connection_string(true)
                .unwrap()
                .starts_with("DRIVER={ODBC Driver 18 for SQL Server};SERVER=")
        );
    }

    #[test]
    fn connection_string_requires_server_and_name() {
        assert!(DatabaseConfig::default().connection_string(false).is_err());
    }
}
