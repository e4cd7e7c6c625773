//! Read-only schema introspection.
//!
//! The [`SchemaTransport`] seam hides where raw schema records come from.
//! [`McpSchemaTransport`] maps the three logical operations (list tables,
//! list columns, list foreign keys) onto tools of a stdio MCP server.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value};
use tracing::{debug, info};

use crate::core::config::McpToolNames;
use crate::core::error::TransportError;
use crate::core::mcp::{McpClient, tool_text};
use crate::core::schema::{RawSchemaSnapshot, StageKind, StageTarget};

#[async_trait]
pub trait SchemaTransport: Send + Sync {
    /// Fetch the raw records for `target`. Idempotent, no caching.
    async fn fetch(&self, target: &StageTarget) -> Result<RawSchemaSnapshot, TransportError>;
}

pub struct McpSchemaTransport {
    client: Arc<McpClient>,
    tools: McpToolNames,
}

impl McpSchemaTransport {
    pub fn new(client: Arc<McpClient>, tools: McpToolNames) -> Self {
        Self { client, tools }
    }

    fn request_for(&self, target: &StageTarget) -> (String, Value) {
        let mut args = Map::new();
        args.insert(
            self.tools.database_arg.clone(),
            Value::String(target.database.clone()),
        );
        let tool = match target.stage {
            StageKind::Tables => self.tools.list_tables.clone(),
            StageKind::Columns => {
                if let Some(table) = &target.table {
                    args.insert(self.tools.table_arg.clone(), Value::String(table.clone()));
                }
                self.tools.list_columns.clone()
            }
            // Foreign keys are listed database-wide and scoped afterwards.
            StageKind::Relationships => self.tools.list_foreign_keys.clone(),
        };
        (tool, Value::Object(args))
    }
}

#[async_trait]
impl SchemaTransport for McpSchemaTransport {
    async fn fetch(&self, target: &StageTarget) -> Result<RawSchemaSnapshot, TransportError> {
        let (tool, args) = self.request_for(target);
        debug!(stage = %target.stage, "Calling MCP tool {} with {}", tool, args);
        let result = self.client.call_tool(&tool, args).await?;
        let snapshot = decode_tool_result(&result)?;
        info!(
            stage = %target.stage,
            "Fetched {} raw record(s) for {}",
            snapshot.len(),
            target.describe()
        );
        Ok(snapshot)
    }
}

/// Turn a `tools/call` result into raw records. Prefers `structuredContent`,
/// otherwise parses the text content as JSON.
pub fn decode_tool_result(result: &Value) -> Result<RawSchemaSnapshot, TransportError> {
    if let Some(structured) = result.get("structuredContent") {
        return records_from_payload(structured);
    }
    let text = tool_text(result)
        .ok_or_else(|| TransportError::Malformed("tool result carries no text content".into()))?;
    let payload: Value = serde_json::from_str(text.trim())
        .map_err(|e| TransportError::Malformed(format!("tool text is not JSON: {}", e)))?;
    records_from_payload(&payload)
}

fn records_from_payload(payload: &Value) -> Result<RawSchemaSnapshot, TransportError> {
    match payload {
        Value::Array(items) => Ok(RawSchemaSnapshot::new(items.clone())),
        // Envelopes like {"success": true, "data": [...]}: take the first array field.
        Value::Object(obj) => {
            if obj.get("success").and_then(Value::as_bool) == Some(false) {
                let message = obj
                    .get("error")
                    .or_else(|| obj.get("message"))
                    .map(|v| v.as_str().map(str::to_string).unwrap_or_else(|| v.to_string()))
                    .unwrap_or_else(|| "schema service reported failure".to_string());
                return Err(TransportError::classify(message));
            }
            ["data", "rows", "items", "result", "tables", "columns", "foreign_keys"]
                .iter()
                .find_map(|k| obj.get(*k).and_then(Value::as_array))
                .or_else(|| obj.values().find_map(Value::as_array))
                .map(|items| RawSchemaSnapshot::new(items.clone()))
                .ok_or_else(|| {
                    TransportError::Malformed("tool payload holds no record array".into())
                })
        }
        other => Err(TransportError::Malformed(format!(
            "unexpected tool payload: {}",
            other
        ))),
    }
}
