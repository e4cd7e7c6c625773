use async_trait::async_trait;
use serde_json::{Value, json};
use tracing::{debug, info};

use super::{Analyst, AttemptRecord};
use crate::core::error::AgentError;
use crate::core::llm::{ChatMessage, LlmManager};
use crate::core::schema::{CandidateArtifact, RawSchemaSnapshot, StageKind, StageTarget};

const ANALYST_SYSTEM_PROMPT: &str = "You are an expert SQL Server schema analyst. \
You receive raw introspection records and return the requested metadata as strict JSON. \
Never invent tables, columns or constraints that are not in the records. \
Answer with a single JSON array and nothing else.";

/// Analyst backed by a generative model.
pub struct ModelAnalyst {
    llm: LlmManager,
}

impl ModelAnalyst {
    pub fn new(llm: LlmManager) -> Self {
        Self { llm }
    }
}

#[async_trait]
impl Analyst for ModelAnalyst {
    async fn propose(
        &self,
        target: &StageTarget,
        snapshot: &RawSchemaSnapshot,
        prior: Option<&AttemptRecord>,
    ) -> Result<CandidateArtifact, AgentError> {
        let messages = build_messages(target, snapshot, prior);
        info!(
            stage = %target.stage,
            "Analyst prompting {} for {}",
            self.llm.describe(),
            target.describe()
        );
        let reply = self
            .llm
            .generate(&messages)
            .await
            .map_err(|e| AgentError::Model(e.to_string()))?;
        debug!(stage = %target.stage, "Analyst reply: {}", reply);
        parse_candidate(target.stage, &reply)
    }
}

/// One example record showing the exact field set of a stage.
pub fn record_shape(stage: StageKind) -> Value {
    match stage {
        StageKind::Tables => json!({"schema": "schema_name", "table": "table_name"}),
        StageKind::Columns => json!({
            "table_name": "table_name",
            "column_name": "column_name",
            "data_type": "nvarchar",
            "length": 50,
            "is_primary_key": false,
            "is_nullable": true
        }),
        StageKind::Relationships => json!({
            "name": "FK_constraint_name",
            "table": "table_name",
            "column": "column_name",
            "ref_table": "referenced_table",
            "ref_column": "referenced_column"
        }),
    }
}

fn stage_instructions(target: &StageTarget) -> String {
    let table = target.table.as_deref().unwrap_or_default();
    match target.stage {
        StageKind::Tables => format!(
            "List every schema and table in database {}.",
            target.database
        ),
        StageKind::Columns => format!(
            "List every column of table {} in database {}. Use length -1 for MAX types and null when a type has no length. Booleans must be true or false.",
            table, target.database
        ),
        StageKind::Relationships => format!(
            "List every foreign key whose parent table is {} in database {}, one entry per constrained column.",
            table, target.database
        ),
    }
}

pub(crate) fn build_messages(
    target: &StageTarget,
    snapshot: &RawSchemaSnapshot,
    prior: Option<&AttemptRecord>,
) -> Vec<ChatMessage> {
    let shape = serde_json::to_string_pretty(&json!([record_shape(target.stage)]))
        .unwrap_or_default();
    let raw = serde_json::to_string_pretty(snapshot).unwrap_or_default();

    let mut prompt = format!(
        "{}\n\nOutput ONLY a JSON array in this format, with exactly the keys {}:\n{}\n\nRaw introspection records:\n{}",
        stage_instructions(target),
        target.stage.fields().join(", "),
        shape,
        raw
    );
    if snapshot.is_empty() {
        prompt.push_str("\n\nThe introspection returned no records; answer with [] unless you are certain.");
    }

    if let Some(prior) = prior {
        let previous = serde_json::to_string_pretty(&prior.candidate.to_document())
            .unwrap_or_default();
        let issues = prior
            .report
            .issues
            .iter()
            .enumerate()
            .map(|(i, issue)| format!("{}. {}", i + 1, issue))
            .collect::<Vec<_>>()
            .join("\n");
        prompt.push_str(&format!(
            "\n\nYour previous answer (attempt {}) failed validation:\n{}\n\nValidator issues:\n{}\n\nFix every listed issue and keep the entries that were already correct.",
            prior.attempt_number, previous, issues
        ));
    }

    vec![
        ChatMessage::system(ANALYST_SYSTEM_PROMPT),
        ChatMessage::user(prompt),
    ]
}

/// Find the JSON payload in a model reply: a fenced ```json block first,
/// then the outermost array or object.
pub(crate) fn extract_json_block(text: &str) -> Option<&str> {
    let trimmed = text.trim();
    if let Some(start) = trimmed.find("```json") {
        let content_start = start + 7;
        if let Some(end) = trimmed[content_start..].find("```") {
            let block = trimmed[content_start..content_start + end].trim();
            if !block.is_empty() {
                return Some(block);
            }
        }
    }
    if trimmed.starts_with('{') || trimmed.starts_with('[') {
        return Some(trimmed);
    }
    let start = trimmed.find(['[', '{'])?;
    let closing = if trimmed[start..].starts_with('[') { ']' } else { '}' };
    let end = trimmed.rfind(closing)?;
    (end > start).then(|| &trimmed[start..=end])
}

pub(crate) fn parse_candidate(stage: StageKind, reply: &str) -> Result<CandidateArtifact, AgentError> {
    let block = extract_json_block(reply)
        .ok_or_else(|| AgentError::Unparseable("no JSON found in analyst reply".into()))?;
    let value: Value =
        serde_json::from_str(block).map_err(|e| AgentError::Unparseable(e.to_string()))?;

    let entries = match &value {
        Value::Array(items) => items.as_slice(),
        Value::Object(obj) => {
            let keys = [
                stage.as_str(),
                stage.noun(),
                "records",
                "items",
                "data",
                "result",
            ];
            match keys.iter().find_map(|k| obj.get(*k).and_then(Value::as_array)) {
                Some(items) => items.as_slice(),
                None => std::slice::from_ref(&value),
            }
        }
        other => {
            return Err(AgentError::Unparseable(format!(
                "expected a JSON array of {} records, found {}",
                stage, other
            )));
        }
    };
    Ok(CandidateArtifact::from_values(stage, entries))
}
