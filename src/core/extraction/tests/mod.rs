mod scenarios;

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Value, json};

use crate::core::agents::{Analyst, AttemptRecord, GroundTruthValidator};
use crate::core::error::{AgentError, TransportError};
use crate::core::extraction::RetryController;
use crate::core::schema::{
    CandidateArtifact, ColumnRecord, RawSchemaSnapshot, StageTarget, TableRecord,
};
use crate::core::transport::SchemaTransport;

/// Transport answering with fixed records, failing on selected calls (1-based).
pub(super) struct ScriptedTransport {
    records: Vec<Value>,
    fail_on: HashSet<usize>,
    calls: AtomicUsize,
}

impl ScriptedTransport {
    pub(super) fn new(records: Vec<Value>) -> Self {
        Self {
            records,
            fail_on: HashSet::new(),
            calls: AtomicUsize::new(0),
        }
    }

    pub(super) fn failing_on(mut self, calls: &[usize]) -> Self {
        self.fail_on = calls.iter().copied().collect();
        self
    }

    pub(super) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SchemaTransport for ScriptedTransport {
    async fn fetch(&self, _target: &StageTarget) -> Result<RawSchemaSnapshot, TransportError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if self.fail_on.contains(&call) {
            return Err(TransportError::Connection("connection refused".into()));
        }
        Ok(RawSchemaSnapshot::new(self.records.clone()))
    }
}

/// Analyst replaying a fixed list of answers; the last answer repeats.
pub(super) struct ScriptedAnalyst {
    answers: Vec<Result<CandidateArtifact, String>>,
    priors: Mutex<Vec<Option<AttemptRecord>>>,
    delay: Option<Duration>,
}

impl ScriptedAnalyst {
    pub(super) fn new(answers: Vec<Result<CandidateArtifact, String>>) -> Self {
        Self {
            answers,
            priors: Mutex::new(Vec::new()),
            delay: None,
        }
    }

    pub(super) fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub(super) fn calls(&self) -> usize {
        self.priors.lock().unwrap().len()
    }

    pub(super) fn priors(&self) -> Vec<Option<AttemptRecord>> {
        self.priors.lock().unwrap().clone()
    }
}

#[async_trait]
impl Analyst for ScriptedAnalyst {
    async fn propose(
        &self,
        _target: &StageTarget,
        _snapshot: &RawSchemaSnapshot,
        prior: Option<&AttemptRecord>,
    ) -> Result<CandidateArtifact, AgentError> {
        let index = {
            let mut priors = self.priors.lock().unwrap();
            priors.push(prior.cloned());
            priors.len() - 1
        };
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let answer = &self.answers[index.min(self.answers.len() - 1)];
        answer.clone().map_err(AgentError::Model)
    }
}

pub(super) fn three_tables() -> Vec<Value> {
    vec![
        json!("dbo.Orders"),
        json!("dbo.Customers"),
        json!({"TABLE_SCHEMA": "sales", "TABLE_NAME": "Items"}),
    ]
}

pub(super) fn tables(names: &[(&str, &str)]) -> CandidateArtifact {
    CandidateArtifact::new(
        names
            .iter()
            .map(|(schema, table)| TableRecord {
                schema: schema.to_string(),
                table: table.to_string(),
            })
            .collect::<Vec<_>>(),
    )
}

pub(super) fn all_three() -> CandidateArtifact {
    tables(&[("dbo", "Orders"), ("dbo", "Customers"), ("sales", "Items")])
}

/// `Orders` columns as an INFORMATION_SCHEMA-style tool reports them.
pub(super) fn orders_columns() -> Vec<Value> {
    vec![
        json!({"COLUMN_NAME": "Id", "DATA_TYPE": "int", "IS_PRIMARY_KEY": 1, "IS_NULLABLE": "NO"}),
        json!({"COLUMN_NAME": "Notes", "DATA_TYPE": "nvarchar", "CHARACTER_MAXIMUM_LENGTH": -1, "IS_PRIMARY_KEY": 0, "IS_NULLABLE": "YES"}),
        json!({"COLUMN_NAME": "Total", "DATA_TYPE": "decimal", "IS_PRIMARY_KEY": 0, "IS_NULLABLE": "NO"}),
    ]
}

/// `Orders` columns by name, typed as in [`orders_columns`].
pub(super) fn columns(names: &[&str]) -> CandidateArtifact {
    CandidateArtifact::new(
        names
            .iter()
            .map(|name| {
                let (data_type, length, is_primary_key, is_nullable) = match *name {
                    "Id" => ("int", None, true, false),
                    "Notes" => ("nvarchar", Some(-1), false, true),
                    _ => ("decimal", None, false, false),
                };
                ColumnRecord {
                    table_name: "Orders".into(),
                    column_name: name.to_string(),
                    data_type: data_type.into(),
                    length,
                    is_primary_key,
                    is_nullable,
                }
            })
            .collect::<Vec<_>>(),
    )
}

pub(super) fn controller(
    transport: Arc<ScriptedTransport>,
    analyst: Arc<ScriptedAnalyst>,
) -> RetryController {
    RetryController::new(
        transport.clone(),
        analyst,
        Arc::new(GroundTruthValidator::new(transport)),
        Duration::from_secs(5),
    )
}
