//! The two roles of the extraction protocol.
//!
//! An [`Analyst`] turns raw introspection records into a stage-typed
//! candidate; a [`Validator`] re-derives ground truth on its own and reports
//! every discrepancy. Both are capability traits so the retry controller
//! never knows which backend sits behind them.

pub mod analyst;
pub mod compare;
pub mod validator;

use async_trait::async_trait;
use serde::Serialize;

use crate::core::error::AgentError;
use crate::core::schema::{CandidateArtifact, RawSchemaSnapshot, StageTarget};

pub use analyst::ModelAnalyst;
pub use validator::{GroundTruthValidator, ModelValidator};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ValidationReport {
    pub validation_passed: bool,
    pub issues: Vec<String>,
    pub message: String,
}

impl ValidationReport {
    /// Build a report whose verdict follows from `issues` alone.
    pub fn from_issues(target: &StageTarget, record_count: usize, issues: Vec<String>) -> Self {
        let message = if issues.is_empty() {
            format!(
                "All {} {} record(s) for {} match the database.",
                record_count,
                target.stage,
                target.describe()
            )
        } else {
            format!(
                "Found {} issue(s) in {} candidate {} record(s) for {}.",
                issues.len(),
                record_count,
                target.stage,
                target.describe()
            )
        };
        Self {
            validation_passed: issues.is_empty(),
            issues,
            message,
        }
    }

    /// Report for an attempt that never reached a verdict.
    pub fn failed_attempt(target: &StageTarget, issue: String) -> Self {
        Self {
            validation_passed: false,
            message: format!(
                "Attempt for {} {} did not complete: {}.",
                target.stage,
                target.describe(),
                issue
            ),
            issues: vec![issue],
        }
    }
}

/// One finished Analyst/Validator exchange.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AttemptRecord {
    pub attempt_number: u32,
    pub candidate: CandidateArtifact,
    pub report: ValidationReport,
}

#[async_trait]
pub trait Analyst: Send + Sync {
    /// Propose a candidate for `target`. `prior` is the immediately preceding
    /// attempt on retries.
    async fn propose(
        &self,
        target: &StageTarget,
        snapshot: &RawSchemaSnapshot,
        prior: Option<&AttemptRecord>,
    ) -> Result<CandidateArtifact, AgentError>;
}

#[async_trait]
pub trait Validator: Send + Sync {
    /// Check `candidate` against ground truth fetched independently.
    async fn validate(
        &self,
        target: &StageTarget,
        candidate: &CandidateArtifact,
    ) -> Result<ValidationReport, AgentError>;
}
