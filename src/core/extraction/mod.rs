//! The bounded Analyst/Validator retry loop.
//!
//! One [`RetryController::run`] drives a single stage run through
//! `Init -> Analyzing -> Validating -> {Passed | Retry | Exhausted}` and
//! never spends more than [`MAX_ATTEMPTS`] attempts. Transport, model and
//! validation failures all draw on that same budget.

use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::core::agents::{Analyst, AttemptRecord, ValidationReport, Validator};
use crate::core::artifacts::ArtifactWriter;
use crate::core::error::{AgentError, ExtractError};
use crate::core::schema::{CandidateArtifact, RawSchemaSnapshot, StageKind, StageTarget};
use crate::core::transport::SchemaTransport;

pub const MAX_ATTEMPTS: u32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RunState {
    Init,
    Analyzing,
    Validating,
    Retry,
    Passed,
    Exhausted,
}

impl RunState {
    pub fn as_str(self) -> &'static str {
        match self {
            RunState::Init => "init",
            RunState::Analyzing => "analyzing",
            RunState::Validating => "validating",
            RunState::Retry => "retry",
            RunState::Passed => "passed",
            RunState::Exhausted => "exhausted",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, RunState::Passed | RunState::Exhausted)
    }
}

/// Allowed edges of the stage-run state machine. An attempt whose Analyst
/// call fails leaves `Analyzing` without a verdict.
pub fn can_transition(from: RunState, to: RunState) -> bool {
    match from {
        RunState::Init => to == RunState::Analyzing,
        RunState::Analyzing => matches!(
            to,
            RunState::Validating | RunState::Retry | RunState::Exhausted
        ),
        RunState::Validating => matches!(
            to,
            RunState::Passed | RunState::Retry | RunState::Exhausted
        ),
        RunState::Retry => to == RunState::Analyzing,
        RunState::Passed | RunState::Exhausted => false,
    }
}

/// Terminal outcome of one stage run.
#[derive(Debug, Clone, Serialize)]
pub struct StageRunResult {
    pub run_id: String,
    pub target: StageTarget,
    pub final_candidate: CandidateArtifact,
    pub final_report: ValidationReport,
    pub attempts_used: u32,
    pub converged: bool,
    #[serde(skip)]
    pub history: Vec<AttemptRecord>,
}

impl StageRunResult {
    pub fn stage(&self) -> StageKind {
        self.target.stage
    }
}

pub struct RetryController {
    transport: Arc<dyn SchemaTransport>,
    analyst: Arc<dyn Analyst>,
    validator: Arc<dyn Validator>,
    call_timeout: Duration,
}

impl RetryController {
    pub fn new(
        transport: Arc<dyn SchemaTransport>,
        analyst: Arc<dyn Analyst>,
        validator: Arc<dyn Validator>,
        call_timeout: Duration,
    ) -> Self {
        Self {
            transport,
            analyst,
            validator,
            call_timeout,
        }
    }

    /// Run the protocol for `target` until it passes or the attempt budget
    /// is spent. Only cancellation ends a run without a result.
    pub async fn run(
        &self,
        target: &StageTarget,
        cancel: &CancellationToken,
    ) -> Result<StageRunResult, ExtractError> {
        let run_id = Uuid::new_v4().to_string();
        info!(
            stage = %target.stage,
            run_id = %run_id,
            "Starting stage run for {}",
            target.describe()
        );

        let mut state = RunState::Init;
        let mut attempt: u32 = 0;
        let mut history: Vec<AttemptRecord> = Vec::new();
        let mut snapshot: Option<RawSchemaSnapshot> = None;

        let final_record = loop {
            if cancel.is_cancelled() {
                warn!(stage = %target.stage, attempt, "Stage run cancelled");
                return Err(ExtractError::Cancelled {
                    attempts_used: attempt,
                });
            }

            advance(target, &mut state, RunState::Analyzing);
            attempt += 1;
            info!(
                stage = %target.stage,
                attempt,
                "Attempt {}/{}",
                attempt,
                MAX_ATTEMPTS
            );

            let record = match self.analyze(target, &mut snapshot, history.last()).await {
                Ok(candidate) => {
                    advance(target, &mut state, RunState::Validating);
                    let report = self.validate(target, &candidate).await;
                    AttemptRecord {
                        attempt_number: attempt,
                        candidate,
                        report,
                    }
                }
                Err(issue) => {
                    warn!(stage = %target.stage, attempt, "Analyst step failed: {}", issue);
                    // Keep the latest proposal so an exhausted run still
                    // persists the last attempt's candidate.
                    let candidate = history
                        .last()
                        .map(|prior| prior.candidate.clone())
                        .unwrap_or_else(|| CandidateArtifact::empty(target.stage));
                    AttemptRecord {
                        attempt_number: attempt,
                        candidate,
                        report: ValidationReport::failed_attempt(target, issue),
                    }
                }
            };

            let next = if record.report.validation_passed {
                RunState::Passed
            } else if attempt < MAX_ATTEMPTS {
                RunState::Retry
            } else {
                RunState::Exhausted
            };
            advance(target, &mut state, next);

            if state.is_terminal() {
                break record;
            }
            for issue in &record.report.issues {
                debug!(stage = %target.stage, attempt, "Issue: {}", issue);
            }
            history.push(record);
        };

        history.push(final_record.clone());
        let converged = state == RunState::Passed;
        if converged {
            info!(
                stage = %target.stage,
                attempts_used = attempt,
                "Validation passed for {}",
                target.describe()
            );
        } else {
            warn!(
                stage = %target.stage,
                attempts_used = attempt,
                "Retry budget exhausted for {} with {} open issue(s)",
                target.describe(),
                final_record.report.issues.len()
            );
        }

        Ok(StageRunResult {
            run_id,
            target: target.clone(),
            final_candidate: final_record.candidate,
            final_report: final_record.report,
            attempts_used: attempt,
            converged,
            history,
        })
    }

    /// Analyzing step: fetch the snapshot once, then ask the Analyst. Any
    /// failure is returned as the issue text for this attempt.
    async fn analyze(
        &self,
        target: &StageTarget,
        snapshot: &mut Option<RawSchemaSnapshot>,
        prior: Option<&AttemptRecord>,
    ) -> Result<CandidateArtifact, String> {
        let raw = match snapshot.take() {
            Some(raw) => raw,
            None => self
                .bounded(async { self.transport.fetch(target).await.map_err(AgentError::from) })
                .await
                .map_err(|e| format!("schema fetch for the analyst failed: {}", e))?,
        };
        let raw = snapshot.insert(raw);

        let candidate = self
            .bounded(self.analyst.propose(target, raw, prior))
            .await
            .map_err(|e| format!("analyst failed: {}", e))?;
        debug!(
            stage = %target.stage,
            "Analyst proposed {} record(s), {} rejected",
            candidate.len(),
            candidate.rejected().len()
        );
        Ok(candidate)
    }

    /// Validating step. A failed or timed-out Validator call yields a
    /// failing report instead of aborting the run.
    async fn validate(&self, target: &StageTarget, candidate: &CandidateArtifact) -> ValidationReport {
        match self.bounded(self.validator.validate(target, candidate)).await {
            Ok(report) => report,
            Err(e) => {
                warn!(stage = %target.stage, "Validator step failed: {}", e);
                ValidationReport::failed_attempt(target, format!("validator failed: {}", e))
            }
        }
    }

    async fn bounded<T, F>(&self, call: F) -> Result<T, AgentError>
    where
        F: Future<Output = Result<T, AgentError>>,
    {
        match tokio::time::timeout(self.call_timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(AgentError::Timeout(self.call_timeout)),
        }
    }
}

fn advance(target: &StageTarget, state: &mut RunState, next: RunState) {
    debug_assert!(
        can_transition(*state, next),
        "illegal transition {:?} -> {:?}",
        state,
        next
    );
    debug!(
        stage = %target.stage,
        "State {} -> {}",
        state.as_str(),
        next.as_str()
    );
    *state = next;
}

/// Run one stage to a terminal state and persist its document.
pub async fn run_stage(
    controller: &RetryController,
    writer: &ArtifactWriter,
    target: &StageTarget,
    cancel: &CancellationToken,
) -> Result<(StageRunResult, PathBuf), ExtractError> {
    let result = controller.run(target, cancel).await?;
    let path = writer.persist(&result).await?;
    Ok((result, path))
}

#[cfg(test)]
mod tests;
