use std::sync::Arc;

use async_trait::async_trait;
use regex::Regex;
use serde_json::Value;
use tracing::{debug, info, warn};

use super::compare::compare;
use super::{ValidationReport, Validator};
use crate::core::error::AgentError;
use crate::core::llm::{ChatMessage, LlmManager};
use crate::core::schema::{CandidateArtifact, RawSchemaSnapshot, StageTarget};
use crate::core::transport::SchemaTransport;

const VALIDATOR_SYSTEM_PROMPT: &str = "You are a SQL Server schema auditor. \
Compare the candidate metadata with the ground-truth introspection records. \
Never assume or fabricate issues. Answer ONLY with a JSON object of the form \
{\"validation_passed\": true|false, \"issues\": [{\"type\": \"...\", \"name\": \"...\", \"details\": \"...\"}], \"message\": \"...\"}.";

/// Validator that re-fetches ground truth and compares field by field.
pub struct GroundTruthValidator {
    transport: Arc<dyn SchemaTransport>,
}

impl GroundTruthValidator {
    pub fn new(transport: Arc<dyn SchemaTransport>) -> Self {
        Self { transport }
    }
}

#[async_trait]
impl Validator for GroundTruthValidator {
    async fn validate(
        &self,
        target: &StageTarget,
        candidate: &CandidateArtifact,
    ) -> Result<ValidationReport, AgentError> {
        let truth = self.transport.fetch(target).await?;
        let issues = compare(target, candidate, &truth);
        info!(
            stage = %target.stage,
            "Validated {} candidate record(s) against {} raw record(s): {} issue(s)",
            candidate.len(),
            truth.len(),
            issues.len()
        );
        Ok(ValidationReport::from_issues(target, candidate.len(), issues))
    }
}

/// Ground-truth comparison followed by a model review. Model issues are
/// appended after the deterministic ones. A failed review is itself an
/// issue, so the report never passes without one.
pub struct ModelValidator {
    transport: Arc<dyn SchemaTransport>,
    llm: LlmManager,
}

impl ModelValidator {
    pub fn new(transport: Arc<dyn SchemaTransport>, llm: LlmManager) -> Self {
        Self { transport, llm }
    }

    fn build_messages(
        target: &StageTarget,
        candidate: &CandidateArtifact,
        truth: &RawSchemaSnapshot,
    ) -> Vec<ChatMessage> {
        let candidate_json =
            serde_json::to_string_pretty(&candidate.to_document()).unwrap_or_default();
        let truth_json = serde_json::to_string_pretty(truth).unwrap_or_default();
        vec![
            ChatMessage::system(VALIDATOR_SYSTEM_PROMPT),
            ChatMessage::user(format!(
                "Validate the {} extracted for {}.\n\nCandidate:\n{}\n\nGround truth:\n{}",
                target.stage,
                target.describe(),
                candidate_json,
                truth_json
            )),
        ]
    }
}

#[async_trait]
impl Validator for ModelValidator {
    async fn validate(
        &self,
        target: &StageTarget,
        candidate: &CandidateArtifact,
    ) -> Result<ValidationReport, AgentError> {
        let truth = self.transport.fetch(target).await?;
        let mut issues = compare(target, candidate, &truth);

        let messages = Self::build_messages(target, candidate, &truth);
        let review = match self.llm.generate(&messages).await {
            Ok(reply) => {
                debug!(stage = %target.stage, "Validator reply: {}", reply);
                parse_review(&reply)
            }
            Err(e) => Err(AgentError::Model(e.to_string())),
        };

        match review {
            Ok(review) => {
                if review.issues.is_empty() && !review.validation_passed {
                    warn!(
                        stage = %target.stage,
                        "Model rejected the candidate without listing issues: {}", review.message
                    );
                }
                for issue in review.issues {
                    if !issues.contains(&issue) {
                        issues.push(issue);
                    }
                }
            }
            // The comparison already ran; keep its issues for the next attempt.
            Err(e) => {
                warn!(stage = %target.stage, "Model review failed: {}", e);
                issues.push(format!("model review failed: {}", e));
            }
        }
        Ok(ValidationReport::from_issues(target, candidate.len(), issues))
    }
}

/// Parse the validator model's reply into a report. The verdict is taken
/// from the model as-is; callers recompute it from the issue list.
pub(crate) fn parse_review(reply: &str) -> Result<ValidationReport, AgentError> {
    let re = Regex::new(r"\{[\s\S]*\}").map_err(|e| AgentError::Unparseable(e.to_string()))?;
    let object = re
        .find(reply)
        .ok_or_else(|| AgentError::Unparseable("no JSON object in validator reply".into()))?;
    let value: Value = serde_json::from_str(object.as_str())
        .map_err(|e| AgentError::Unparseable(e.to_string()))?;

    let validation_passed = value
        .get("validation_passed")
        .and_then(crate::core::schema::coerce::bool_from_value)
        .unwrap_or(false);
    let issues = value
        .get("issues")
        .and_then(Value::as_array)
        .map(|items| items.iter().filter_map(issue_text).collect())
        .unwrap_or_default();
    let message = value
        .get("message")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    Ok(ValidationReport {
        validation_passed,
        issues,
        message,
    })
}

/// Render one model issue (a string or a `{type, name, details}` object).
fn issue_text(issue: &Value) -> Option<String> {
    match issue {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Object(obj) => {
            let text = |keys: &[&str]| {
                keys.iter()
                    .find_map(|k| obj.get(*k).and_then(Value::as_str))
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
            };
            let kind = text(&["type", "kind"]).unwrap_or("issue");
            let subject = text(&["name", "table", "column", "constraint"]);
            let details = text(&["details", "detail", "message", "description"]);
            Some(match (subject, details) {
                (Some(s), Some(d)) => format!("{} {}: {}", kind, s, d),
                (Some(s), None) => format!("{} {}", kind, s),
                (None, Some(d)) => format!("{}: {}", kind, d),
                (None, None) => issue.to_string(),
            })
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::error::TransportError;
    use crate::core::llm::{LlmProvider, SamplingParams};
    use crate::core::schema::{StageKind, TableRecord};
    use serde_json::json;

    /// Model answering every prompt with the same reply, or failing.
    struct CannedModel(Option<String>);

    #[async_trait]
    impl LlmProvider for CannedModel {
        fn provider_id(&self) -> &str {
            "canned"
        }

        async fn generate(
            &self,
            _model_id: &str,
            _messages: &[ChatMessage],
            _params: &SamplingParams,
        ) -> anyhow::Result<String> {
            self.0
                .clone()
                .ok_or_else(|| anyhow::anyhow!("503 Service Unavailable"))
        }
    }

    fn model_validator(reply: Option<&str>) -> ModelValidator {
        ModelValidator::new(
            Arc::new(FixedTransport(vec![json!("dbo.Orders"), json!("dbo.Items")])),
            LlmManager::new(
                Arc::new(CannedModel(reply.map(str::to_string))),
                "test-model",
                SamplingParams::default(),
            ),
        )
    }

    fn orders_only() -> CandidateArtifact {
        CandidateArtifact::new(vec![TableRecord {
            schema: "dbo".into(),
            table: "Orders".into(),
        }])
    }

    struct FixedTransport(Vec<Value>);

    #[async_trait]
    impl SchemaTransport for FixedTransport {
        async fn fetch(&self, _target: &StageTarget) -> Result<RawSchemaSnapshot, TransportError> {
            Ok(RawSchemaSnapshot::new(self.0.clone()))
        }
    }

    struct DownTransport;

    #[async_trait]
    impl SchemaTransport for DownTransport {
        async fn fetch(&self, _target: &StageTarget) -> Result<RawSchemaSnapshot, TransportError> {
            Err(TransportError::Connection("connection refused".into()))
        }
    }

    #[tokio::test]
    async fn ground_truth_validator_passes_matching_candidate() {
        let validator = GroundTruthValidator::new(Arc::new(FixedTransport(vec![
            json!("dbo.Orders"),
            json!({"TABLE_SCHEMA": "dbo", "TABLE_NAME": "Customers"}),
        ])));
        let candidate = CandidateArtifact::new(vec![
            TableRecord {
                schema: "dbo".into(),
                table: "Customers".into(),
            },
            TableRecord {
                schema: "dbo".into(),
                table: "Orders".into(),
            },
        ]);
        let report = validator
            .validate(&StageTarget::tables("SalesDb"), &candidate)
            .await
            .unwrap();
        assert!(report.validation_passed);
        assert!(report.issues.is_empty());
    }

    #[tokio::test]
    async fn ground_truth_validator_never_passes_an_empty_candidate() {
        let validator =
            GroundTruthValidator::new(Arc::new(FixedTransport(vec![json!("dbo.Orders")])));
        let report = validator
            .validate(
                &StageTarget::tables("SalesDb"),
                &CandidateArtifact::empty(StageKind::Tables),
            )
            .await
            .unwrap();
        assert!(!report.validation_passed);
        assert_eq!(report.issues, vec!["missing table dbo.Orders".to_string()]);
    }

    #[tokio::test]
    async fn transport_failure_surfaces_as_agent_error() {
        let validator = GroundTruthValidator::new(Arc::new(DownTransport));
        let err = validator
            .validate(
                &StageTarget::tables("SalesDb"),
                &CandidateArtifact::empty(StageKind::Tables),
            )
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            AgentError::Transport(TransportError::Connection(_))
        ));
    }

    #[tokio::test]
    async fn model_issues_follow_deterministic_ones() {
        let validator = model_validator(Some(
            r#"{"validation_passed": false, "issues": ["missing table dbo.Items", "schema casing differs"], "message": "no"}"#,
        ));
        let report = validator
            .validate(&StageTarget::tables("SalesDb"), &orders_only())
            .await
            .unwrap();
        assert_eq!(
            report.issues,
            vec!["missing table dbo.Items", "schema casing differs"]
        );
    }

    #[tokio::test]
    async fn failed_model_review_keeps_comparison_issues() {
        let target = StageTarget::tables("SalesDb");
        for reply in [None, Some("I am not sure.")] {
            let report = model_validator(reply)
                .validate(&target, &orders_only())
                .await
                .unwrap();
            assert!(!report.validation_passed);
            assert_eq!(report.issues.len(), 2);
            assert_eq!(report.issues[0], "missing table dbo.Items");
            assert!(report.issues[1].starts_with("model review failed: "));
        }
    }

    #[test]
    fn review_issues_accept_strings_and_objects() {
        let reply = r#"Sure. {"validation_passed": false, "issues": [
            "dbo.Items is missing",
            {"type": "missing_table", "table": "Customers", "details": "not in candidate"},
            {"type": "other", "details": "schema casing differs"}
        ], "message": "2 problems"} Let me know."#;
        let review = parse_review(reply).unwrap();
        assert!(!review.validation_passed);
        assert_eq!(
            review.issues,
            vec![
                "dbo.Items is missing",
                "missing_table Customers: not in candidate",
                "other: schema casing differs",
            ]
        );
        assert_eq!(review.message, "2 problems");
    }

    #[test]
    fn review_without_object_is_unparseable() {
        assert!(matches!(
            parse_review("validation passed"),
            Err(AgentError::Unparseable(_))
        ));
    }
}
