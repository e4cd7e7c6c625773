use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use super::{
    ScriptedAnalyst, ScriptedTransport, all_three, columns, controller, orders_columns, tables,
    three_tables,
};
use crate::core::agents::GroundTruthValidator;
use crate::core::artifacts::ArtifactWriter;
use crate::core::error::ExtractError;
use crate::core::extraction::{MAX_ATTEMPTS, RetryController, run_stage};
use crate::core::schema::{CandidateArtifact, StageKind, StageTarget};

fn target() -> StageTarget {
    StageTarget::tables("SalesDb")
}

#[tokio::test]
async fn exact_candidate_converges_on_first_attempt() {
    let transport = Arc::new(ScriptedTransport::new(three_tables()));
    let analyst = Arc::new(ScriptedAnalyst::new(vec![Ok(all_three())]));
    let result = controller(transport.clone(), analyst.clone())
        .run(&target(), &CancellationToken::new())
        .await
        .unwrap();

    assert!(result.converged);
    assert_eq!(result.attempts_used, 1);
    assert!(result.final_report.issues.is_empty());
    assert_eq!(analyst.calls(), 1);
    // one snapshot fetch for the analyst, one independent validator fetch
    assert_eq!(transport.calls(), 2);
}

#[tokio::test]
async fn missing_table_is_fixed_on_second_attempt() {
    let transport = Arc::new(ScriptedTransport::new(three_tables()));
    let analyst = Arc::new(ScriptedAnalyst::new(vec![
        Ok(tables(&[("dbo", "Orders"), ("dbo", "Customers")])),
        Ok(all_three()),
    ]));
    let result = controller(transport, analyst.clone())
        .run(&target(), &CancellationToken::new())
        .await
        .unwrap();

    assert!(result.converged);
    assert_eq!(result.attempts_used, 2);
    assert_eq!(result.history.len(), 2);
    assert!(!result.history[0].report.validation_passed);
    assert_eq!(analyst.calls(), 2);
}

#[tokio::test]
async fn never_converging_run_is_exhausted_with_last_candidate() {
    let transport = Arc::new(ScriptedTransport::new(three_tables()));
    let analyst = Arc::new(ScriptedAnalyst::new(vec![
        Ok(tables(&[("dbo", "Orders")])),
        Ok(tables(&[("dbo", "Orders"), ("dbo", "Customers")])),
    ]));
    let result = controller(transport, analyst.clone())
        .run(&target(), &CancellationToken::new())
        .await
        .unwrap();

    assert!(!result.converged);
    assert_eq!(result.attempts_used, MAX_ATTEMPTS);
    assert!(!result.final_report.validation_passed);
    assert_eq!(
        result.final_report.issues,
        vec!["missing table sales.Items".to_string()]
    );
    assert_eq!(result.final_candidate.len(), 2);
    assert_eq!(analyst.calls(), 3);
}

#[tokio::test]
async fn column_run_that_always_omits_a_column_is_exhausted() {
    let target = StageTarget::columns("SalesDb", "Orders");
    let transport = Arc::new(ScriptedTransport::new(orders_columns()));
    let analyst = Arc::new(ScriptedAnalyst::new(vec![Ok(columns(&["Id", "Notes"]))]));
    let result = controller(transport.clone(), analyst.clone())
        .run(&target, &CancellationToken::new())
        .await
        .unwrap();

    assert!(!result.converged);
    assert_eq!(result.attempts_used, MAX_ATTEMPTS);
    assert_eq!(result.final_candidate.stage(), StageKind::Columns);
    assert_eq!(
        result.final_report.issues,
        vec!["missing column Orders.Total".to_string()]
    );
    // every retry carried the previous report back to the analyst
    let priors = analyst.priors();
    assert!(priors[0].is_none());
    for (i, prior) in priors.iter().enumerate().skip(1) {
        let prior = prior.as_ref().unwrap();
        assert_eq!(prior.attempt_number as usize, i);
        assert_eq!(prior.report.issues, vec!["missing column Orders.Total"]);
    }
    // one analyst snapshot plus one validator fetch per attempt
    assert_eq!(transport.calls(), 1 + MAX_ATTEMPTS as usize);
}

#[tokio::test]
async fn column_run_converges_once_the_column_is_added() {
    let target = StageTarget::columns("SalesDb", "Orders");
    let transport = Arc::new(ScriptedTransport::new(orders_columns()));
    let analyst = Arc::new(ScriptedAnalyst::new(vec![
        Ok(columns(&["Id", "Notes"])),
        Ok(columns(&["Id", "Notes", "Total"])),
    ]));
    let result = controller(transport, analyst)
        .run(&target, &CancellationToken::new())
        .await
        .unwrap();

    assert!(result.converged);
    assert_eq!(result.attempts_used, 2);
}

#[tokio::test]
async fn unreadable_ground_truth_never_lets_an_empty_candidate_pass() {
    let target = StageTarget::columns("SalesDb", "Orders");
    let transport = Arc::new(ScriptedTransport::new(vec![
        serde_json::json!({"column_name": "Id", "data_type": "int", "is_primary_key": true}),
        serde_json::json!({"column_name": "Total", "data_type": "decimal"}),
    ]));
    let analyst = Arc::new(ScriptedAnalyst::new(vec![Ok(CandidateArtifact::empty(
        StageKind::Columns,
    ))]));
    let result = controller(transport, analyst)
        .run(&target, &CancellationToken::new())
        .await
        .unwrap();

    assert!(!result.converged);
    assert_eq!(result.attempts_used, MAX_ATTEMPTS);
    assert_eq!(result.final_report.issues.len(), 2);
    assert!(
        result.final_report.issues[0]
            .starts_with("ground-truth column record #1 could not be interpreted")
    );
}

#[tokio::test]
async fn exhausted_run_still_writes_its_document() {
    let dir = tempfile::tempdir().unwrap();
    let writer = ArtifactWriter::new(dir.path());
    let transport = Arc::new(ScriptedTransport::new(three_tables()));
    let analyst = Arc::new(ScriptedAnalyst::new(vec![Ok(tables(&[("dbo", "Orders")]))]));

    let (result, path) = run_stage(
        &controller(transport, analyst),
        &writer,
        &target(),
        &CancellationToken::new(),
    )
    .await
    .unwrap();

    assert!(!result.converged);
    assert!(path.ends_with("tables.json"));
    let written: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
    assert_eq!(written.as_array().map(Vec::len), Some(1));
    assert!(writer.report_path(&target()).exists());
}

#[tokio::test]
async fn validator_outage_consumes_an_attempt_then_recovers() {
    // call 1: analyst snapshot, call 2: validator re-fetch (down), call 3: validator again
    let transport = Arc::new(ScriptedTransport::new(three_tables()).failing_on(&[2]));
    let analyst = Arc::new(ScriptedAnalyst::new(vec![Ok(all_three())]));
    let result = controller(transport.clone(), analyst)
        .run(&target(), &CancellationToken::new())
        .await
        .unwrap();

    assert!(result.converged);
    assert_eq!(result.attempts_used, 2);
    let first = &result.history[0].report;
    assert!(!first.validation_passed);
    assert!(first.issues[0].starts_with("validator failed: schema service unreachable"));
    assert_eq!(transport.calls(), 3);
}

#[tokio::test]
async fn initial_snapshot_failure_is_retried() {
    let transport = Arc::new(ScriptedTransport::new(three_tables()).failing_on(&[1]));
    let analyst = Arc::new(ScriptedAnalyst::new(vec![Ok(all_three())]));
    let result = controller(transport.clone(), analyst.clone())
        .run(&target(), &CancellationToken::new())
        .await
        .unwrap();

    assert!(result.converged);
    assert_eq!(result.attempts_used, 2);
    assert!(result.history[0].report.issues[0].contains("schema fetch for the analyst failed"));
    assert_eq!(analyst.calls(), 1);
}

#[tokio::test]
async fn empty_candidate_enumerates_every_missing_table() {
    let transport = Arc::new(ScriptedTransport::new(three_tables()));
    let analyst = Arc::new(ScriptedAnalyst::new(vec![Ok(CandidateArtifact::empty(
        StageKind::Tables,
    ))]));
    let result = controller(transport, analyst)
        .run(&target(), &CancellationToken::new())
        .await
        .unwrap();

    assert!(!result.converged);
    assert_eq!(
        result.final_report.issues,
        vec![
            "missing table dbo.Orders".to_string(),
            "missing table dbo.Customers".to_string(),
            "missing table sales.Items".to_string(),
        ]
    );
}

#[tokio::test]
async fn analyst_failures_exhaust_with_the_empty_candidate() {
    let transport = Arc::new(ScriptedTransport::new(three_tables()));
    let analyst = Arc::new(ScriptedAnalyst::new(vec![Err("model unreachable".into())]));
    let result = controller(transport.clone(), analyst)
        .run(&target(), &CancellationToken::new())
        .await
        .unwrap();

    assert!(!result.converged);
    assert_eq!(result.attempts_used, 3);
    assert!(result.final_candidate.is_empty());
    assert_eq!(result.final_candidate.stage(), StageKind::Tables);
    assert!(result.final_report.issues[0].contains("model unreachable"));
    // the snapshot is fetched once and the validator is never reached
    assert_eq!(transport.calls(), 1);
}

#[tokio::test]
async fn analyst_failure_keeps_previous_candidate() {
    let transport = Arc::new(ScriptedTransport::new(three_tables()));
    let analyst = Arc::new(ScriptedAnalyst::new(vec![
        Ok(tables(&[("dbo", "Orders")])),
        Err("rate limited".into()),
    ]));
    let result = controller(transport, analyst)
        .run(&target(), &CancellationToken::new())
        .await
        .unwrap();

    assert!(!result.converged);
    assert_eq!(result.final_candidate, tables(&[("dbo", "Orders")]));
}

#[tokio::test]
async fn slow_analyst_times_out_and_consumes_attempts() {
    let transport = Arc::new(ScriptedTransport::new(three_tables()));
    let analyst = Arc::new(
        ScriptedAnalyst::new(vec![Ok(all_three())]).with_delay(Duration::from_secs(10)),
    );
    let controller = RetryController::new(
        transport.clone(),
        analyst.clone(),
        Arc::new(GroundTruthValidator::new(transport)),
        Duration::from_millis(20),
    );
    let result = controller
        .run(&target(), &CancellationToken::new())
        .await
        .unwrap();

    assert!(!result.converged);
    assert_eq!(result.attempts_used, 3);
    assert!(result.final_report.issues[0].contains("timed out"));
    assert_eq!(analyst.calls(), 3);
}

#[tokio::test]
async fn cancelled_run_returns_without_result() {
    let dir = tempfile::tempdir().unwrap();
    let writer = ArtifactWriter::new(dir.path());
    let transport = Arc::new(ScriptedTransport::new(three_tables()));
    let analyst = Arc::new(ScriptedAnalyst::new(vec![Ok(all_three())]));
    let cancel = CancellationToken::new();
    cancel.cancel();

    let err = run_stage(&controller(transport, analyst.clone()), &writer, &target(), &cancel)
        .await
        .unwrap_err();
    assert!(matches!(err, ExtractError::Cancelled { attempts_used: 0 }));
    assert_eq!(analyst.calls(), 0);
    assert!(!writer.document_path(&target()).exists());
}

#[tokio::test]
async fn attempts_stay_within_budget_for_every_stage() {
    let cases = [
        StageTarget::tables("SalesDb"),
        StageTarget::columns("SalesDb", "Orders"),
        StageTarget::relationships("SalesDb", "Orders"),
    ];
    for target in cases {
        let transport = Arc::new(ScriptedTransport::new(Vec::new()));
        let analyst = Arc::new(ScriptedAnalyst::new(vec![Err("boom".into())]));
        let result = controller(transport, analyst)
            .run(&target, &CancellationToken::new())
            .await
            .unwrap();
        assert!((1..=MAX_ATTEMPTS).contains(&result.attempts_used));
        assert_eq!(result.final_candidate.stage(), target.stage);
    }
}
