//! Deterministic comparison of a candidate against ground truth.

use std::collections::{HashMap, HashSet};

use crate::core::schema::{
    CandidateArtifact, ColumnRecord, RawSchemaSnapshot, Records, RelationshipRecord, StageKind,
    StageRecord, StageTarget, TableRecord,
};

/// Every discrepancy between `candidate` and the ground truth in `snapshot`,
/// in a stable order: rejected entries, unreadable ground-truth records,
/// missing records, field mismatches, duplicates, unexpected records.
pub fn compare(
    target: &StageTarget,
    candidate: &CandidateArtifact,
    snapshot: &RawSchemaSnapshot,
) -> Vec<String> {
    let mut issues: Vec<String> = candidate
        .rejected()
        .iter()
        .map(|r| {
            format!(
                "rejected {} entry #{}: {}",
                target.stage.noun(),
                r.index + 1,
                r.reason
            )
        })
        .collect();

    if candidate.stage() != target.stage {
        issues.push(format!(
            "candidate holds {} records but the stage expects {} records",
            candidate.stage(),
            target.stage
        ));
    }

    let stage_issues = match (target.stage, candidate.records()) {
        (StageKind::Tables, Records::Tables(records)) => against(target, snapshot, records),
        (StageKind::Tables, _) => against::<TableRecord>(target, snapshot, &[]),
        (StageKind::Columns, Records::Columns(records)) => against(target, snapshot, records),
        (StageKind::Columns, _) => against::<ColumnRecord>(target, snapshot, &[]),
        (StageKind::Relationships, Records::Relationships(records)) => {
            against(target, snapshot, records)
        }
        (StageKind::Relationships, _) => against::<RelationshipRecord>(target, snapshot, &[]),
    };
    issues.extend(stage_issues);
    issues
}

/// Unreadable ground-truth records first, then the record-level diff. A
/// raw record that cannot be interpreted always blocks a pass.
fn against<R: StageRecord>(
    target: &StageTarget,
    snapshot: &RawSchemaSnapshot,
    candidate: &[R],
) -> Vec<String> {
    let truth = snapshot.ground_truth::<R>(target);
    let noun = R::KIND.noun();
    truth
        .uninterpretable
        .iter()
        .map(|(index, raw)| {
            format!(
                "ground-truth {} record #{} could not be interpreted: {}",
                noun,
                index + 1,
                raw
            )
        })
        .chain(diff(&truth.records, candidate))
        .collect()
}

/// Record-level diff for one stage.
pub fn diff<R: StageRecord>(truth: &[R], candidate: &[R]) -> Vec<String> {
    let noun = R::KIND.noun();

    let mut by_key: HashMap<String, Vec<&R>> = HashMap::new();
    for record in candidate {
        by_key.entry(record.key()).or_default().push(record);
    }

    let mut missing = Vec::new();
    let mut mismatches = Vec::new();
    let mut truth_keys = HashSet::new();
    for expected in truth {
        let key = expected.key();
        match by_key.get(&key).and_then(|found| found.first()) {
            None => missing.push(format!("missing {} {}", noun, expected.label())),
            Some(found) => {
                let actual = found.values();
                for ((field, want), (_, got)) in expected.values().into_iter().zip(actual) {
                    if !want.matches(&got) {
                        mismatches.push(format!(
                            "{} {}: {} is {} but the database has {}",
                            noun,
                            expected.label(),
                            field,
                            got,
                            want
                        ));
                    }
                }
            }
        }
        truth_keys.insert(key);
    }

    let mut duplicates = Vec::new();
    let mut unexpected = Vec::new();
    let mut seen = HashSet::new();
    for record in candidate {
        let key = record.key();
        if !seen.insert(key.clone()) {
            continue;
        }
        let count = by_key.get(&key).map_or(0, Vec::len);
        if count > 1 {
            duplicates.push(format!(
                "duplicate {} {} appears {} times",
                noun,
                record.label(),
                count
            ));
        }
        if !truth_keys.contains(&key) {
            unexpected.push(format!(
                "unexpected {} {} does not exist in the database",
                noun,
                record.label()
            ));
        }
    }

    missing
        .into_iter()
        .chain(mismatches)
        .chain(duplicates)
        .chain(unexpected)
        .collect()
}
