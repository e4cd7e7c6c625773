pub mod coerce;
mod records;

use std::collections::BTreeSet;
use std::fmt;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub use records::{ColumnRecord, RelationshipRecord, TableRecord};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageKind {
    Tables,
    Columns,
    Relationships,
}

impl StageKind {
    pub const ALL: [StageKind; 3] = [
        StageKind::Tables,
        StageKind::Columns,
        StageKind::Relationships,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            StageKind::Tables => "tables",
            StageKind::Columns => "columns",
            StageKind::Relationships => "relationships",
        }
    }

    pub fn from_name(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "tables" | "table" => Some(StageKind::Tables),
            "columns" | "column" | "schema" => Some(StageKind::Columns),
            "relationships" | "relationship" | "foreign_keys" | "fks" => {
                Some(StageKind::Relationships)
            }
            _ => None,
        }
    }

    /// Singular noun used in issue descriptions.
    pub fn noun(self) -> &'static str {
        match self {
            StageKind::Tables => "table",
            StageKind::Columns => "column",
            StageKind::Relationships => "relationship",
        }
    }

    pub fn fields(self) -> &'static [&'static str] {
        match self {
            StageKind::Tables => TableRecord::FIELDS,
            StageKind::Columns => ColumnRecord::FIELDS,
            StageKind::Relationships => RelationshipRecord::FIELDS,
        }
    }
}

impl fmt::Display for StageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What one stage run extracts: a stage over a database, optionally scoped
/// to one table (always set for COLUMNS and RELATIONSHIPS).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StageTarget {
    pub stage: StageKind,
    pub database: String,
    pub table: Option<String>,
}

impl StageTarget {
    pub fn tables(database: impl Into<String>) -> Self {
        Self {
            stage: StageKind::Tables,
            database: database.into(),
            table: None,
        }
    }

    pub fn columns(database: impl Into<String>, table: impl Into<String>) -> Self {
        Self {
            stage: StageKind::Columns,
            database: database.into(),
            table: Some(table.into()),
        }
    }

    pub fn relationships(database: impl Into<String>, table: impl Into<String>) -> Self {
        Self {
            stage: StageKind::Relationships,
            database: database.into(),
            table: Some(table.into()),
        }
    }

    pub fn describe(&self) -> String {
        match &self.table {
            Some(table) => format!("{}.{}", self.database, table),
            None => self.database.clone(),
        }
    }
}

/// Records as returned by the schema service, before any interpretation.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct RawSchemaSnapshot {
    records: Vec<Value>,
}

impl RawSchemaSnapshot {
    pub fn new(records: Vec<Value>) -> Self {
        Self { records }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Interpret the snapshot as ground truth for `target`. Raw records that
    /// cannot be mapped onto the stage's field set are kept aside, with
    /// their position, so the validator can report them.
    pub fn ground_truth<R: StageRecord>(&self, target: &StageTarget) -> GroundTruth<R> {
        let mut truth = GroundTruth {
            records: Vec::new(),
            uninterpretable: Vec::new(),
        };
        for (index, raw) in self.records.iter().enumerate() {
            match R::from_raw(raw, target) {
                Some(record) if record.in_scope(target) => truth.records.push(record),
                Some(_) => {}
                None => {
                    tracing::warn!(stage = %R::KIND, "Uninterpretable raw record #{}: {}", index + 1, raw);
                    truth.uninterpretable.push((index, raw.clone()));
                }
            }
        }
        truth
    }
}

/// Ground truth for one stage run.
#[derive(Debug, Clone, PartialEq)]
pub struct GroundTruth<R> {
    pub records: Vec<R>,
    /// Zero-based position and content of raw records that did not map.
    pub uninterpretable: Vec<(usize, Value)>,
}

/// A single comparable field value.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Text(String),
    Int(Option<i64>),
    Bool(bool),
}

impl FieldValue {
    /// Semantic equality: text ignores surrounding whitespace, bracket
    /// quoting and ASCII case.
    pub fn matches(&self, other: &FieldValue) -> bool {
        match (self, other) {
            (FieldValue::Text(a), FieldValue::Text(b)) => {
                coerce::normalize_ident(a) == coerce::normalize_ident(b)
            }
            (FieldValue::Int(a), FieldValue::Int(b)) => a == b,
            (FieldValue::Bool(a), FieldValue::Bool(b)) => a == b,
            _ => false,
        }
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldValue::Text(s) => write!(f, "'{}'", s),
            FieldValue::Int(Some(v)) => write!(f, "{}", v),
            FieldValue::Int(None) => f.write_str("null"),
            FieldValue::Bool(b) => write!(f, "{}", b),
        }
    }
}

/// Behaviour shared by the three stage record types.
pub trait StageRecord:
    Clone + fmt::Debug + PartialEq + Serialize + DeserializeOwned + Send + Sync + 'static
{
    const KIND: StageKind;
    const FIELDS: &'static [&'static str];

    /// Normalized identity used to pair candidate and ground-truth records.
    fn key(&self) -> String;

    /// Human-readable identity for issue text.
    fn label(&self) -> String;

    fn values(&self) -> Vec<(&'static str, FieldValue)>;

    /// Map a loosely-typed transport record onto this stage's field set.
    fn from_raw(raw: &Value, target: &StageTarget) -> Option<Self>;

    fn in_scope(&self, _target: &StageTarget) -> bool {
        true
    }
}

/// Stage-typed record list. Serializes as a bare JSON array.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Records {
    Tables(Vec<TableRecord>),
    Columns(Vec<ColumnRecord>),
    Relationships(Vec<RelationshipRecord>),
}

impl Records {
    pub fn empty(stage: StageKind) -> Self {
        match stage {
            StageKind::Tables => Records::Tables(Vec::new()),
            StageKind::Columns => Records::Columns(Vec::new()),
            StageKind::Relationships => Records::Relationships(Vec::new()),
        }
    }

    pub fn stage(&self) -> StageKind {
        match self {
            Records::Tables(_) => StageKind::Tables,
            Records::Columns(_) => StageKind::Columns,
            Records::Relationships(_) => StageKind::Relationships,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Records::Tables(v) => v.len(),
            Records::Columns(v) => v.len(),
            Records::Relationships(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl From<Vec<TableRecord>> for Records {
    fn from(v: Vec<TableRecord>) -> Self {
        Records::Tables(v)
    }
}

impl From<Vec<ColumnRecord>> for Records {
    fn from(v: Vec<ColumnRecord>) -> Self {
        Records::Columns(v)
    }
}

impl From<Vec<RelationshipRecord>> for Records {
    fn from(v: Vec<RelationshipRecord>) -> Self {
        Records::Relationships(v)
    }
}

/// An entry of the proposed artifact that did not match the stage field set.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RejectedRecord {
    pub index: usize,
    pub reason: String,
}

/// The Analyst's proposal for one stage. Records always carry exactly the
/// stage's field set; anything else is kept aside in `rejected` so the
/// Validator can report it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CandidateArtifact {
    records: Records,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    rejected: Vec<RejectedRecord>,
}

impl CandidateArtifact {
    pub fn empty(stage: StageKind) -> Self {
        Self {
            records: Records::empty(stage),
            rejected: Vec::new(),
        }
    }

    pub fn new(records: impl Into<Records>) -> Self {
        Self {
            records: records.into(),
            rejected: Vec::new(),
        }
    }

    /// Build a candidate from untyped entries, e.g. parsed model output.
    pub fn from_values(stage: StageKind, values: &[Value]) -> Self {
        match stage {
            StageKind::Tables => parse_strict::<TableRecord>(values),
            StageKind::Columns => parse_strict::<ColumnRecord>(values),
            StageKind::Relationships => parse_strict::<RelationshipRecord>(values),
        }
    }

    pub fn stage(&self) -> StageKind {
        self.records.stage()
    }

    pub fn records(&self) -> &Records {
        &self.records
    }

    pub fn rejected(&self) -> &[RejectedRecord] {
        &self.rejected
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty() && self.rejected.is_empty()
    }

    /// The stage document body: a JSON array of records.
    pub fn to_document(&self) -> Value {
        serde_json::to_value(&self.records).unwrap_or_else(|_| Value::Array(Vec::new()))
    }
}

fn parse_strict<R: StageRecord>(values: &[Value]) -> CandidateArtifact
where
    Records: From<Vec<R>>,
{
    let mut records = Vec::new();
    let mut rejected = Vec::new();
    for (index, value) in values.iter().enumerate() {
        match check_fields::<R>(value).and_then(|_| {
            serde_json::from_value::<R>(value.clone()).map_err(|e| e.to_string())
        }) {
            Ok(record) => records.push(record),
            Err(reason) => rejected.push(RejectedRecord { index, reason }),
        }
    }
    CandidateArtifact {
        records: records.into(),
        rejected,
    }
}

fn check_fields<R: StageRecord>(value: &Value) -> Result<(), String> {
    let obj = value
        .as_object()
        .ok_or_else(|| format!("expected an object, found {}", value))?;
    let expected: BTreeSet<&str> = R::FIELDS.iter().copied().collect();
    let present: BTreeSet<&str> = obj.keys().map(String::as_str).collect();

    let missing: Vec<&str> = expected.difference(&present).copied().collect();
    let unknown: Vec<&str> = present.difference(&expected).copied().collect();
    let mut problems = Vec::new();
    if !missing.is_empty() {
        problems.push(format!("missing field(s) {}", missing.join(", ")));
    }
    if !unknown.is_empty() {
        problems.push(format!("unknown field(s) {}", unknown.join(", ")));
    }
    if problems.is_empty() {
        Ok(())
    } else {
        Err(problems.join("; "))
    }
}
