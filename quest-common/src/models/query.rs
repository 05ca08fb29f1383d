//! Query documents, answers, and stored responses
//!
//! A query is a single questionnaire unit presented to a participant. It is
//! loaded from a YAML chunk file and immutable afterwards. Stored responses
//! are self-contained: they embed the full query so results remain
//! interpretable even after the query database changes.

use std::collections::{BTreeMap, HashSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Classification label of a query
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueryLabel {
    Neutral,
    Risky,
    Deceptive,
}

/// Payload category of a query
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueryKind {
    Tutorial,
    Httpheaders,
    Htaccess,
    Filesystem,
    Networkrequests,
}

/// A single scalar value in a reference or annotation map
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum KvValue {
    Bool(bool),
    Int(i64),
    Str(String),
    Null,
}

/// One free-form key-value map inside `references` or `annotations`
pub type KvMap = BTreeMap<String, KvValue>;

/// Annotation key marking risky lines
pub const ANNOTATION_RISKY_LINES: &str = "risk/risky-lines";
/// Annotation key marking deceptive lines
pub const ANNOTATION_DECEPTIVE_LINES: &str = "honeypatch/deceptive-lines";

/// Most minimal, backwards-compatible query.
///
/// The only part of a stored response that cache rehydration depends on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BaseQuery {
    pub id: String,
}

/// A questionnaire unit presented to a participant
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Query {
    pub id: String,
    pub label: QueryLabel,
    #[serde(rename = "type")]
    pub kind: QueryKind,
    #[serde(default)]
    pub references: Vec<KvMap>,
    #[serde(default)]
    pub annotations: Vec<KvMap>,
    pub data: String,
}

impl Query {
    /// First value stored under `key` across all reference maps
    pub fn reference(&self, key: &str) -> Option<&KvValue> {
        self.references.iter().find_map(|m| m.get(key))
    }

    /// All values stored under `key` across all reference maps
    pub fn references_all(&self, key: &str) -> Vec<&KvValue> {
        self.references.iter().filter_map(|m| m.get(key)).collect()
    }

    /// First value stored under `key` across all annotation maps
    pub fn annotation(&self, key: &str) -> Option<&KvValue> {
        self.annotations.iter().find_map(|m| m.get(key))
    }

    /// All values stored under `key` across all annotation maps
    pub fn annotations_all(&self, key: &str) -> Vec<&KvValue> {
        self.annotations.iter().filter_map(|m| m.get(key)).collect()
    }
}

/// Sampling strategy declared on a bucket
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BucketStrategy {
    /// Deterministic first-unseen order
    Sorted,
    /// Sample without replacement within the bucket
    Random,
}

/// Summary of one bucket, as listed on the admin and participant surfaces
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BucketSummary {
    pub name: String,
    pub strategy: BucketStrategy,
    pub description: String,
    pub query_size: usize,
}

/// A mark a participant placed on one line
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LineMark {
    Hack,
    Trap,
}

/// The marks a participant placed on the lines of a query
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Answer {
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub lines: Vec<(u32, LineMark)>,
    /// Time taken to answer, in seconds
    #[serde(default)]
    pub response_time: f64,
}

impl Answer {
    /// Line numbers marked as hacks
    pub fn hacks(&self) -> HashSet<u32> {
        self.marked(LineMark::Hack)
    }

    /// Line numbers marked as traps
    pub fn traps(&self) -> HashSet<u32> {
        self.marked(LineMark::Trap)
    }

    fn marked(&self, mark: LineMark) -> HashSet<u32> {
        self.lines
            .iter()
            .filter(|(_, m)| *m == mark)
            .map(|(line, _)| *line)
            .collect()
    }
}

/// Version tag written into newly stored responses
pub const RESPONSE_VERSION: &str = "response/v3";

fn default_response_version() -> String {
    RESPONSE_VERSION.to_string()
}

/// A participant's response to one query, as stored on disk
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredResponse {
    pub uid: String,
    pub qid: i64,
    pub query: Query,
    pub answer: Answer,
    #[serde(default = "default_response_version")]
    pub version: String,
}

impl StoredResponse {
    pub fn new(uid: String, qid: i64, query: Query, answer: Answer) -> Self {
        Self {
            uid,
            qid,
            query,
            answer,
            version: default_response_version(),
        }
    }
}

/// Minimal projection of a stored response.
///
/// Kept backwards-compatible across response versions; rehydration reads
/// records through this shape only.
#[derive(Debug, Clone, Deserialize)]
pub struct StoredResponseHead {
    pub uid: String,
    pub qid: i64,
    pub query: BaseQuery,
}
