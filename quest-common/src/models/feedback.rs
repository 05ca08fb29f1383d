//! Free-form participant feedback

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::query::Query;

/// Feedback text with its submission timestamp
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedbackAnswer {
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

/// Feedback as submitted through the API.
///
/// The query id is optional: feedback may refer to a specific query or to
/// the questionnaire as a whole.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Feedback {
    #[serde(default)]
    pub query_id: Option<String>,
    pub answer: FeedbackAnswer,
}

/// Feedback as stored on disk, self-contained.
///
/// Carries the resolved query if the submitted id was known at the time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredFeedback {
    pub uid: String,
    pub qid: i64,
    pub answer: FeedbackAnswer,
    #[serde(default)]
    pub query: Option<Query>,
}
