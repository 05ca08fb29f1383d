//! User profile records

use serde::{Deserialize, Serialize};

/// Occupation of a participant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProfileJob {
    Student,
    Dev,
    Ops,
    Secops,
    Biz,
    Research,
    Other,
}

/// Self-assessed security experience of a participant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProfileRank {
    None,
    Little,
    Good,
    Advanced,
    Expert,
}

/// Self-description of a participant; all fields except the display color
/// are optional
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserProfile {
    #[serde(default)]
    pub nickname: Option<String>,
    #[serde(default)]
    pub job: Option<ProfileJob>,
    #[serde(default)]
    pub years: Option<u32>,
    #[serde(default)]
    pub rank: Option<ProfileRank>,
    pub color: String,
}

/// One durable record per identity, overwritten on profile updates
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub uid: String,
    pub profile: UserProfile,
}
