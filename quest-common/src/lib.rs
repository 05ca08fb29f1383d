//! # Quest Common Library
//!
//! Shared code for the questionnaire serving core including:
//! - Error types
//! - Settings loading
//! - Data models (queries, answers, responses, feedback, profiles)
//! - Timestamp utilities

pub mod config;
pub mod error;
pub mod models;
pub mod time;

pub use config::Settings;
pub use error::{Error, Result};
