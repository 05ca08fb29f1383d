//! Settings loading and validation
//!
//! Every field resolves in priority order:
//! 1. Environment variable (`QUEST_*`, highest priority)
//! 2. TOML config file (`<config dir>/quest/config.toml`)
//! 3. Compiled default

use crate::{Error, Result};
use serde::Deserialize;
use std::path::PathBuf;
use tracing::info;

/// Application settings for the serving core.
///
/// Constructed once at process start and passed by reference; there is no
/// global settings singleton.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Directory holding the `index/` documents and the query chunk files
    pub data_path: PathBuf,
    /// Name of the index document under `<data_path>/index/<name>.yaml`
    pub index_name: String,
    /// Directory where results (profiles, responses, feedback) are stored
    pub results_path: PathBuf,
    /// Store response streams zstd-compressed
    pub compress_results: bool,
    /// Inactivity window (minutes) after which a new run is started
    pub session_timeout_mins: i64,
    /// Shared secret for granting admin privileges
    pub admin_token: String,
    /// Allow repeated samples of the same query for one identity
    pub sample_duplicates: bool,
    /// Rate limiter bucket capacity (burst limit)
    pub api_burst_limit: u32,
    /// Rate limiter refill rate, in tokens per second
    pub api_rate_limit: f64,
}

/// Optional overrides read from the TOML config file
#[derive(Debug, Default, Deserialize)]
struct TomlConfig {
    data_path: Option<String>,
    index_name: Option<String>,
    results_path: Option<String>,
    compress_results: Option<bool>,
    session_timeout_mins: Option<i64>,
    admin_token: Option<String>,
    sample_duplicates: Option<bool>,
    api_burst_limit: Option<u32>,
    api_rate_limit: Option<f64>,
}

impl Settings {
    /// Load settings from the environment and the optional config file.
    ///
    /// The admin token has no default and must be supplied; everything else
    /// falls back to a compiled default. Invalid values are a configuration
    /// error and must prevent startup.
    pub fn load() -> Result<Self> {
        let file = load_config_file();

        let settings = Self {
            data_path: env_var("QUEST_DATA")
                .map(PathBuf::from)
                .or_else(|| file.data_path.as_ref().map(PathBuf::from))
                .unwrap_or_else(|| default_base_dir().join("data")),
            index_name: env_var("QUEST_INDEX")
                .or_else(|| file.index_name.clone())
                .unwrap_or_else(|| "main".to_string()),
            results_path: env_var("QUEST_RESULTS")
                .map(PathBuf::from)
                .or_else(|| file.results_path.as_ref().map(PathBuf::from))
                .unwrap_or_else(|| default_base_dir().join("results")),
            compress_results: env_bool("QUEST_COMPRESS_RESULTS")?
                .or(file.compress_results)
                .unwrap_or(false),
            session_timeout_mins: env_parse("QUEST_SESSION_TIMEOUT_MINS")?
                .or(file.session_timeout_mins)
                .unwrap_or(60),
            admin_token: env_var("QUEST_ADMIN_TOKEN")
                .or_else(|| file.admin_token.clone())
                .ok_or_else(|| Error::Config("QUEST_ADMIN_TOKEN is not set".to_string()))?,
            sample_duplicates: env_bool("QUEST_SAMPLE_DUPLICATES")?
                .or(file.sample_duplicates)
                .unwrap_or(false),
            api_burst_limit: env_parse("QUEST_API_BURST_LIMIT")?
                .or(file.api_burst_limit)
                .unwrap_or(10),
            api_rate_limit: env_parse("QUEST_API_RATE_LIMIT")?
                .or(file.api_rate_limit)
                .unwrap_or(1.0),
        };

        settings.validate()?;
        info!(
            "loaded settings: data={} index={} results={}",
            settings.data_path.display(),
            settings.index_name,
            settings.results_path.display()
        );
        Ok(settings)
    }

    /// Validate value ranges. Also applied to hand-built settings.
    pub fn validate(&self) -> Result<()> {
        if self.api_burst_limit < 1 {
            return Err(Error::Config("api_burst_limit must be at least 1".to_string()));
        }
        if self.api_rate_limit <= 0.0 {
            return Err(Error::Config("api_rate_limit must be positive".to_string()));
        }
        if self.session_timeout_mins < 0 {
            return Err(Error::Config("session_timeout_mins must not be negative".to_string()));
        }
        Ok(())
    }
}

/// Read the optional TOML config file; missing or unreadable files
/// fall through to defaults rather than failing startup.
fn load_config_file() -> TomlConfig {
    let path = match dirs::config_dir() {
        Some(dir) => dir.join("quest").join("config.toml"),
        None => return TomlConfig::default(),
    };
    if !path.exists() {
        return TomlConfig::default();
    }

    match std::fs::read_to_string(&path) {
        Ok(raw) => match toml::from_str(&raw) {
            Ok(config) => config,
            Err(e) => {
                tracing::warn!("ignoring invalid config file {}: {}", path.display(), e);
                TomlConfig::default()
            }
        },
        Err(e) => {
            tracing::warn!("cannot read config file {}: {}", path.display(), e);
            TomlConfig::default()
        }
    }
}

/// OS-dependent default base directory for data and results
fn default_base_dir() -> PathBuf {
    dirs::data_local_dir()
        .map(|d| d.join("quest"))
        .unwrap_or_else(|| PathBuf::from("./quest_data"))
}

fn env_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

fn env_bool(name: &str) -> Result<Option<bool>> {
    match env_var(name) {
        None => Ok(None),
        Some(v) => match v.to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" => Ok(Some(true)),
            "0" | "false" | "no" => Ok(Some(false)),
            other => Err(Error::Config(format!("{name} has non-boolean value '{other}'"))),
        },
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Result<Option<T>> {
    match env_var(name) {
        None => Ok(None),
        Some(v) => v
            .parse::<T>()
            .map(Some)
            .map_err(|_| Error::Config(format!("{name} has invalid value '{v}'"))),
    }
}
