//! # Quest Serving Core
//!
//! In-memory serving state for the questionnaire API:
//! - `sampler` — query index parsing and no-repeat sampling
//! - `sessions` — per-browser identity and run lifecycle
//! - `ratelimit` — leaky bucket throttle for write endpoints
//! - `storage` — durable responses, feedback, and profiles plus the
//!   answered-items cache
//!
//! The API layer constructs one [`Services`] at process start and passes
//! references into its request handlers; none of the components is a
//! global singleton.

pub mod ratelimit;
pub mod sampler;
pub mod sessions;
pub mod storage;

use std::sync::Arc;

use quest_common::config::Settings;
use quest_common::Result;

use sampler::QuerySampler;
use sessions::SessionRegistry;
use storage::ResponseStore;

/// The fully wired serving core.
///
/// Construction is the startup synchronization point: the response cache is
/// rehydrated and the sampler index parsed before this value exists, so
/// request handlers never observe a partially initialized core. Fatal on
/// configuration or integrity errors; the process must not serve traffic
/// without all of them.
pub struct Services {
    pub sessions: SessionRegistry,
    pub store: Arc<ResponseStore>,
    pub sampler: QuerySampler,
}

impl Services {
    pub async fn start(settings: &Settings) -> Result<Self> {
        settings.validate()?;

        let store = Arc::new(
            ResponseStore::open(&settings.results_path, settings.compress_results).await?,
        );
        let sampler = QuerySampler::new(
            &settings.data_path,
            &settings.index_name,
            Arc::clone(&store),
            settings.sample_duplicates,
        )?;
        let sessions = SessionRegistry::new(
            settings.session_timeout_mins,
            &settings.admin_token,
            settings.api_burst_limit,
            settings.api_rate_limit,
        );

        Ok(Self {
            sessions,
            store,
            sampler,
        })
    }
}
