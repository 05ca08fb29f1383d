//! Per-browser identity and run lifecycle
//!
//! Every request resolves a user identifier (uid) and a quest identifier
//! (qid) here before anything else happens.
//!
//! - A uid identifies the browser across time. It is only cleared when the
//!   participant deletes their cookies or clears their profile.
//! - A qid identifies one run through the questionnaire. It rolls over when
//!   there was no interaction within the configured session timeout; this is
//!   a heuristic to cluster individual runs.
//!
//! The registry also owns the per-uid rate limiter state and the in-memory
//! set of admin-privileged uids. All per-uid state lives in one concurrent
//! map entry, so unrelated identities never contend and operations on a
//! single uid are serialized by the entry lock.

use std::collections::{BTreeMap, HashSet};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::RwLock;
use serde::Serialize;
use sha2::{Digest, Sha256};
use uuid::Uuid;

use quest_common::models::admin::SizeItems;
use quest_common::time::epoch_time;

use crate::ratelimit::LeakyBucket;

/// Activity timestamps of one run
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunTimes {
    pub start_time: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
}

/// The (uid, qid) pair resolved for a request.
///
/// `changed` tells the caller that its stored identity is stale (a new uid
/// was minted or a new run started) and must be written back to the client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionTicket {
    pub uid: String,
    pub qid: i64,
    pub changed: bool,
}

/// Tracks uid -> qid -> activity timestamps, admin grants, and per-uid
/// rate limiters.
pub struct SessionRegistry {
    session_timeout_mins: i64,
    admin_token_digest: [u8; 32],
    api_burst_limit: u32,
    api_rate_limit: f64,
    sessions: DashMap<String, BTreeMap<i64, RunTimes>>,
    buckets: DashMap<String, LeakyBucket>,
    admins: RwLock<HashSet<String>>,
}

impl SessionRegistry {
    pub fn new(
        session_timeout_mins: i64,
        admin_token: &str,
        api_burst_limit: u32,
        api_rate_limit: f64,
    ) -> Self {
        Self {
            session_timeout_mins,
            admin_token_digest: Sha256::digest(admin_token.as_bytes()).into(),
            api_burst_limit,
            api_rate_limit,
            sessions: DashMap::new(),
            buckets: DashMap::new(),
            admins: RwLock::new(HashSet::new()),
        }
    }

    /// Resolve the effective (uid, qid) for a request.
    ///
    /// Callers without an identity get a fresh uid and run. A returning uid
    /// keeps its identity; its most recent run is refreshed, or a new run is
    /// started once the inactivity window has elapsed. Always yields a
    /// valid qid.
    pub fn ensure_session(&self, existing: Option<(&str, i64)>) -> SessionTicket {
        self.ensure_session_at(existing, Utc::now())
    }

    /// Clock-explicit variant of [`ensure_session`](Self::ensure_session).
    pub fn ensure_session_at(
        &self,
        existing: Option<(&str, i64)>,
        now: DateTime<Utc>,
    ) -> SessionTicket {
        match existing {
            None => {
                // no identity yet, mint a new uid along with its first run
                let uid = Uuid::new_v4().to_string();
                let qid = self.keep_alive(&uid, now);
                SessionTicket {
                    uid,
                    qid,
                    changed: true,
                }
            }
            Some((uid, qid)) => {
                let effective = self.keep_alive(uid, now);
                SessionTicket {
                    uid: uid.to_string(),
                    qid: effective,
                    changed: effective != qid,
                }
            }
        }
    }

    /// Attempts to consume a rate-limited request for this uid.
    ///
    /// Returns `true` if the request was rate-limited and must be rejected.
    /// The bucket is created on first use; the map entry stays locked for
    /// the duration of the consume, so concurrent requests for one uid
    /// cannot spend the same token twice.
    pub fn is_rate_limited(&self, uid: &str) -> bool {
        let mut bucket = self
            .buckets
            .entry(uid.to_string())
            .or_insert_with(|| LeakyBucket::new(self.api_burst_limit, self.api_rate_limit));
        !bucket.consume()
    }

    /// Grants admin privileges to this uid iff the supplied token matches.
    ///
    /// Idempotent. SHA-256 digests are compared instead of the raw strings
    /// so the comparison does not short-circuit on the first differing byte.
    pub fn auth_admin(&self, uid: &str, token: &str) -> bool {
        let supplied: [u8; 32] = Sha256::digest(token.as_bytes()).into();
        if supplied != self.admin_token_digest {
            return false;
        }

        self.admins.write().insert(uid.to_string());
        true
    }

    /// Checks if this uid has admin privileges
    pub fn is_admin(&self, uid: &str) -> bool {
        self.admins.read().contains(uid)
    }

    /// Read-only snapshot of all sessions: uid -> runs with timestamps
    pub fn diagnostics(&self) -> SizeItems<BTreeMap<String, SizeItems<BTreeMap<i64, RunTimes>>>> {
        let mut items = BTreeMap::new();
        for entry in self.sessions.iter() {
            let runs = entry.value().clone();
            items.insert(entry.key().clone(), SizeItems::new(runs.len(), runs));
        }
        SizeItems::new(items.len(), items)
    }

    /// Refresh the most recent run of this uid, starting a new run when the
    /// inactivity window has elapsed (inclusive boundary) or when the uid
    /// has no recorded runs at all.
    fn keep_alive(&self, uid: &str, now: DateTime<Utc>) -> i64 {
        let mut entry = self.sessions.entry(uid.to_string()).or_default();
        let runs = entry.value_mut();

        let timeout_secs = self.session_timeout_mins * 60;
        let current = runs
            .iter()
            .next_back()
            .map(|(qid, times)| (*qid, times.last_seen));

        match current {
            Some((qid, last_seen)) if (now - last_seen).num_seconds() < timeout_secs => {
                if let Some(times) = runs.get_mut(&qid) {
                    times.last_seen = now;
                }
                qid
            }
            _ => {
                // timed out, or a returning uid we hold no runs for
                let qid = epoch_time(now);
                runs.insert(
                    qid,
                    RunTimes {
                        start_time: now,
                        last_seen: now,
                    },
                );
                qid
            }
        }
    }
}
