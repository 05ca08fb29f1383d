//! Durable storage for responses, feedback, and profiles
//!
//! Owns the answered-items cache (uid -> query ids already answered) that
//! keeps sampling repeat-free across restarts. Records are JSON Lines:
//!
//! - `profiles/{uid}.json` — one record per uid, overwritten on update
//! - `feedback/{uid}.jsonl` — append-only
//! - `responses/{uid}_{qid}_{iso}.jsonl[.zst]` — append-only per (uid, qid);
//!   the ISO part renders the qid so lexical sort approximates
//!   chronological order
//!
//! Response streams may be transparently zstd-compressed (one frame per
//! record, so frames concatenate across appends); readers pick plain or
//! compressed decoding by file extension, which keeps mixed directories
//! readable regardless of the current setting.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::fs;
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, RwLock};
use tracing::info;
use uuid::Uuid;

use quest_common::models::admin::SizeItems;
use quest_common::models::feedback::StoredFeedback;
use quest_common::models::query::{StoredResponse, StoredResponseHead};
use quest_common::models::user::User;
use quest_common::time::{epoch_time, epoch_time_to_iso_str, now};
use quest_common::{Error, Result};

/// Compression level for newly written response frames
const ZSTD_LEVEL: i32 = 3;

type ResponseCache = HashMap<String, HashSet<String>>;

/// Reads and writes participant data under the results directory.
pub struct ResponseStore {
    results_path: PathBuf,
    profiles_path: PathBuf,
    responses_path: PathBuf,
    feedback_path: PathBuf,
    compressed: bool,
    cache: RwLock<ResponseCache>,
    append_locks: DashMap<PathBuf, Arc<Mutex<()>>>,
}

impl ResponseStore {
    /// Open (or create) the results directory and rehydrate the
    /// answered-items cache from the records already on disk.
    ///
    /// Rehydration failures are fatal: serving with a partial cache would
    /// break the no-repeat guarantee.
    pub async fn open(results_path: &Path, compressed: bool) -> Result<Self> {
        let store = Self {
            results_path: results_path.to_path_buf(),
            profiles_path: results_path.join("profiles"),
            responses_path: results_path.join("responses"),
            feedback_path: results_path.join("feedback"),
            compressed,
            cache: RwLock::new(HashMap::new()),
            append_locks: DashMap::new(),
        };
        store.init_dirs()?;
        store.rehydrate_cache().await?;
        Ok(store)
    }

    /// Append the response to its (uid, qid) stream, then record the query
    /// id in the answered-items cache.
    ///
    /// The cache update happens only after the durable append succeeded, so
    /// membership is never recorded for a record that was not committed.
    pub async fn store_response(
        &self,
        uid: &str,
        qid: i64,
        response: &StoredResponse,
    ) -> Result<()> {
        let name = format!("{uid}_{qid}_{}.jsonl", epoch_time_to_iso_str(qid));
        let path = self.responses_path.join(name);
        let line = serde_json::to_string(response)?;
        self.append_line(&path, &line, self.compressed).await?;

        let mut cache = self.cache.write().await;
        cache
            .entry(uid.to_string())
            .or_default()
            .insert(response.query.id.clone());
        Ok(())
    }

    /// Append feedback to the uid's feedback stream.
    ///
    /// Feedback does not participate in the answered-items cache.
    pub async fn store_feedback(&self, uid: &str, feedback: &StoredFeedback) -> Result<()> {
        let path = self.feedback_path.join(format!("{uid}.jsonl"));
        let line = serde_json::to_string(feedback)?;
        self.append_line(&path, &line, false).await
    }

    /// Write (or overwrite) the profile record for this uid.
    /// Last write wins.
    pub fn store_user(&self, user: &User) -> Result<()> {
        let path = self.profiles_path.join(format!("{}.json", user.uid));
        fs::write(path, serde_json::to_string(user)?)?;
        Ok(())
    }

    pub fn read_user(&self, uid: &str) -> Result<User> {
        let path = self.profiles_path.join(format!("{uid}.json"));
        if !path.exists() {
            return Err(Error::NotFound(format!("no profile for uid '{uid}'")));
        }
        Ok(serde_json::from_str(&fs::read_to_string(path)?)?)
    }

    pub fn exists_user(&self, uid: &str) -> bool {
        self.profiles_path.join(format!("{uid}.json")).exists()
    }

    pub fn read_feedback(&self, uid: &str) -> Result<Vec<StoredFeedback>> {
        let path = self.feedback_path.join(format!("{uid}.jsonl"));
        if !path.exists() {
            return Err(Error::NotFound(format!("no feedback for uid '{uid}'")));
        }

        let raw = fs::read_to_string(&path)?;
        let mut feedback = Vec::new();
        for line in raw.lines().filter(|l| !l.trim().is_empty()) {
            feedback.push(serde_json::from_str(line)?);
        }
        Ok(feedback)
    }

    /// Query ids this uid has already answered (cloned snapshot)
    pub async fn answered_queries(&self, uid: &str) -> HashSet<String> {
        self.cache.read().await.get(uid).cloned().unwrap_or_default()
    }

    /// Number of queries this uid has already answered
    pub async fn answered_count(&self, uid: &str) -> usize {
        self.cache.read().await.get(uid).map_or(0, HashSet::len)
    }

    /// Move all durable records into a trash directory under the results
    /// root, then reinitialize empty storage and an empty cache.
    ///
    /// Nothing is deleted; an operator can recover the trash directory.
    /// Keeping the trash under the results root makes the move a
    /// same-filesystem rename.
    pub async fn clear_all(&self) -> Result<()> {
        let trash = self.results_path.join(format!(
            "trash_{}_{}",
            epoch_time_to_iso_str(epoch_time(now())),
            Uuid::new_v4().simple()
        ));
        fs::create_dir_all(&trash)?;
        fs::rename(&self.profiles_path, trash.join("profiles"))?;
        fs::rename(&self.responses_path, trash.join("responses"))?;
        fs::rename(&self.feedback_path, trash.join("feedback"))?;
        info!("moved results to trash directory {}", trash.display());

        self.append_locks.clear();
        self.cache.write().await.clear();
        self.init_dirs()?;
        Ok(())
    }

    /// Scan every response stream on disk and union the observed
    /// (uid, query id) pairs into the answered-items cache.
    ///
    /// Add-only and idempotent; safe to run while the store is live. A
    /// record that cannot be parsed aborts the scan with an integrity
    /// error: silently skipping entries would let participants see repeat
    /// items.
    pub async fn rehydrate_cache(&self) -> Result<()> {
        let mut observed: ResponseCache = HashMap::new();
        for entry in fs::read_dir(&self.responses_path)? {
            let path = entry?.path();
            if !path.is_file() {
                continue;
            }
            for line in read_record_lines(&path)? {
                let head: StoredResponseHead = serde_json::from_str(&line).map_err(|e| {
                    Error::Integrity(format!(
                        "corrupt response record in {}: {e}",
                        path.display()
                    ))
                })?;
                observed.entry(head.uid).or_default().insert(head.query.id);
            }
        }

        let nusers = observed.len();
        let nqueries: usize = observed.values().map(HashSet::len).sum();

        let mut cache = self.cache.write().await;
        for (uid, ids) in observed {
            cache.entry(uid).or_default().extend(ids);
        }
        info!("read {nusers} users and {nqueries} queries into response cache");
        Ok(())
    }

    /// Diagnostic snapshot of the answered-items cache:
    /// uid -> sorted answered ids
    pub async fn diagnostics_responses(
        &self,
    ) -> SizeItems<BTreeMap<String, SizeItems<Vec<String>>>> {
        let cache = self.cache.read().await;
        let mut items = BTreeMap::new();
        for (uid, ids) in cache.iter() {
            let mut ids: Vec<String> = ids.iter().cloned().collect();
            ids.sort();
            items.insert(uid.clone(), SizeItems::from_vec(ids));
        }
        SizeItems::new(items.len(), items)
    }

    /// Diagnostic snapshot of all stored profiles
    pub fn diagnostics_users(&self) -> Result<SizeItems<BTreeMap<String, User>>> {
        let mut items = BTreeMap::new();
        for uid in self.uids_with_extension(&self.profiles_path, "json")? {
            let user = self.read_user(&uid)?;
            items.insert(uid, user);
        }
        Ok(SizeItems::new(items.len(), items))
    }

    /// Diagnostic snapshot of all stored feedback
    pub fn diagnostics_feedback(
        &self,
    ) -> Result<SizeItems<BTreeMap<String, SizeItems<Vec<StoredFeedback>>>>> {
        let mut items = BTreeMap::new();
        for uid in self.uids_with_extension(&self.feedback_path, "jsonl")? {
            let feedback = self.read_feedback(&uid)?;
            items.insert(uid, SizeItems::from_vec(feedback));
        }
        Ok(SizeItems::new(items.len(), items))
    }

    fn init_dirs(&self) -> Result<()> {
        fs::create_dir_all(&self.profiles_path)?;
        fs::create_dir_all(&self.responses_path)?;
        fs::create_dir_all(&self.feedback_path)?;
        Ok(())
    }

    fn uids_with_extension(&self, dir: &Path, extension: &str) -> Result<Vec<String>> {
        let mut uids = Vec::new();
        for entry in fs::read_dir(dir)? {
            let path = entry?.path();
            if path.extension().is_some_and(|e| e == extension) {
                if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                    uids.push(stem.to_string());
                }
            }
        }
        uids.sort();
        Ok(uids)
    }

    /// Append one record line to a stream, serialized per stream so
    /// interleaved appends to the same (uid, qid) file cannot tear.
    /// Appends to distinct streams proceed in parallel.
    async fn append_line(&self, path: &Path, line: &str, compress: bool) -> Result<()> {
        let lock = {
            let entry = self
                .append_locks
                .entry(path.to_path_buf())
                .or_insert_with(|| Arc::new(Mutex::new(())));
            Arc::clone(entry.value())
        };
        let _guard = lock.lock().await;
        write_record(path, line, compress)
    }
}

/// Append one record, transparently compressed when requested
fn write_record(path: &Path, line: &str, compress: bool) -> Result<()> {
    if compress {
        let path = with_zstd_suffix(path);
        let mut file = fs::OpenOptions::new().create(true).append(true).open(path)?;
        // one self-contained frame per record; frames concatenate
        let frame = zstd::encode_all(format!("{line}\n").as_bytes(), ZSTD_LEVEL)?;
        file.write_all(&frame)?;
    } else {
        let mut file = fs::OpenOptions::new().create(true).append(true).open(path)?;
        file.write_all(line.as_bytes())?;
        file.write_all(b"\n")?;
    }
    Ok(())
}

/// Read all record lines from a stream, picking plain or zstd decoding by
/// file extension
fn read_record_lines(path: &Path) -> Result<Vec<String>> {
    let file = fs::File::open(path)?;
    let lines = if path.extension().is_some_and(|e| e == "zst") {
        let decoder = zstd::stream::read::Decoder::new(file)?;
        BufReader::new(decoder)
            .lines()
            .collect::<std::io::Result<Vec<_>>>()
            .map_err(|e| {
                Error::Integrity(format!("unreadable response stream {}: {e}", path.display()))
            })?
    } else {
        BufReader::new(file).lines().collect::<std::io::Result<Vec<_>>>()?
    };
    Ok(lines
        .into_iter()
        .filter(|l| !l.trim().is_empty())
        .collect())
}

fn with_zstd_suffix(path: &Path) -> PathBuf {
    match path.extension().and_then(|e| e.to_str()) {
        Some("zst") => path.to_path_buf(),
        Some(ext) => path.with_extension(format!("{ext}.zst")),
        None => path.with_extension("zst"),
    }
}
