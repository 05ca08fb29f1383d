//! Query index parsing, sampling, and chunk access
//!
//! The sampler reads the declarative index document, samples unseen queries
//! for an identity, and parses full query documents out of their chunks on
//! demand. The index itself is immutable; a re-sync parses a fresh one and
//! swaps it in atomically so concurrent readers observe either the old or
//! the new index, never a mix.

mod index;

pub use index::SamplerIndex;

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::RwLock;
use serde::Deserialize;
use tracing::info;

use quest_common::models::admin::SizeItems;
use quest_common::models::query::{BucketSummary, Query};
use quest_common::{Error, Result};

use crate::storage::ResponseStore;

/// Reads the query index, samples from it, and parses queries.
pub struct QuerySampler {
    data_path: PathBuf,
    index_name: String,
    store: Arc<ResponseStore>,
    duplicates: bool,
    index: RwLock<Arc<SamplerIndex>>,
}

impl QuerySampler {
    /// Parse the index document and build the sampler.
    ///
    /// Fatal on an invalid index; the service must not start without one.
    pub fn new(
        data_path: &Path,
        index_name: &str,
        store: Arc<ResponseStore>,
        duplicates: bool,
    ) -> Result<Self> {
        let index = Self::parse_index(data_path, index_name, duplicates)?;
        Ok(Self {
            data_path: data_path.to_path_buf(),
            index_name: index_name.to_string(),
            store,
            duplicates,
            index: RwLock::new(Arc::new(index)),
        })
    }

    /// Sample a query this identity has not answered yet.
    ///
    /// Returns `Ok(None)` once every query is exhausted for this uid; that
    /// is a normal terminal outcome, not an error. With duplicate sampling
    /// enabled, nothing is excluded and queries may repeat.
    pub async fn sample(&self, uid: &str) -> Result<Option<Query>> {
        let index = self.current_index();
        let sampled = if self.duplicates {
            index.sample_id(&HashSet::new())
        } else {
            let answered = self.store.answered_queries(uid).await;
            index.sample_id(&answered)
        };

        match sampled {
            Some(query_id) => Ok(Some(self.parse_query(&index, &query_id)?)),
            None => Ok(None),
        }
    }

    /// Get a query by its id. Unknown ids are a `NotFound` miss.
    pub fn query(&self, query_id: &str) -> Result<Query> {
        let index = self.current_index();
        self.parse_query(&index, query_id)
    }

    /// Checks if a query with that id exists in the index
    pub fn exists(&self, query_id: &str) -> bool {
        self.current_index().contains(query_id)
    }

    /// Total number of queries in the index
    pub fn total_queries(&self) -> usize {
        self.current_index().total()
    }

    /// Bucket summaries in priority order, if an order is declared
    pub fn buckets(&self) -> Option<Vec<BucketSummary>> {
        self.current_index().bucket_summaries()
    }

    /// Sorted listing of all query ids, for the admin surface
    pub fn diagnostics(&self) -> SizeItems<Vec<String>> {
        SizeItems::from_vec(self.current_index().sorted_ids())
    }

    /// Re-parse the index document and swap it in whole.
    ///
    /// On any error the previous index stays in place untouched.
    pub fn resync(&self) -> Result<()> {
        let fresh = Self::parse_index(&self.data_path, &self.index_name, self.duplicates)?;
        *self.index.write() = Arc::new(fresh);
        Ok(())
    }

    fn current_index(&self) -> Arc<SamplerIndex> {
        self.index.read().clone()
    }

    /// Scan the chunk holding `query_id` for the full query document.
    ///
    /// The chunk is a YAML multi-document stream; an id that the index
    /// promises but the chunk does not contain means index and data have
    /// diverged, which is an integrity error (serving would break the
    /// no-repeat bookkeeping).
    fn parse_query(&self, index: &SamplerIndex, query_id: &str) -> Result<Query> {
        let chunk_path = self.data_path.join(index.resolve_chunk(query_id)?);
        let raw = std::fs::read_to_string(&chunk_path)?;

        for document in serde_yaml::Deserializer::from_str(&raw) {
            let query = Query::deserialize(document).map_err(|e| {
                Error::Integrity(format!(
                    "malformed query document in chunk {}: {e}",
                    chunk_path.display()
                ))
            })?;
            if query.id == query_id {
                return Ok(query);
            }
        }

        Err(Error::Integrity(format!(
            "query id '{}' not found in chunk {}",
            query_id,
            chunk_path.display()
        )))
    }

    fn parse_index(data_path: &Path, index_name: &str, duplicates: bool) -> Result<SamplerIndex> {
        let path = data_path.join("index").join(format!("{index_name}.yaml"));
        let raw = std::fs::read_to_string(&path).map_err(|e| {
            Error::Config(format!("cannot read index document {}: {e}", path.display()))
        })?;
        let document = serde_yaml::from_str(&raw).map_err(|e| {
            Error::Config(format!("invalid index document {}: {e}", path.display()))
        })?;

        let index = SamplerIndex::build(document, duplicates)?;
        info!(
            "read {} query ids (in {} chunks) from {}",
            index.total(),
            index.chunk_count(),
            path.display()
        );
        Ok(index)
    }
}
