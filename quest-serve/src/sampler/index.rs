//! In-memory store of the query index, optimized for fast look-ups
//!
//! Built once per load and read-only afterwards. A re-sync builds a fresh
//! index and swaps it in whole; there is no partial mutation.

use std::collections::{BTreeMap, HashMap, HashSet};

use rand::Rng;
use serde::Deserialize;

use quest_common::models::query::{BucketStrategy, BucketSummary};
use quest_common::{Error, Result};

/// On-disk shape of the index document
#[derive(Debug, Deserialize)]
pub(crate) struct IndexDocument {
    /// chunk path -> ordered query ids stored in that chunk
    pub index: BTreeMap<String, Vec<String>>,
    #[serde(default)]
    pub buckets: BTreeMap<String, BucketDocument>,
    /// enforced bucket priority; buckets not listed here are ignored
    #[serde(default)]
    pub order: Vec<String>,
}

/// On-disk shape of one bucket declaration
#[derive(Debug, Deserialize)]
pub(crate) struct BucketDocument {
    pub queries: Vec<String>,
    pub strategy: BucketStrategy,
    #[serde(default)]
    pub description: Option<String>,
}

/// One bucket in declared priority order
#[derive(Debug)]
struct Bucket {
    name: String,
    queries: Vec<String>,
    strategy: BucketStrategy,
    description: String,
}

/// Immutable lookup structure over query chunks and buckets.
///
/// The id -> chunk mapping is inverted to be fast on lookup but still
/// memory-efficient: each query id maps to an integer position in
/// `chunk_paths`, from where the real path lookup happens.
#[derive(Debug, Default)]
pub struct SamplerIndex {
    chunk_indexes: HashMap<String, usize>,
    chunk_paths: Vec<String>,
    /// all query ids, for fallback sampling
    query_listing: Vec<String>,
    /// buckets in declared priority order; empty when no order is declared
    buckets: Vec<Bucket>,
}

impl SamplerIndex {
    /// Build the index from a parsed document, validating it whole.
    ///
    /// All validation failures here are fatal: a service must not start on
    /// a broken index.
    pub(crate) fn build(document: IndexDocument, allow_duplicates: bool) -> Result<Self> {
        if allow_duplicates && !document.order.is_empty() {
            return Err(Error::Config(
                "sampling duplicates and enforcing a bucket order are mutually exclusive"
                    .to_string(),
            ));
        }

        let mut index = SamplerIndex::default();
        for (chunk_path, query_ids) in document.index {
            let position = index.chunk_paths.len();
            index.chunk_paths.push(chunk_path);
            for qid in query_ids {
                if index.chunk_indexes.insert(qid.clone(), position).is_some() {
                    return Err(Error::Integrity(format!(
                        "query id '{qid}' appears in more than one chunk"
                    )));
                }
                index.query_listing.push(qid);
            }
        }

        // every id listed in any declared bucket must exist in the chunk map
        for (name, bucket) in &document.buckets {
            for qid in &bucket.queries {
                if !index.chunk_indexes.contains_key(qid) {
                    return Err(Error::Config(format!(
                        "bucket '{name}' lists unknown query id '{qid}'"
                    )));
                }
            }
        }

        let mut buckets = document.buckets;
        for name in document.order {
            let Some(bucket) = buckets.remove(&name) else {
                return Err(Error::Config(format!(
                    "bucket order names undeclared bucket '{name}'"
                )));
            };
            index.buckets.push(Bucket {
                description: bucket.description.unwrap_or_else(|| name.clone()),
                name,
                queries: bucket.queries,
                strategy: bucket.strategy,
            });
        }

        Ok(index)
    }

    /// Path of the chunk holding this query id
    pub fn resolve_chunk(&self, query_id: &str) -> Result<&str> {
        let position = self.chunk_indexes.get(query_id).ok_or_else(|| {
            Error::NotFound(format!("query id '{query_id}' not found in index"))
        })?;
        Ok(&self.chunk_paths[*position])
    }

    pub fn contains(&self, query_id: &str) -> bool {
        self.chunk_indexes.contains_key(query_id)
    }

    /// Total number of query ids in the index
    pub fn total(&self) -> usize {
        self.query_listing.len()
    }

    pub fn chunk_count(&self) -> usize {
        self.chunk_paths.len()
    }

    /// All query ids, sorted, for the diagnostics surface
    pub fn sorted_ids(&self) -> Vec<String> {
        let mut ids = self.query_listing.clone();
        ids.sort();
        ids
    }

    /// Sample a query id not contained in `exclude`, or `None` once
    /// everything is excluded.
    pub fn sample_id(&self, exclude: &HashSet<String>) -> Option<String> {
        // if given and possible, follow the enforced bucket order first
        if let Some(qid) = self.next_in_bucket_order(exclude) {
            return Some(qid);
        }

        // otherwise, sample randomly from the full query listing
        Self::fast_resample(&self.query_listing, exclude)
    }

    /// Bucket summaries in priority order, or `None` when no order
    /// is declared
    pub fn bucket_summaries(&self) -> Option<Vec<BucketSummary>> {
        if self.buckets.is_empty() {
            return None;
        }

        Some(
            self.buckets
                .iter()
                .map(|bucket| BucketSummary {
                    name: bucket.name.clone(),
                    strategy: bucket.strategy,
                    description: bucket.description.clone(),
                    query_size: bucket.queries.len(),
                })
                .collect(),
        )
    }

    fn next_in_bucket_order(&self, exclude: &HashSet<String>) -> Option<String> {
        for bucket in &self.buckets {
            match bucket.strategy {
                // first query from this bucket not yet excluded
                BucketStrategy::Sorted => {
                    for qid in &bucket.queries {
                        if !exclude.contains(qid) {
                            return Some(qid.clone());
                        }
                    }
                }
                // random query from this bucket not yet excluded
                BucketStrategy::Random => {
                    if let Some(qid) = Self::fast_resample(&bucket.queries, exclude) {
                        return Some(qid);
                    }
                }
            }
        }

        // nothing left to sample from any bucket
        None
    }

    /// Uniform sampling without replacement that avoids `exclude`.
    ///
    /// Draws random indices into `elements` while tracking already-tried
    /// indices in a growing fringe set instead of copying or shrinking the
    /// source list. Expected O(n) even when most ids are excluded; the
    /// worst case (nearly everything excluded) degrades to a full scan,
    /// which for this workload is the last few requests of a finished
    /// participant.
    fn fast_resample(elements: &[String], exclude: &HashSet<String>) -> Option<String> {
        let size = elements.len();
        let mut rng = rand::thread_rng();
        let mut fringe: HashSet<usize> = HashSet::new();

        while fringe.len() < size {
            // resample until we hit a not-yet-tried index
            let i = rng.gen_range(0..size);
            if !fringe.insert(i) {
                continue;
            }

            if !exclude.contains(&elements[i]) {
                return Some(elements[i].clone());
            }
        }

        // every index was tried, nothing left to sample
        None
    }
}
