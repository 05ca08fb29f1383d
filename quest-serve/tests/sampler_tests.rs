//! Integration tests for the query sampler and the wired serving core
//!
//! Builds a small on-disk query database (index document + chunk files) in a
//! temporary directory and exercises sampling end to end, including the
//! no-repeat and exhaustion guarantees and atomic index re-sync.

use std::fs;
use std::path::Path;
use std::sync::Arc;

use chrono::Utc;
use tempfile::TempDir;

use quest_common::config::Settings;
use quest_common::models::query::{Answer, BucketStrategy, StoredResponse};
use quest_common::Error;
use quest_serve::sampler::QuerySampler;
use quest_serve::storage::ResponseStore;
use quest_serve::Services;

fn write_chunk(data_path: &Path, name: &str, ids: &[&str]) {
    let docs: Vec<String> = ids
        .iter()
        .map(|id| {
            format!(
                "id: {id}\nlabel: neutral\ntype: httpheaders\ndata: |\n  HTTP/1.1 200 OK\n"
            )
        })
        .collect();
    let path = data_path.join("chunks").join(name);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, docs.join("---\n")).unwrap();
}

fn write_index(data_path: &Path, body: &str) {
    let dir = data_path.join("index");
    fs::create_dir_all(&dir).unwrap();
    fs::write(dir.join("main.yaml"), body).unwrap();
}

/// Five queries across two chunks, no buckets
fn plain_database(data_path: &Path) {
    write_chunk(data_path, "a.yaml", &["q1", "q2", "q3"]);
    write_chunk(data_path, "b.yaml", &["q4", "q5"]);
    write_index(
        data_path,
        "index:\n  chunks/a.yaml: [q1, q2, q3]\n  chunks/b.yaml: [q4, q5]\n",
    );
}

fn settings(data: &Path, results: &Path) -> Settings {
    Settings {
        data_path: data.to_path_buf(),
        index_name: "main".to_string(),
        results_path: results.to_path_buf(),
        compress_results: false,
        session_timeout_mins: 60,
        admin_token: "secret".to_string(),
        sample_duplicates: false,
        api_burst_limit: 10,
        api_rate_limit: 1.0,
    }
}

fn answer_for(uid: &str, qid: i64, query: quest_common::models::query::Query) -> StoredResponse {
    StoredResponse::new(
        uid.to_string(),
        qid,
        query,
        Answer {
            timestamp: Utc::now(),
            lines: vec![],
            response_time: 0.5,
        },
    )
}

const QID: i64 = 1_700_000_000;

#[tokio::test]
async fn test_sampling_never_repeats_until_exhausted() {
    let data = TempDir::new().unwrap();
    let results = TempDir::new().unwrap();
    plain_database(data.path());

    let services = Services::start(&settings(data.path(), results.path()))
        .await
        .unwrap();
    assert_eq!(services.sampler.total_queries(), 5);

    let mut seen = std::collections::HashSet::new();
    for _ in 0..5 {
        let query = services.sampler.sample("alice").await.unwrap().unwrap();
        assert!(seen.insert(query.id.clone()), "query {} repeated", query.id);

        let response = answer_for("alice", QID, query);
        services
            .store
            .store_response("alice", QID, &response)
            .await
            .unwrap();
    }

    // exhausted: a normal terminal outcome with full progress counters
    assert!(services.sampler.sample("alice").await.unwrap().is_none());
    assert_eq!(services.store.answered_count("alice").await, 5);
    assert_eq!(services.sampler.total_queries(), 5);

    // a different identity still samples freely
    assert!(services.sampler.sample("bob").await.unwrap().is_some());
}

#[tokio::test]
async fn test_no_repeats_across_restart() {
    let data = TempDir::new().unwrap();
    let results = TempDir::new().unwrap();
    plain_database(data.path());
    let settings = settings(data.path(), results.path());

    let mut seen = std::collections::HashSet::new();
    {
        let services = Services::start(&settings).await.unwrap();
        for _ in 0..3 {
            let query = services.sampler.sample("alice").await.unwrap().unwrap();
            seen.insert(query.id.clone());
            let response = answer_for("alice", QID, query);
            services
                .store
                .store_response("alice", QID, &response)
                .await
                .unwrap();
        }
    }

    // the rebuilt cache keeps excluding everything already answered
    let services = Services::start(&settings).await.unwrap();
    for _ in 0..2 {
        let query = services.sampler.sample("alice").await.unwrap().unwrap();
        assert!(seen.insert(query.id.clone()), "query {} repeated", query.id);
        let response = answer_for("alice", QID, query);
        services
            .store
            .store_response("alice", QID, &response)
            .await
            .unwrap();
    }
    assert!(services.sampler.sample("alice").await.unwrap().is_none());
}

#[tokio::test]
async fn test_bucket_priority_end_to_end() {
    let data = TempDir::new().unwrap();
    let results = TempDir::new().unwrap();
    write_chunk(data.path(), "a.yaml", &["i1", "i2", "i3", "i4"]);
    write_index(
        data.path(),
        concat!(
            "index:\n",
            "  chunks/a.yaml: [i1, i2, i3, i4]\n",
            "buckets:\n",
            "  warmup:\n",
            "    queries: [i1, i2]\n",
            "    strategy: sorted\n",
            "    description: warm-up round\n",
            "  rest:\n",
            "    queries: [i3, i4]\n",
            "    strategy: random\n",
            "order: [warmup, rest]\n",
        ),
    );

    let services = Services::start(&settings(data.path(), results.path()))
        .await
        .unwrap();

    // the sorted bucket drains deterministically first
    for expected in ["i1", "i2"] {
        let query = services.sampler.sample("alice").await.unwrap().unwrap();
        assert_eq!(query.id, expected);
        let response = answer_for("alice", QID, query);
        services
            .store
            .store_response("alice", QID, &response)
            .await
            .unwrap();
    }

    // then the random bucket yields each of its ids exactly once
    let mut tail = std::collections::HashSet::new();
    for _ in 0..2 {
        let query = services.sampler.sample("alice").await.unwrap().unwrap();
        assert!(tail.insert(query.id.clone()));
        let response = answer_for("alice", QID, query);
        services
            .store
            .store_response("alice", QID, &response)
            .await
            .unwrap();
    }
    assert_eq!(
        tail,
        std::collections::HashSet::from(["i3".to_string(), "i4".to_string()])
    );
    assert!(services.sampler.sample("alice").await.unwrap().is_none());

    let buckets = services.sampler.buckets().unwrap();
    assert_eq!(buckets.len(), 2);
    assert_eq!(buckets[0].name, "warmup");
    assert_eq!(buckets[0].strategy, BucketStrategy::Sorted);
    assert_eq!(buckets[0].description, "warm-up round");
    assert_eq!(buckets[1].query_size, 2);
}

#[tokio::test]
async fn test_duplicate_sampling_ignores_answered_set() {
    let data = TempDir::new().unwrap();
    let results = TempDir::new().unwrap();
    write_chunk(data.path(), "a.yaml", &["only"]);
    write_index(data.path(), "index:\n  chunks/a.yaml: [only]\n");

    let mut settings = settings(data.path(), results.path());
    settings.sample_duplicates = true;
    let services = Services::start(&settings).await.unwrap();

    for _ in 0..3 {
        let query = services.sampler.sample("alice").await.unwrap().unwrap();
        assert_eq!(query.id, "only");
        let response = answer_for("alice", QID, query);
        services
            .store
            .store_response("alice", QID, &response)
            .await
            .unwrap();
    }
}

#[tokio::test]
async fn test_duplicates_with_bucket_order_refuses_startup() {
    let data = TempDir::new().unwrap();
    let results = TempDir::new().unwrap();
    write_chunk(data.path(), "a.yaml", &["q1"]);
    write_index(
        data.path(),
        concat!(
            "index:\n",
            "  chunks/a.yaml: [q1]\n",
            "buckets:\n",
            "  solo:\n",
            "    queries: [q1]\n",
            "    strategy: sorted\n",
            "order: [solo]\n",
        ),
    );

    let mut settings = settings(data.path(), results.path());
    settings.sample_duplicates = true;
    let result = Services::start(&settings).await;
    assert!(matches!(result, Err(Error::Config(_))));
}

#[tokio::test]
async fn test_query_lookup_and_exists() {
    let data = TempDir::new().unwrap();
    let results = TempDir::new().unwrap();
    plain_database(data.path());

    let services = Services::start(&settings(data.path(), results.path()))
        .await
        .unwrap();

    let query = services.sampler.query("q3").unwrap();
    assert_eq!(query.id, "q3");
    assert!(services.sampler.exists("q3"));

    assert!(!services.sampler.exists("nope"));
    assert!(matches!(
        services.sampler.query("nope"),
        Err(Error::NotFound(_))
    ));
}

#[tokio::test]
async fn test_id_promised_by_index_but_missing_from_chunk_is_fatal() {
    let data = TempDir::new().unwrap();
    let results = TempDir::new().unwrap();
    write_chunk(data.path(), "a.yaml", &["q1"]);
    // the index also promises q2, which the chunk does not contain
    write_index(data.path(), "index:\n  chunks/a.yaml: [q1, q2]\n");

    let services = Services::start(&settings(data.path(), results.path()))
        .await
        .unwrap();
    assert!(matches!(
        services.sampler.query("q2"),
        Err(Error::Integrity(_))
    ));
}

#[tokio::test]
async fn test_resync_picks_up_new_index() {
    let data = TempDir::new().unwrap();
    let results = TempDir::new().unwrap();
    plain_database(data.path());

    let services = Services::start(&settings(data.path(), results.path()))
        .await
        .unwrap();
    assert_eq!(services.sampler.total_queries(), 5);

    write_chunk(data.path(), "c.yaml", &["q6"]);
    write_index(
        data.path(),
        concat!(
            "index:\n",
            "  chunks/a.yaml: [q1, q2, q3]\n",
            "  chunks/b.yaml: [q4, q5]\n",
            "  chunks/c.yaml: [q6]\n",
        ),
    );
    services.sampler.resync().unwrap();
    assert_eq!(services.sampler.total_queries(), 6);
    assert!(services.sampler.exists("q6"));
}

#[tokio::test]
async fn test_failed_resync_keeps_previous_index() {
    let data = TempDir::new().unwrap();
    let results = TempDir::new().unwrap();
    plain_database(data.path());

    let services = Services::start(&settings(data.path(), results.path()))
        .await
        .unwrap();

    write_index(data.path(), "index: [broken\n");
    assert!(matches!(
        services.sampler.resync(),
        Err(Error::Config(_))
    ));

    // the previous index stays fully usable
    assert_eq!(services.sampler.total_queries(), 5);
    assert!(services.sampler.exists("q1"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_sampling_during_resync_sees_whole_indexes() {
    let data = TempDir::new().unwrap();
    let results = TempDir::new().unwrap();
    plain_database(data.path());

    let store = Arc::new(ResponseStore::open(results.path(), false).await.unwrap());
    let sampler = Arc::new(QuerySampler::new(data.path(), "main", store, false).unwrap());

    // q1 exists in every index version the readers can observe
    let mut readers = Vec::new();
    for _ in 0..4 {
        let sampler = Arc::clone(&sampler);
        readers.push(tokio::spawn(async move {
            for _ in 0..200 {
                let query = sampler.query("q1").expect("q1 must resolve in any index");
                assert_eq!(query.id, "q1");
                assert!(sampler.total_queries() >= 5);
            }
        }));
    }

    for round in 0..20 {
        // alternate between the two index versions while readers run
        if round % 2 == 0 {
            write_chunk(data.path(), "c.yaml", &["q6"]);
            write_index(
                data.path(),
                concat!(
                    "index:\n",
                    "  chunks/a.yaml: [q1, q2, q3]\n",
                    "  chunks/b.yaml: [q4, q5]\n",
                    "  chunks/c.yaml: [q6]\n",
                ),
            );
        } else {
            write_index(
                data.path(),
                "index:\n  chunks/a.yaml: [q1, q2, q3]\n  chunks/b.yaml: [q4, q5]\n",
            );
        }
        sampler.resync().unwrap();
    }

    for reader in readers {
        reader.await.unwrap();
    }
}

#[tokio::test]
async fn test_diagnostics_lists_sorted_ids() {
    let data = TempDir::new().unwrap();
    let results = TempDir::new().unwrap();
    plain_database(data.path());

    let services = Services::start(&settings(data.path(), results.path()))
        .await
        .unwrap();
    let diagnostics = services.sampler.diagnostics();
    assert_eq!(diagnostics.size, 5);
    assert_eq!(
        diagnostics.items,
        vec!["q1", "q2", "q3", "q4", "q5"]
            .into_iter()
            .map(String::from)
            .collect::<Vec<_>>()
    );
}
