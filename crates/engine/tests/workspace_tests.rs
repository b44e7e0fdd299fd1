//! Workspace teardown and record query tests
//!
//! Tests for:
//! - workspace deletion (run container, job records, counter records, local cache)
//! - the large-result warning on counted queries
//! - legacy end_id records
//! - filtered, sorted, paginated queries over runs and jobs
//! - public/stored field-name translation
//! - tags

use std::sync::Arc;

use runstore_core::{doc, id_filter, ComputeTarget, Document, Error, RunSpec};
use runstore_engine::{
    MetadataStore, RecordQuery, StoreConfig, COUNTERS_CONTAINER, JOBS_CONTAINER,
};
use runstore_storage::{DocumentBackend, MemoryBackend};
use serde_json::json;
use tempfile::TempDir;

// ============================================================================
// Test Helpers
// ============================================================================

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();
}

fn memory_store(config: StoreConfig) -> (Arc<MemoryBackend>, MetadataStore) {
    init_tracing();
    let backend = Arc::new(MemoryBackend::new());
    let store = MetadataStore::new(backend.clone(), config);
    (backend, store)
}

/// Create `count` runs `run1..` in `ws`, each with `score = 10 * n % 7`
fn seed_runs(store: &MetadataStore, ws: &str, count: u64) {
    for n in 1..=count {
        let spec = RunSpec::new(ws, format!("run{}", n), ComputeTarget::local("local"))
            .field("score", (10 * n) % 7);
        assert!(store.runs().create(&spec).unwrap());
    }
}

fn ids(records: &[Document]) -> Vec<String> {
    records
        .iter()
        .map(|r| r["_id"].as_str().unwrap().to_string())
        .collect()
}

// ============================================================================
// Workspace deletion
// ============================================================================

#[test]
fn test_delete_workspace_removes_everything() {
    let cache = TempDir::new().unwrap();
    let (backend, store) =
        memory_store(StoreConfig::default().with_run_cache_dir(cache.path()));
    seed_runs(&store, "ws1", 3);
    assert_eq!(store.sequences().next_run_id("ws1", 1).unwrap(), 1);
    store.sequences().next_end_id("ws1").unwrap();
    backend
        .insert_one(
            COUNTERS_CONTAINER,
            doc(json!({"_id": "ws1-end_id", "last_id": 42})),
        )
        .unwrap();
    std::fs::create_dir_all(cache.path().join("ws1").join("runs")).unwrap();
    let jobs = store.jobs();
    jobs.create_job("job1", "ws1", doc(json!({"exper_name": "e1"})))
        .unwrap();
    jobs.create_job("job2", "ws2", doc(json!({"exper_name": "e2"})))
        .unwrap();

    store.workspaces().delete_workspace("ws1").unwrap();

    assert!(!backend.has_collection("ws1"));
    assert_eq!(backend.len(COUNTERS_CONTAINER), 0);
    assert!(!cache.path().join("ws1").exists());
    assert_eq!(store.runs().run_count("ws1").unwrap(), 0);

    // Jobs go with their workspace; other workspaces keep theirs
    let left = store
        .query()
        .get_info_for_jobs(&doc(json!({"ws_name": "ws1"})), None)
        .unwrap();
    assert!(left.is_empty(), "jobs left: {:?}", left);
    assert!(jobs.experiments_in_workspace("ws1").unwrap().is_empty());
    assert_eq!(jobs.get_job_workspace("job2").unwrap(), Some("ws2".to_string()));
    assert_eq!(backend.len(JOBS_CONTAINER), 1);
}

#[test]
fn test_allocation_restarts_after_delete() {
    let (_backend, store) = memory_store(StoreConfig::default());
    let seq = store.sequences();
    for _ in 0..5 {
        seq.next_run_id("ws1", 1).unwrap();
    }
    seq.next_child_id("ws1", "run3", 1).unwrap();

    store.workspaces().delete_workspace("ws1").unwrap();

    assert_eq!(seq.next_run_id("ws1", 1).unwrap(), 1);
    assert_eq!(seq.next_child_id("ws1", "run3", 1).unwrap(), 1);
    assert_eq!(seq.next_end_id("ws1").unwrap(), 1);
}

#[test]
fn test_delete_workspace_rejects_reserved_names() {
    let (_backend, store) = memory_store(StoreConfig::default());
    for name in ["", "__jobs__", "ws_counters", "ws1-end_id", "$ws"] {
        let err = store.workspaces().delete_workspace(name).unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)), "{:?}: {:?}", name, err);
    }
}

#[test]
fn test_legacy_end_id_seeds_counter() {
    let (backend, store) = memory_store(StoreConfig::default());
    backend
        .insert_one(
            COUNTERS_CONTAINER,
            doc(json!({"_id": "ws1-end_id", "last_id": 7})),
        )
        .unwrap();

    assert_eq!(store.sequences().legacy_end_id("ws1").unwrap(), Some(7));
    assert_eq!(store.sequences().next_end_id("ws1").unwrap(), 8);
    assert_eq!(store.sequences().next_end_id("ws1").unwrap(), 9);
    // Legacy records are not workspaces
    assert_eq!(store.workspaces().workspace_names().unwrap(), vec!["ws1"]);

    store.workspaces().delete_workspace("ws1").unwrap();
    assert_eq!(store.sequences().legacy_end_id("ws1").unwrap(), None);
    assert_eq!(store.sequences().next_end_id("ws1").unwrap(), 1);
}

// ============================================================================
// Run queries
// ============================================================================

#[test]
fn test_sorted_paginated_runs() {
    let (_backend, store) = memory_store(StoreConfig::default());
    seed_runs(&store, "ws1", 6);
    // scores: run1=3 run2=6 run3=2 run4=5 run5=1 run6=4

    let query = RecordQuery::new(Document::new()).sort("score", -1);
    let all = store
        .query()
        .get_filtered_sorted_run_info("ws1", &query)
        .unwrap();
    assert_eq!(ids(&all), vec!["run2", "run4", "run6", "run1", "run3", "run5"]);

    let page = store
        .query()
        .get_filtered_sorted_run_info("ws1", &query.clone().skip(2).first(2).count(true))
        .unwrap();
    assert_eq!(ids(&page), vec!["run6", "run1"]);
}

#[test]
fn test_large_result_warning_keeps_records() {
    let config = StoreConfig {
        large_result_warning: 2,
        ..StoreConfig::default()
    };
    let (_backend, store) = memory_store(config);
    seed_runs(&store, "ws1", 5);
    // scores: run1=3 run2=6 run3=2 run4=5 run5=1

    // Above the threshold: warns, still returns every record
    let query = RecordQuery::new(Document::new()).sort("score", 1).count(true);
    assert_eq!(query.result_count(5), 5);
    let all = store
        .query()
        .get_filtered_sorted_run_info("ws1", &query)
        .unwrap();
    assert_eq!(ids(&all), vec!["run5", "run3", "run1", "run4", "run2"]);

    // Paging brings the counted result under the threshold
    let page = query.clone().skip(1).first(2);
    assert_eq!(page.result_count(5), 2);
    let records = store
        .query()
        .get_filtered_sorted_run_info("ws1", &page)
        .unwrap();
    assert_eq!(ids(&records), vec!["run3", "run1"]);

    let tail = query.skip(3);
    assert_eq!(tail.result_count(5), 2);
    let records = store
        .query()
        .get_filtered_sorted_run_info("ws1", &tail)
        .unwrap();
    assert_eq!(ids(&records), vec!["run4", "run2"]);
}

#[test]
fn test_filter_and_projection_in_public_names() {
    let (_backend, store) = memory_store(StoreConfig::default());
    seed_runs(&store, "ws1", 2);

    let query = RecordQuery::new(doc(json!({"ws_name": "ws1", "score": {"$gt": 3}})))
        .fields(doc(json!({"ws_name": 1, "score": 1})))
        .sort("ws_name", 1);
    let records = store
        .query()
        .get_filtered_sorted_run_info("ws1", &query)
        .unwrap();

    assert_eq!(records.len(), 1);
    let record = &records[0];
    assert_eq!(record["_id"], json!("run2"));
    assert_eq!(record["ws_name"], json!("ws1"));
    assert_eq!(record["score"], json!(6));
    assert!(!record.contains_key("ws"));
    assert!(!record.contains_key("status"));
}

#[test]
fn test_run_info_group_selects_all_fields() {
    let (_backend, store) = memory_store(StoreConfig::default());
    seed_runs(&store, "ws1", 1);

    let records = store
        .query()
        .get_info_for_runs("ws1", &id_filter("run1"), Some(&doc(json!({"run_info": 1}))))
        .unwrap();
    let record = &records[0];
    for field in ["run_name", "ws_name", "status", "create_time", "box_name", "score"] {
        assert!(record.contains_key(field), "missing {}", field);
    }
}

#[test]
fn test_batch_size_controls_round_trips() {
    let (backend, store) = memory_store(StoreConfig::default());
    seed_runs(&store, "ws1", 10);

    let before = backend.round_trips();
    let records = store
        .query()
        .get_filtered_sorted_run_info("ws1", &RecordQuery::new(Document::new()).batch_size(3))
        .unwrap();
    assert_eq!(records.len(), 10);
    assert_eq!(backend.round_trips() - before, 4);

    // Configured default of 50 fetches everything at once
    let before = backend.round_trips();
    store
        .query()
        .get_filtered_sorted_run_info("ws1", &RecordQuery::new(Document::new()))
        .unwrap();
    assert_eq!(backend.round_trips() - before, 1);
}

#[test]
fn test_run_tags() {
    let (_backend, store) = memory_store(StoreConfig::default());
    seed_runs(&store, "ws1", 4);
    let runs = store.runs();

    let tagged = runs
        .set_run_tags(
            "ws1",
            &doc(json!({"score": {"$gte": 4}})),
            &doc(json!({"best": true, "note": "keep"})),
            false,
        )
        .unwrap();
    assert_eq!(tagged, Some(2));

    let best = store
        .query()
        .get_info_for_runs("ws1", &doc(json!({"tags.best": true})), None)
        .unwrap();
    let mut names = ids(&best);
    names.sort();
    assert_eq!(names, vec!["run2", "run4"]);
    assert_eq!(best[0]["tags"]["note"], json!("keep"));

    runs.set_run_tags("ws1", &id_filter("run2"), &doc(json!({"best": null})), true)
        .unwrap();
    let record = store
        .query()
        .get_info_for_runs("ws1", &id_filter("run2"), None)
        .unwrap()
        .remove(0);
    assert_eq!(record["tags"], json!({"note": "keep"}));
}

#[test]
fn test_empty_tags_rejected() {
    let (_backend, store) = memory_store(StoreConfig::default());
    let err = store
        .runs()
        .set_run_tags("ws1", &Document::new(), &Document::new(), false)
        .unwrap_err();
    assert!(matches!(err, Error::InvalidInput(_)));
}

// ============================================================================
// Job queries
// ============================================================================

#[test]
fn test_job_queries() {
    let (_backend, store) = memory_store(StoreConfig::default());
    let jobs = store.jobs();
    for (n, (ws, exper)) in [("ws1", "a"), ("ws1", "b"), ("ws2", "a"), ("ws1", "a")]
        .iter()
        .enumerate()
    {
        let job_id = format!("job{}", n + 1);
        jobs.create_job(&job_id, ws, doc(json!({"exper_name": exper})))
            .unwrap();
    }

    assert_eq!(jobs.experiments_in_workspace("ws1").unwrap(), vec!["a", "b"]);
    assert_eq!(jobs.get_job_workspace("job3").unwrap(), Some("ws2".to_string()));
    assert_eq!(jobs.get_job_workspace("job9").unwrap(), None);

    let mut names = jobs.job_names(Some(&doc(json!({"ws_name": "ws1"})))).unwrap();
    names.sort();
    assert_eq!(names, vec!["job1", "job2", "job4"]);

    let query = RecordQuery::new(doc(json!({"ws_name": "ws1"})))
        .fields(doc(json!({"job_id": 1})))
        .sort("job_id", -1)
        .first(2);
    let records = store.query().get_filtered_sorted_job_info(&query).unwrap();
    assert_eq!(ids(&records), vec!["job4", "job2"]);
    assert!(!records[0].contains_key("job_status"));
}

#[test]
fn test_job_tags_and_status() {
    let (_backend, store) = memory_store(StoreConfig::default());
    let jobs = store.jobs();
    jobs.create_job("job1", "ws1", Document::new()).unwrap();

    assert_eq!(
        jobs.set_job_tags(&id_filter("job1"), &doc(json!({"owner": "sam"})), false)
            .unwrap(),
        Some(1)
    );
    jobs.set_job_status("job1", runstore_core::JobStatus::Completed)
        .unwrap();
    jobs.update_connect_info_by_node("job1", "node0", json!({"ip": "10.0.0.4", "port": 22}))
        .unwrap();

    let job = store
        .query()
        .get_info_for_jobs(&id_filter("job1"), Some(&doc(json!({"job_info": 1}))))
        .unwrap()
        .remove(0);
    assert_eq!(job["tags"]["owner"], json!("sam"));
    assert_eq!(job["job_status"], json!("completed"));
    assert_eq!(job["connect_info_by_node"]["node0"]["port"], json!(22));
}
