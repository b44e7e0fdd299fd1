//! End-to-end tests through the top-level `runstore` API
//!
//! A controller submits a job of two nodes with one run each, the workers
//! report their lifecycle, and the controller reads the results back.

use std::sync::{Arc, Barrier};
use std::thread;

use runstore::{
    doc, id_filter, ComputeTarget, DocumentBackend, MemoryBackend, MetadataStore, RecordQuery,
    RunEvent, RunExit, RunSpec, StoreConfig, CONFIG_FILE_NAME,
};
use serde_json::json;
use tempfile::TempDir;

fn open_store(dir: &TempDir) -> MetadataStore {
    let backend: Arc<dyn DocumentBackend> = Arc::new(MemoryBackend::new());
    MetadataStore::open(backend, dir.path()).unwrap()
}

#[test]
fn test_open_writes_default_config() {
    let dir = TempDir::new().unwrap();
    let store = open_store(&dir);

    let path = dir.path().join(CONFIG_FILE_NAME);
    assert!(path.exists());
    assert_eq!(StoreConfig::from_file(&path).unwrap(), *store.config());
    assert_eq!(store.config().max_attempts, 25);
    store.close();
}

#[test]
fn test_open_reads_existing_config() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join(CONFIG_FILE_NAME);
    std::fs::write(&path, "add_log_records = false\nbatch_size = 7\n").unwrap();

    let store = open_store(&dir);
    assert!(!store.config().add_log_records);
    assert_eq!(store.config().batch_size, 7);

    store
        .runs()
        .create(&RunSpec::new("ws1", "run1", ComputeTarget::local("local")))
        .unwrap();
    store
        .runs()
        .process_event("ws1", "run1", &RunEvent::new("metrics", doc(json!({"loss": 1.5}))))
        .unwrap();
    let record = store
        .query()
        .get_info_for_runs("ws1", &id_filter("run1"), None)
        .unwrap()
        .remove(0);
    assert!(!record.contains_key("log_records"));
    assert_eq!(record["metrics"]["loss"], json!(1.5));
}

#[test]
fn test_job_with_parallel_workers() {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(open_store(&dir));

    // Controller: submit the job and its runs
    let job_id = format!("job{}", store.sequences().next_job_id(1).unwrap());
    store
        .jobs()
        .create_job(&job_id, "ws1", doc(json!({"exper_name": "sweep", "node_count": 2})))
        .unwrap();
    let parent = store.sequences().next_run_name("ws1").unwrap();
    let runs: Vec<String> = (0..2u32)
        .map(|node| {
            let name = runstore::child_run_name(&parent, u64::from(node), 0).unwrap();
            let spec = RunSpec::new("ws1", &name, ComputeTarget::batch("pool"))
                .job(&job_id)
                .indexes(node, node);
            assert!(store.runs().create(&spec).unwrap());
            name
        })
        .collect();
    assert_eq!(runs, vec!["run1.1", "run1.2"]);

    // Workers: one thread per node
    let barrier = Arc::new(Barrier::new(runs.len()));
    let handles: Vec<_> = runs
        .iter()
        .enumerate()
        .map(|(node, run)| {
            let store = Arc::clone(&store);
            let barrier = Arc::clone(&barrier);
            let job_id = job_id.clone();
            let run = run.clone();
            thread::spawn(move || {
                let jobs = store.jobs();
                let node_runs = store.runs();
                jobs.node_start(&job_id).unwrap();
                let node_id = format!("node{}", node);
                jobs.update_connect_info_by_node(&job_id, &node_id, json!({"port": 6000 + node}))
                    .unwrap();
                // Every node is up before any exits
                barrier.wait();
                jobs.run_start(&job_id).unwrap();
                node_runs.start("ws1", &run).unwrap();
                node_runs
                    .process_event("ws1", &run, &RunEvent::new("started", Default::default()))
                    .unwrap();
                for step in 1..=3 {
                    let metrics = doc(json!({"step": step, "loss": 1.0 / step as f64}));
                    node_runs
                        .process_event("ws1", &run, &RunEvent::new("metrics", metrics))
                        .unwrap();
                }
                let exit_code = node as i32;
                node_runs
                    .exit("ws1", &run, &RunExit::from_exit_code(exit_code))
                    .unwrap();
                jobs.run_exit(&job_id, exit_code).unwrap();
                jobs.node_exit(&job_id).unwrap()
            })
        })
        .collect();
    let completions: Vec<bool> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    assert_eq!(completions.iter().filter(|c| **c).count(), 1);

    // Controller: read the results back
    let job = store
        .query()
        .get_info_for_jobs(&id_filter(job_id.as_str()), None)
        .unwrap()
        .remove(0);
    assert_eq!(job["job_status"], json!("completed"));
    assert_eq!(job["completed_runs"], json!(2));
    assert_eq!(job["error_runs"], json!(1));
    assert_eq!(job["running_nodes"], json!(0));
    assert_eq!(job["connect_info_by_node"]["node1"]["port"], json!(6001));

    let query = RecordQuery::new(doc(json!({"job_id": job_id})))
        .fields(doc(json!({"status": 1, "end_id": 1, "ws_name": 1})))
        .sort("end_id", 1)
        .count(true);
    let records = store
        .query()
        .get_filtered_sorted_run_info("ws1", &query)
        .unwrap();
    assert_eq!(records.len(), 2);
    let end_ids: Vec<u64> = records
        .iter()
        .map(|r| r["end_id"].as_u64().unwrap())
        .collect();
    assert_eq!(end_ids, vec![1, 2]);
    for record in &records {
        assert_eq!(record["ws_name"], json!("ws1"));
    }

    let statuses: Vec<_> = runs
        .iter()
        .map(|run| {
            store
                .query()
                .get_info_for_runs("ws1", &id_filter(run.as_str()), None)
                .unwrap()
                .remove(0)
        })
        .collect();
    assert_eq!(statuses[0]["status"], json!("completed"));
    assert_eq!(statuses[1]["status"], json!("error"));
    assert_eq!(statuses[0]["metrics"]["step"], json!(3));
    assert_eq!(statuses[0]["restarts"], json!(0));

    store.log_call_stats();
    assert_eq!(store.retry_errors(), 0);
}
