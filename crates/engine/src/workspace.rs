//! Workspace teardown and cache invalidation
//!
//! Workspaces need no explicit creation: the run container appears with
//! the first run record and the counter record with the first allocation.
//! Deletion removes, in order:
//! 1. the local run summary cache (`<run_cache_dir>/<ws>/`)
//! 2. the run container
//! 3. the workspace's job records
//! 4. the current counter record
//! 5. the legacy `<ws>-end_id` record
//!
//! The store info record (`_id = 1` in `__store_info__`) is also managed here.

use std::path::PathBuf;

use runstore_core::{doc, id_filter, Document, FindOptions, Result, Update, ID_FIELD};
use serde_json::json;
use tracing::{debug, info};

use crate::store::{
    validate_ws_name, MetadataStore, COUNTERS_CONTAINER, JOBS_CONTAINER, LEGACY_END_ID_SUFFIX,
    STORE_INFO_CONTAINER,
};

/// `_id` of the store info record
const STORE_INFO_ID: i64 = 1;

/// Workspace-level operations
pub struct Workspaces<'a> {
    store: &'a MetadataStore,
}

impl<'a> Workspaces<'a> {
    pub(crate) fn new(store: &'a MetadataStore) -> Self {
        Self { store }
    }

    /// Check a workspace name; containers are created on first write
    pub fn create_workspace_if_needed(&self, ws_name: &str) -> Result<()> {
        validate_ws_name(ws_name)?;
        debug!(target: "runstore::ws", ws = ws_name, "Workspace created on first write");
        Ok(())
    }

    /// Names of every workspace with a counter record
    pub fn workspace_names(&self) -> Result<Vec<String>> {
        self.store.sequences().workspace_names()
    }

    /// Delete a workspace's runs, jobs, counters and local cache
    ///
    /// The next allocation in the workspace starts again from the caller's
    /// default.
    pub fn delete_workspace(&self, ws_name: &str) -> Result<()> {
        validate_ws_name(ws_name)?;
        let store = self.store;

        self.remove_cache(ws_name)?;

        let dropped = store
            .retry
            .call("delete_workspace", || store.backend.drop_collection(ws_name))?;
        let remaining = store.retry.call("delete_workspace", || {
            store.backend.count(ws_name, &Document::new())
        })?;
        debug!(target: "runstore::ws", ws = ws_name, dropped, remaining, "Dropped run container");

        let jobs_filter = doc(json!({"ws_name": ws_name}));
        let jobs = store.retry.call("delete_workspace", || {
            store.backend.delete_many(JOBS_CONTAINER, &jobs_filter)
        })?;
        debug!(target: "runstore::ws", ws = ws_name, deleted = jobs.deleted, "Deleted job records");

        store.retry.call_ignoring("delete_workspace", || {
            store
                .backend
                .delete_one(COUNTERS_CONTAINER, &id_filter(ws_name))
        });

        let legacy_id = format!("{}{}", ws_name, LEGACY_END_ID_SUFFIX);
        match store.retry.call("delete_workspace", || {
            store
                .backend
                .delete_one(COUNTERS_CONTAINER, &id_filter(legacy_id.as_str()))
        }) {
            Ok(_) => {}
            Err(e) if e.is_ignorable() => {
                debug!(target: "runstore::ws", ws = ws_name, "No legacy counter record");
            }
            Err(e) => return Err(e),
        }

        info!(target: "runstore::ws", ws = ws_name, "Deleted workspace");
        Ok(())
    }

    /// Remove the workspace's local run summary cache
    ///
    /// Returns whether a cache directory was removed.
    pub fn remove_cache(&self, ws_name: &str) -> Result<bool> {
        let Some(dir) = self.cache_dir(ws_name) else {
            return Ok(false);
        };
        if !dir.exists() {
            return Ok(false);
        }
        std::fs::remove_dir_all(&dir)?;
        info!(target: "runstore::ws", ws = ws_name, dir = %dir.display(), "Removed run cache");
        Ok(true)
    }

    /// Cache directory of a workspace, if a cache root is configured
    pub fn cache_dir(&self, ws_name: &str) -> Option<PathBuf> {
        self.store
            .config
            .run_cache_dir
            .as_ref()
            .map(|root| root.join(ws_name))
    }

    /// Read the store info record
    pub fn get_db_info(&self) -> Result<Option<Document>> {
        let store = self.store;
        let options = FindOptions::new().limit(1);
        let mut records = store.retry.records("get_db_info", || {
            store
                .backend
                .find(STORE_INFO_CONTAINER, &id_filter(STORE_INFO_ID), &options)
        })?;
        Ok(records.pop())
    }

    /// Write the store info record
    pub fn set_db_info(&self, mut info: Document) -> Result<()> {
        info.remove(ID_FIELD);
        let store = self.store;
        let update = Update::new().set_all(info);
        store.retry.call("set_db_info", || {
            store
                .backend
                .update_one(STORE_INFO_CONTAINER, &id_filter(STORE_INFO_ID), &update, true)
        })?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::StoreConfig;
    use runstore_core::{doc, ComputeTarget, RunSpec};
    use runstore_storage::MemoryBackend;
    use serde_json::json;
    use std::sync::Arc;
    use tempfile::TempDir;

    #[test]
    fn test_remove_cache() {
        let dir = TempDir::new().unwrap();
        let config = StoreConfig::default().with_run_cache_dir(dir.path());
        let store = MetadataStore::new(Arc::new(MemoryBackend::new()), config);

        let ws_cache = dir.path().join("ws1");
        std::fs::create_dir_all(ws_cache.join("runs")).unwrap();
        std::fs::write(ws_cache.join("runs").join("summary.json"), "[]").unwrap();
        std::fs::create_dir_all(dir.path().join("ws2")).unwrap();

        assert!(store.workspaces().remove_cache("ws1").unwrap());
        assert!(!ws_cache.exists());
        assert!(dir.path().join("ws2").exists());
        assert!(!store.workspaces().remove_cache("ws1").unwrap());
    }

    #[test]
    fn test_no_cache_dir_configured() {
        let store = MetadataStore::in_memory();
        assert_eq!(store.workspaces().cache_dir("ws1"), None);
        assert!(!store.workspaces().remove_cache("ws1").unwrap());
    }

    #[test]
    fn test_delete_workspace_without_records() {
        let store = MetadataStore::in_memory();
        store.workspaces().delete_workspace("ws1").unwrap();
    }

    #[test]
    fn test_delete_keeps_other_workspaces() {
        let store = MetadataStore::in_memory();
        for ws in ["ws1", "ws2"] {
            store
                .runs()
                .create(&RunSpec::new(ws, "run1", ComputeTarget::local("local")))
                .unwrap();
            store.sequences().next_run_id(ws, 1).unwrap();
            store
                .jobs()
                .create_job(&format!("job_{}", ws), ws, Document::new())
                .unwrap();
        }

        store.workspaces().delete_workspace("ws1").unwrap();
        assert_eq!(store.workspaces().workspace_names().unwrap(), vec!["ws2"]);
        assert!(store.runs().does_run_exist("ws2", "run1").unwrap());
        assert!(!store.runs().does_run_exist("ws1", "run1").unwrap());
        assert_eq!(store.jobs().job_names(None).unwrap(), vec!["job_ws2"]);
    }

    #[test]
    fn test_db_info() {
        let store = MetadataStore::in_memory();
        assert_eq!(store.workspaces().get_db_info().unwrap(), None);

        store
            .workspaces()
            .set_db_info(doc(json!({"paired_storage": "acct1", "storage_format": "1"})))
            .unwrap();
        store
            .workspaces()
            .set_db_info(doc(json!({"storage_format": "2"})))
            .unwrap();

        let info = store.workspaces().get_db_info().unwrap().unwrap();
        assert_eq!(info["_id"], json!(1));
        assert_eq!(info["paired_storage"], json!("acct1"));
        assert_eq!(info["storage_format"], json!("2"));
    }

    #[test]
    fn test_create_workspace_if_needed_validates() {
        let store = MetadataStore::in_memory();
        assert!(store.workspaces().create_workspace_if_needed("ws1").is_ok());
        assert!(store.workspaces().create_workspace_if_needed("a/b").is_err());
    }
}
