//! Shared scaffolding for the integration tests: a throwaway database per
//! test and a `ConfigHandle` pointed at a config.toml the test controls.

use std::sync::Arc;

use signet::config::ConfigHandle;
use signet::db::{self, Accessor};
use signet::jobs::Queue;
use signet::memory::history::ChangeContext;
use signet::memory::store::MemoryStore;

pub async fn accessor() -> (Arc<Accessor>, tempfile::TempDir) {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("signet.db");
    let accessor = db::open(&path, 2).await.expect("open database");
    (Arc::new(accessor), dir)
}

/// Write a config.toml with the given body and load a handle from it. The
/// handle never polls for changes; callers that need a live reload spawn
/// the watcher themselves.
pub fn config(dir: &tempfile::TempDir, body: &str) -> Arc<ConfigHandle> {
    let path = dir.path().join("config.toml");
    std::fs::write(&path, body).expect("write config.toml");
    ConfigHandle::load(path)
}

pub fn store(accessor: Arc<Accessor>, queue: Arc<Queue>, config: Arc<ConfigHandle>) -> Arc<MemoryStore> {
    Arc::new(MemoryStore::new(accessor, queue, config, None))
}

pub fn ctx() -> ChangeContext {
    ChangeContext::default()
}
