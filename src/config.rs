//! Pipeline configuration and safety flags (spec §4.11).
//!
//! Loaded once at startup from `<agents_dir>/config.toml`, overridden by
//! `SIGNET_*` environment variables, and polled for changes so operators can
//! flip a flag without restarting the daemon. Every mutating write path
//! consults the current snapshot via `PipelineConfig::current`.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

fn default_true() -> bool {
    true
}

/// Typed, hot-reloadable pipeline configuration (spec §4.11).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PipelineConfig {
    /// Master off-switch; when false, all mutating endpoints 503.
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Run extract/decide but skip all writes.
    pub shadow_mode: bool,
    /// Reject any write regardless of shadow_mode.
    pub mutations_frozen: bool,
    /// If false, modify/forget return `forbidden`.
    #[serde(default = "default_true")]
    pub allow_update_delete: bool,
    /// Gate entity/relation writes.
    #[serde(default = "default_true")]
    pub graph_enabled: bool,
    /// Gate worker-initiated writes.
    #[serde(default = "default_true")]
    pub autonomous_enabled: bool,
    pub autonomous_frozen: bool,
    /// Enable the Decide worker's LLM-based contradiction pass.
    pub semantic_contradiction_enabled: bool,

    pub reranker_enabled: bool,
    #[serde(default = "default_reranker_top_n")]
    pub reranker_top_n: usize,
    #[serde(default = "default_reranker_timeout_ms")]
    pub reranker_timeout_ms: u64,

    #[serde(default = "default_extraction_timeout_ms")]
    pub extraction_timeout_ms: u64,
    #[serde(default = "default_min_fact_confidence")]
    pub min_fact_confidence_for_write: f64,

    #[serde(default)]
    pub graph_boost_weight: f64,

    #[serde(default = "default_worker_poll_ms")]
    pub worker_poll_ms: u64,
    #[serde(default = "default_worker_max_retries")]
    pub worker_max_retries: u32,
    #[serde(default = "default_lease_timeout_ms")]
    pub lease_timeout_ms: u64,
    #[serde(default = "default_maintenance_interval_ms")]
    pub maintenance_interval_ms: u64,

    #[serde(default = "default_tombstone_retention_ms")]
    pub tombstone_retention_ms: i64,
    #[serde(default = "default_history_retention_ms")]
    pub history_retention_ms: i64,
    #[serde(default = "default_completed_job_retention_ms")]
    pub completed_job_retention_ms: i64,
    #[serde(default = "default_dead_job_retention_ms")]
    pub dead_job_retention_ms: i64,
    #[serde(default = "default_batch_limit")]
    pub batch_limit: i64,

    /// Recall fusion weights (keyword, vector, graph). Defaults per spec §4.6.
    #[serde(default = "default_recall_weights")]
    pub recall_weights: RecallWeights,
    #[serde(default = "default_pinned_boost")]
    pub pinned_boost: f64,
    #[serde(default = "default_half_life_secs")]
    pub recall_half_life_secs: f64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct RecallWeights {
    pub keyword: f64,
    pub vector: f64,
    pub graph: f64,
}

fn default_reranker_top_n() -> usize {
    20
}
fn default_reranker_timeout_ms() -> u64 {
    3_000
}
fn default_extraction_timeout_ms() -> u64 {
    30_000
}
fn default_min_fact_confidence() -> f64 {
    0.5
}
fn default_worker_poll_ms() -> u64 {
    2_000
}
fn default_worker_max_retries() -> u32 {
    3
}
fn default_lease_timeout_ms() -> u64 {
    60_000
}
fn default_maintenance_interval_ms() -> u64 {
    6 * 60 * 60 * 1000
}
fn default_tombstone_retention_ms() -> i64 {
    30 * 24 * 60 * 60 * 1000
}
fn default_history_retention_ms() -> i64 {
    180 * 24 * 60 * 60 * 1000
}
fn default_completed_job_retention_ms() -> i64 {
    7 * 24 * 60 * 60 * 1000
}
fn default_dead_job_retention_ms() -> i64 {
    30 * 24 * 60 * 60 * 1000
}
fn default_batch_limit() -> i64 {
    500
}
fn default_recall_weights() -> RecallWeights {
    RecallWeights {
        keyword: 0.4,
        vector: 0.5,
        graph: 0.1,
    }
}
fn default_pinned_boost() -> f64 {
    0.05
}
fn default_half_life_secs() -> f64 {
    14.0 * 24.0 * 60.0 * 60.0
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            shadow_mode: false,
            mutations_frozen: false,
            allow_update_delete: true,
            graph_enabled: true,
            autonomous_enabled: true,
            autonomous_frozen: false,
            semantic_contradiction_enabled: false,
            reranker_enabled: false,
            reranker_top_n: default_reranker_top_n(),
            reranker_timeout_ms: default_reranker_timeout_ms(),
            extraction_timeout_ms: default_extraction_timeout_ms(),
            min_fact_confidence_for_write: default_min_fact_confidence(),
            graph_boost_weight: 0.0,
            worker_poll_ms: default_worker_poll_ms(),
            worker_max_retries: default_worker_max_retries(),
            lease_timeout_ms: default_lease_timeout_ms(),
            maintenance_interval_ms: default_maintenance_interval_ms(),
            tombstone_retention_ms: default_tombstone_retention_ms(),
            history_retention_ms: default_history_retention_ms(),
            completed_job_retention_ms: default_completed_job_retention_ms(),
            dead_job_retention_ms: default_dead_job_retention_ms(),
            batch_limit: default_batch_limit(),
            recall_weights: default_recall_weights(),
            pinned_boost: default_pinned_boost(),
            recall_half_life_secs: default_half_life_secs(),
        }
    }
}

impl PipelineConfig {
    /// Whether any write path should proceed at all.
    pub fn writes_allowed(&self) -> bool {
        self.enabled && !self.mutations_frozen
    }

    /// Whether `modify`/`forget` specifically are allowed (spec §4.11).
    pub fn update_delete_allowed(&self) -> bool {
        self.writes_allowed() && self.allow_update_delete
    }

    /// Whether a worker-initiated (autonomous) write may proceed.
    pub fn autonomous_writes_allowed(&self) -> bool {
        self.writes_allowed() && self.autonomous_enabled && !self.autonomous_frozen
    }

    fn apply_env_overrides(&mut self) {
        macro_rules! bool_env {
            ($field:ident, $var:literal) => {
                if let Ok(v) = std::env::var($var) {
                    if let Ok(parsed) = v.parse::<bool>() {
                        self.$field = parsed;
                    }
                }
            };
        }
        bool_env!(enabled, "SIGNET_ENABLED");
        bool_env!(shadow_mode, "SIGNET_SHADOW_MODE");
        bool_env!(mutations_frozen, "SIGNET_MUTATIONS_FROZEN");
        bool_env!(allow_update_delete, "SIGNET_ALLOW_UPDATE_DELETE");
        bool_env!(graph_enabled, "SIGNET_GRAPH_ENABLED");
        bool_env!(autonomous_enabled, "SIGNET_AUTONOMOUS_ENABLED");
        bool_env!(autonomous_frozen, "SIGNET_AUTONOMOUS_FROZEN");
        bool_env!(reranker_enabled, "SIGNET_RERANKER_ENABLED");
    }

    fn load_from_path(path: &Path) -> Self {
        let mut cfg = match std::fs::read_to_string(path) {
            Ok(contents) => toml::from_str(&contents).unwrap_or_else(|e| {
                tracing::warn!(error = %e, path = %path.display(), "invalid config.toml, using defaults");
                PipelineConfig::default()
            }),
            Err(_) => PipelineConfig::default(),
        };
        cfg.apply_env_overrides();
        cfg
    }
}

/// Hot-reloadable handle shared across the daemon. A background task polls
/// the backing file's mtime and swaps the snapshot atomically on change, so
/// no in-flight operation ever observes a half-updated config (spec §9).
pub struct ConfigHandle {
    path: PathBuf,
    inner: RwLock<PipelineConfig>,
    last_modified: RwLock<Option<SystemTime>>,
}

impl ConfigHandle {
    pub fn load(path: impl Into<PathBuf>) -> Arc<Self> {
        let path = path.into();
        let cfg = PipelineConfig::load_from_path(&path);
        let last_modified = std::fs::metadata(&path).and_then(|m| m.modified()).ok();
        Arc::new(Self {
            path,
            inner: RwLock::new(cfg),
            last_modified: RwLock::new(last_modified),
        })
    }

    pub async fn current(&self) -> PipelineConfig {
        self.inner.read().await.clone()
    }

    /// Check the backing file's mtime and reload if it changed. Returns
    /// `true` if a reload happened.
    pub async fn poll_reload(&self) -> bool {
        let Ok(metadata) = std::fs::metadata(&self.path) else {
            return false;
        };
        let Ok(modified) = metadata.modified() else {
            return false;
        };
        let mut last = self.last_modified.write().await;
        if *last == Some(modified) {
            return false;
        }
        let new_cfg = PipelineConfig::load_from_path(&self.path);
        *self.inner.write().await = new_cfg;
        *last = Some(modified);
        tracing::info!(path = %self.path.display(), "pipeline config reloaded");
        true
    }

    /// Spawn the background poll loop. Runs until the handle is dropped.
    pub fn spawn_watcher(self: &Arc<Self>, interval: std::time::Duration) {
        let handle = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                handle.poll_reload().await;
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec_table() {
        let cfg = PipelineConfig::default();
        assert!(cfg.enabled);
        assert!(!cfg.shadow_mode);
        assert!(!cfg.mutations_frozen);
        assert!(cfg.allow_update_delete);
        assert!(cfg.graph_enabled);
        assert!(!cfg.reranker_enabled);
        assert_eq!(cfg.reranker_top_n, 20);
        assert_eq!(cfg.recall_weights.keyword, 0.4);
        assert_eq!(cfg.recall_weights.vector, 0.5);
        assert_eq!(cfg.recall_weights.graph, 0.1);
    }

    #[test]
    fn mutations_frozen_overrides_enabled() {
        let mut cfg = PipelineConfig::default();
        cfg.mutations_frozen = true;
        assert!(!cfg.writes_allowed());
    }

    #[test]
    fn disabled_blocks_autonomous_writes_too() {
        let mut cfg = PipelineConfig::default();
        cfg.enabled = false;
        assert!(!cfg.autonomous_writes_allowed());
    }

    #[tokio::test]
    async fn reload_picks_up_file_changes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "shadow_mode = false\n").unwrap();
        let handle = ConfigHandle::load(&path);
        assert!(!handle.current().await.shadow_mode);

        // Ensure the mtime actually advances on filesystems with coarse
        // timestamp resolution.
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        std::fs::write(&path, "shadow_mode = true\n").unwrap();
        let reloaded = handle.poll_reload().await;
        assert!(reloaded);
        assert!(handle.current().await.shadow_mode);
    }
}
