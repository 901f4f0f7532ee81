//! ConfigLoader collaborator: where `PipelineConfig` snapshots come from.
//! The default implementation reads `<agents_dir>/config.toml`
//! (`config::ConfigHandle`'s own backing store); the trait exists so tests
//! and alternate deployments can substitute an in-memory source without
//! touching disk.

use async_trait::async_trait;

use crate::config::PipelineConfig;

#[async_trait]
pub trait ConfigLoader: Send + Sync {
    async fn load(&self) -> PipelineConfig;
}

/// Reads the TOML file at a fixed path on every call, falling back to
/// defaults for a missing or invalid file (same policy as `ConfigHandle`).
pub struct FileConfigLoader {
    path: std::path::PathBuf,
}

impl FileConfigLoader {
    pub fn new(path: impl Into<std::path::PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl ConfigLoader for FileConfigLoader {
    async fn load(&self) -> PipelineConfig {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(contents) => toml::from_str(&contents).unwrap_or_default(),
            Err(_) => PipelineConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn missing_file_yields_defaults() {
        let loader = FileConfigLoader::new("/nonexistent/path/config.toml");
        let cfg = loader.load().await;
        assert_eq!(cfg, PipelineConfig::default());
    }
}
