//! CLI configuration
//!
//! Read from `<config dir>/metacat/config.toml` unless `--config` points
//! elsewhere. A missing file means defaults.

use std::path::{Path, PathBuf};

use anyhow::Context;
use metacat_cache::CacheConfig;
use metacat_repository::RepositoryConfig;
use serde::{Deserialize, Serialize};

/// Default location of the config file
pub fn config_file_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("metacat")
        .join("config.toml")
}

/// Get default data directory
pub fn default_data_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("metacat")
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    #[default]
    Redb,
    /// Nothing survives the process; handy for trying things out
    Memory,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub backend: Backend,

    /// Directory holding the database file
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Seconds within which edits of one user fold into one version
    pub timeout_secs: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            timeout_secs: RepositoryConfig::default().session_timeout_secs,
        }
    }
}

/// Configuration for the CLI
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CatalogConfig {
    pub storage: StorageConfig,
    pub cache: CacheConfig,
    pub session: SessionConfig,
}

impl CatalogConfig {
    /// Load from `path`; a missing file yields defaults
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        if !path.exists() {
            tracing::debug!(path = %path.display(), "No config file, using defaults");
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        toml::from_str(&content)
            .with_context(|| format!("Invalid config file {}", path.display()))
    }

    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, self.to_toml()?)
            .with_context(|| format!("Failed to write config file {}", path.display()))
    }

    pub fn to_toml(&self) -> anyhow::Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Data directory: the command line wins over the config file
    pub fn data_dir(&self, cli_override: Option<&Path>) -> PathBuf {
        cli_override
            .map(Path::to_path_buf)
            .or_else(|| self.storage.path.clone())
            .unwrap_or_else(default_data_dir)
    }

    pub fn repository_config(&self) -> RepositoryConfig {
        RepositoryConfig {
            session_timeout_secs: self.session.timeout_secs,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_missing_file_is_default() {
        let dir = tempdir().unwrap();
        let config = CatalogConfig::load(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(config, CatalogConfig::default());
        assert_eq!(config.session.timeout_secs, 600);
        assert_eq!(config.cache.capacity, 5000);
    }

    #[test]
    fn test_partial_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            "[storage]\nbackend = \"memory\"\n\n[session]\ntimeout_secs = 60\n",
        )
        .unwrap();

        let config = CatalogConfig::load(&path).unwrap();
        assert_eq!(config.storage.backend, Backend::Memory);
        assert_eq!(config.session.timeout_secs, 60);
        assert_eq!(config.cache.ttl_secs, 30);
        assert_eq!(config.repository_config().session_timeout_secs, 60);
    }

    #[test]
    fn test_save_and_reload() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");
        let mut config = CatalogConfig::default();
        config.storage.path = Some(dir.path().join("data"));
        config.save(&path).unwrap();

        let loaded = CatalogConfig::load(&path).unwrap();
        assert_eq!(loaded, config);
        assert_eq!(loaded.data_dir(None), dir.path().join("data"));
        assert_eq!(loaded.data_dir(Some(Path::new("/tmp/x"))), PathBuf::from("/tmp/x"));
    }

    #[test]
    fn test_invalid_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[storage]\nbackend = \"cassandra\"\n").unwrap();
        assert!(CatalogConfig::load(&path).is_err());
    }
}
