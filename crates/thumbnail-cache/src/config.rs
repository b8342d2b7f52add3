//! Pipeline configuration
//!
//! Passed explicitly to [`ThumbnailPipeline::new`](crate::ThumbnailPipeline::new);
//! nothing is read from ambient global settings.

use crate::generate::{DEFAULT_JPEG_QUALITY, PREVIEW_MAX_DIMENSION};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Standard configuration for the thumbnail pipeline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PipelineConfig {
    /// Directory holding one encoded thumbnail per cache key
    pub cache_root: PathBuf,
    /// Maximum number of decoded thumbnails kept in memory
    pub memory_capacity: usize,
    /// Operator override for parallelism, clamped to the derived ceiling
    pub concurrency_limit: Option<usize>,
    /// Long-edge bound for generated thumbnails
    pub max_dimension: u32,
    /// Long-edge cap for the embedded-preview fast path
    pub preview_max_dimension: u32,
    pub jpeg_quality: u8,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            cache_root: default_cache_root(),
            memory_capacity: 500,
            concurrency_limit: None,
            max_dimension: 512,
            preview_max_dimension: PREVIEW_MAX_DIMENSION,
            jpeg_quality: DEFAULT_JPEG_QUALITY,
        }
    }
}

impl PipelineConfig {
    /// Defaults with a specific cache root
    pub fn with_cache_root(cache_root: impl Into<PathBuf>) -> Self {
        Self {
            cache_root: cache_root.into(),
            ..Self::default()
        }
    }

    /// Parse a TOML document; missing keys take their defaults
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: Self = toml::from_str(text).context("Failed to parse pipeline config")?;
        config.validate()?;
        Ok(config)
    }

    /// Load a TOML config file
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        Self::from_toml_str(&text)
            .with_context(|| format!("Invalid config file: {}", path.display()))
    }

    pub fn validate(&self) -> Result<()> {
        anyhow::ensure!(self.max_dimension > 0, "max_dimension must be positive");
        anyhow::ensure!(
            self.preview_max_dimension > 0,
            "preview_max_dimension must be positive"
        );
        anyhow::ensure!(
            (1..=100).contains(&self.jpeg_quality),
            "jpeg_quality must be between 1 and 100, got {}",
            self.jpeg_quality
        );
        Ok(())
    }
}

/// `<platform cache dir>/thumbgrid/thumbnails`, or a local fallback
pub fn default_cache_root() -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(|| PathBuf::from(".thumbgrid"))
        .join("thumbgrid")
        .join("thumbnails")
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_defaults() {
        let config = PipelineConfig::default();
        assert_eq!(config.max_dimension, 512);
        assert_eq!(config.preview_max_dimension, 800);
        assert_eq!(config.jpeg_quality, 75);
        assert!(config.concurrency_limit.is_none());
        assert!(config.cache_root.ends_with("thumbgrid/thumbnails"));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_toml_keeps_defaults() -> Result<()> {
        let config = PipelineConfig::from_toml_str(
            r#"
            cache_root = "/tmp/thumbs"
            memory_capacity = 64
            concurrency_limit = 4
            "#,
        )?;

        assert_eq!(config.cache_root, PathBuf::from("/tmp/thumbs"));
        assert_eq!(config.memory_capacity, 64);
        assert_eq!(config.concurrency_limit, Some(4));
        assert_eq!(config.max_dimension, 512);
        Ok(())
    }

    #[test]
    fn test_rejects_unknown_and_invalid_values() {
        assert!(PipelineConfig::from_toml_str("colour = \"red\"").is_err());
        assert!(PipelineConfig::from_toml_str("jpeg_quality = 0").is_err());
        assert!(PipelineConfig::from_toml_str("max_dimension = 0").is_err());
    }

    #[test]
    fn test_load_from_file() -> Result<()> {
        let temp_dir = tempdir()?;
        let path = temp_dir.path().join("thumbgrid.toml");
        fs::write(&path, "max_dimension = 256\njpeg_quality = 80\n")?;

        let config = PipelineConfig::load(&path)?;
        assert_eq!(config.max_dimension, 256);
        assert_eq!(config.jpeg_quality, 80);

        assert!(PipelineConfig::load(&temp_dir.path().join("missing.toml")).is_err());
        Ok(())
    }
}
