//! Pipeline configuration.
//!
//! [`PipelineConfig`] has a usable default for every field. It can be
//! loaded from an optional TOML file layered under `LENDSCORE__*`
//! environment variables (`__` separates nested keys, e.g.
//! `LENDSCORE__MODEL__TRAIN__ROUNDS=200`).

use std::path::{Path, PathBuf};

use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};

use lendscore_core::constants::MAX_ASSET_DECIMALS;
use lendscore_core::error::PipelineError;
use lendscore_features::{FeatureConfig, IngestConfig};
use lendscore_model::ModelConfig;

/// Prefix of environment overrides.
pub const ENV_PREFIX: &str = "LENDSCORE";

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct PipelineConfig {
    /// Root of the artifact store.
    pub artifact_dir: PathBuf,
    /// Number of artifact versions to keep after a retrain, the current one
    /// included. 0 keeps everything.
    pub keep_versions: usize,
    pub ingest: IngestConfig,
    pub features: FeatureConfig,
    pub model: ModelConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        let artifact_dir = dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("lendscore")
            .join("artifacts");

        Self {
            artifact_dir,
            keep_versions: 5,
            ingest: IngestConfig::default(),
            features: FeatureConfig::default(),
            model: ModelConfig::default(),
        }
    }
}

impl PipelineConfig {
    /// Load from an optional TOML file plus environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self, PipelineError> {
        let mut builder = Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(File::from(path).required(true));
        }
        builder = builder.add_source(
            Environment::with_prefix(ENV_PREFIX)
                .separator("__")
                .try_parsing(true),
        );
        let cfg: Self = builder
            .build()
            .and_then(|c| c.try_deserialize())
            .map_err(|e| PipelineError::Config(e.to_string()))?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<(), PipelineError> {
        let window = self.features.night_window;
        if window.start_hour > 23 || window.end_hour > 24 {
            return Err(PipelineError::Config(format!(
                "night window {}..{} is not a valid hour range",
                window.start_hour, window.end_hour
            )));
        }
        if let Some((asset, decimals)) = self
            .ingest
            .asset_decimals
            .iter()
            .find(|(_, d)| **d > MAX_ASSET_DECIMALS)
        {
            return Err(PipelineError::Config(format!(
                "asset {asset} has {decimals} decimals (max {MAX_ASSET_DECIMALS})"
            )));
        }
        self.model.validate()?;
        Ok(())
    }
}
