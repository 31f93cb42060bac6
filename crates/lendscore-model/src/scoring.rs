//! The trained scoring artifact: booster plus the mapper calibrated for it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use lendscore_core::error::ModelError;
use lendscore_core::traits::RawScorer;
use lendscore_core::types::{CreditScore, FeatureVector, ScaledFeatureVector, FEATURE_NAMES};

use crate::gbdt::{GradientBoostedModel, TrainParams};
use crate::mapper::{default_overrides, validate_overrides, Calibration, Override, ScoreMapper};
use crate::proxy::{proxy_targets, ProxyWeights};

/// Everything that shapes a training run.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct ModelConfig {
    pub train: TrainParams,
    pub proxy: ProxyWeights,
    /// Hard rules stored with the trained model.
    pub overrides: Vec<Override>,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            train: TrainParams::default(),
            proxy: ProxyWeights::default(),
            overrides: default_overrides(),
        }
    }
}

impl ModelConfig {
    pub fn validate(&self) -> Result<(), ModelError> {
        self.train.validate()?;
        self.proxy.validate()?;
        validate_overrides(&self.overrides)
    }
}

/// A trained model with its calibration and override table. Replaced
/// wholesale on retrain.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ScoringModel {
    /// Column order the model was trained on.
    pub feature_names: Vec<String>,
    pub booster: GradientBoostedModel,
    pub mapper: ScoreMapper,
    pub trained_at: DateTime<Utc>,
    pub training_rows: usize,
}

impl ScoringModel {
    /// Fit on proxy targets derived from `features`, then calibrate on the
    /// in-sample predictions. `scaled[i]` must be the scaled form of
    /// `features[i]`.
    pub fn train(
        features: &[FeatureVector],
        scaled: &[ScaledFeatureVector],
        cfg: &ModelConfig,
    ) -> Result<Self, ModelError> {
        cfg.validate()?;
        if features.len() != scaled.len() {
            return Err(ModelError::LengthMismatch {
                features: scaled.len(),
                targets: features.len(),
            });
        }
        let targets = proxy_targets(features, &cfg.proxy);
        let booster = GradientBoostedModel::train(scaled, &targets, &cfg.train)?;
        let predictions = booster.predict_all(scaled);
        let calibration = Calibration::fit(&predictions);
        info!(
            scale = calibration.scale,
            offset = calibration.offset,
            "calibrated score mapping"
        );
        Ok(Self {
            feature_names: FEATURE_NAMES.iter().map(|s| s.to_string()).collect(),
            booster,
            mapper: ScoreMapper::new(calibration, cfg.overrides.clone()),
            trained_at: Utc::now(),
            training_rows: features.len(),
        })
    }

    /// Whether the model matches this build's feature schema and every
    /// parameter is usable.
    pub fn is_well_formed(&self) -> bool {
        self.feature_names.iter().map(String::as_str).eq(FEATURE_NAMES)
            && self.booster.is_well_formed()
            && self.mapper.calibration.is_well_formed()
            && validate_overrides(&self.mapper.overrides).is_ok()
    }

    pub fn raw_score(&self, scaled: &ScaledFeatureVector) -> f64 {
        self.booster.predict(scaled)
    }

    /// Score one wallet; with `explain`, attach per-feature attributions.
    pub fn score(
        &self,
        wallet_id: &str,
        features: &FeatureVector,
        scaled: &ScaledFeatureVector,
        explain: bool,
    ) -> CreditScore {
        let score = CreditScore::new(
            wallet_id,
            self.mapper.to_credit_score(self.raw_score(scaled), features),
        );
        if explain {
            let contributions = self.booster.predict_with_contributions(scaled);
            score.with_attributions(self.mapper.attributions(&contributions, features))
        } else {
            score
        }
    }
}
