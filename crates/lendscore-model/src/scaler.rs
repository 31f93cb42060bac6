//! Robust feature scaling: per-column median and interquartile range.
//!
//! Lending amounts are heavy-tailed, so the center and spread come from order
//! statistics rather than mean and variance. A column whose spread is zero
//! (constant across the training set) scales to 0.

use serde::{Deserialize, Serialize};
use tracing::debug;

use lendscore_core::constants::SCALER_QUANTILE_RANGE;
use lendscore_core::error::ModelError;
use lendscore_core::traits::FeatureScaler;
use lendscore_core::types::{FeatureVector, ScaledFeatureVector, FEATURE_COUNT, FEATURE_NAMES};

use crate::stats::{median, quantile, sorted_finite};

/// Fits a [`ScalerState`] from a training collection.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RobustScaler {
    /// Quantiles whose difference is the spread, `(0.25, 0.75)` for the IQR.
    pub quantile_range: (f64, f64),
}

impl Default for RobustScaler {
    fn default() -> Self {
        Self {
            quantile_range: SCALER_QUANTILE_RANGE,
        }
    }
}

impl RobustScaler {
    pub fn fit(&self, rows: &[FeatureVector]) -> Result<ScalerState, ModelError> {
        if rows.is_empty() {
            return Err(ModelError::EmptyTrainingSet);
        }
        let (q_lo, q_hi) = self.quantile_range;
        if !(0.0..=1.0).contains(&q_lo) || !(0.0..=1.0).contains(&q_hi) || q_lo >= q_hi {
            return Err(ModelError::InvalidParams(format!(
                "quantile range ({q_lo}, {q_hi}) must satisfy 0 <= low < high <= 1"
            )));
        }

        let matrix: Vec<[f64; FEATURE_COUNT]> = rows.iter().map(|r| r.to_array()).collect();
        let mut centers = [0.0; FEATURE_COUNT];
        let mut spreads = [0.0; FEATURE_COUNT];
        for col in 0..FEATURE_COUNT {
            let sorted = sorted_finite(matrix.iter().map(|row| row[col]));
            centers[col] = median(&sorted).unwrap_or(0.0);
            let lo = quantile(&sorted, q_lo).unwrap_or(0.0);
            let hi = quantile(&sorted, q_hi).unwrap_or(0.0);
            let spread = hi - lo;
            spreads[col] = if spread.is_finite() && spread > 0.0 { spread } else { 0.0 };
        }

        let constant: Vec<&str> = (0..FEATURE_COUNT)
            .filter(|&c| spreads[c] == 0.0)
            .map(|c| FEATURE_NAMES[c])
            .collect();
        debug!(rows = rows.len(), ?constant, "fitted robust scaler");

        Ok(ScalerState { centers, spreads })
    }
}

/// Fitted scaler parameters, in [`FEATURE_NAMES`] order. Replaced wholesale
/// on retrain, read-only otherwise.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ScalerState {
    pub centers: [f64; FEATURE_COUNT],
    pub spreads: [f64; FEATURE_COUNT],
}

impl ScalerState {
    /// Whether every parameter is finite and every spread non-negative.
    pub fn is_well_formed(&self) -> bool {
        self.centers.iter().all(|c| c.is_finite())
            && self.spreads.iter().all(|s| s.is_finite() && *s >= 0.0)
    }
}

impl FeatureScaler for ScalerState {
    fn apply(&self, features: &FeatureVector) -> ScaledFeatureVector {
        let raw = features.to_array();
        let mut out = [0.0; FEATURE_COUNT];
        for i in 0..FEATURE_COUNT {
            let spread = self.spreads[i];
            if spread > 0.0 && raw[i].is_finite() {
                out[i] = ((raw[i] - self.centers[i]) / spread).clamp(-f64::MAX, f64::MAX);
            }
        }
        ScaledFeatureVector(out)
    }
}
