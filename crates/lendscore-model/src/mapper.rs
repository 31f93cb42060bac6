//! Raw model output to published credit score.
//!
//! Two stages: a fixed affine [`Calibration`] fit once at training time and
//! clipped to the score range, then an explicit [`Override`] table of hard
//! rules applied on top and re-clamped. Both are stored in the model
//! artifact so every run maps raw output identically.

use serde::{Deserialize, Serialize};

use lendscore_core::constants::{
    CALIBRATION_HIGH_QUANTILE, CALIBRATION_LOW_QUANTILE, CALIBRATION_MIN_SPREAD,
    DEFAULT_LIQUIDATION_PENALTY, PROXY_TARGET_MAX, PROXY_TARGET_MIN, SCORE_MAX, SCORE_MIN,
    SPARSE_HISTORY_MIN_TRANSACTIONS, SPARSE_HISTORY_PENALTY,
};
use lendscore_core::error::ModelError;
use lendscore_core::traits::Contributions;
use lendscore_core::types::{FeatureAttribution, FeatureVector, FEATURE_NAMES};

use crate::stats::{quantile, sorted_finite};

const MIN: f64 = SCORE_MIN as f64;
const MAX: f64 = SCORE_MAX as f64;

/// `score = raw * scale + offset`, clipped to `[SCORE_MIN, SCORE_MAX]`.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
pub struct Calibration {
    pub scale: f64,
    pub offset: f64,
}

impl Calibration {
    /// Map `low` to `SCORE_MIN` and `high` to `SCORE_MAX`.
    pub fn from_anchors(low: f64, high: f64) -> Self {
        let scale = (MAX - MIN) / (high - low);
        Self {
            scale,
            offset: MIN - low * scale,
        }
    }

    /// Anchor the 1st/99th percentile of in-sample predictions to the ends of
    /// the score range. Falls back to the proxy band when the predictions
    /// have no usable spread.
    pub fn fit(predictions: &[f64]) -> Self {
        let sorted = sorted_finite(predictions.iter().copied());
        let anchors = quantile(&sorted, CALIBRATION_LOW_QUANTILE)
            .zip(quantile(&sorted, CALIBRATION_HIGH_QUANTILE));
        match anchors {
            Some((low, high)) if high - low >= CALIBRATION_MIN_SPREAD => {
                Self::from_anchors(low, high)
            }
            _ => Self::from_anchors(PROXY_TARGET_MIN, PROXY_TARGET_MAX),
        }
    }

    /// Calibrated and clipped. NaN maps to `SCORE_MIN`.
    pub fn apply(&self, raw: f64) -> f64 {
        let v = raw * self.scale + self.offset;
        if v.is_nan() { MIN } else { v.clamp(MIN, MAX) }
    }

    pub fn is_well_formed(&self) -> bool {
        self.scale.is_finite() && self.scale > 0.0 && self.offset.is_finite()
    }
}

/// A hard rule layered over the calibrated model output.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "rule", rename_all = "snake_case")]
pub enum Override {
    /// Subtract `penalty` points per confirmed liquidation.
    Liquidation { penalty: f64 },
    /// Subtract `penalty` points when the wallet has fewer than
    /// `min_transactions` records.
    SparseHistory { min_transactions: u64, penalty: f64 },
}

impl Override {
    /// Signed score-point adjustment for this wallet.
    pub fn adjustment(&self, fv: &FeatureVector) -> f64 {
        match self {
            Self::Liquidation { penalty } => -penalty * fv.liquidation_count as f64,
            Self::SparseHistory {
                min_transactions,
                penalty,
            } => {
                if fv.transaction_count < *min_transactions {
                    -penalty
                } else {
                    0.0
                }
            }
        }
    }

    /// Feature column the rule keys on, for attribution.
    pub fn feature(&self) -> &'static str {
        match self {
            Self::Liquidation { .. } => "liquidation_count",
            Self::SparseHistory { .. } => "transaction_count",
        }
    }

    fn penalty(&self) -> f64 {
        match self {
            Self::Liquidation { penalty } | Self::SparseHistory { penalty, .. } => *penalty,
        }
    }
}

/// The default override table.
pub fn default_overrides() -> Vec<Override> {
    vec![
        Override::Liquidation {
            penalty: DEFAULT_LIQUIDATION_PENALTY,
        },
        Override::SparseHistory {
            min_transactions: SPARSE_HISTORY_MIN_TRANSACTIONS,
            penalty: SPARSE_HISTORY_PENALTY,
        },
    ]
}

/// Validate an override table: penalties must be finite, non-negative whole
/// score points.
pub fn validate_overrides(overrides: &[Override]) -> Result<(), ModelError> {
    for o in overrides {
        let p = o.penalty();
        if !p.is_finite() || p < 0.0 || p.fract() != 0.0 {
            return Err(ModelError::InvalidParams(format!(
                "override {} has invalid penalty {p}",
                o.feature()
            )));
        }
    }
    Ok(())
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ScoreMapper {
    pub calibration: Calibration,
    pub overrides: Vec<Override>,
}

impl ScoreMapper {
    pub fn new(calibration: Calibration, overrides: Vec<Override>) -> Self {
        Self {
            calibration,
            overrides,
        }
    }

    /// Final score in `[SCORE_MIN, SCORE_MAX]`.
    ///
    /// The calibrated score is rounded before the override table runs and
    /// the result is floored, so a penalty is never rounded back up.
    pub fn to_credit_score(&self, raw: f64, fv: &FeatureVector) -> u16 {
        let mut score = self.calibration.apply(raw).round();
        for o in &self.overrides {
            score = (score + o.adjustment(fv)).max(MIN);
        }
        score.clamp(MIN, MAX).floor() as u16
    }

    /// Per-feature contributions in score points: the model's path
    /// contributions through the calibration slope, plus override
    /// adjustments on the column each rule keys on. Clipping is not
    /// attributed, so the values explain the score only inside the range.
    pub fn attributions(
        &self,
        contributions: &Contributions,
        fv: &FeatureVector,
    ) -> Vec<FeatureAttribution> {
        let mut points: Vec<f64> = contributions
            .per_feature
            .iter()
            .map(|c| c * self.calibration.scale)
            .collect();
        for o in &self.overrides {
            if let Some(i) = FEATURE_NAMES.iter().position(|n| *n == o.feature()) {
                points[i] += o.adjustment(fv);
            }
        }
        FEATURE_NAMES
            .iter()
            .zip(points)
            .map(|(name, contribution)| FeatureAttribution {
                feature: name.to_string(),
                contribution,
            })
            .collect()
    }
}
