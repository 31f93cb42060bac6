//! Trait interfaces for the Lendscore pipeline.
//!
//! These traits define the contracts between crates:
//! - [`FeatureScaler`] — fitted normalization transform (lendscore-model implements)
//! - [`RawScorer`] — trained regression model (lendscore-model implements)
//!
//! Both are read-only at scoring time and must be shareable across worker
//! threads.

use crate::types::{FeatureVector, ScaledFeatureVector, FEATURE_COUNT};

/// A fitted, immutable normalization transform.
pub trait FeatureScaler: Send + Sync {
    /// Scale one feature vector. Pure: the output depends only on the fitted
    /// state and `features`.
    fn apply(&self, features: &FeatureVector) -> ScaledFeatureVector;

    /// Scale a batch, preserving order.
    fn apply_all(&self, features: &[FeatureVector]) -> Vec<ScaledFeatureVector> {
        features.iter().map(|f| self.apply(f)).collect()
    }
}

/// A raw prediction split into a base value and per-column contributions.
///
/// `base + per_feature.iter().sum()` equals the prediction.
#[derive(Debug, Clone, PartialEq)]
pub struct Contributions {
    pub base: f64,
    pub per_feature: [f64; FEATURE_COUNT],
}

impl Contributions {
    pub fn total(&self) -> f64 {
        self.base + self.per_feature.iter().sum::<f64>()
    }
}

/// Maps a scaled feature vector to an unbounded raw score.
pub trait RawScorer: Send + Sync {
    /// Deterministic raw score. No randomness at inference time.
    fn predict(&self, features: &ScaledFeatureVector) -> f64;

    /// Raw score with per-feature contributions.
    ///
    /// Default implementation attributes everything to the base value.
    fn predict_with_contributions(&self, features: &ScaledFeatureVector) -> Contributions {
        Contributions {
            base: self.predict(features),
            per_feature: [0.0; FEATURE_COUNT],
        }
    }
}
