//! Least-squares gradient boosting over [`RegressionTree`]s.
//!
//! The ensemble starts from the target mean and adds one tree per round fit
//! to the current residuals. Inputs that are not finite are read as 0 both
//! in training and at prediction time, so sentinel or missing columns never
//! fail a fit.

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use lendscore_core::constants::{
    DEFAULT_BOOSTING_ROUNDS, DEFAULT_LEARNING_RATE, DEFAULT_MAX_DEPTH, DEFAULT_MIN_SAMPLES_LEAF,
};
use lendscore_core::error::ModelError;
use lendscore_core::traits::{Contributions, RawScorer};
use lendscore_core::types::{feature_index, ScaledFeatureVector, FEATURE_COUNT};

use crate::tree::{presort, RegressionTree, Row, TreeParams};

/// Boosting hyper-parameters.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct TrainParams {
    pub rounds: usize,
    pub learning_rate: f64,
    pub max_depth: usize,
    pub min_samples_leaf: usize,
    /// Columns trees may never split on. Signals in these columns are left to
    /// the score mapper's override table.
    pub excluded_features: Vec<String>,
}

impl Default for TrainParams {
    fn default() -> Self {
        Self {
            rounds: DEFAULT_BOOSTING_ROUNDS,
            learning_rate: DEFAULT_LEARNING_RATE,
            max_depth: DEFAULT_MAX_DEPTH,
            min_samples_leaf: DEFAULT_MIN_SAMPLES_LEAF,
            excluded_features: vec!["liquidation_count".to_string()],
        }
    }
}

impl TrainParams {
    pub fn validate(&self) -> Result<(), ModelError> {
        if !(self.learning_rate.is_finite() && self.learning_rate > 0.0 && self.learning_rate <= 1.0)
        {
            return Err(ModelError::InvalidParams(format!(
                "learning_rate {} must be in (0, 1]",
                self.learning_rate
            )));
        }
        if self.max_depth == 0 {
            return Err(ModelError::InvalidParams("max_depth must be at least 1".into()));
        }
        if self.min_samples_leaf == 0 {
            return Err(ModelError::InvalidParams(
                "min_samples_leaf must be at least 1".into(),
            ));
        }
        self.allowed_features().map(|_| ())
    }

    /// Column indices trees may split on, ascending.
    pub fn allowed_features(&self) -> Result<Vec<usize>, ModelError> {
        let mut excluded = [false; FEATURE_COUNT];
        for name in &self.excluded_features {
            let idx = feature_index(name).ok_or_else(|| {
                ModelError::InvalidParams(format!("unknown excluded feature: {name}"))
            })?;
            excluded[idx] = true;
        }
        Ok((0..FEATURE_COUNT).filter(|i| !excluded[*i]).collect())
    }
}

/// A trained boosted ensemble. Immutable once built.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct GradientBoostedModel {
    base_score: f64,
    learning_rate: f64,
    trees: Vec<RegressionTree>,
}

impl GradientBoostedModel {
    pub fn train(
        rows: &[ScaledFeatureVector],
        targets: &[f64],
        params: &TrainParams,
    ) -> Result<Self, ModelError> {
        if rows.is_empty() {
            return Err(ModelError::EmptyTrainingSet);
        }
        if rows.len() != targets.len() {
            return Err(ModelError::LengthMismatch {
                features: rows.len(),
                targets: targets.len(),
            });
        }
        if let Some(i) = targets.iter().position(|t| !t.is_finite()) {
            return Err(ModelError::NonFiniteTarget(i));
        }
        params.validate()?;

        let x: Vec<Row> = rows.iter().map(sanitize).collect();
        let n = x.len();
        let base_score = targets.iter().sum::<f64>() / n as f64;
        let columns = params.allowed_features()?;
        let sorted = presort(&x, &columns);
        let tree_params = TreeParams {
            max_depth: params.max_depth,
            min_samples_leaf: params.min_samples_leaf,
            learning_rate: params.learning_rate,
        };

        let mut predictions = vec![base_score; n];
        let mut trees = Vec::with_capacity(params.rounds);
        for round in 0..params.rounds {
            let residuals: Vec<f64> = targets
                .iter()
                .zip(&predictions)
                .map(|(t, p)| t - p)
                .collect();
            let tree = RegressionTree::fit(&x, &residuals, &sorted, tree_params);
            if tree.is_leaf() {
                debug!(round, "no split improves the fit, stopping early");
                break;
            }
            predictions
                .par_iter_mut()
                .zip(x.par_iter())
                .for_each(|(p, row)| *p += tree.predict(row));
            trees.push(tree);
        }

        let rmse = (targets
            .iter()
            .zip(&predictions)
            .map(|(t, p)| (t - p).powi(2))
            .sum::<f64>()
            / n as f64)
            .sqrt();
        info!(rows = n, trees = trees.len(), rmse, "trained gradient-boosted model");

        Ok(Self {
            base_score,
            learning_rate: params.learning_rate,
            trees,
        })
    }

    pub fn base_score(&self) -> f64 {
        self.base_score
    }

    pub fn learning_rate(&self) -> f64 {
        self.learning_rate
    }

    pub fn trees(&self) -> &[RegressionTree] {
        &self.trees
    }

    /// Whether any tree splits on column `index`.
    pub fn uses_feature(&self, index: usize) -> bool {
        self.trees
            .iter()
            .any(|t| t.split_features().any(|f| f == index))
    }

    /// Predict a batch in parallel, preserving order.
    pub fn predict_all(&self, rows: &[ScaledFeatureVector]) -> Vec<f64> {
        rows.par_iter().map(|r| self.predict(r)).collect()
    }

    /// Structural sanity check for models loaded from storage.
    pub fn is_well_formed(&self) -> bool {
        self.base_score.is_finite()
            && self.learning_rate.is_finite()
            && self.trees.iter().all(RegressionTree::is_well_formed)
    }
}

impl RawScorer for GradientBoostedModel {
    fn predict(&self, features: &ScaledFeatureVector) -> f64 {
        let x = sanitize(features);
        self.base_score + self.trees.iter().map(|t| t.predict(&x)).sum::<f64>()
    }

    fn predict_with_contributions(&self, features: &ScaledFeatureVector) -> Contributions {
        let x = sanitize(features);
        let mut per_feature = [0.0; FEATURE_COUNT];
        let mut base = self.base_score;
        for tree in &self.trees {
            base += tree.contributions(&x, &mut per_feature);
        }
        Contributions { base, per_feature }
    }
}

fn sanitize(features: &ScaledFeatureVector) -> Row {
    let mut row = *features.values();
    for v in row.iter_mut() {
        if !v.is_finite() {
            *v = 0.0;
        }
    }
    row
}
