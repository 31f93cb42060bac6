//! Heuristic proxy labels for training.
//!
//! There is no ground-truth default label, so the booster learns a
//! rule-of-thumb score built from repayment discipline, longevity and
//! cadence. The proxy is a pure function of the feature vector and the
//! configured weights. Liquidations are deliberately absent: the score
//! mapper enforces them as a hard override.

use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use lendscore_core::constants::{
    HIGH_FREQUENCY_MEAN_SECS, HIGH_FREQUENCY_STDDEV_SECS, PROXY_BASE_SCORE, PROXY_TARGET_MAX,
    PROXY_TARGET_MIN,
};
use lendscore_core::error::ModelError;
use lendscore_core::types::FeatureVector;

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct ProxyWeights {
    pub base: f64,
    /// Per unit of repay share of transactions.
    pub repayment_reward: f64,
    /// Per unit of repaid/borrowed value, capped at 1.
    pub repay_to_borrow_reward: f64,
    /// Per active day.
    pub longevity_reward: f64,
    pub deposit_bonus: f64,
    pub borrow_penalty: f64,
    /// Applied once to wallets with a fast, very regular cadence.
    pub high_frequency_penalty: f64,
    pub bot_penalty: f64,
    pub min: f64,
    pub max: f64,
}

impl Default for ProxyWeights {
    fn default() -> Self {
        Self {
            base: PROXY_BASE_SCORE,
            repayment_reward: 300.0,
            repay_to_borrow_reward: 100.0,
            longevity_reward: 2.0,
            deposit_bonus: 50.0,
            borrow_penalty: -30.0,
            high_frequency_penalty: -150.0,
            bot_penalty: -100.0,
            min: PROXY_TARGET_MIN,
            max: PROXY_TARGET_MAX,
        }
    }
}

impl ProxyWeights {
    pub fn validate(&self) -> Result<(), ModelError> {
        let all = [
            self.base,
            self.repayment_reward,
            self.repay_to_borrow_reward,
            self.longevity_reward,
            self.deposit_bonus,
            self.borrow_penalty,
            self.high_frequency_penalty,
            self.bot_penalty,
            self.min,
            self.max,
        ];
        if all.iter().any(|w| !w.is_finite()) {
            return Err(ModelError::InvalidParams("proxy weights must be finite".into()));
        }
        if self.min >= self.max {
            return Err(ModelError::InvalidParams(format!(
                "proxy band [{}, {}] is empty",
                self.min, self.max
            )));
        }
        Ok(())
    }
}

/// Whether the wallet transacts at a fast, machine-regular pace.
fn is_high_frequency(fv: &FeatureVector) -> bool {
    fv.transaction_count >= 3
        && fv.tx_interval_stddev_seconds < HIGH_FREQUENCY_STDDEV_SECS
        && fv.avg_tx_interval_seconds < HIGH_FREQUENCY_MEAN_SECS
}

/// Proxy label for one wallet, clipped to `[w.min, w.max]`.
pub fn proxy_target(fv: &FeatureVector, w: &ProxyWeights) -> f64 {
    let mut score = w.base
        + w.repayment_reward * fv.repay_ratio
        + w.repay_to_borrow_reward * fv.repay_to_borrow_ratio.min(1.0)
        + w.longevity_reward * fv.days_active as f64
        + w.deposit_bonus * fv.deposit_ratio
        + w.borrow_penalty * fv.borrow_ratio
        + w.bot_penalty * fv.bot_likelihood;
    if is_high_frequency(fv) {
        score += w.high_frequency_penalty;
    }
    if score.is_nan() {
        return w.min;
    }
    score.clamp(w.min, w.max)
}

/// Proxy labels for a batch, in order.
pub fn proxy_targets(rows: &[FeatureVector], w: &ProxyWeights) -> Vec<f64> {
    rows.par_iter().map(|fv| proxy_target(fv, w)).collect()
}
