//! # lendscore-model — Scaling, scoring and score mapping.
//!
//! - **Scaler**: per-column median/IQR robust scaling ([`RobustScaler`]).
//! - **Booster**: deterministic least-squares gradient boosting of
//!   depth-limited regression trees ([`GradientBoostedModel`]).
//! - **Proxy targets**: the heuristic training label ([`proxy_target`]).
//! - **Score mapper**: training-time calibration plus an explicit override
//!   table ([`ScoreMapper`]).
//!
//! [`ScoringModel`] bundles a trained booster with its mapper; it and
//! [`ScalerState`] are the two artifacts a scoring run needs.

pub mod gbdt;
pub mod mapper;
pub mod proxy;
pub mod scaler;
pub mod scoring;
pub mod stats;
pub mod tree;

pub use gbdt::{GradientBoostedModel, TrainParams};
pub use mapper::{default_overrides, Calibration, Override, ScoreMapper};
pub use proxy::{proxy_target, proxy_targets, ProxyWeights};
pub use scaler::{RobustScaler, ScalerState};
pub use scoring::{ModelConfig, ScoringModel};
