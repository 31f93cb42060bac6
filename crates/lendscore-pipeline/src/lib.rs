//! # lendscore-pipeline — Score and retrain orchestration.
//!
//! - **Pipeline**: runs one [`PipelineRequest`] end to end, sequencing ingest,
//!   aggregation, scaling, prediction and mapping.
//! - **Storage**: versioned scaler and model artifacts behind an atomically
//!   swapped manifest ([`FsArtifactStore`]).
//! - **Config**: [`PipelineConfig`] from TOML plus environment overrides.
//! - **Reports**: CSV and JSON sinks and the distribution summary.

pub mod config;
pub mod pipeline;
pub mod report;
pub mod storage;

pub use config::PipelineConfig;
pub use pipeline::{
    load_ledger, Pipeline, PipelineOutcome, PipelineRequest, RetrainOutcome, RetrainRequest,
    ScoreOutcome, ScoreRequest,
};
pub use report::{write_csv, write_explain_json, ScoreSummary};
pub use storage::{ArtifactBundle, ArtifactStore, ArtifactVersion, FsArtifactStore};
