//! # lendscore-features — Ledger ingest and feature aggregation.
//!
//! - **Ingest**: raw ledger entries are validated one by one; bad records
//!   are dropped and tallied, good ones are grouped per wallet and ordered by
//!   timestamp.
//! - **Aggregation**: each wallet's history is reduced to a fixed-schema
//!   [`FeatureVector`](lendscore_core::types::FeatureVector) with no
//!   cross-wallet state, so wallets are processed in parallel.

pub mod aggregate;
pub mod ingest;

pub use aggregate::{compute_all, compute_features, FeatureConfig, NightWindow};
pub use ingest::{ingest, parse_ledger, IngestConfig, IngestReport, RawRecord};
