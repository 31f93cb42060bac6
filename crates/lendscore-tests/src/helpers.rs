//! Shared fixtures for the end-to-end tests.

use lendscore_core::types::{FeatureVector, WalletAggregate};
use lendscore_features::{compute_features, ingest, FeatureConfig, IngestConfig, RawRecord};
use lendscore_model::{ModelConfig, TrainParams};
use lendscore_pipeline::{FsArtifactStore, Pipeline, PipelineConfig};

/// 2024-01-01 10:00:00 UTC.
pub const EPOCH: i64 = 1_704_103_200;
pub const DAY: i64 = 86_400;

/// One raw ledger entry at `EPOCH + offset_secs`.
pub fn record(wallet: &str, action: &str, amount: f64, offset_secs: i64) -> RawRecord {
    RawRecord::flat(
        wallet,
        action,
        amount,
        "usdc",
        &(EPOCH + offset_secs).to_string(),
    )
}

/// Deposit 1000, borrow 500 two days later, repay `repaid` after `days`.
pub fn repayer(wallet: &str, repaid: f64, days: i64) -> Vec<RawRecord> {
    vec![
        record(wallet, "deposit", 1000.0, 0),
        record(wallet, "borrow", 500.0, 2 * DAY),
        record(wallet, "repay", repaid, days * DAY),
    ]
}

/// The reference wallet: deposit 1000, borrow 500, repay 450 within 10 days.
pub fn reference_wallet(wallet: &str) -> Vec<RawRecord> {
    repayer(wallet, 450.0, 9)
}

/// Twelve borrows thirty seconds apart and nothing repaid.
pub fn bot_borrower(wallet: &str) -> Vec<RawRecord> {
    (0..12)
        .map(|i| record(wallet, "borrow", 250.0, i * 30))
        .collect()
}

/// A deposit and a withdrawal a day apart.
pub fn saver(wallet: &str) -> Vec<RawRecord> {
    vec![
        record(wallet, "deposit", 80.0, 0),
        record(wallet, "redeemunderlying", 80.0, DAY),
    ]
}

/// A mixed training ledger: disciplined repayers, automated borrowers and
/// plain savers, so the calibration has both ends of the range to anchor on.
pub fn training_ledger() -> Vec<RawRecord> {
    let mut out = Vec::new();
    for i in 0..10 {
        out.extend(repayer(
            &format!("0xgood{i:02}"),
            400.0 + 10.0 * i as f64,
            9 + i as i64,
        ));
    }
    for i in 0..10 {
        out.extend(bot_borrower(&format!("0xbot{i:02}")));
    }
    for i in 0..5 {
        out.extend(saver(&format!("0xsave{i:02}")));
    }
    out
}

/// Pipeline config with a quick booster, storing artifacts under `dir`.
pub fn test_config(dir: &std::path::Path) -> PipelineConfig {
    PipelineConfig {
        artifact_dir: dir.to_path_buf(),
        model: ModelConfig {
            train: TrainParams {
                rounds: 150,
                learning_rate: 0.1,
                ..TrainParams::default()
            },
            ..ModelConfig::default()
        },
        ..PipelineConfig::default()
    }
}

/// A filesystem-backed pipeline in a fresh temp directory.
pub fn test_pipeline() -> (Pipeline<FsArtifactStore>, tempfile::TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let pipeline = Pipeline::from_config(test_config(dir.path()));
    (pipeline, dir)
}

/// Feature vector of the single wallet in `records`.
pub fn features_of(records: &[RawRecord]) -> FeatureVector {
    let report = ingest(records, &IngestConfig::default()).unwrap();
    assert_eq!(report.wallets.len(), 1, "expected exactly one wallet");
    compute_features(&report.wallets[0], &FeatureConfig::default())
}

/// Aggregate of the single wallet in `records`.
pub fn aggregate_of(records: &[RawRecord]) -> WalletAggregate {
    let mut report = ingest(records, &IngestConfig::default()).unwrap();
    assert_eq!(report.wallets.len(), 1, "expected exactly one wallet");
    report.wallets.remove(0)
}
