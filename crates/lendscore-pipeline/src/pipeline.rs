//! Pipeline orchestration.
//!
//! A run is exactly one [`PipelineRequest`]: score with the committed
//! artifacts, or retrain and commit new ones. Both paths share ingest and
//! feature aggregation and diverge at the scaler. Artifacts travel as an
//! explicit `Arc<ArtifactBundle>`; nothing is cached globally.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use rayon::prelude::*;
use tracing::{info, warn};

use lendscore_core::error::{FeatureError, ModelError, PipelineError, StorageError};
use lendscore_core::traits::FeatureScaler;
use lendscore_core::types::{CreditScore, WalletFeatures};
use lendscore_features::{compute_all, ingest, parse_ledger, IngestReport, RawRecord};
use lendscore_model::{RobustScaler, ScoringModel};

use crate::config::PipelineConfig;
use crate::storage::{ArtifactBundle, ArtifactStore, ArtifactVersion, FsArtifactStore};

/// Score every wallet in `records` with the committed artifacts.
#[derive(Debug, Clone, Default)]
pub struct ScoreRequest {
    pub records: Vec<RawRecord>,
    /// Attach per-feature attributions to each score.
    pub explain: bool,
}

/// Fit new artifacts on the union of `records` and `additional`.
#[derive(Debug, Clone, Default)]
pub struct RetrainRequest {
    /// Existing training data.
    pub records: Vec<RawRecord>,
    /// Newly supplied transactions.
    pub additional: Vec<RawRecord>,
}

#[derive(Debug, Clone)]
pub enum PipelineRequest {
    Score(ScoreRequest),
    Retrain(RetrainRequest),
}

/// Result of scoring one batch.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoreOutcome {
    /// One score per wallet, in first-seen input order.
    pub scores: Vec<CreditScore>,
    pub accepted: usize,
    pub rejected: usize,
    pub rejections: BTreeMap<&'static str, usize>,
    /// Wallets dropped because their feature vector failed validation.
    pub skipped: Vec<FeatureError>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RetrainOutcome {
    pub version: ArtifactVersion,
    pub training_wallets: usize,
    /// Scores of the training wallets under the new artifacts.
    pub scores: ScoreOutcome,
}

#[derive(Debug, Clone, PartialEq)]
pub enum PipelineOutcome {
    Scored(ScoreOutcome),
    Retrained(RetrainOutcome),
}

pub struct Pipeline<S: ArtifactStore> {
    config: PipelineConfig,
    store: S,
}

impl Pipeline<FsArtifactStore> {
    /// Pipeline over the filesystem store at `config.artifact_dir`.
    pub fn from_config(config: PipelineConfig) -> Self {
        let store = FsArtifactStore::new(&config.artifact_dir);
        Self::new(config, store)
    }
}

impl<S: ArtifactStore> Pipeline<S> {
    pub fn new(config: PipelineConfig, store: S) -> Self {
        Self { config, store }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn run(&self, request: PipelineRequest) -> Result<PipelineOutcome, PipelineError> {
        match request {
            PipelineRequest::Score(req) => self.score(req).map(PipelineOutcome::Scored),
            PipelineRequest::Retrain(req) => self.retrain(req).map(PipelineOutcome::Retrained),
        }
    }

    /// The committed artifacts. Fails fast with
    /// [`PipelineError::ModelNotTrained`] when there are none.
    pub fn load_artifacts(&self) -> Result<Arc<ArtifactBundle>, PipelineError> {
        self.store
            .load()?
            .map(Arc::new)
            .ok_or(PipelineError::ModelNotTrained)
    }

    pub fn score(&self, request: ScoreRequest) -> Result<ScoreOutcome, PipelineError> {
        let artifacts = self.load_artifacts()?;
        self.score_with(&artifacts, request)
    }

    /// Score with explicitly supplied artifacts.
    pub fn score_with(
        &self,
        artifacts: &Arc<ArtifactBundle>,
        request: ScoreRequest,
    ) -> Result<ScoreOutcome, PipelineError> {
        let report = ingest(&request.records, &self.config.ingest)?;
        let (features, summary) = self.aggregate(report);
        let scores = score_wallets(artifacts, &features, request.explain);
        info!(wallets = scores.len(), "scored wallets");
        Ok(summary.into_outcome(scores))
    }

    pub fn retrain(&self, request: RetrainRequest) -> Result<RetrainOutcome, PipelineError> {
        let mut records = request.records;
        records.extend(request.additional);
        let report = ingest(&records, &self.config.ingest)?;
        let (features, summary) = self.aggregate(report);
        if features.is_empty() {
            return Err(ModelError::EmptyTrainingSet.into());
        }

        let rows: Vec<_> = features.iter().map(|w| w.features.clone()).collect();
        let scaler = RobustScaler::default().fit(&rows)?;
        let scaled = scaler.apply_all(&rows);
        let model = ScoringModel::train(&rows, &scaled, &self.config.model)?;
        let bundle = Arc::new(ArtifactBundle { scaler, model });

        let version = self
            .store
            .commit(&bundle)
            .map_err(|e| PipelineError::ArtifactWrite(e.to_string()))?;
        info!(%version, wallets = features.len(), "retrained scoring artifacts");

        let scores = score_wallets(&bundle, &features, false);
        Ok(RetrainOutcome {
            version,
            training_wallets: features.len(),
            scores: summary.into_outcome(scores),
        })
    }

    fn aggregate(&self, report: IngestReport) -> (Vec<WalletFeatures>, BatchSummary) {
        let mut summary = BatchSummary {
            accepted: report.accepted,
            rejected: report.rejected,
            rejections: report.rejections,
            skipped: Vec::new(),
        };
        let mut features = Vec::with_capacity(report.wallets.len());
        for result in compute_all(report.wallets, &self.config.features) {
            match result {
                Ok(wf) => features.push(wf),
                Err(e) => {
                    warn!("skipping wallet: {e}");
                    summary.skipped.push(e);
                }
            }
        }
        (features, summary)
    }
}

impl Pipeline<FsArtifactStore> {
    /// Remove artifact versions beyond `keep_versions`. Failures are logged;
    /// the committed pair is already live.
    pub fn prune_artifacts(&self) -> usize {
        if self.config.keep_versions == 0 {
            return 0;
        }
        match self.store.prune(self.config.keep_versions) {
            Ok(n) => n,
            Err(e) => {
                warn!("artifact pruning failed: {e}");
                0
            }
        }
    }
}

struct BatchSummary {
    accepted: usize,
    rejected: usize,
    rejections: BTreeMap<&'static str, usize>,
    skipped: Vec<FeatureError>,
}

impl BatchSummary {
    fn into_outcome(self, scores: Vec<CreditScore>) -> ScoreOutcome {
        ScoreOutcome {
            scores,
            accepted: self.accepted,
            rejected: self.rejected,
            rejections: self.rejections,
            skipped: self.skipped,
        }
    }
}

fn score_wallets(
    artifacts: &ArtifactBundle,
    features: &[WalletFeatures],
    explain: bool,
) -> Vec<CreditScore> {
    features
        .par_iter()
        .map(|wf| {
            let scaled = artifacts.scaler.apply(&wf.features);
            artifacts
                .model
                .score(&wf.wallet_id, &wf.features, &scaled, explain)
        })
        .collect()
}

/// Read and parse a JSON ledger file.
pub fn load_ledger(path: &Path) -> Result<Vec<RawRecord>, PipelineError> {
    let bytes = std::fs::read(path)
        .map_err(|e| StorageError::Io(format!("{}: {e}", path.display())))?;
    Ok(parse_ledger(&bytes)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use lendscore_core::error::IngestError;
    use lendscore_model::{ModelConfig, TrainParams};
    use std::sync::Mutex;

    /// In-memory store; `fail_commits` simulates a storage failure mid-write.
    #[derive(Default)]
    struct MemoryStore {
        current: Mutex<Option<ArtifactBundle>>,
        fail_commits: bool,
    }

    impl ArtifactStore for MemoryStore {
        fn load(&self) -> Result<Option<ArtifactBundle>, StorageError> {
            Ok(self.current.lock().unwrap().clone())
        }

        fn commit(&self, bundle: &ArtifactBundle) -> Result<ArtifactVersion, StorageError> {
            if self.fail_commits {
                return Err(StorageError::Io("disk full".into()));
            }
            *self.current.lock().unwrap() = Some(bundle.clone());
            Ok(ArtifactVersion("mem".into()))
        }
    }

    fn config() -> PipelineConfig {
        PipelineConfig {
            model: ModelConfig {
                train: TrainParams {
                    rounds: 30,
                    learning_rate: 0.2,
                    ..TrainParams::default()
                },
                ..ModelConfig::default()
            },
            ..PipelineConfig::default()
        }
    }

    fn ledger() -> Vec<RawRecord> {
        let mut out = Vec::new();
        for w in 0..12 {
            let wallet = format!("0x{w:02}");
            out.push(RawRecord::flat(&wallet, "deposit", 1000.0, "usdc", "2024-01-01T10:00:00Z"));
            out.push(RawRecord::flat(&wallet, "borrow", 500.0, "usdc", "2024-01-03T10:00:00Z"));
            let repay = 50.0 * w as f64;
            let day = 4 + w;
            out.push(RawRecord::flat(
                &wallet,
                "repay",
                repay,
                "usdc",
                &format!("2024-01-{day:02}T10:00:00Z"),
            ));
        }
        out
    }

    #[test]
    fn score_without_artifacts_is_model_not_trained() {
        let p = Pipeline::new(config(), MemoryStore::default());
        let err = p
            .run(PipelineRequest::Score(ScoreRequest {
                records: ledger(),
                explain: false,
            }))
            .unwrap_err();
        assert!(matches!(err, PipelineError::ModelNotTrained));
    }

    #[test]
    fn retrain_then_score() {
        let p = Pipeline::new(config(), MemoryStore::default());
        let retrained = p
            .retrain(RetrainRequest {
                records: ledger(),
                additional: vec![],
            })
            .unwrap();
        assert_eq!(retrained.training_wallets, 12);
        assert_eq!(retrained.scores.scores.len(), 12);

        let scored = p
            .score(ScoreRequest {
                records: ledger(),
                explain: false,
            })
            .unwrap();
        assert_eq!(scored.scores, retrained.scores.scores);
        assert_eq!(scored.accepted, 36);
        assert_eq!(scored.rejected, 0);
    }

    #[test]
    fn scores_follow_first_seen_order() {
        let p = Pipeline::new(config(), MemoryStore::default());
        p.retrain(RetrainRequest {
            records: ledger(),
            additional: vec![],
        })
        .unwrap();
        let outcome = p
            .score(ScoreRequest {
                records: ledger(),
                explain: true,
            })
            .unwrap();
        let ids: Vec<&str> = outcome.scores.iter().map(|s| s.wallet_id.as_str()).collect();
        let expected: Vec<String> = (0..12).map(|w| format!("0x{w:02}")).collect();
        assert_eq!(ids, expected.iter().map(String::as_str).collect::<Vec<_>>());
        assert!(outcome.scores.iter().all(|s| s.attributions.is_some()));
    }

    #[test]
    fn retrain_uses_additional_records() {
        let p = Pipeline::new(config(), MemoryStore::default());
        let extra = vec![RawRecord::flat(
            "0xnew",
            "deposit",
            10.0,
            "weth",
            "2024-02-01T00:00:00Z",
        )];
        let outcome = p
            .retrain(RetrainRequest {
                records: ledger(),
                additional: extra,
            })
            .unwrap();
        assert_eq!(outcome.training_wallets, 13);
    }

    #[test]
    fn failed_commit_is_artifact_write_and_keeps_previous() {
        let previous = {
            let p = Pipeline::new(config(), MemoryStore::default());
            p.retrain(RetrainRequest {
                records: ledger(),
                additional: vec![],
            })
            .unwrap();
            p.store().load().unwrap().unwrap()
        };
        let store = MemoryStore {
            current: Mutex::new(Some(previous.clone())),
            fail_commits: true,
        };
        let p = Pipeline::new(config(), store);
        let err = p
            .retrain(RetrainRequest {
                records: ledger()[..9].to_vec(),
                additional: vec![],
            })
            .unwrap_err();
        assert!(matches!(err, PipelineError::ArtifactWrite(_)));
        assert_eq!(p.store().load().unwrap(), Some(previous));
    }

    #[test]
    fn empty_input_is_fatal() {
        let p = Pipeline::new(config(), MemoryStore::default());
        let err = p
            .retrain(RetrainRequest::default())
            .unwrap_err();
        assert!(matches!(
            err,
            PipelineError::Ingest(IngestError::EmptyInput { rejected: 0 })
        ));
    }

    #[test]
    fn rejected_records_are_counted_not_fatal() {
        let p = Pipeline::new(config(), MemoryStore::default());
        p.retrain(RetrainRequest {
            records: ledger(),
            additional: vec![],
        })
        .unwrap();
        let mut records = ledger();
        records.push(RawRecord::flat("0x99", "flashloan", 1.0, "usdc", "2024-01-01T00:00:00Z"));
        records.push(RawRecord::flat("0x99", "deposit", -1.0, "usdc", "2024-01-01T00:00:00Z"));
        let outcome = p
            .score(ScoreRequest {
                records,
                explain: false,
            })
            .unwrap();
        assert_eq!(outcome.rejected, 2);
        assert_eq!(outcome.rejections.get("unknown_action"), Some(&1));
        assert_eq!(outcome.rejections.get("negative_amount"), Some(&1));
        assert_eq!(outcome.scores.len(), 12);
    }

    #[test]
    fn load_ledger_missing_file_is_storage_error() {
        let err = load_ledger(Path::new("/nonexistent/ledger.json")).unwrap_err();
        assert!(matches!(err, PipelineError::Storage(StorageError::Io(_))));
    }

    #[test]
    fn load_ledger_non_array_is_ingest_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ledger.json");
        std::fs::write(&path, b"{\"not\": \"an array\"}").unwrap();
        let err = load_ledger(&path).unwrap_err();
        assert!(matches!(err, PipelineError::Ingest(IngestError::Unparseable(_))));
    }
}
