//! Error types for the Lendscore pipeline.
use thiserror::Error;

/// Why a single raw record was rejected. Recovered locally: the record is
/// dropped and counted, the batch continues.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("malformed entry: {0}")] Malformed(String),
    #[error("missing wallet id")] MissingWallet,
    #[error("missing action")] MissingAction,
    #[error("unknown action: {0}")] UnknownAction(String),
    #[error("missing amount")] MissingAmount,
    #[error("invalid amount: {0}")] InvalidAmount(String),
    #[error("negative amount: {0}")] NegativeAmount(String),
    #[error("missing asset")] MissingAsset,
    #[error("missing timestamp")] MissingTimestamp,
    #[error("invalid timestamp: {0}")] InvalidTimestamp(String),
}

impl ValidationError {
    /// Stable short label used as the rejection tally key.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Malformed(_) => "malformed",
            Self::MissingWallet => "missing_wallet",
            Self::MissingAction => "missing_action",
            Self::UnknownAction(_) => "unknown_action",
            Self::MissingAmount => "missing_amount",
            Self::InvalidAmount(_) => "invalid_amount",
            Self::NegativeAmount(_) => "negative_amount",
            Self::MissingAsset => "missing_asset",
            Self::MissingTimestamp => "missing_timestamp",
            Self::InvalidTimestamp(_) => "invalid_timestamp",
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum IngestError {
    #[error("no valid records in input ({rejected} rejected)")] EmptyInput { rejected: usize },
    #[error("unparseable input: {0}")] Unparseable(String),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FeatureError {
    #[error("degenerate feature {feature} for wallet {wallet}")] Degenerate { wallet: String, feature: &'static str },
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ModelError {
    #[error("empty training set")] EmptyTrainingSet,
    #[error("length mismatch: {features} feature rows, {targets} targets")] LengthMismatch { features: usize, targets: usize },
    #[error("non-finite target at row {0}")] NonFiniteTarget(usize),
    #[error("invalid training parameters: {0}")] InvalidParams(String),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StorageError {
    #[error("I/O error: {0}")] Io(String),
    #[error("serialization: {0}")] Serialization(String),
    #[error("corrupt artifact: {0}")] CorruptArtifact(String),
}

/// Fatal, run-level failures surfaced to the external caller.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error(transparent)] Ingest(#[from] IngestError),
    #[error("no trained model or scaler artifacts available")] ModelNotTrained,
    #[error("artifact write failed: {0}")] ArtifactWrite(String),
    #[error(transparent)] Storage(#[from] StorageError),
    #[error(transparent)] Model(#[from] ModelError),
    #[error("config: {0}")] Config(String),
}

#[derive(Error, Debug)]
pub enum LendscoreError {
    #[error(transparent)] Validation(#[from] ValidationError),
    #[error(transparent)] Feature(#[from] FeatureError),
    #[error(transparent)] Pipeline(#[from] PipelineError),
}

impl From<IngestError> for LendscoreError {
    fn from(e: IngestError) -> Self {
        Self::Pipeline(PipelineError::Ingest(e))
    }
}

impl From<ModelError> for LendscoreError {
    fn from(e: ModelError) -> Self {
        Self::Pipeline(PipelineError::Model(e))
    }
}

impl From<StorageError> for LendscoreError {
    fn from(e: StorageError) -> Self {
        Self::Pipeline(PipelineError::Storage(e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_kinds_are_distinct() {
        let all = [
            ValidationError::Malformed("x".into()),
            ValidationError::MissingWallet,
            ValidationError::MissingAction,
            ValidationError::UnknownAction("x".into()),
            ValidationError::MissingAmount,
            ValidationError::InvalidAmount("x".into()),
            ValidationError::NegativeAmount("-1".into()),
            ValidationError::MissingAsset,
            ValidationError::MissingTimestamp,
            ValidationError::InvalidTimestamp("x".into()),
        ];
        let mut kinds: Vec<&str> = all.iter().map(|e| e.kind()).collect();
        kinds.sort();
        kinds.dedup();
        assert_eq!(kinds.len(), all.len());
    }

    #[test]
    fn empty_input_message_includes_rejections() {
        let e = IngestError::EmptyInput { rejected: 4 };
        assert_eq!(e.to_string(), "no valid records in input (4 rejected)");
    }

    #[test]
    fn ingest_error_lifts_into_top_level() {
        let e: LendscoreError = IngestError::EmptyInput { rejected: 0 }.into();
        assert!(matches!(
            e,
            LendscoreError::Pipeline(PipelineError::Ingest(IngestError::EmptyInput { .. }))
        ));
    }

    #[test]
    fn model_not_trained_display() {
        let e = PipelineError::ModelNotTrained;
        assert!(e.to_string().contains("no trained model"));
    }
}
