//! Core pipeline types: transaction records, wallet groupings, feature
//! vectors and credit scores.
//!
//! Amounts are `f64` in a unit shared across assets (normalization happens at
//! ingest). Every feature column is exposed in the fixed order of
//! [`FEATURE_NAMES`].

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::constants::{SCORE_MAX, SCORE_MIN};
use crate::error::{FeatureError, ValidationError};

/// Lending-protocol action. The set is closed: anything else is rejected.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    Deposit,
    Borrow,
    Repay,
    Redeem,
    Liquidation,
}

impl Action {
    pub const ALL: [Action; 5] = [
        Action::Deposit,
        Action::Borrow,
        Action::Repay,
        Action::Redeem,
        Action::Liquidation,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Deposit => "deposit",
            Self::Borrow => "borrow",
            Self::Repay => "repay",
            Self::Redeem => "redeem",
            Self::Liquidation => "liquidation",
        }
    }
}

impl FromStr for Action {
    type Err = ValidationError;

    /// Case-insensitive. Also accepts the protocol event names
    /// `redeemunderlying` and `liquidationcall`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "deposit" => Ok(Self::Deposit),
            "borrow" => Ok(Self::Borrow),
            "repay" => Ok(Self::Repay),
            "redeem" | "redeemunderlying" => Ok(Self::Redeem),
            "liquidation" | "liquidationcall" => Ok(Self::Liquidation),
            "" => Err(ValidationError::MissingAction),
            _ => Err(ValidationError::UnknownAction(s.to_string())),
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A validated transaction. Created once at ingest and never mutated.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct TransactionRecord {
    pub wallet_id: String,
    pub action: Action,
    /// Non-negative, finite amount in the shared unit.
    pub amount: f64,
    /// Lower-cased asset identifier.
    pub asset: String,
    pub timestamp: DateTime<Utc>,
}

impl TransactionRecord {
    /// Build a record, enforcing the record invariants.
    pub fn new(
        wallet_id: impl Into<String>,
        action: Action,
        amount: f64,
        asset: impl Into<String>,
        timestamp: DateTime<Utc>,
    ) -> Result<Self, ValidationError> {
        let wallet_id: String = wallet_id.into();
        let wallet_id = wallet_id.trim().to_string();
        if wallet_id.is_empty() {
            return Err(ValidationError::MissingWallet);
        }
        if !amount.is_finite() {
            return Err(ValidationError::InvalidAmount(amount.to_string()));
        }
        if amount < 0.0 {
            return Err(ValidationError::NegativeAmount(amount.to_string()));
        }
        let asset: String = asset.into();
        let asset = asset.trim().to_ascii_lowercase();
        if asset.is_empty() {
            return Err(ValidationError::MissingAsset);
        }
        Ok(Self {
            wallet_id,
            action,
            amount,
            asset,
            timestamp,
        })
    }
}

/// One wallet's records, ordered by timestamp ascending.
///
/// The ordering is established at construction (stable sort, so records with
/// equal timestamps keep their input order) and cannot be broken afterwards.
#[derive(Clone, Debug, PartialEq)]
pub struct WalletAggregate {
    wallet_id: String,
    records: Vec<TransactionRecord>,
}

impl WalletAggregate {
    pub fn new(wallet_id: impl Into<String>, mut records: Vec<TransactionRecord>) -> Self {
        records.sort_by_key(|r| r.timestamp);
        Self {
            wallet_id: wallet_id.into(),
            records,
        }
    }

    pub fn wallet_id(&self) -> &str {
        &self.wallet_id
    }

    pub fn records(&self) -> &[TransactionRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Earliest and latest timestamps, if any records exist.
    pub fn time_span(&self) -> Option<(DateTime<Utc>, DateTime<Utc>)> {
        match (self.records.first(), self.records.last()) {
            (Some(first), Some(last)) => Some((first.timestamp, last.timestamp)),
            _ => None,
        }
    }
}

/// Number of columns in a [`FeatureVector`].
pub const FEATURE_COUNT: usize = 17;

/// Column names in the fixed order used by [`FeatureVector::to_array`].
pub const FEATURE_NAMES: [&str; FEATURE_COUNT] = [
    "transaction_count",
    "repay_to_borrow_ratio",
    "liquidation_count",
    "days_active",
    "avg_tx_interval_seconds",
    "tx_interval_stddev_seconds",
    "night_tx_ratio",
    "total_tx_value",
    "avg_tx_value",
    "tx_value_stddev",
    "unique_assets",
    "deposit_ratio",
    "borrow_ratio",
    "repay_ratio",
    "redeem_ratio",
    "workhour_tx_ratio",
    "bot_likelihood",
];

/// Column index of a feature name, or `None` if it is not in the schema.
pub fn feature_index(name: &str) -> Option<usize> {
    FEATURE_NAMES.iter().position(|n| *n == name)
}

/// Fixed-schema per-wallet features. Every field is finite; undefined ratios
/// and statistics use the sentinel 0.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Default)]
pub struct FeatureVector {
    pub transaction_count: u64,
    pub repay_to_borrow_ratio: f64,
    pub liquidation_count: u64,
    pub days_active: u64,
    pub avg_tx_interval_seconds: f64,
    pub tx_interval_stddev_seconds: f64,
    pub night_tx_ratio: f64,
    pub total_tx_value: f64,
    pub avg_tx_value: f64,
    pub tx_value_stddev: f64,
    pub unique_assets: u64,
    pub deposit_ratio: f64,
    pub borrow_ratio: f64,
    pub repay_ratio: f64,
    pub redeem_ratio: f64,
    pub workhour_tx_ratio: f64,
    /// 1.0 when the cadence looks automated, else 0.0.
    pub bot_likelihood: f64,
}

impl FeatureVector {
    pub fn to_array(&self) -> [f64; FEATURE_COUNT] {
        [
            self.transaction_count as f64,
            self.repay_to_borrow_ratio,
            self.liquidation_count as f64,
            self.days_active as f64,
            self.avg_tx_interval_seconds,
            self.tx_interval_stddev_seconds,
            self.night_tx_ratio,
            self.total_tx_value,
            self.avg_tx_value,
            self.tx_value_stddev,
            self.unique_assets as f64,
            self.deposit_ratio,
            self.borrow_ratio,
            self.repay_ratio,
            self.redeem_ratio,
            self.workhour_tx_ratio,
            self.bot_likelihood,
        ]
    }

    /// Value of a named column.
    pub fn get(&self, name: &str) -> Option<f64> {
        feature_index(name).map(|i| self.to_array()[i])
    }

    /// Check that every column is finite.
    pub fn validate(&self, wallet_id: &str) -> Result<(), FeatureError> {
        for (name, value) in FEATURE_NAMES.iter().zip(self.to_array()) {
            if !value.is_finite() {
                return Err(FeatureError::Degenerate {
                    wallet: wallet_id.to_string(),
                    feature: *name,
                });
            }
        }
        Ok(())
    }
}

/// A wallet id paired with its computed features.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct WalletFeatures {
    pub wallet_id: String,
    pub features: FeatureVector,
}

/// A feature vector after robust scaling, in [`FEATURE_NAMES`] order.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq)]
pub struct ScaledFeatureVector(pub [f64; FEATURE_COUNT]);

impl ScaledFeatureVector {
    pub fn values(&self) -> &[f64; FEATURE_COUNT] {
        &self.0
    }

    pub fn get(&self, index: usize) -> f64 {
        self.0[index]
    }
}

/// Interpretation band of a published score.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum ScoreBand {
    HighRisk,
    Risky,
    Average,
    Good,
    Excellent,
}

impl ScoreBand {
    pub const ALL: [ScoreBand; 5] = [
        ScoreBand::Excellent,
        ScoreBand::Good,
        ScoreBand::Average,
        ScoreBand::Risky,
        ScoreBand::HighRisk,
    ];

    pub fn from_score(score: u16) -> Self {
        match score {
            800.. => Self::Excellent,
            600..=799 => Self::Good,
            400..=599 => Self::Average,
            200..=399 => Self::Risky,
            _ => Self::HighRisk,
        }
    }

    /// Inclusive score range `(low, high)`.
    pub fn range(&self) -> (u16, u16) {
        match self {
            Self::Excellent => (800, SCORE_MAX),
            Self::Good => (600, 799),
            Self::Average => (400, 599),
            Self::Risky => (200, 399),
            Self::HighRisk => (SCORE_MIN, 199),
        }
    }

    pub fn midpoint(&self) -> f64 {
        let (lo, hi) = self.range();
        (lo as f64 + hi as f64) / 2.0
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Excellent => "Excellent",
            Self::Good => "Good",
            Self::Average => "Average",
            Self::Risky => "Risky",
            Self::HighRisk => "High risk",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            Self::Excellent => "responsible, consistent repayments",
            Self::Good => "reliable users",
            Self::Average => "some risk factors",
            Self::Risky => "irregular patterns",
            Self::HighRisk => "liquidations or bot-like activity",
        }
    }
}

impl fmt::Display for ScoreBand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (lo, hi) = self.range();
        write!(f, "{lo}-{hi}: {} ({})", self.label(), self.description())
    }
}

/// Contribution of one feature to a wallet's score, in score points.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct FeatureAttribution {
    pub feature: String,
    pub contribution: f64,
}

/// Final published score for one wallet.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct CreditScore {
    pub wallet_id: String,
    pub score: u16,
    pub band: ScoreBand,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attributions: Option<Vec<FeatureAttribution>>,
}

impl CreditScore {
    /// Create a score; values above [`SCORE_MAX`] are clamped.
    pub fn new(wallet_id: impl Into<String>, score: u16) -> Self {
        let score = score.clamp(SCORE_MIN, SCORE_MAX);
        Self {
            wallet_id: wallet_id.into(),
            score,
            band: ScoreBand::from_score(score),
            attributions: None,
        }
    }

    pub fn with_attributions(mut self, attributions: Vec<FeatureAttribution>) -> Self {
        self.attributions = Some(attributions);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use proptest::prelude::*;

    fn ts(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    fn rec(wallet: &str, action: Action, amount: f64, secs: i64) -> TransactionRecord {
        TransactionRecord::new(wallet, action, amount, "USDC", ts(secs)).unwrap()
    }

    // --- Action ---

    #[test]
    fn action_parses_case_insensitively() {
        assert_eq!("Deposit".parse::<Action>().unwrap(), Action::Deposit);
        assert_eq!("BORROW".parse::<Action>().unwrap(), Action::Borrow);
        assert_eq!(" repay ".parse::<Action>().unwrap(), Action::Repay);
    }

    #[test]
    fn action_accepts_protocol_event_names() {
        assert_eq!("redeemunderlying".parse::<Action>().unwrap(), Action::Redeem);
        assert_eq!("liquidationcall".parse::<Action>().unwrap(), Action::Liquidation);
    }

    #[test]
    fn action_rejects_unknown() {
        assert_eq!(
            "flashloan".parse::<Action>(),
            Err(ValidationError::UnknownAction("flashloan".into()))
        );
        assert_eq!("".parse::<Action>(), Err(ValidationError::MissingAction));
    }

    #[test]
    fn action_serde_is_lowercase() {
        let json = serde_json::to_string(&Action::Liquidation).unwrap();
        assert_eq!(json, "\"liquidation\"");
        let back: Action = serde_json::from_str("\"repay\"").unwrap();
        assert_eq!(back, Action::Repay);
    }

    #[test]
    fn action_display_roundtrips_through_parse() {
        for a in Action::ALL {
            assert_eq!(a.to_string().parse::<Action>().unwrap(), a);
        }
    }

    // --- TransactionRecord ---

    #[test]
    fn record_rejects_negative_amount() {
        let err = TransactionRecord::new("w", Action::Deposit, -1.0, "eth", ts(0)).unwrap_err();
        assert!(matches!(err, ValidationError::NegativeAmount(_)));
    }

    #[test]
    fn record_rejects_non_finite_amount() {
        let err =
            TransactionRecord::new("w", Action::Deposit, f64::NAN, "eth", ts(0)).unwrap_err();
        assert!(matches!(err, ValidationError::InvalidAmount(_)));
        let err = TransactionRecord::new("w", Action::Deposit, f64::INFINITY, "eth", ts(0))
            .unwrap_err();
        assert!(matches!(err, ValidationError::InvalidAmount(_)));
    }

    #[test]
    fn record_rejects_blank_wallet_and_asset() {
        assert_eq!(
            TransactionRecord::new("  ", Action::Deposit, 1.0, "eth", ts(0)).unwrap_err(),
            ValidationError::MissingWallet
        );
        assert_eq!(
            TransactionRecord::new("w", Action::Deposit, 1.0, "", ts(0)).unwrap_err(),
            ValidationError::MissingAsset
        );
    }

    #[test]
    fn record_lowercases_asset() {
        let r = rec("w", Action::Deposit, 1.0, 0);
        assert_eq!(r.asset, "usdc");
    }

    #[test]
    fn record_accepts_zero_amount() {
        assert!(TransactionRecord::new("w", Action::Repay, 0.0, "eth", ts(0)).is_ok());
    }

    // --- WalletAggregate ---

    #[test]
    fn aggregate_sorts_by_timestamp() {
        let agg = WalletAggregate::new(
            "w",
            vec![
                rec("w", Action::Repay, 1.0, 300),
                rec("w", Action::Deposit, 1.0, 100),
                rec("w", Action::Borrow, 1.0, 200),
            ],
        );
        let times: Vec<i64> = agg.records().iter().map(|r| r.timestamp.timestamp()).collect();
        assert_eq!(times, vec![100, 200, 300]);
        assert_eq!(agg.time_span(), Some((ts(100), ts(300))));
    }

    #[test]
    fn aggregate_sort_is_stable_for_equal_timestamps() {
        let agg = WalletAggregate::new(
            "w",
            vec![
                rec("w", Action::Borrow, 1.0, 100),
                rec("w", Action::Deposit, 2.0, 100),
            ],
        );
        assert_eq!(agg.records()[0].action, Action::Borrow);
        assert_eq!(agg.records()[1].action, Action::Deposit);
    }

    #[test]
    fn empty_aggregate_has_no_span() {
        let agg = WalletAggregate::new("w", vec![]);
        assert!(agg.is_empty());
        assert_eq!(agg.time_span(), None);
    }

    // --- FeatureVector ---

    #[test]
    fn feature_names_are_unique() {
        let mut names = FEATURE_NAMES.to_vec();
        names.sort();
        names.dedup();
        assert_eq!(names.len(), FEATURE_COUNT);
    }

    #[test]
    fn feature_get_matches_fields() {
        let fv = FeatureVector {
            transaction_count: 3,
            repay_to_borrow_ratio: 0.9,
            liquidation_count: 2,
            bot_likelihood: 1.0,
            ..FeatureVector::default()
        };
        assert_eq!(fv.get("transaction_count"), Some(3.0));
        assert_eq!(fv.get("repay_to_borrow_ratio"), Some(0.9));
        assert_eq!(fv.get("liquidation_count"), Some(2.0));
        assert_eq!(fv.get("bot_likelihood"), Some(1.0));
        assert_eq!(fv.get("no_such_feature"), None);
    }

    #[test]
    fn validate_flags_non_finite_column() {
        let fv = FeatureVector {
            night_tx_ratio: f64::NAN,
            ..FeatureVector::default()
        };
        let err = fv.validate("w1").unwrap_err();
        assert_eq!(
            err,
            FeatureError::Degenerate {
                wallet: "w1".into(),
                feature: "night_tx_ratio"
            }
        );
        assert!(FeatureVector::default().validate("w1").is_ok());
    }

    // --- ScoreBand / CreditScore ---

    #[test]
    fn band_boundaries() {
        assert_eq!(ScoreBand::from_score(0), ScoreBand::HighRisk);
        assert_eq!(ScoreBand::from_score(199), ScoreBand::HighRisk);
        assert_eq!(ScoreBand::from_score(200), ScoreBand::Risky);
        assert_eq!(ScoreBand::from_score(399), ScoreBand::Risky);
        assert_eq!(ScoreBand::from_score(400), ScoreBand::Average);
        assert_eq!(ScoreBand::from_score(599), ScoreBand::Average);
        assert_eq!(ScoreBand::from_score(600), ScoreBand::Good);
        assert_eq!(ScoreBand::from_score(799), ScoreBand::Good);
        assert_eq!(ScoreBand::from_score(800), ScoreBand::Excellent);
        assert_eq!(ScoreBand::from_score(1000), ScoreBand::Excellent);
    }

    #[test]
    fn average_midpoint() {
        assert_eq!(ScoreBand::Average.midpoint(), 499.5);
    }

    #[test]
    fn credit_score_clamps_to_max() {
        let s = CreditScore::new("w", 5000);
        assert_eq!(s.score, SCORE_MAX);
        assert_eq!(s.band, ScoreBand::Excellent);
    }

    #[test]
    fn credit_score_omits_empty_attributions_in_json() {
        let s = CreditScore::new("w", 512);
        let json = serde_json::to_string(&s).unwrap();
        assert!(!json.contains("attributions"));
        assert!(json.contains("\"band\":\"average\""));
    }

    proptest! {
        #[test]
        fn every_score_falls_in_its_band(score in 0u16..=1000) {
            let band = ScoreBand::from_score(score);
            let (lo, hi) = band.range();
            prop_assert!(score >= lo && score <= hi);
        }
    }
}
