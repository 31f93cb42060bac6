//! Per-wallet feature aggregation.
//!
//! [`compute_features`] reduces one wallet's time-ordered history to a
//! [`FeatureVector`]. It is total: sparse histories yield the sentinel 0 for
//! every undefined ratio or statistic, and every output is finite (sums that
//! overflow saturate at `f64::MAX`). There is no cross-wallet state, so
//! [`compute_all`] fans out over rayon's pool.

use std::collections::{BTreeMap, HashSet};

use chrono::{DateTime, FixedOffset, Timelike, Utc};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::debug;

use lendscore_core::constants::{
    BOT_MAX_MEAN_INTERVAL_SECS, BOT_MIN_INTERVALS, DEFAULT_NIGHT_END_HOUR,
    DEFAULT_NIGHT_START_HOUR, SECONDS_PER_DAY, WORKHOUR_END_HOUR, WORKHOUR_START_HOUR,
};
use lendscore_core::error::FeatureError;
use lendscore_core::types::{Action, FeatureVector, WalletAggregate, WalletFeatures};

/// Hours of the day counted as "night", as `[start_hour, end_hour)`.
///
/// Wraps around midnight when `start_hour > end_hour`, e.g. `23 → 6` covers
/// 23:00 through 05:59.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct NightWindow {
    pub start_hour: u32,
    pub end_hour: u32,
}

impl Default for NightWindow {
    fn default() -> Self {
        Self {
            start_hour: DEFAULT_NIGHT_START_HOUR,
            end_hour: DEFAULT_NIGHT_END_HOUR,
        }
    }
}

impl NightWindow {
    pub fn contains(&self, hour: u32) -> bool {
        if self.start_hour <= self.end_hour {
            hour >= self.start_hour && hour < self.end_hour
        } else {
            hour >= self.start_hour || hour < self.end_hour
        }
    }
}

/// Aggregation settings.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(default)]
pub struct FeatureConfig {
    pub night_window: NightWindow,
    /// Optional per-wallet UTC offset in seconds east, used for hour-of-day
    /// bucketing. Wallets without an entry are bucketed in UTC. A lower-cased
    /// key also matches, since config file keys arrive lower-cased.
    pub wallet_utc_offsets: BTreeMap<String, i32>,
}

impl FeatureConfig {
    fn local_hour(&self, wallet_id: &str, ts: DateTime<Utc>) -> u32 {
        let offset = self
            .wallet_utc_offsets
            .get(wallet_id)
            .or_else(|| self.wallet_utc_offsets.get(&wallet_id.to_ascii_lowercase()));
        match offset.and_then(|secs| FixedOffset::east_opt(*secs)) {
            Some(offset) => ts.with_timezone(&offset).hour(),
            None => ts.hour(),
        }
    }
}

/// Compute the feature vector for one wallet.
pub fn compute_features(aggregate: &WalletAggregate, cfg: &FeatureConfig) -> FeatureVector {
    let records = aggregate.records();
    let n = records.len();
    if n == 0 {
        return FeatureVector::default();
    }
    let count = n as f64;

    let mut action_counts = [0u64; Action::ALL.len()];
    let mut borrow_total = 0.0f64;
    let mut repay_total = 0.0f64;
    let mut night = 0u64;
    let mut workhours = 0u64;
    let mut assets: HashSet<&str> = HashSet::new();
    let mut amounts: Vec<f64> = Vec::with_capacity(n);

    for r in records {
        action_counts[action_slot(r.action)] += 1;
        match r.action {
            Action::Borrow => borrow_total += r.amount,
            Action::Repay => repay_total += r.amount,
            _ => {}
        }
        let hour = cfg.local_hour(aggregate.wallet_id(), r.timestamp);
        if cfg.night_window.contains(hour) {
            night += 1;
        }
        if (WORKHOUR_START_HOUR..=WORKHOUR_END_HOUR).contains(&hour) {
            workhours += 1;
        }
        assets.insert(r.asset.as_str());
        amounts.push(r.amount);
    }

    let gaps: Vec<f64> = records
        .windows(2)
        .map(|w| (w[1].timestamp - w[0].timestamp).num_milliseconds() as f64 / 1000.0)
        .collect();
    let (avg_gap, gap_stddev) = mean_and_stddev(&gaps);
    let (avg_value, value_stddev) = mean_and_stddev(&amounts);

    let days_active = aggregate
        .time_span()
        .map(|(first, last)| ((last - first).num_seconds() / SECONDS_PER_DAY).max(0) as u64)
        .unwrap_or(0);

    let repay_to_borrow_ratio = if borrow_total > 0.0 {
        repay_total / borrow_total
    } else {
        0.0
    };

    let bot_likelihood =
        if gaps.len() > BOT_MIN_INTERVALS && avg_gap < BOT_MAX_MEAN_INTERVAL_SECS {
            1.0
        } else {
            0.0
        };

    let share = |action: Action| action_counts[action_slot(action)] as f64 / count;

    FeatureVector {
        transaction_count: n as u64,
        repay_to_borrow_ratio: saturate(repay_to_borrow_ratio),
        liquidation_count: action_counts[action_slot(Action::Liquidation)],
        days_active,
        avg_tx_interval_seconds: saturate(avg_gap),
        tx_interval_stddev_seconds: saturate(gap_stddev),
        night_tx_ratio: night as f64 / count,
        total_tx_value: saturate(amounts.iter().sum()),
        avg_tx_value: saturate(avg_value),
        tx_value_stddev: saturate(value_stddev),
        unique_assets: assets.len() as u64,
        deposit_ratio: share(Action::Deposit),
        borrow_ratio: share(Action::Borrow),
        repay_ratio: share(Action::Repay),
        redeem_ratio: share(Action::Redeem),
        workhour_tx_ratio: workhours as f64 / count,
        bot_likelihood,
    }
}

/// Compute features for every wallet in parallel, preserving input order.
///
/// Each aggregate is consumed. A wallet whose vector fails the finiteness
/// post-condition comes back as [`FeatureError::Degenerate`].
pub fn compute_all(
    aggregates: Vec<WalletAggregate>,
    cfg: &FeatureConfig,
) -> Vec<Result<WalletFeatures, FeatureError>> {
    let out: Vec<_> = aggregates
        .into_par_iter()
        .map(|aggregate| -> Result<WalletFeatures, FeatureError> {
            let features = compute_features(&aggregate, cfg);
            features.validate(aggregate.wallet_id())?;
            Ok(WalletFeatures {
                wallet_id: aggregate.wallet_id().to_string(),
                features,
            })
        })
        .collect();
    debug!(wallets = out.len(), "computed wallet features");
    out
}

fn action_slot(action: Action) -> usize {
    match action {
        Action::Deposit => 0,
        Action::Borrow => 1,
        Action::Repay => 2,
        Action::Redeem => 3,
        Action::Liquidation => 4,
    }
}

/// Mean and population standard deviation; `(0, 0)` for an empty slice and
/// a standard deviation of 0 for a single value.
fn mean_and_stddev(values: &[f64]) -> (f64, f64) {
    if values.is_empty() {
        return (0.0, 0.0);
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    if values.len() < 2 {
        return (mean, 0.0);
    }
    let var = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
    (mean, var.sqrt())
}

fn saturate(x: f64) -> f64 {
    if x.is_nan() {
        0.0
    } else {
        x.clamp(-f64::MAX, f64::MAX)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use lendscore_core::types::{TransactionRecord, FEATURE_NAMES};
    use proptest::prelude::*;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap()
    }

    fn rec(action: Action, amount: f64, at: DateTime<Utc>) -> TransactionRecord {
        TransactionRecord::new("w", action, amount, "usdc", at).unwrap()
    }

    fn features(records: Vec<TransactionRecord>) -> FeatureVector {
        compute_features(&WalletAggregate::new("w", records), &FeatureConfig::default())
    }

    // --- single-record wallets ---

    #[test]
    fn single_transaction_uses_sentinels() {
        let fv = features(vec![rec(Action::Deposit, 100.0, t0())]);
        assert_eq!(fv.transaction_count, 1);
        assert_eq!(fv.days_active, 0);
        assert_eq!(fv.avg_tx_interval_seconds, 0.0);
        assert_eq!(fv.tx_interval_stddev_seconds, 0.0);
        assert_eq!(fv.repay_to_borrow_ratio, 0.0);
        assert_eq!(fv.tx_value_stddev, 0.0);
        assert_eq!(fv.total_tx_value, 100.0);
        assert_eq!(fv.avg_tx_value, 100.0);
        assert_eq!(fv.deposit_ratio, 1.0);
        assert!(fv.validate("w").is_ok());
    }

    #[test]
    fn empty_aggregate_is_all_zero() {
        let fv = features(vec![]);
        assert_eq!(fv, FeatureVector::default());
    }

    // --- ratios ---

    #[test]
    fn repay_to_borrow_example() {
        let fv = features(vec![
            rec(Action::Deposit, 1000.0, t0()),
            rec(Action::Borrow, 500.0, t0() + Duration::days(2)),
            rec(Action::Repay, 450.0, t0() + Duration::days(9)),
        ]);
        assert_eq!(fv.transaction_count, 3);
        assert!((fv.repay_to_borrow_ratio - 0.9).abs() < 1e-12);
        assert_eq!(fv.liquidation_count, 0);
        assert_eq!(fv.days_active, 9);
        assert_eq!(fv.total_tx_value, 1950.0);
        assert_eq!(fv.avg_tx_value, 650.0);
    }

    #[test]
    fn repay_without_borrow_is_zero_ratio() {
        let fv = features(vec![
            rec(Action::Repay, 10.0, t0()),
            rec(Action::Repay, 10.0, t0() + Duration::hours(1)),
        ]);
        assert_eq!(fv.repay_to_borrow_ratio, 0.0);
    }

    #[test]
    fn action_shares_sum_to_one() {
        let fv = features(vec![
            rec(Action::Deposit, 1.0, t0()),
            rec(Action::Borrow, 1.0, t0() + Duration::hours(1)),
            rec(Action::Repay, 1.0, t0() + Duration::hours(2)),
            rec(Action::Redeem, 1.0, t0() + Duration::hours(3)),
            rec(Action::Liquidation, 1.0, t0() + Duration::hours(4)),
        ]);
        let liquidation_share = fv.liquidation_count as f64 / fv.transaction_count as f64;
        let total = fv.deposit_ratio
            + fv.borrow_ratio
            + fv.repay_ratio
            + fv.redeem_ratio
            + liquidation_share;
        assert!((total - 1.0).abs() < 1e-12);
        assert_eq!(fv.liquidation_count, 1);
    }

    // --- time features ---

    #[test]
    fn interval_mean_and_population_stddev() {
        // gaps: 60s, 180s -> mean 120, population stddev 60
        let fv = features(vec![
            rec(Action::Deposit, 1.0, t0()),
            rec(Action::Deposit, 1.0, t0() + Duration::seconds(60)),
            rec(Action::Deposit, 1.0, t0() + Duration::seconds(240)),
        ]);
        assert_eq!(fv.avg_tx_interval_seconds, 120.0);
        assert_eq!(fv.tx_interval_stddev_seconds, 60.0);
    }

    #[test]
    fn days_active_truncates_to_whole_days() {
        let fv = features(vec![
            rec(Action::Deposit, 1.0, t0()),
            rec(Action::Deposit, 1.0, t0() + Duration::hours(47)),
        ]);
        assert_eq!(fv.days_active, 1);
    }

    #[test]
    fn night_window_wraps_midnight() {
        let w = NightWindow::default();
        assert!(w.contains(23));
        assert!(w.contains(0));
        assert!(w.contains(5));
        assert!(!w.contains(6));
        assert!(!w.contains(22));
        let day = NightWindow {
            start_hour: 0,
            end_hour: 6,
        };
        assert!(day.contains(0));
        assert!(!day.contains(23));
    }

    #[test]
    fn night_and_workhour_ratios() {
        let midnight = Utc.with_ymd_and_hms(2024, 3, 1, 0, 30, 0).unwrap();
        let noon = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
        let evening = Utc.with_ymd_and_hms(2024, 3, 1, 20, 0, 0).unwrap();
        let fv = features(vec![
            rec(Action::Deposit, 1.0, midnight),
            rec(Action::Deposit, 1.0, noon),
            rec(Action::Deposit, 1.0, evening),
            rec(Action::Deposit, 1.0, evening + Duration::minutes(5)),
        ]);
        assert_eq!(fv.night_tx_ratio, 0.25);
        assert_eq!(fv.workhour_tx_ratio, 0.25);
    }

    #[test]
    fn wallet_offset_shifts_hour_bucketing() {
        // 12:00 UTC is 01:00 at UTC+13.
        let mut cfg = FeatureConfig::default();
        cfg.wallet_utc_offsets.insert("w".into(), 13 * 3600);
        let agg = WalletAggregate::new("w", vec![rec(Action::Deposit, 1.0, t0())]);
        assert_eq!(compute_features(&agg, &cfg).night_tx_ratio, 1.0);
        assert_eq!(
            compute_features(&agg, &FeatureConfig::default()).night_tx_ratio,
            0.0
        );
    }

    #[test]
    fn bot_likelihood_needs_many_fast_gaps() {
        let fast: Vec<TransactionRecord> = (0..12)
            .map(|i| rec(Action::Deposit, 1.0, t0() + Duration::seconds(i * 10)))
            .collect();
        assert_eq!(features(fast).bot_likelihood, 1.0);

        let few: Vec<TransactionRecord> = (0..5)
            .map(|i| rec(Action::Deposit, 1.0, t0() + Duration::seconds(i * 10)))
            .collect();
        assert_eq!(features(few).bot_likelihood, 0.0);
    }

    #[test]
    fn unique_assets_counted() {
        let fv = features(vec![
            TransactionRecord::new("w", Action::Deposit, 1.0, "usdc", t0()).unwrap(),
            TransactionRecord::new("w", Action::Deposit, 1.0, "USDC", t0()).unwrap(),
            TransactionRecord::new("w", Action::Deposit, 1.0, "weth", t0()).unwrap(),
        ]);
        assert_eq!(fv.unique_assets, 2);
    }

    #[test]
    fn huge_amounts_saturate_instead_of_overflowing() {
        let fv = features(vec![
            rec(Action::Borrow, f64::MAX, t0()),
            rec(Action::Borrow, f64::MAX, t0() + Duration::seconds(1)),
        ]);
        assert_eq!(fv.total_tx_value, f64::MAX);
        assert!(fv.validate("w").is_ok());
    }

    // --- compute_all ---

    #[test]
    fn compute_all_preserves_order() {
        let aggs: Vec<WalletAggregate> = (0..50)
            .map(|i| {
                let id = format!("w{i}");
                let recs = (0..=i)
                    .map(|k| {
                        TransactionRecord::new(
                            id.as_str(),
                            Action::Deposit,
                            1.0,
                            "usdc",
                            t0() + Duration::minutes(k),
                        )
                        .unwrap()
                    })
                    .collect();
                WalletAggregate::new(id, recs)
            })
            .collect();
        let out = compute_all(aggs, &FeatureConfig::default());
        assert_eq!(out.len(), 50);
        for (i, r) in out.into_iter().enumerate() {
            let wf = r.unwrap();
            assert_eq!(wf.wallet_id, format!("w{i}"));
            assert_eq!(wf.features.transaction_count, i as u64 + 1);
        }
    }

    // --- proptest ---

    fn arb_record() -> impl Strategy<Value = TransactionRecord> {
        (0usize..5, 0.0f64..f64::MAX, 0i64..4_000_000_000i64).prop_map(|(a, amount, secs)| {
            TransactionRecord::new(
                "w",
                Action::ALL[a],
                amount,
                "asset",
                Utc.timestamp_opt(secs, 0).unwrap(),
            )
            .unwrap()
        })
    }

    proptest! {
        #[test]
        fn features_always_finite(records in prop::collection::vec(arb_record(), 1..40)) {
            let fv = features(records);
            for (name, v) in FEATURE_NAMES.iter().zip(fv.to_array()) {
                prop_assert!(v.is_finite(), "{} not finite: {}", name, v);
            }
        }

        #[test]
        fn single_record_never_has_spread(record in arb_record()) {
            let fv = features(vec![record]);
            prop_assert_eq!(fv.days_active, 0);
            prop_assert_eq!(fv.avg_tx_interval_seconds, 0.0);
            prop_assert_eq!(fv.tx_interval_stddev_seconds, 0.0);
        }

        #[test]
        fn ratios_stay_in_unit_interval(records in prop::collection::vec(arb_record(), 1..40)) {
            let fv = features(records);
            for r in [fv.night_tx_ratio, fv.workhour_tx_ratio, fv.deposit_ratio,
                      fv.borrow_ratio, fv.repay_ratio, fv.redeem_ratio] {
                prop_assert!((0.0..=1.0).contains(&r));
            }
        }
    }
}
