//! Criterion benchmarks for lendscore-model.
//!
//! Covers: scaler fit and apply, booster training, single and batch
//! prediction.

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use lendscore_core::traits::{FeatureScaler, RawScorer};
use lendscore_core::types::FeatureVector;
use lendscore_model::{
    proxy_targets, GradientBoostedModel, ModelConfig, ProxyWeights, RobustScaler, TrainParams,
};

fn population(n: usize) -> Vec<FeatureVector> {
    let mut rng = StdRng::seed_from_u64(42);
    (0..n)
        .map(|_| FeatureVector {
            transaction_count: rng.gen_range(1..200),
            repay_to_borrow_ratio: rng.gen_range(0.0..1.5),
            liquidation_count: rng.gen_range(0..3),
            days_active: rng.gen_range(0..365),
            avg_tx_interval_seconds: rng.gen_range(0.0..500_000.0),
            tx_interval_stddev_seconds: rng.gen_range(0.0..200_000.0),
            night_tx_ratio: rng.gen_range(0.0..1.0),
            total_tx_value: rng.gen_range(0.0..1e7),
            avg_tx_value: rng.gen_range(0.0..1e5),
            deposit_ratio: rng.gen_range(0.0..0.5),
            borrow_ratio: rng.gen_range(0.0..0.3),
            repay_ratio: rng.gen_range(0.0..0.2),
            ..FeatureVector::default()
        })
        .collect()
}

fn bench_scaler(c: &mut Criterion) {
    let rows = population(2_000);
    let scaler = RobustScaler::default();
    c.bench_function("scaler_fit_2k", |b| b.iter(|| scaler.fit(black_box(&rows)).unwrap()));

    let state = scaler.fit(&rows).unwrap();
    c.bench_function("scaler_apply", |b| b.iter(|| state.apply(black_box(&rows[0]))));
}

fn bench_train(c: &mut Criterion) {
    let rows = population(1_000);
    let scaled = RobustScaler::default().fit(&rows).unwrap().apply_all(&rows);
    let targets = proxy_targets(&rows, &ProxyWeights::default());
    let params = TrainParams {
        rounds: 50,
        ..TrainParams::default()
    };

    let mut group = c.benchmark_group("train");
    group.sample_size(10);
    group.bench_function("gbdt_1k_rows_50_rounds", |b| {
        b.iter(|| GradientBoostedModel::train(black_box(&scaled), &targets, &params).unwrap())
    });
    group.finish();
}

fn bench_predict(c: &mut Criterion) {
    let rows = population(2_000);
    let scaled = RobustScaler::default().fit(&rows).unwrap().apply_all(&rows);
    let targets = proxy_targets(&rows, &ProxyWeights::default());
    let cfg = ModelConfig::default();
    let model = GradientBoostedModel::train(&scaled, &targets, &cfg.train).unwrap();

    c.bench_function("predict_single", |b| b.iter(|| model.predict(black_box(&scaled[0]))));
    c.bench_function("predict_contributions_single", |b| {
        b.iter(|| model.predict_with_contributions(black_box(&scaled[0])))
    });
    c.bench_function("predict_all_2k", |b| b.iter(|| model.predict_all(black_box(&scaled))));
}

criterion_group!(benches, bench_scaler, bench_train, bench_predict);
criterion_main!(benches);
