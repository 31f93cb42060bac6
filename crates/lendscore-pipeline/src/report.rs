//! Output sinks: the CSV score report, the JSON explain report and the
//! logged distribution summary.

use std::collections::BTreeMap;
use std::io::{self, Write};

use serde::Serialize;
use tracing::info;

use lendscore_core::types::{CreditScore, ScoreBand};

/// Wallets listed at each end of the summary ranking.
pub const SUMMARY_RANK_LEN: usize = 5;

/// Write `wallet_id,credit_score` rows in the given order, with a header.
pub fn write_csv<W: Write>(mut out: W, scores: &[CreditScore]) -> io::Result<()> {
    writeln!(out, "wallet_id,credit_score")?;
    for s in scores {
        writeln!(out, "{},{}", csv_field(&s.wallet_id), s.score)?;
    }
    out.flush()
}

fn csv_field(value: &str) -> String {
    if value.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

/// Write the scores, bands and attributions as a pretty JSON array.
pub fn write_explain_json<W: Write>(mut out: W, scores: &[CreditScore]) -> io::Result<()> {
    serde_json::to_writer_pretty(&mut out, scores).map_err(io::Error::other)?;
    writeln!(out)?;
    out.flush()
}

/// Distribution of one run's scores.
#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct ScoreSummary {
    pub count: usize,
    pub mean: f64,
    /// Sample standard deviation; 0 for a single score.
    pub std: f64,
    pub min: u16,
    pub p25: f64,
    pub median: f64,
    pub p75: f64,
    pub max: u16,
    /// Highest scores, best first. Ties keep report order.
    pub top: Vec<(String, u16)>,
    /// Lowest scores, worst first. Ties keep report order.
    pub bottom: Vec<(String, u16)>,
    pub bands: BTreeMap<ScoreBand, usize>,
}

impl ScoreSummary {
    /// `None` for an empty run.
    pub fn from_scores(scores: &[CreditScore]) -> Option<Self> {
        if scores.is_empty() {
            return None;
        }
        let count = scores.len();
        let mut values: Vec<u16> = scores.iter().map(|s| s.score).collect();
        values.sort_unstable();
        let as_f64: Vec<f64> = values.iter().map(|v| *v as f64).collect();
        let mean = as_f64.iter().sum::<f64>() / count as f64;
        let std = if count > 1 {
            (as_f64.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (count - 1) as f64).sqrt()
        } else {
            0.0
        };
        let q = |p: f64| lendscore_model::stats::quantile(&as_f64, p).unwrap_or(0.0);

        let mut ranked: Vec<&CreditScore> = scores.iter().collect();
        ranked.sort_by(|a, b| b.score.cmp(&a.score));
        let top = ranked
            .iter()
            .take(SUMMARY_RANK_LEN)
            .map(|s| (s.wallet_id.clone(), s.score))
            .collect();
        ranked.sort_by(|a, b| a.score.cmp(&b.score));
        let bottom = ranked
            .iter()
            .take(SUMMARY_RANK_LEN)
            .map(|s| (s.wallet_id.clone(), s.score))
            .collect();

        let mut bands: BTreeMap<ScoreBand, usize> =
            ScoreBand::ALL.iter().map(|b| (*b, 0)).collect();
        for s in scores {
            *bands.entry(s.band).or_default() += 1;
        }

        Some(Self {
            count,
            mean,
            std,
            min: values[0],
            p25: q(0.25),
            median: q(0.5),
            p75: q(0.75),
            max: values[count - 1],
            top,
            bottom,
            bands,
        })
    }

    /// Emit the summary through `tracing`.
    pub fn log(&self) {
        info!(
            count = self.count,
            mean = round1(self.mean),
            std = round1(self.std),
            min = self.min,
            p25 = self.p25,
            median = self.median,
            p75 = self.p75,
            max = self.max,
            "score distribution"
        );
        for (wallet, score) in &self.top {
            info!(%wallet, score, "top wallet");
        }
        for (wallet, score) in &self.bottom {
            info!(%wallet, score, "bottom wallet");
        }
        for band in ScoreBand::ALL {
            let n = self.bands.get(&band).copied().unwrap_or(0);
            info!(band = %band, wallets = n, "band count");
        }
    }
}

fn round1(x: f64) -> f64 {
    (x * 10.0).round() / 10.0
}
