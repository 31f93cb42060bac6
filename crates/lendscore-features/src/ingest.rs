//! Ledger ingest: record validation, unit normalization and wallet grouping.
//!
//! Two input shapes are accepted:
//! - flat: `{wallet_id, action, amount, asset, timestamp}`
//! - protocol export: `{userWallet, action, timestamp, actionData: {amount, assetSymbol}}`
//!
//! `amount` may be a JSON number or a decimal string, `timestamp` an RFC 3339
//! string or Unix seconds. A record that fails validation is excluded and
//! counted; only an empty or unparseable input aborts.

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};

use lendscore_core::error::{IngestError, ValidationError};
use lendscore_core::types::{Action, TransactionRecord, WalletAggregate};

/// Nested payload of the protocol export format.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct RawActionData {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub amount: Option<Value>,
    #[serde(default, alias = "assetSymbol", skip_serializing_if = "Option::is_none")]
    pub asset_symbol: Option<Value>,
}

/// An unvalidated ledger entry, as read from the external source.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct RawRecord {
    #[serde(default, alias = "userWallet", alias = "user", skip_serializing_if = "Option::is_none")]
    pub wallet_id: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub amount: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub asset: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<Value>,
    #[serde(default, alias = "actionData", skip_serializing_if = "Option::is_none")]
    pub action_data: Option<RawActionData>,
    /// Set when the source entry could not be read as a record at all.
    #[serde(skip)]
    malformed: Option<String>,
}

impl RawRecord {
    /// Flat-schema entry with an RFC 3339 timestamp.
    pub fn flat(wallet_id: &str, action: &str, amount: f64, asset: &str, timestamp: &str) -> Self {
        Self {
            wallet_id: Some(Value::from(wallet_id)),
            action: Some(Value::from(action)),
            amount: Some(Value::from(amount)),
            asset: Some(Value::from(asset)),
            timestamp: Some(Value::from(timestamp)),
            ..Self::default()
        }
    }

    /// Entry that could not be decoded; it is rejected during ingest.
    pub fn malformed(reason: impl Into<String>) -> Self {
        Self {
            malformed: Some(reason.into()),
            ..Self::default()
        }
    }

    /// Validate and normalize into a [`TransactionRecord`].
    pub fn validate(&self, cfg: &IngestConfig) -> Result<TransactionRecord, ValidationError> {
        if let Some(reason) = &self.malformed {
            return Err(ValidationError::Malformed(reason.clone()));
        }

        let wallet_id = self
            .wallet_id
            .as_ref()
            .and_then(value_text)
            .ok_or(ValidationError::MissingWallet)?;

        let action: Action = match self.action.as_ref() {
            None | Some(Value::Null) => return Err(ValidationError::MissingAction),
            Some(Value::String(s)) => s.parse()?,
            Some(other) => return Err(ValidationError::UnknownAction(other.to_string())),
        };

        let nested = self.action_data.as_ref();
        let amount_value = self
            .amount
            .as_ref()
            .filter(|v| !v.is_null())
            .or_else(|| nested.and_then(|d| d.amount.as_ref()).filter(|v| !v.is_null()))
            .ok_or(ValidationError::MissingAmount)?;
        let amount = parse_amount(amount_value)?;

        let asset = self
            .asset
            .as_ref()
            .and_then(value_text)
            .or_else(|| nested.and_then(|d| d.asset_symbol.as_ref()).and_then(value_text))
            .ok_or(ValidationError::MissingAsset)?;

        let timestamp = match self.timestamp.as_ref() {
            None | Some(Value::Null) => return Err(ValidationError::MissingTimestamp),
            Some(v) => parse_timestamp(v)?,
        };

        let amount = cfg.normalize(&asset, amount);
        TransactionRecord::new(wallet_id, action, amount, asset, timestamp)
    }
}

/// Ingest settings.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(default)]
pub struct IngestConfig {
    /// Decimal places per (lower-cased) asset. Amounts of listed assets are
    /// divided by `10^decimals`; other assets pass through unchanged.
    pub asset_decimals: BTreeMap<String, u32>,
}

impl IngestConfig {
    fn normalize(&self, asset: &str, amount: f64) -> f64 {
        match self.asset_decimals.get(&asset.to_ascii_lowercase()) {
            Some(&decimals) => amount / 10f64.powi(i32::try_from(decimals).unwrap_or(i32::MAX)),
            None => amount,
        }
    }
}

/// Result of a single ingest pass.
#[derive(Debug, Clone, PartialEq)]
pub struct IngestReport {
    /// One aggregate per wallet, in first-seen order.
    pub wallets: Vec<WalletAggregate>,
    pub accepted: usize,
    pub rejected: usize,
    /// Rejection count per [`ValidationError::kind`].
    pub rejections: BTreeMap<&'static str, usize>,
}

/// Validate every raw entry and group the accepted ones by wallet.
///
/// Returns [`IngestError::EmptyInput`] when `raw` is empty or nothing
/// survives validation. The input is not modified.
pub fn ingest(raw: &[RawRecord], cfg: &IngestConfig) -> Result<IngestReport, IngestError> {
    if raw.is_empty() {
        return Err(IngestError::EmptyInput { rejected: 0 });
    }

    let mut order: Vec<String> = Vec::new();
    let mut groups: HashMap<String, Vec<TransactionRecord>> = HashMap::new();
    let mut rejections: BTreeMap<&'static str, usize> = BTreeMap::new();
    let mut rejected = 0usize;

    for (index, entry) in raw.iter().enumerate() {
        match entry.validate(cfg) {
            Ok(record) => {
                let bucket = groups.entry(record.wallet_id.clone()).or_insert_with(|| {
                    order.push(record.wallet_id.clone());
                    Vec::new()
                });
                bucket.push(record);
            }
            Err(e) => {
                debug!(index, reason = %e, "rejected ledger record");
                rejected += 1;
                *rejections.entry(e.kind()).or_insert(0) += 1;
            }
        }
    }

    let accepted = raw.len() - rejected;
    if accepted == 0 {
        return Err(IngestError::EmptyInput { rejected });
    }
    if rejected > 0 {
        warn!(rejected, ?rejections, "some ledger records were rejected");
    }

    let wallets: Vec<WalletAggregate> = order
        .into_iter()
        .map(|wallet| {
            let records = groups.remove(&wallet).unwrap_or_default();
            WalletAggregate::new(wallet, records)
        })
        .collect();

    info!(accepted, rejected, wallets = wallets.len(), "ingested ledger");

    Ok(IngestReport {
        wallets,
        accepted,
        rejected,
        rejections,
    })
}

/// Decode a JSON ledger (a top-level array of entries).
///
/// Entries that are not records become [`RawRecord::malformed`] so they are
/// counted as rejections rather than aborting the run.
pub fn parse_ledger(bytes: &[u8]) -> Result<Vec<RawRecord>, IngestError> {
    let doc: Value =
        serde_json::from_slice(bytes).map_err(|e| IngestError::Unparseable(e.to_string()))?;
    let Value::Array(entries) = doc else {
        return Err(IngestError::Unparseable("expected a JSON array of records".into()));
    };

    Ok(entries
        .into_iter()
        .enumerate()
        .map(|(index, entry)| {
            serde_json::from_value::<RawRecord>(entry).unwrap_or_else(|e| {
                debug!(index, error = %e, "malformed ledger entry");
                RawRecord::malformed(e.to_string())
            })
        })
        .collect())
}

fn value_text(v: &Value) -> Option<String> {
    let text = match v {
        Value::String(s) => s.trim().to_string(),
        Value::Number(n) => n.to_string(),
        _ => return None,
    };
    (!text.is_empty()).then_some(text)
}

fn parse_amount(v: &Value) -> Result<f64, ValidationError> {
    let amount = match v {
        Value::Number(n) => n
            .as_f64()
            .ok_or_else(|| ValidationError::InvalidAmount(n.to_string()))?,
        Value::String(s) => s
            .trim()
            .parse::<f64>()
            .map_err(|_| ValidationError::InvalidAmount(s.clone()))?,
        other => return Err(ValidationError::InvalidAmount(other.to_string())),
    };
    if !amount.is_finite() {
        return Err(ValidationError::InvalidAmount(v.to_string()));
    }
    if amount < 0.0 {
        return Err(ValidationError::NegativeAmount(v.to_string()));
    }
    Ok(amount)
}

fn parse_timestamp(v: &Value) -> Result<DateTime<Utc>, ValidationError> {
    let invalid = || ValidationError::InvalidTimestamp(v.to_string());
    match v {
        Value::Number(n) => {
            if let Some(secs) = n.as_i64() {
                Utc.timestamp_opt(secs, 0).single().ok_or_else(invalid)
            } else {
                let secs = n.as_f64().filter(|s| s.is_finite()).ok_or_else(invalid)?;
                let millis = (secs * 1000.0).round();
                if millis.abs() > i64::MAX as f64 {
                    return Err(invalid());
                }
                Utc.timestamp_millis_opt(millis as i64)
                    .single()
                    .ok_or_else(invalid)
            }
        }
        Value::String(s) => {
            let s = s.trim();
            if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
                return Ok(dt.with_timezone(&Utc));
            }
            let secs: i64 = s.parse().map_err(|_| invalid())?;
            Utc.timestamp_opt(secs, 0).single().ok_or_else(invalid)
        }
        _ => Err(invalid()),
    }
}
