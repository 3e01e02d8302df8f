//! Core sail-record library for the fleet website tools: purchase heatmaps,
//! class-rule analyses and regatta sail declarations.

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value as JsonValue;
use thiserror::Error;

pub mod analysis;
pub mod config;
pub mod declaration;
pub mod heatmap;
pub mod records;
pub mod storage;

pub use analysis::{check_sail_limits, sailmaker_trends, LimitViolation, ViolationKind};
pub use config::{Config, SailTypeCodes};
pub use declaration::{
    render_summary, DeclarationRecord, DeclarationSession, HullOutcome, SailKind, Slot,
    SlotAssignments, TextField,
};
pub use heatmap::{
    aggregate, blues, build_heatmap, hull_stats, AggregationCell, AggregationKey, HeatmapGrid,
    HullStats,
};
pub use records::RecordStore;
#[cfg(not(target_arch = "wasm32"))]
pub use storage::FileStore;
pub use storage::{DeclarationStore, KeyValueStore, MemoryStore};

#[derive(Error, Debug)]
pub enum SailError {
    #[error("failed to fetch sail data: {0}")]
    Fetch(String),
    #[error("invalid sail data: {0}")]
    InvalidData(String),
    #[error("{}", .0.join("\n"))]
    Validation(Vec<String>),
    #[error("certificate {certificate} is not available for slot {slot}")]
    InvalidSelection { slot: Slot, certificate: String },
    #[error("storage error: {0}")]
    Storage(String),
    #[error("saved declaration is not valid JSON: {0}")]
    CorruptDeclaration(String),
}

impl SailError {
    /// Single-rule validation failure.
    pub fn validation(message: impl Into<String>) -> Self {
        SailError::Validation(vec![message.into()])
    }
}

/// One sail certificate as published in the class sail-tag registry.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct SailRecord {
    #[serde(rename = "Hull", default, deserialize_with = "lenient_string")]
    pub hull: String,
    #[serde(rename = "Sail Type", default, deserialize_with = "lenient_string")]
    pub sail_type: String,
    #[serde(rename = "Sailmaker", default, deserialize_with = "lenient_string")]
    pub sailmaker: String,
    #[serde(rename = "Certificate No.", default, deserialize_with = "lenient_string")]
    pub certificate_no: String,
    #[serde(
        rename = "Delivery Date",
        default,
        deserialize_with = "lenient_opt_string",
        skip_serializing_if = "Option::is_none"
    )]
    pub delivery_date: Option<String>,
    #[serde(rename = "Purchaser", default, deserialize_with = "lenient_string")]
    pub purchaser: String,
    #[serde(
        rename = "Notes",
        default,
        deserialize_with = "lenient_opt_string",
        skip_serializing_if = "Option::is_none"
    )]
    pub notes: Option<String>,
}

impl SailRecord {
    /// Parsed delivery date; `None` when missing or unparseable.
    pub fn delivered_on(&self) -> Option<NaiveDate> {
        self.delivery_date.as_deref().and_then(parse_delivery_date)
    }

    pub fn delivery_year(&self) -> Option<i32> {
        use chrono::Datelike;
        self.delivered_on().map(|d| d.year())
    }
}

fn lenient_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(lenient_opt_string(deserializer)?.unwrap_or_default())
}

// The registry export is hand-maintained; hulls and certificates show up as
// bare numbers often enough that strict string fields reject whole files.
fn lenient_opt_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = JsonValue::deserialize(deserializer)?;
    Ok(match value {
        JsonValue::Null => None,
        JsonValue::String(s) => Some(s),
        JsonValue::Number(n) => Some(n.to_string()),
        JsonValue::Bool(b) => Some(b.to_string()),
        other => {
            return Err(D::Error::custom(format!(
                "expected a string, number or bool, got {other}"
            )))
        }
    })
}

/// Parse a registry delivery date.
///
/// Accepts ISO dates, RFC 3339 timestamps, naive ISO date-times and US-style
/// `MM/DD/YYYY`. Returns `None` for empty or unrecognised text.
pub fn parse_delivery_date(text: &str) -> Option<NaiveDate> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return None;
    }
    if let Ok(date) = NaiveDate::parse_from_str(trimmed, "%Y-%m-%d") {
        return Some(date);
    }
    if let Ok(ts) = DateTime::parse_from_rfc3339(trimmed) {
        return Some(ts.naive_local().date());
    }
    for fmt in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(ts) = NaiveDateTime::parse_from_str(trimmed, fmt) {
            return Some(ts.date());
        }
    }
    NaiveDate::parse_from_str(trimmed, "%m/%d/%Y").ok()
}

/// Parse the registry JSON feed. The top level must be an array of records.
pub fn parse_records(input: &[u8]) -> Result<Vec<SailRecord>, SailError> {
    let value: JsonValue =
        serde_json::from_slice(input).map_err(|e| SailError::InvalidData(e.to_string()))?;
    if !value.is_array() {
        return Err(SailError::InvalidData(
            "expected an array of sail records".to_string(),
        ));
    }
    serde_json::from_value(value).map_err(|e| SailError::InvalidData(e.to_string()))
}
