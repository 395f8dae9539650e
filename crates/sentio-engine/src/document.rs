//! Sentio Document - Wire Formats
//!
//! JSON shapes crossing the ingestion and query boundaries, plus the
//! value-coercion rules for untyped readings. Timestamps on the wire use
//! microsecond-precision ISO 8601 without a zone suffix and are treated
//! as UTC.
//!
//! Key Features:
//! - Ingest document: one provider batch with per-reading type hints
//! - Reading coercion: bool -> Discrete, number -> Numeric, numeric
//!   string -> Numeric, anything else -> Text
//! - Query request with range/depth selection, limit and trend options
//! - Query response mirroring the stored row plus analyzer output
//!
//! @version 0.1.0
//! @author Sentio Development Team

use crate::limits::LimitReport;
use crate::trends::TrendInfo;
use chrono::{DateTime, NaiveDateTime, Utc};
use sentio_common::{Result, SentioError, TagKind, TagValue};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use uuid::Uuid;

/// Wire timestamp layout, e.g. `2026-08-30T12:00:00.000000`.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.f";

/// Parse a wire timestamp as UTC.
pub fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>> {
    let naive = NaiveDateTime::parse_from_str(raw, TIMESTAMP_FORMAT)
        .map_err(|e| SentioError::Validation(format!("bad timestamp '{}': {}", raw, e)))?;
    Ok(naive.and_utc())
}

/// Serde adapter emitting the wire timestamp layout.
pub mod wire_time {
    use super::*;
    use serde::Serializer;

    pub fn serialize<S: Serializer>(dt: &DateTime<Utc>, s: S) -> std::result::Result<S::Ok, S::Error> {
        s.serialize_str(&dt.format(TIMESTAMP_FORMAT).to_string())
    }
}

// =============================================================================
// Ingest Document
// =============================================================================

/// One observation inside an ingest document.
#[derive(Debug, Clone, Deserialize)]
pub struct IngestReading {
    pub name: String,
    pub measured_parameter: String,
    #[serde(rename = "type", default)]
    pub kind: Option<TagKind>,
    #[serde(default)]
    pub reading: JsonValue,
    #[serde(default)]
    pub units: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
}

impl IngestReading {
    /// Tag name within the document's data source.
    pub fn tag_name(&self) -> String {
        format!("{}.{}", self.name, self.measured_parameter)
    }

    /// Coerce the raw reading into a typed value.
    ///
    /// A null reading is allowed only when an error accompanies it; the
    /// stored value then falls back to the kind's neutral value, using the
    /// declared type hint or `fallback` (an already-known tag kind) to pick
    /// it.
    pub fn value(&self, fallback: Option<TagKind>) -> Result<TagValue> {
        if let Some(value) = Self::coerce(&self.reading, self.kind) {
            return Ok(value);
        }
        if self.error.is_some() {
            let kind = self.kind.or(fallback).unwrap_or(TagKind::Text);
            return Ok(match kind {
                TagKind::Numeric => TagValue::Numeric(0.0),
                TagKind::Discrete => TagValue::Discrete(false),
                TagKind::Text => TagValue::Text(String::new()),
            });
        }
        Err(SentioError::Validation(format!(
            "unreadable value for '{}'",
            self.tag_name()
        )))
    }

    fn coerce(raw: &JsonValue, hint: Option<TagKind>) -> Option<TagValue> {
        match hint {
            Some(TagKind::Numeric) => match raw {
                JsonValue::Number(n) => n.as_f64().map(TagValue::Numeric),
                JsonValue::String(s) => s.trim().parse().ok().map(TagValue::Numeric),
                _ => None,
            },
            Some(TagKind::Discrete) => match raw {
                JsonValue::Bool(b) => Some(TagValue::Discrete(*b)),
                JsonValue::Number(n) => match n.as_i64() {
                    Some(0) => Some(TagValue::Discrete(false)),
                    Some(1) => Some(TagValue::Discrete(true)),
                    _ => None,
                },
                _ => None,
            },
            Some(TagKind::Text) => match raw {
                JsonValue::String(s) => Some(TagValue::Text(s.clone())),
                JsonValue::Null => None,
                other => Some(TagValue::Text(other.to_string())),
            },
            None => match raw {
                JsonValue::Bool(b) => Some(TagValue::Discrete(*b)),
                JsonValue::Number(n) => n.as_f64().map(TagValue::Numeric),
                JsonValue::String(s) => Some(
                    s.trim()
                        .parse()
                        .map(TagValue::Numeric)
                        .unwrap_or_else(|_| TagValue::Text(s.clone())),
                ),
                _ => None,
            },
        }
    }
}

/// One provider batch delivered to the ingestion boundary.
#[derive(Debug, Clone, Deserialize)]
pub struct IngestDocument {
    pub name: String,
    pub start_time: String,
    pub end_time: String,
    #[serde(default)]
    pub reading: Vec<IngestReading>,
}

impl IngestDocument {
    pub fn from_json(raw: &str) -> Result<Self> {
        serde_json::from_str(raw)
            .map_err(|e| SentioError::Validation(format!("malformed ingest document: {}", e)))
    }

    /// Acquisition window. `end_time` is the per-reading obtain timestamp.
    pub fn window(&self) -> Result<(DateTime<Utc>, DateTime<Utc>)> {
        Ok((
            parse_timestamp(&self.start_time)?,
            parse_timestamp(&self.end_time)?,
        ))
    }

    /// Acquisition duration in seconds.
    pub fn time_to_obtain(&self) -> Result<f64> {
        let (start, end) = self.window()?;
        Ok((end - start).num_microseconds().unwrap_or(0) as f64 / 1e6)
    }
}

// =============================================================================
// Query Request
// =============================================================================

/// Addresses one tag by data source and name.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TagSelector {
    pub datasource_id: Uuid,
    pub name: String,
}

/// How much limit output to attach to each reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LimitLevel {
    None,
    Basic,
    Detailed,
}

/// Caller-facing query parameters. Either `dataset` or `tags` selects the
/// tag collection; `date_start`/`date_end` switch to range mode.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct QueryRequest {
    #[serde(default)]
    pub dataset: Option<Uuid>,
    #[serde(default)]
    pub tags: Vec<TagSelector>,
    #[serde(default)]
    pub date_start: Option<String>,
    #[serde(default)]
    pub date_end: Option<String>,
    #[serde(default, alias = "depth")]
    pub number: Option<usize>,
    #[serde(default = "default_true")]
    pub only_valid: bool,
    /// Display rounding decimals; falls back to the configured default
    /// when omitted.
    #[serde(default)]
    pub round_numerics: Option<u32>,
    #[serde(default = "default_limits")]
    pub get_limits: u8,
    #[serde(default)]
    pub get_trends: Vec<u64>,
    #[serde(default)]
    pub diag_info: bool,
    #[serde(default = "default_true")]
    pub bound_earlier: bool,
    #[serde(default)]
    pub bound_later: bool,
}

fn default_true() -> bool {
    true
}

fn default_limits() -> u8 {
    1
}

impl QueryRequest {
    /// Query a whole dataset with defaults.
    pub fn for_dataset(dataset: Uuid) -> Self {
        Self {
            dataset: Some(dataset),
            only_valid: true,
            get_limits: default_limits(),
            bound_earlier: true,
            ..Default::default()
        }
    }

    /// Query an explicit tag list with defaults.
    pub fn for_tags(tags: Vec<TagSelector>) -> Self {
        Self {
            tags,
            only_valid: true,
            get_limits: default_limits(),
            bound_earlier: true,
            ..Default::default()
        }
    }

    pub fn limit_level(&self) -> LimitLevel {
        match self.get_limits {
            0 => LimitLevel::None,
            1 => LimitLevel::Basic,
            _ => LimitLevel::Detailed,
        }
    }

    /// Parsed range bounds, when range mode is requested.
    pub fn range_bounds(&self) -> Result<Option<(DateTime<Utc>, DateTime<Utc>)>> {
        match (&self.date_start, &self.date_end) {
            (Some(start), Some(end)) => Ok(Some((parse_timestamp(start)?, parse_timestamp(end)?))),
            (None, None) => Ok(None),
            _ => Err(SentioError::Validation(
                "date_start and date_end must be given together".into(),
            )),
        }
    }
}

// =============================================================================
// Query Response
// =============================================================================

/// Error payload attached to a reading.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadingError {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// One reading in a query response. `timestamp_packet` is the moment the
/// provider obtained the value; `timestamp_receive` is the moment the
/// engine stored or last collapsed it.
#[derive(Debug, Clone, Serialize)]
pub struct ReadingEntry {
    pub reading: TagValue,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ReadingError>,
    #[serde(with = "wire_time")]
    pub timestamp_receive: DateTime<Utc>,
    #[serde(with = "wire_time")]
    pub timestamp_packet: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time_to_obtain: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trends: Option<Vec<TrendInfo>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limits: Option<LimitReport>,
}

/// Per-tag section of a query response.
#[derive(Debug, Clone, Default, Serialize)]
pub struct TagResult {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub units: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub readings: Vec<ReadingEntry>,
    /// Aggregate trend over the whole returned set, present only when the
    /// response holds more than one reading for this tag.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trend: Option<TrendInfo>,
}

impl TagResult {
    /// Entry for a tag that could not be resolved.
    pub fn unresolved(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            error: Some("Tag not found".into()),
            ..Default::default()
        }
    }
}

/// Top-level query response.
#[derive(Debug, Clone, Default, Serialize)]
pub struct QueryResponse {
    pub tags: Vec<TagResult>,
    pub tag_count: usize,
    /// Wall time spent serving the request, in seconds.
    pub time_to_obtain: f64,
}

// =============================================================================
// Tests
// =============================================================================
