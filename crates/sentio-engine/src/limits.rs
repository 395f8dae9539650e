//! Sentio Limits - Limit/Alert Engine
//!
//! Evaluates a reading against its tag's configured limit set. Boundaries
//! are themselves live tags, so thresholds can follow schedules: each
//! boundary resolves to that tag's latest value at or before the reading's
//! timestamp. A boundary whose tag has no data yet is simply omitted.
//!
//! Aggregate state precedence (first match wins): critical upper out ->
//! very_high, critical lower out -> very_low, strict out -> abnormal,
//! upper out -> high, lower out -> low, otherwise normal.
//!
//! @version 0.1.0
//! @author Sentio Development Team

use crate::registry::Registry;
use crate::store::ValueStore;
use chrono::{DateTime, Utc};
use sentio_common::{Result, TagId, TagValue};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

// =============================================================================
// Limit Set
// =============================================================================

/// Boundary tag references owned by exactly one tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct LimitSet {
    pub critical_upper: Option<TagId>,
    pub upper: Option<TagId>,
    pub lower: Option<TagId>,
    pub critical_lower: Option<TagId>,
    /// Strict-equality boundary: any deviation is out.
    pub strict: Option<TagId>,
}

impl LimitSet {
    pub fn upper_only(tag: TagId) -> Self {
        Self {
            upper: Some(tag),
            ..Default::default()
        }
    }

    /// Configured boundaries with their kinds.
    pub fn boundaries(&self) -> impl Iterator<Item = (BoundaryKind, TagId)> {
        [
            (BoundaryKind::CriticalUpper, self.critical_upper),
            (BoundaryKind::Upper, self.upper),
            (BoundaryKind::Lower, self.lower),
            (BoundaryKind::CriticalLower, self.critical_lower),
            (BoundaryKind::Strict, self.strict),
        ]
        .into_iter()
        .filter_map(|(kind, tag)| tag.map(|t| (kind, t)))
    }
}

/// The role a boundary tag plays within a limit set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BoundaryKind {
    CriticalUpper,
    Upper,
    Lower,
    CriticalLower,
    Strict,
}

impl BoundaryKind {
    /// Detail-report key, matching the wire format.
    pub fn key(&self) -> &'static str {
        match self {
            BoundaryKind::CriticalUpper => "upper_critical",
            BoundaryKind::Upper => "upper",
            BoundaryKind::Lower => "lower",
            BoundaryKind::CriticalLower => "lower_critical",
            BoundaryKind::Strict => "strict",
        }
    }

    pub fn is_strict(&self) -> bool {
        matches!(self, BoundaryKind::Strict)
    }
}

// =============================================================================
// Boundary Status
// =============================================================================

/// Per-boundary evaluation status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BoundaryStatus {
    In,
    Marginal,
    Out,
}

/// Detailed per-boundary report entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoundaryDetail {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reading: Option<TagValue>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<BoundaryStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

// =============================================================================
// Limit State
// =============================================================================

/// Aggregate alert severity of a reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LimitState {
    Normal,
    VeryHigh,
    VeryLow,
    Abnormal,
    High,
    Low,
}

/// Evaluation result for one reading.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LimitReport {
    pub state: LimitState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<BTreeMap<String, BoundaryDetail>>,
}

// =============================================================================
// Limit Engine
// =============================================================================

/// Evaluates readings against configured boundary tags.
pub struct LimitEngine {
    registry: Arc<Registry>,
    store: Arc<ValueStore>,
}

impl LimitEngine {
    pub fn new(registry: Arc<Registry>, store: Arc<ValueStore>) -> Self {
        Self { registry, store }
    }

    /// Evaluate a reading. Returns None when the tag has no limit set
    /// configured (not an error).
    pub fn evaluate(
        &self,
        tag: TagId,
        value: &TagValue,
        at: DateTime<Utc>,
        detail: bool,
    ) -> Result<Option<LimitReport>> {
        let Some(set) = self.registry.limit_set(tag) else {
            return Ok(None);
        };

        let mut details: BTreeMap<String, BoundaryDetail> = BTreeMap::new();
        let mut statuses: BTreeMap<&'static str, BoundaryStatus> = BTreeMap::new();

        for (kind, boundary_tag) in set.boundaries() {
            // A boundary whose tag has no data yet is omitted entirely.
            let Some(boundary) = self.store.latest_at(boundary_tag, at, true) else {
                continue;
            };
            let entry = Self::compare(kind, value, &boundary.value);
            if let Some(status) = entry.status {
                statuses.insert(kind.key(), status);
            }
            details.insert(kind.key().to_string(), entry);
        }

        let out = |key: &str| statuses.get(key) == Some(&BoundaryStatus::Out);
        let state = if out("upper_critical") {
            LimitState::VeryHigh
        } else if out("lower_critical") {
            LimitState::VeryLow
        } else if out("strict") {
            LimitState::Abnormal
        } else if out("upper") {
            LimitState::High
        } else if out("lower") {
            LimitState::Low
        } else {
            LimitState::Normal
        };

        Ok(Some(LimitReport {
            state,
            details: detail.then_some(details),
        }))
    }

    fn compare(kind: BoundaryKind, value: &TagValue, boundary: &TagValue) -> BoundaryDetail {
        let mut entry = BoundaryDetail {
            reading: Some(boundary.clone()),
            status: None,
            error: None,
        };
        if kind.is_strict() {
            if value.kind() == boundary.kind() {
                entry.status = Some(if value == boundary {
                    BoundaryStatus::In
                } else {
                    BoundaryStatus::Out
                });
            } else {
                entry.error = Some("Wrong type for limit".into());
            }
            return entry;
        }
        let (Some(v), Some(b)) = (value.as_f64(), boundary.as_f64()) else {
            entry.error = Some("Wrong type for limit".into());
            return entry;
        };
        let exceeded = match kind {
            BoundaryKind::Upper | BoundaryKind::CriticalUpper => v > b,
            BoundaryKind::Lower | BoundaryKind::CriticalLower => v < b,
            BoundaryKind::Strict => unreachable!(),
        };
        entry.status = Some(if exceeded {
            BoundaryStatus::Out
        } else if v == b {
            BoundaryStatus::Marginal
        } else {
            BoundaryStatus::In
        });
        entry
    }
}

// =============================================================================
// Tests
// =============================================================================
