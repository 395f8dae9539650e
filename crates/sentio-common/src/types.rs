//! Sentio Types - Core Data Types
//!
//! Fundamental data types used throughout the Sentio platform. Provides
//! type-safe identifiers and the closed tag-kind value union shared by the
//! registry, value store, and analysis components.
//!
//! Key Features:
//! - Type-safe identifiers (SourceId, TagId, FilterId, RuleId, ViewSetId)
//! - Closed tagged value union (Numeric / Discrete / Text)
//! - Serialization support via serde
//!
//! @version 0.1.0
//! @author Sentio Development Team

use serde::{Deserialize, Serialize};
use uuid::Uuid;

// =============================================================================
// Identifier Types
// =============================================================================

/// Unique identifier for data sources.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SourceId(pub Uuid);

impl SourceId {
    pub fn random() -> Self {
        Self(Uuid::new_v4())
    }
}

/// Unique identifier for tags within the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TagId(pub u64);

/// Unique identifier for shared input filters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FilterId(pub u64);

/// Unique identifier for reduction rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RuleId(pub u64);

/// Unique identifier for view sets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ViewSetId(pub Uuid);

impl ViewSetId {
    pub fn random() -> Self {
        Self(Uuid::new_v4())
    }
}

/// Identifier of an interned error message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ErrorId(pub u32);

// =============================================================================
// Tag Kind
// =============================================================================

/// Kind of a tag, fixing the type of every value it stores.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TagKind {
    Numeric,
    Discrete,
    Text,
}

impl TagKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TagKind::Numeric => "Numeric",
            TagKind::Discrete => "Discrete",
            TagKind::Text => "Text",
        }
    }
}

// =============================================================================
// Tag Value
// =============================================================================

/// A single observed value, matching its tag's kind.
///
/// Serialized untagged so readings appear as plain JSON numbers, booleans,
/// and strings on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TagValue {
    Discrete(bool),
    Numeric(f64),
    Text(String),
}

impl TagValue {
    /// The kind this value belongs to.
    pub fn kind(&self) -> TagKind {
        match self {
            TagValue::Numeric(_) => TagKind::Numeric,
            TagValue::Discrete(_) => TagKind::Discrete,
            TagValue::Text(_) => TagKind::Text,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            TagValue::Numeric(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            TagValue::Discrete(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            TagValue::Text(v) => Some(v),
            _ => None,
        }
    }

    /// Copy of this value with numerics rounded to `decimals` places.
    ///
    /// Used for display only; stored precision is untouched.
    pub fn rounded(&self, decimals: u32) -> TagValue {
        match self {
            TagValue::Numeric(v) => {
                let factor = 10f64.powi(decimals as i32);
                TagValue::Numeric((v * factor).round() / factor)
            }
            other => other.clone(),
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
