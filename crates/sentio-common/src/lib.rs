//! Sentio Common - Shared Foundation
//!
//! Shared types, error handling, and configuration for the Sentio
//! time-series platform.
//!
//! @version 0.1.0
//! @author Sentio Development Team

pub mod config;
pub mod error;
pub mod types;

pub use config::{EngineConfig, QueryConfig, ReducerConfig, StoreConfig};
pub use error::{Result, SentioError};
pub use types::{ErrorId, FilterId, RuleId, SourceId, TagId, TagKind, TagValue, ViewSetId};
