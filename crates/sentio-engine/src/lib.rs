//! Sentio Engine - Sensor Time-Series Engine
//!
//! Storage and analysis engine for periodic sensor and self-diagnostic
//! readings. Ingests reading documents from independent data sources,
//! stores them as named time series ("tags"), evaluates dynamically
//! configured alert limits, computes regression-based trends, and bounds
//! storage growth through scheduled data reduction.
//!
//! Key Features:
//! - Ingestion filtering: deduplication, deadband, minimum-delay collapse
//! - Live boundary tags as alert thresholds with precedence aggregation
//! - OLS trend analysis with time-weighted averaging
//! - Declarative, age-gated retention reduction rules
//! - Composable query layer: latest / latest-N / range with anchors
//!
//! @version 0.1.0
//! @author Sentio Development Team

pub mod document;
pub mod engine;
pub mod ingest;
pub mod limits;
pub mod query;
pub mod reduction;
pub mod registry;
pub mod store;
pub mod trends;

pub use document::{IngestDocument, QueryRequest, QueryResponse};
pub use engine::{IngestReport, ReadingOutcome, SentioEngine};
pub use ingest::{CandidateValue, IngestOutcome, IngestionFilter};
pub use limits::{BoundaryStatus, LimitEngine, LimitReport, LimitSet, LimitState};
pub use query::{QueryLayer, ABSOLUTE_MAXIMUM_NUMBERS};
pub use reduction::{
    ReductionReport, RetentionReducer, Scheduler, TaskHandle, ThreadScheduler,
};
pub use registry::{DataSource, InputFilter, ReductionRule, Registry, Tag, ViewSet};
pub use store::{StoredValue, ValueStore};
pub use trends::{TrendAnalyzer, TrendInfo, TrendSample, TREND_LOWER_COUNT};
