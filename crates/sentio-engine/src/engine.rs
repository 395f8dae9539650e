//! Sentio Engine - Facade
//!
//! Wires the registry, value store, ingestion filter, query layer and
//! retention reducer into one embeddable engine. An HTTP or transport
//! layer sits above this and calls it as a library.
//!
//! Ingest isolation: one malformed reading inside a document never
//! aborts its siblings; each reading yields its own outcome and the
//! report carries a document-level failure count.
//!
//! @version 0.1.0
//! @author Sentio Development Team

use crate::document::{IngestDocument, QueryRequest, QueryResponse};
use crate::ingest::{CandidateValue, IngestOutcome, IngestionFilter};
use crate::query::QueryLayer;
use crate::reduction::{ReductionReport, RetentionReducer, Scheduler, TaskHandle};
use crate::registry::Registry;
use crate::store::ValueStore;
use sentio_common::{EngineConfig, Result, SentioError, SourceId, TagId};
use std::sync::Arc;

// =============================================================================
// Ingest Report
// =============================================================================

/// Per-reading result inside an ingest report.
#[derive(Debug)]
pub struct ReadingOutcome {
    /// Tag name within the document's data source.
    pub tag: String,
    pub result: Result<IngestOutcome>,
}

/// Document-level ingest summary.
#[derive(Debug, Default)]
pub struct IngestReport {
    pub outcomes: Vec<ReadingOutcome>,
}

impl IngestReport {
    pub fn inserted(&self) -> usize {
        self.count(IngestOutcome::Inserted)
    }

    pub fn collapsed(&self) -> usize {
        self.count(IngestOutcome::Collapsed)
    }

    pub fn failures(&self) -> usize {
        self.outcomes.iter().filter(|o| o.result.is_err()).count()
    }

    fn count(&self, wanted: IngestOutcome) -> usize {
        self.outcomes
            .iter()
            .filter(|o| matches!(&o.result, Ok(outcome) if *outcome == wanted))
            .count()
    }
}

// =============================================================================
// Engine
// =============================================================================

/// The embeddable sensor time-series engine.
pub struct SentioEngine {
    config: EngineConfig,
    registry: Arc<Registry>,
    store: Arc<ValueStore>,
    filter: IngestionFilter,
    query: QueryLayer,
    reducer: Arc<RetentionReducer>,
}

impl SentioEngine {
    pub fn new(config: EngineConfig) -> Self {
        let registry = Arc::new(Registry::new());
        let store = Arc::new(ValueStore::new());
        let filter = IngestionFilter::new(Arc::clone(&registry), Arc::clone(&store));
        let query = QueryLayer::new(
            Arc::clone(&registry),
            Arc::clone(&store),
            config.query.clone(),
        );
        let reducer = Arc::new(RetentionReducer::new(
            Arc::clone(&registry),
            Arc::clone(&store),
            config.reducer.clone(),
        ));
        Self {
            config,
            registry,
            store,
            filter,
            query,
            reducer,
        }
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    pub fn store(&self) -> &Arc<ValueStore> {
        &self.store
    }

    // -------------------------------------------------------------------------
    // Ingestion
    // -------------------------------------------------------------------------

    /// Ingest one provider document into a data source. Readings are
    /// processed independently; the returned report lists every outcome.
    pub fn ingest_document(
        &self,
        source: SourceId,
        document: &IngestDocument,
    ) -> Result<IngestReport> {
        let src = self
            .registry
            .source(source)
            .ok_or_else(|| SentioError::UnknownDataSource(source.0.to_string()))?;
        if !src.active {
            return Err(SentioError::InactiveDataSource(src.name));
        }
        let (_, obtained) = document.window()?;
        let time_to_obtain = document.time_to_obtain()?;
        let quota = src.quota.unwrap_or(self.config.store.default_quota);

        let mut report = IngestReport::default();
        for reading in &document.reading {
            let tag_name = reading.tag_name();
            let result = self.ingest_reading(source, reading, obtained, time_to_obtain, quota);
            if let Err(e) = &result {
                tracing::warn!(tag = %tag_name, error = %e, "reading rejected");
            }
            report.outcomes.push(ReadingOutcome {
                tag: tag_name,
                result,
            });
        }
        tracing::debug!(
            source = %src.name,
            inserted = report.inserted(),
            collapsed = report.collapsed(),
            failures = report.failures(),
            "ingest document processed"
        );
        Ok(report)
    }

    fn ingest_reading(
        &self,
        source: SourceId,
        reading: &crate::document::IngestReading,
        obtained: chrono::DateTime<chrono::Utc>,
        time_to_obtain: f64,
        quota: i64,
    ) -> Result<IngestOutcome> {
        let name = reading.tag_name();
        let existing = self.registry.tag_by_name(source, &name);
        let value = reading.value(existing.as_ref().map(|t| t.kind))?;
        let tag_id = match existing {
            Some(tag) => tag.id,
            None => self.registry.get_or_create_tag(
                source,
                &name,
                value.kind(),
                reading.units.as_deref().unwrap_or(""),
            )?,
        };
        // An empty error string means no error.
        let error = reading
            .error
            .as_deref()
            .filter(|message| !message.is_empty())
            .map(|message| self.registry.intern_error(message, None));

        let outcome = self.filter.ingest(
            tag_id,
            CandidateValue {
                value,
                error,
                timestamp_obtain: obtained,
                time_to_obtain,
            },
        )?;
        if outcome == IngestOutcome::Inserted {
            self.enforce_quota(tag_id, quota);
        }
        Ok(outcome)
    }

    /// Hard per-tag row cap, dropping the oldest rows beyond it. The
    /// retention reducer is the graceful mechanism; this is the backstop.
    fn enforce_quota(&self, tag: TagId, quota: i64) {
        if quota <= 0 {
            return;
        }
        let quota = quota as usize;
        let dropped = self.store.with_log(tag, |log| {
            let excess = log.len().saturating_sub(quota);
            if excess > 0 {
                let mut keep = vec![true; log.len()];
                for mark in keep.iter_mut().take(excess) {
                    *mark = false;
                }
                log.retain_marked(&keep);
            }
            excess
        });
        if dropped > 0 {
            tracing::debug!(?tag, dropped, "quota enforced");
        }
    }

    // -------------------------------------------------------------------------
    // Queries
    // -------------------------------------------------------------------------

    pub fn query(&self, request: &QueryRequest) -> Result<QueryResponse> {
        self.query.execute(request)
    }

    // -------------------------------------------------------------------------
    // Retention
    // -------------------------------------------------------------------------

    /// Run one reduction pass now.
    pub fn run_reduction(&self) -> ReductionReport {
        self.reducer.run()
    }

    /// Register periodic reduction with a scheduler.
    pub fn start_reduction(&self, scheduler: &dyn Scheduler) -> TaskHandle {
        self.reducer.spawn_on(scheduler)
    }

    // -------------------------------------------------------------------------
    // Administration
    // -------------------------------------------------------------------------

    /// Delete a tag, cascading into its stored rows.
    pub fn delete_tag(&self, tag: TagId) {
        self.registry.delete_tag(tag);
        self.store.drop_tag(tag);
    }

    /// Delete a data source, cascading into its tags and their rows.
    pub fn delete_source(&self, source: SourceId) {
        for tag in self.registry.delete_source(source) {
            self.store.drop_tag(tag);
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
