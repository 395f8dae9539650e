//! Sentio Ingest - Ingestion Filter
//!
//! Decides insert-vs-collapse for each incoming observation. The whole
//! decision runs inside the tag's store critical section, so the
//! read-then-write sequence is atomic per tag and the dedup invariant
//! holds under concurrent ingestion.
//!
//! Decision order (first match wins):
//! 1. No prior value for the tag: insert.
//! 2. Dedup enabled and (value, error) equal to the latest row: collapse.
//! 3. Numeric tag with an input filter:
//!    a. candidate carries an error differing from the latest row's: insert
//!       (error transitions are never suppressed);
//!    b. value within deadband of the latest row: collapse;
//!    c. observation within minimum_delay of the latest row: collapse.
//! 4. Otherwise: insert.
//!
//! @version 0.1.0
//! @author Sentio Development Team

use crate::registry::Registry;
use crate::store::{StoredValue, TagLog, ValueStore};
use chrono::{DateTime, Utc};
use sentio_common::{ErrorId, Result, SentioError, TagId, TagKind, TagValue};
use std::sync::Arc;

// =============================================================================
// Ingest Outcome
// =============================================================================

/// Result of filtering one candidate observation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestOutcome {
    /// A new row was stored.
    Inserted,
    /// The existing latest row was touched; no new row.
    Collapsed,
}

// =============================================================================
// Candidate Value
// =============================================================================

/// An observation proposed for insertion, typed to its tag's kind.
#[derive(Debug, Clone)]
pub struct CandidateValue {
    pub value: TagValue,
    pub error: Option<ErrorId>,
    pub timestamp_obtain: DateTime<Utc>,
    pub time_to_obtain: f64,
}

// =============================================================================
// Ingestion Filter
// =============================================================================

/// The insert-vs-collapse decision engine.
pub struct IngestionFilter {
    registry: Arc<Registry>,
    store: Arc<ValueStore>,
}

impl IngestionFilter {
    pub fn new(registry: Arc<Registry>, store: Arc<ValueStore>) -> Self {
        Self { registry, store }
    }

    /// Filter one candidate into the tag's log. Total and deterministic:
    /// every candidate yields exactly one outcome.
    pub fn ingest(&self, tag_id: TagId, candidate: CandidateValue) -> Result<IngestOutcome> {
        let tag = self
            .registry
            .tag(tag_id)
            .ok_or_else(|| SentioError::TagNotFound(format!("{:?}", tag_id)))?;
        if candidate.value.kind() != tag.kind {
            return Err(SentioError::TypeMismatch(format!(
                "tag {} is {}, candidate is {}",
                tag.name,
                tag.kind.as_str(),
                candidate.value.kind().as_str()
            )));
        }
        let filter = if tag.kind == TagKind::Numeric {
            self.registry.input_filter_for(tag_id)
        } else {
            None
        };

        let now = Utc::now();
        let outcome = self.store.with_log(tag_id, |log| {
            let Some(latest_index) = log.latest_index_at(Some(candidate.timestamp_obtain), false)
            else {
                Self::insert(log, &candidate, now);
                return IngestOutcome::Inserted;
            };
            let latest = log
                .get(latest_index)
                .expect("latest_index_at returned a live index")
                .clone();

            if tag.ignore_duplicates
                && latest.value == candidate.value
                && latest.error == candidate.error
            {
                log.touch(latest_index, now);
                return IngestOutcome::Collapsed;
            }

            if let Some(filter) = filter {
                if candidate.error.is_some() && candidate.error != latest.error {
                    Self::insert(log, &candidate, now);
                    return IngestOutcome::Inserted;
                }
                if let (Some(deadband), Some(previous), Some(current)) = (
                    filter.deadband,
                    latest.value.as_f64(),
                    candidate.value.as_f64(),
                ) {
                    if (previous - current).abs() <= deadband {
                        log.touch(latest_index, now);
                        return IngestOutcome::Collapsed;
                    }
                }
                if let Some(minimum_delay) = filter.minimum_delay {
                    let elapsed = (candidate.timestamp_obtain - latest.timestamp_obtain)
                        .num_milliseconds() as f64
                        / 1000.0;
                    if elapsed <= minimum_delay {
                        log.touch(latest_index, now);
                        return IngestOutcome::Collapsed;
                    }
                }
            }

            Self::insert(log, &candidate, now);
            IngestOutcome::Inserted
        });

        tracing::trace!(tag = %tag.name, ?outcome, "ingest decision");
        Ok(outcome)
    }

    fn insert(log: &mut TagLog, candidate: &CandidateValue, now: DateTime<Utc>) {
        log.insert(StoredValue {
            value: candidate.value.clone(),
            error: candidate.error,
            timestamp_obtain: candidate.timestamp_obtain,
            timestamp_receive: now,
            timestamp_update: now,
            time_to_obtain: candidate.time_to_obtain,
        });
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::InputFilter;
    use chrono::Duration;
    use sentio_common::SourceId;

    struct Fixture {
        registry: Arc<Registry>,
        store: Arc<ValueStore>,
        filter: IngestionFilter,
        source: SourceId,
    }

    fn fixture() -> Fixture {
        let registry = Arc::new(Registry::new());
        let store = Arc::new(ValueStore::new());
        let source = registry.create_source("bench", "ops", None);
        let filter = IngestionFilter::new(Arc::clone(&registry), Arc::clone(&store));
        Fixture {
            registry,
            store,
            filter,
            source,
        }
    }

    fn candidate(value: f64, ts: DateTime<Utc>) -> CandidateValue {
        CandidateValue {
            value: TagValue::Numeric(value),
            error: None,
            timestamp_obtain: ts,
            time_to_obtain: 0.05,
        }
    }

    fn base() -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000, 0).unwrap()
    }

    #[test]
    fn test_first_value_inserts() {
        let f = fixture();
        let tag = f
            .registry
            .create_tag(f.source, "t", TagKind::Numeric, "C")
            .unwrap();
        let outcome = f.filter.ingest(tag, candidate(5.0, base())).unwrap();
        assert_eq!(outcome, IngestOutcome::Inserted);
        assert_eq!(f.store.row_count(tag), 1);
    }

    #[test]
    fn test_dedup_collapses_identical() {
        let f = fixture();
        let tag = f
            .registry
            .create_tag(f.source, "t", TagKind::Numeric, "C")
            .unwrap();
        f.registry.set_ignore_duplicates(tag, true).unwrap();

        f.filter.ingest(tag, candidate(5.0, base())).unwrap();
        let before = f.store.latest(tag, true).unwrap();
        let outcome = f
            .filter
            .ingest(tag, candidate(5.0, base() + Duration::seconds(10)))
            .unwrap();
        assert_eq!(outcome, IngestOutcome::Collapsed);
        assert_eq!(f.store.row_count(tag), 1);

        let after = f.store.latest(tag, true).unwrap();
        assert_eq!(after.timestamp_obtain, before.timestamp_obtain);
        assert!(after.timestamp_update >= before.timestamp_update);
    }

    #[test]
    fn test_dedup_distinguishes_errors() {
        let f = fixture();
        let tag = f
            .registry
            .create_tag(f.source, "t", TagKind::Numeric, "C")
            .unwrap();
        f.registry.set_ignore_duplicates(tag, true).unwrap();
        let error = f.registry.intern_error("CRC failure", None);

        f.filter.ingest(tag, candidate(5.0, base())).unwrap();
        let mut with_error = candidate(5.0, base() + Duration::seconds(10));
        with_error.error = Some(error);
        let outcome = f.filter.ingest(tag, with_error).unwrap();
        assert_eq!(outcome, IngestOutcome::Inserted);
        assert_eq!(f.store.row_count(tag), 2);
    }

    #[test]
    fn test_deadband() {
        let f = fixture();
        let tag = f
            .registry
            .create_tag(f.source, "t", TagKind::Numeric, "C")
            .unwrap();
        let filter = f
            .registry
            .create_filter(InputFilter {
                deadband: Some(1.0),
                minimum_delay: None,
            })
            .unwrap();
        f.registry.attach_filter(tag, Some(filter)).unwrap();

        f.filter.ingest(tag, candidate(10.0, base())).unwrap();
        let collapsed = f
            .filter
            .ingest(tag, candidate(10.9, base() + Duration::seconds(10)))
            .unwrap();
        assert_eq!(collapsed, IngestOutcome::Collapsed);
        let inserted = f
            .filter
            .ingest(tag, candidate(11.1, base() + Duration::seconds(20)))
            .unwrap();
        assert_eq!(inserted, IngestOutcome::Inserted);
        assert_eq!(f.store.row_count(tag), 2);
    }

    #[test]
    fn test_minimum_delay() {
        let f = fixture();
        let tag = f
            .registry
            .create_tag(f.source, "t", TagKind::Numeric, "C")
            .unwrap();
        let filter = f
            .registry
            .create_filter(InputFilter {
                deadband: None,
                minimum_delay: Some(60.0),
            })
            .unwrap();
        f.registry.attach_filter(tag, Some(filter)).unwrap();

        f.filter.ingest(tag, candidate(1.0, base())).unwrap();
        let collapsed = f
            .filter
            .ingest(tag, candidate(50.0, base() + Duration::seconds(30)))
            .unwrap();
        assert_eq!(collapsed, IngestOutcome::Collapsed);
        let inserted = f
            .filter
            .ingest(tag, candidate(50.0, base() + Duration::seconds(90)))
            .unwrap();
        assert_eq!(inserted, IngestOutcome::Inserted);
    }

    #[test]
    fn test_error_transition_bypasses_filter() {
        let f = fixture();
        let tag = f
            .registry
            .create_tag(f.source, "t", TagKind::Numeric, "C")
            .unwrap();
        let filter = f
            .registry
            .create_filter(InputFilter {
                deadband: Some(100.0),
                minimum_delay: Some(3600.0),
            })
            .unwrap();
        f.registry.attach_filter(tag, Some(filter)).unwrap();
        let error = f.registry.intern_error("Sensor timeout", None);

        f.filter.ingest(tag, candidate(5.0, base())).unwrap();
        let mut failing = candidate(5.0, base() + Duration::seconds(1));
        failing.error = Some(error);
        let outcome = f.filter.ingest(tag, failing).unwrap();
        assert_eq!(outcome, IngestOutcome::Inserted);
    }

    #[test]
    fn test_collapse_preserves_obtain_timestamp() {
        let f = fixture();
        let tag = f
            .registry
            .create_tag(f.source, "t", TagKind::Numeric, "C")
            .unwrap();
        let filter = f
            .registry
            .create_filter(InputFilter {
                deadband: Some(1.0),
                minimum_delay: None,
            })
            .unwrap();
        f.registry.attach_filter(tag, Some(filter)).unwrap();

        f.filter.ingest(tag, candidate(10.0, base())).unwrap();
        f.filter
            .ingest(tag, candidate(10.5, base() + Duration::seconds(10)))
            .unwrap();
        let row = f.store.latest(tag, true).unwrap();
        assert_eq!(row.timestamp_obtain, base());
        assert_eq!(row.value, TagValue::Numeric(10.0));
    }

    #[test]
    fn test_kind_mismatch_rejected() {
        let f = fixture();
        let tag = f
            .registry
            .create_tag(f.source, "t", TagKind::Discrete, "")
            .unwrap();
        let err = f.filter.ingest(tag, candidate(1.0, base())).unwrap_err();
        assert!(matches!(err, SentioError::TypeMismatch(_)));
    }
}
