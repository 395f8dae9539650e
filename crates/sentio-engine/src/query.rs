//! Sentio Query - Query Layer
//!
//! Read-only composition of the value store, tag registry, limit engine
//! and trend analyzer into the caller-facing response shape. One request
//! covers a single tag or an ordered tag collection; per-tag problems
//! (unknown name, empty log) become entries inside the response instead
//! of failing the whole request.
//!
//! Selection modes:
//! - latest/depth: newest `number` rows per tag (default from config)
//! - range: rows within [date_start, date_end], anchor substitution via
//!   bound_earlier/bound_later when the window is empty
//!
//! Worst-case cost is bounded structurally: row counts are capped at
//! ABSOLUTE_MAXIMUM_NUMBERS and trend windows at the analyzer's sample
//! guard, not by deadlines.
//!
//! @version 0.1.0
//! @author Sentio Development Team

use crate::document::{
    LimitLevel, QueryRequest, QueryResponse, ReadingEntry, ReadingError, TagResult,
};
use crate::limits::LimitEngine;
use crate::registry::{Registry, Tag};
use crate::store::{StoredValue, ValueStore};
use crate::trends::{TrendAnalyzer, TrendInfo, TrendSample};
use chrono::Duration;
use sentio_common::{QueryConfig, Result, SentioError, SourceId, TagId, TagKind, ViewSetId};
use std::sync::Arc;
use std::time::Instant;

/// Hard ceiling on rows returned per tag, regardless of the request.
pub const ABSOLUTE_MAXIMUM_NUMBERS: usize = 500;

// =============================================================================
// Query Layer
// =============================================================================

pub struct QueryLayer {
    registry: Arc<Registry>,
    store: Arc<ValueStore>,
    limits: LimitEngine,
    config: QueryConfig,
}

impl QueryLayer {
    pub fn new(registry: Arc<Registry>, store: Arc<ValueStore>, config: QueryConfig) -> Self {
        let limits = LimitEngine::new(Arc::clone(&registry), Arc::clone(&store));
        Self {
            registry,
            store,
            limits,
            config,
        }
    }

    /// Execute one query. Fails only on structurally invalid requests;
    /// per-tag problems are reported inside the response.
    pub fn execute(&self, request: &QueryRequest) -> Result<QueryResponse> {
        let started = Instant::now();
        let selected = self.select_tags(request)?;

        let mut results = Vec::with_capacity(selected.len());
        for selection in selected {
            results.push(match selection {
                Selection::Known(tag) => self.query_tag(&tag, request)?,
                Selection::Unknown(name) => TagResult::unresolved(name),
            });
        }

        tracing::debug!(
            tags = results.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "query served"
        );
        let factor = 10f64.powi(self.rounding(request) as i32);
        Ok(QueryResponse {
            tag_count: results.len(),
            tags: results,
            time_to_obtain: (started.elapsed().as_secs_f64() * factor).round() / factor,
        })
    }

    /// Display rounding decimals: the request's, or the configured default.
    fn rounding(&self, request: &QueryRequest) -> u32 {
        request.round_numerics.unwrap_or(self.config.default_round)
    }

    // -------------------------------------------------------------------------
    // Tag selection
    // -------------------------------------------------------------------------

    fn select_tags(&self, request: &QueryRequest) -> Result<Vec<Selection>> {
        if let Some(dataset) = request.dataset {
            let viewset = self
                .registry
                .viewset(ViewSetId(dataset))
                .ok_or_else(|| SentioError::DataSetNotFound(dataset.to_string()))?;
            return Ok(viewset
                .tags
                .iter()
                .map(|id| match self.registry.tag(*id) {
                    Some(tag) => Selection::Known(tag),
                    None => Selection::Unknown(format!("{:?}", id)),
                })
                .collect());
        }
        if request.tags.is_empty() {
            return Err(SentioError::Validation(
                "request selects neither a dataset nor tags".into(),
            ));
        }
        Ok(request
            .tags
            .iter()
            .map(|selector| {
                match self
                    .registry
                    .tag_by_name(SourceId(selector.datasource_id), &selector.name)
                {
                    Some(tag) => Selection::Known(tag),
                    None => Selection::Unknown(selector.name.clone()),
                }
            })
            .collect())
    }

    // -------------------------------------------------------------------------
    // Per-tag assembly
    // -------------------------------------------------------------------------

    fn query_tag(&self, tag: &Tag, request: &QueryRequest) -> Result<TagResult> {
        let mut result = TagResult {
            name: self
                .registry
                .full_name(tag.id)
                .unwrap_or_else(|| tag.name.clone()),
            display_name: (!tag.display_name.is_empty()).then(|| tag.display_name.clone()),
            units: (!tag.units.is_empty()).then(|| tag.units.clone()),
            ..Default::default()
        };

        let rows = self.select_rows(tag.id, request)?;
        if rows.is_empty() {
            result.error = Some("No data".into());
            return Ok(result);
        }

        for (index, row) in rows.iter().enumerate() {
            let mut entry = ReadingEntry {
                reading: row.value.rounded(self.rounding(request)),
                error: row.error.and_then(|id| {
                    self.registry.error_info(id).map(|info| ReadingError {
                        name: info.message,
                        description: info.description,
                    })
                }),
                timestamp_receive: row.timestamp_update,
                timestamp_packet: row.timestamp_obtain,
                time_to_obtain: request.diag_info.then_some(row.time_to_obtain),
                trends: None,
                limits: None,
            };
            if request.limit_level() != LimitLevel::None {
                entry.limits = self.limits.evaluate(
                    tag.id,
                    &row.value,
                    row.timestamp_obtain,
                    request.limit_level() == LimitLevel::Detailed,
                )?;
            }
            // Windowed trends attach to the newest reading only.
            if index == 0 && !request.get_trends.is_empty() && tag.kind == TagKind::Numeric {
                entry.trends = Some(
                    request
                        .get_trends
                        .iter()
                        .map(|seconds| self.windowed_trend(tag.id, row, *seconds))
                        .collect(),
                );
            }
            result.readings.push(entry);
        }

        if rows.len() > 1 && !request.get_trends.is_empty() && tag.kind == TagKind::Numeric {
            result.trend = Some(TrendAnalyzer::analyze(&samples_of(&rows), None));
        }
        Ok(result)
    }

    fn select_rows(&self, tag: TagId, request: &QueryRequest) -> Result<Vec<StoredValue>> {
        let cap = request
            .number
            .unwrap_or(ABSOLUTE_MAXIMUM_NUMBERS)
            .min(ABSOLUTE_MAXIMUM_NUMBERS);
        if let Some((start, end)) = request.range_bounds()? {
            let mut rows = self.store.range(tag, start, end, cap, request.only_valid);
            if rows.is_empty() {
                if request.bound_earlier {
                    rows.extend(self.store.last_before(tag, start, request.only_valid));
                }
                if request.bound_later {
                    rows.extend(self.store.first_after(tag, end, request.only_valid));
                }
                rows.sort_by_key(|row| std::cmp::Reverse(row.timestamp_obtain));
            }
            return Ok(rows);
        }
        let depth = request
            .number
            .unwrap_or(self.config.default_depth)
            .min(ABSOLUTE_MAXIMUM_NUMBERS);
        Ok(self.store.latest_n(tag, depth, request.only_valid))
    }

    /// Trend over the `seconds` window ending at `newest`.
    fn windowed_trend(&self, tag: TagId, newest: &StoredValue, seconds: u64) -> TrendInfo {
        let window = Duration::seconds(seconds as i64);
        let rows = self
            .store
            .window_before(tag, newest.timestamp_obtain, window);
        TrendAnalyzer::analyze(&samples_of(&rows), None)
    }
}

enum Selection {
    Known(Tag),
    Unknown(String),
}

fn samples_of(rows: &[StoredValue]) -> Vec<TrendSample> {
    rows.iter()
        .filter_map(|row| {
            row.value.as_f64().map(|value| TrendSample {
                timestamp: row.timestamp_obtain,
                value,
            })
        })
        .collect()
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::TagSelector;
    use crate::limits::{LimitSet, LimitState};
    use chrono::{DateTime, Utc};
    use sentio_common::TagValue;

    struct Fixture {
        registry: Arc<Registry>,
        store: Arc<ValueStore>,
        query: QueryLayer,
        source: SourceId,
    }

    fn fixture() -> Fixture {
        let registry = Arc::new(Registry::new());
        let store = Arc::new(ValueStore::new());
        let query = QueryLayer::new(
            Arc::clone(&registry),
            Arc::clone(&store),
            QueryConfig::default(),
        );
        let source = registry.create_source("plant", "ops", None);
        Fixture {
            registry,
            store,
            query,
            source,
        }
    }

    fn base() -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000, 0).unwrap()
    }

    fn put(store: &ValueStore, tag: TagId, value: TagValue, ts: DateTime<Utc>) {
        store.insert(
            tag,
            StoredValue {
                value,
                error: None,
                timestamp_obtain: ts,
                timestamp_receive: ts,
                timestamp_update: ts,
                time_to_obtain: 0.1,
            },
        );
    }

    fn select(f: &Fixture, name: &str) -> QueryRequest {
        QueryRequest::for_tags(vec![TagSelector {
            datasource_id: f.source.0,
            name: name.into(),
        }])
    }

    #[test]
    fn test_latest_mode_rounds_for_display() {
        let f = fixture();
        let tag = f
            .registry
            .create_tag(f.source, "temp", TagKind::Numeric, "C")
            .unwrap();
        put(&f.store, tag, TagValue::Numeric(92.5678), base());

        let mut request = select(&f, "temp");
        request.number = Some(1);
        let response = f.query.execute(&request).unwrap();
        assert_eq!(response.tag_count, 1);
        assert_eq!(response.tags[0].name, "plant.temp");
        assert_eq!(
            response.tags[0].readings[0].reading,
            TagValue::Numeric(92.57)
        );
        // Stored precision untouched.
        assert_eq!(
            f.store.latest(tag, true).unwrap().value,
            TagValue::Numeric(92.5678)
        );
    }

    #[test]
    fn test_unknown_tag_is_an_entry_not_a_failure() {
        let f = fixture();
        let tag = f
            .registry
            .create_tag(f.source, "temp", TagKind::Numeric, "C")
            .unwrap();
        put(&f.store, tag, TagValue::Numeric(1.0), base());

        let mut request = select(&f, "temp");
        request.tags.push(TagSelector {
            datasource_id: f.source.0,
            name: "missing".into(),
        });
        let response = f.query.execute(&request).unwrap();
        assert_eq!(response.tag_count, 2);
        assert!(response.tags[0].error.is_none());
        assert_eq!(response.tags[1].error.as_deref(), Some("Tag not found"));
    }

    #[test]
    fn test_empty_log_reports_no_data() {
        let f = fixture();
        f.registry
            .create_tag(f.source, "temp", TagKind::Numeric, "C")
            .unwrap();
        let response = f.query.execute(&select(&f, "temp")).unwrap();
        assert_eq!(response.tags[0].error.as_deref(), Some("No data"));
        assert!(response.tags[0].readings.is_empty());
    }

    #[test]
    fn test_range_fallback_bound_earlier() {
        let f = fixture();
        let tag = f
            .registry
            .create_tag(f.source, "temp", TagKind::Numeric, "C")
            .unwrap();
        put(&f.store, tag, TagValue::Numeric(1.0), base());
        put(
            &f.store,
            tag,
            TagValue::Numeric(2.0),
            base() + Duration::hours(10),
        );

        let mut request = select(&f, "temp");
        request.date_start = Some("2023-11-14T23:00:00.000000".into());
        request.date_end = Some("2023-11-14T23:30:00.000000".into());
        request.bound_earlier = true;
        request.bound_later = false;
        let response = f.query.execute(&request).unwrap();

        let readings = &response.tags[0].readings;
        assert_eq!(readings.len(), 1);
        // base() is 2023-11-14T22:13:20 UTC, strictly before the window.
        assert_eq!(readings[0].reading, TagValue::Numeric(1.0));
    }

    #[test]
    fn test_depth_is_capped() {
        let f = fixture();
        let tag = f
            .registry
            .create_tag(f.source, "temp", TagKind::Numeric, "C")
            .unwrap();
        for i in 0..600 {
            put(
                &f.store,
                tag,
                TagValue::Numeric(i as f64),
                base() + Duration::seconds(i),
            );
        }
        let mut request = select(&f, "temp");
        request.number = Some(10_000);
        let response = f.query.execute(&request).unwrap();
        assert_eq!(
            response.tags[0].readings.len(),
            ABSOLUTE_MAXIMUM_NUMBERS
        );
    }

    #[test]
    fn test_limits_attach_per_reading() {
        let f = fixture();
        let tag = f
            .registry
            .create_tag(f.source, "temp", TagKind::Numeric, "C")
            .unwrap();
        let boundary = f
            .registry
            .create_tag(f.source, "temp.max", TagKind::Numeric, "C")
            .unwrap();
        put(&f.store, boundary, TagValue::Numeric(90.0), base());
        f.registry
            .set_limit_set(tag, LimitSet::upper_only(boundary))
            .unwrap();
        put(
            &f.store,
            tag,
            TagValue::Numeric(95.0),
            base() + Duration::seconds(1),
        );

        let mut request = select(&f, "temp");
        request.get_limits = 2;
        let response = f.query.execute(&request).unwrap();
        let limits = response.tags[0].readings[0].limits.as_ref().unwrap();
        assert_eq!(limits.state, LimitState::High);
        assert!(limits.details.is_some());

        request.get_limits = 0;
        let response = f.query.execute(&request).unwrap();
        assert!(response.tags[0].readings[0].limits.is_none());
    }

    #[test]
    fn test_trends_on_newest_reading_plus_aggregate() {
        let f = fixture();
        let tag = f
            .registry
            .create_tag(f.source, "temp", TagKind::Numeric, "C")
            .unwrap();
        for i in 0..20 {
            put(
                &f.store,
                tag,
                TagValue::Numeric(i as f64),
                base() + Duration::seconds(i * 60),
            );
        }
        let mut request = select(&f, "temp");
        request.number = Some(10);
        request.get_trends = vec![3600];
        let response = f.query.execute(&request).unwrap();

        let tag_result = &response.tags[0];
        assert_eq!(tag_result.readings.len(), 10);
        let trends = tag_result.readings[0].trends.as_ref().unwrap();
        assert_eq!(trends.len(), 1);
        assert_eq!(
            trends[0].direction,
            Some(crate::trends::TrendDirection::Increase)
        );
        for entry in &tag_result.readings[1..] {
            assert!(entry.trends.is_none());
        }
        assert!(tag_result.trend.is_some());
    }

    #[test]
    fn test_configured_rounding_is_the_fallback() {
        let registry = Arc::new(Registry::new());
        let store = Arc::new(ValueStore::new());
        let query = QueryLayer::new(
            Arc::clone(&registry),
            Arc::clone(&store),
            QueryConfig {
                default_round: 3,
                ..Default::default()
            },
        );
        let source = registry.create_source("plant", "ops", None);
        let tag = registry
            .create_tag(source, "temp", TagKind::Numeric, "C")
            .unwrap();
        put(&store, tag, TagValue::Numeric(92.56789), base());

        let mut request = QueryRequest::for_tags(vec![TagSelector {
            datasource_id: source.0,
            name: "temp".into(),
        }]);
        let response = query.execute(&request).unwrap();
        assert_eq!(
            response.tags[0].readings[0].reading,
            TagValue::Numeric(92.568)
        );

        // An explicit request value still wins over the configured default.
        request.round_numerics = Some(1);
        let response = query.execute(&request).unwrap();
        assert_eq!(
            response.tags[0].readings[0].reading,
            TagValue::Numeric(92.6)
        );
    }

    #[test]
    fn test_trend_window_excludes_the_reading_itself() {
        let f = fixture();
        let tag = f
            .registry
            .create_tag(f.source, "temp", TagKind::Numeric, "C")
            .unwrap();
        put(&f.store, tag, TagValue::Numeric(42.0), base());

        let mut request = select(&f, "temp");
        request.get_trends = vec![3600];
        let response = f.query.execute(&request).unwrap();

        // The sole reading anchors the window but is not part of it.
        let trends = response.tags[0].readings[0].trends.as_ref().unwrap();
        assert_eq!(trends[0].error.as_deref(), Some("No data"));
    }

    #[test]
    fn test_dataset_selection() {
        let f = fixture();
        let a = f
            .registry
            .create_tag(f.source, "a", TagKind::Numeric, "")
            .unwrap();
        let b = f
            .registry
            .create_tag(f.source, "b", TagKind::Numeric, "")
            .unwrap();
        put(&f.store, a, TagValue::Numeric(1.0), base());
        put(&f.store, b, TagValue::Numeric(2.0), base());
        let viewset = f
            .registry
            .create_viewset("ops", "overview", vec![b, a])
            .unwrap();

        let request = QueryRequest::for_dataset(viewset.0);
        let response = f.query.execute(&request).unwrap();
        assert_eq!(response.tag_count, 2);
        assert_eq!(response.tags[0].name, "plant.b");
        assert_eq!(response.tags[1].name, "plant.a");

        let missing = QueryRequest::for_dataset(uuid::Uuid::new_v4());
        assert!(matches!(
            f.query.execute(&missing),
            Err(SentioError::DataSetNotFound(_))
        ));
    }

    #[test]
    fn test_diag_info_gates_time_to_obtain() {
        let f = fixture();
        let tag = f
            .registry
            .create_tag(f.source, "temp", TagKind::Numeric, "C")
            .unwrap();
        put(&f.store, tag, TagValue::Numeric(1.0), base());

        let mut request = select(&f, "temp");
        let response = f.query.execute(&request).unwrap();
        assert!(response.tags[0].readings[0].time_to_obtain.is_none());

        request.diag_info = true;
        let response = f.query.execute(&request).unwrap();
        assert_eq!(response.tags[0].readings[0].time_to_obtain, Some(0.1));
    }
}
