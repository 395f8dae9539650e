//! Sentio Store - Per-Tag Value Logs
//!
//! Append-mostly, per-tag log of timestamped observations. Rows are kept
//! ordered by (timestamp_obtain, timestamp_update). Writes to different
//! tags never block each other; writes to the same tag are serialized by
//! a per-tag mutex, which the ingestion filter and the retention reducer
//! also use as their read-modify-write critical section.
//!
//! Key Features:
//! - Latest / latest-at / latest-N / range reads
//! - Closest-neighbor lookups for range anchor substitution
//! - Row deletion for the retention reducer
//!
//! @version 0.1.0
//! @author Sentio Development Team

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use sentio_common::{ErrorId, TagId, TagValue};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

// =============================================================================
// Stored Value
// =============================================================================

/// One retained observation of a tag.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredValue {
    pub value: TagValue,
    pub error: Option<ErrorId>,
    /// Source-reported observation time. Ordering key.
    pub timestamp_obtain: DateTime<Utc>,
    /// Server insert time. Immutable once set.
    pub timestamp_receive: DateTime<Utc>,
    /// Last-touched time. Advances on collapse.
    pub timestamp_update: DateTime<Utc>,
    /// Seconds the source spent obtaining the observation.
    pub time_to_obtain: f64,
}

impl StoredValue {
    pub fn is_valid(&self) -> bool {
        self.error.is_none()
    }

    fn sort_key(&self) -> (DateTime<Utc>, DateTime<Utc>) {
        (self.timestamp_obtain, self.timestamp_update)
    }
}

// =============================================================================
// Tag Log
// =============================================================================

/// The ordered row log of a single tag.
#[derive(Debug, Default)]
pub struct TagLog {
    rows: Vec<StoredValue>,
}

impl TagLog {
    pub fn rows(&self) -> &[StoredValue] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Insert a row at its ordered position.
    pub fn insert(&mut self, row: StoredValue) {
        let position = self
            .rows
            .partition_point(|existing| existing.sort_key() <= row.sort_key());
        self.rows.insert(position, row);
    }

    /// Index of the most recent row with timestamp_obtain <= `at`
    /// (or the overall newest row when `at` is None).
    pub fn latest_index_at(&self, at: Option<DateTime<Utc>>, only_valid: bool) -> Option<usize> {
        self.rows
            .iter()
            .enumerate()
            .rev()
            .find(|(_, row)| {
                at.map_or(true, |limit| row.timestamp_obtain <= limit)
                    && (!only_valid || row.is_valid())
            })
            .map(|(index, _)| index)
    }

    pub fn newest(&self) -> Option<&StoredValue> {
        self.rows.last()
    }

    pub fn get(&self, index: usize) -> Option<&StoredValue> {
        self.rows.get(index)
    }

    /// Advance a row's timestamp_update. timestamp_obtain and
    /// time_to_obtain are never changed by a touch.
    pub fn touch(&mut self, index: usize, now: DateTime<Utc>) {
        if let Some(row) = self.rows.get_mut(index) {
            row.timestamp_update = now;
        }
    }

    /// Drop every row whose `keep` mark is false. `keep` must be
    /// positionally aligned with the current rows.
    pub fn retain_marked(&mut self, keep: &[bool]) {
        debug_assert_eq!(keep.len(), self.rows.len());
        let mut index = 0;
        self.rows.retain(|_| {
            let retained = keep.get(index).copied().unwrap_or(true);
            index += 1;
            retained
        });
    }
}

// =============================================================================
// Value Store
// =============================================================================

/// Store of per-tag value logs.
#[derive(Default)]
pub struct ValueStore {
    logs: RwLock<HashMap<TagId, Arc<Mutex<TagLog>>>>,
}

impl ValueStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn handle(&self, tag: TagId) -> Arc<Mutex<TagLog>> {
        if let Some(log) = self.logs.read().get(&tag) {
            return Arc::clone(log);
        }
        let mut logs = self.logs.write();
        Arc::clone(logs.entry(tag).or_default())
    }

    fn existing(&self, tag: TagId) -> Option<Arc<Mutex<TagLog>>> {
        self.logs.read().get(&tag).cloned()
    }

    /// Run `f` inside the tag's critical section, creating the log if it
    /// does not exist yet. Ingestion and reduction both go through here so
    /// their read-modify-write sequences are atomic per tag.
    pub fn with_log<R>(&self, tag: TagId, f: impl FnOnce(&mut TagLog) -> R) -> R {
        let handle = self.handle(tag);
        let mut log = handle.lock();
        f(&mut log)
    }

    /// Insert a row directly, bypassing the ingestion filter.
    pub fn insert(&self, tag: TagId, row: StoredValue) {
        self.with_log(tag, |log| log.insert(row));
    }

    pub fn row_count(&self, tag: TagId) -> usize {
        self.existing(tag).map_or(0, |handle| handle.lock().len())
    }

    /// Remove a tag's log entirely (tag deletion cascade).
    pub fn drop_tag(&self, tag: TagId) {
        self.logs.write().remove(&tag);
    }

    // -------------------------------------------------------------------------
    // Reads
    // -------------------------------------------------------------------------

    /// Most recent row of a tag.
    pub fn latest(&self, tag: TagId, only_valid: bool) -> Option<StoredValue> {
        self.latest_at_opt(tag, None, only_valid)
    }

    /// Most recent row with timestamp_obtain at or before `at`.
    pub fn latest_at(
        &self,
        tag: TagId,
        at: DateTime<Utc>,
        only_valid: bool,
    ) -> Option<StoredValue> {
        self.latest_at_opt(tag, Some(at), only_valid)
    }

    fn latest_at_opt(
        &self,
        tag: TagId,
        at: Option<DateTime<Utc>>,
        only_valid: bool,
    ) -> Option<StoredValue> {
        let handle = self.existing(tag)?;
        let log = handle.lock();
        let index = log.latest_index_at(at, only_valid)?;
        log.get(index).cloned()
    }

    /// Newest `depth` rows, time-descending.
    pub fn latest_n(&self, tag: TagId, depth: usize, only_valid: bool) -> Vec<StoredValue> {
        let Some(handle) = self.existing(tag) else {
            return Vec::new();
        };
        let log = handle.lock();
        log.rows()
            .iter()
            .rev()
            .filter(|row| !only_valid || row.is_valid())
            .take(depth)
            .cloned()
            .collect()
    }

    /// Rows within [start, end], newest first, capped at `max_number`
    /// keeping the newest rows.
    pub fn range(
        &self,
        tag: TagId,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        max_number: usize,
        only_valid: bool,
    ) -> Vec<StoredValue> {
        let Some(handle) = self.existing(tag) else {
            return Vec::new();
        };
        let log = handle.lock();
        log.rows()
            .iter()
            .rev()
            .filter(|row| row.timestamp_obtain >= start && row.timestamp_obtain <= end)
            .filter(|row| !only_valid || row.is_valid())
            .take(max_number)
            .cloned()
            .collect()
    }

    /// Closest row strictly before `at` (range anchor substitution).
    pub fn last_before(
        &self,
        tag: TagId,
        at: DateTime<Utc>,
        only_valid: bool,
    ) -> Option<StoredValue> {
        let handle = self.existing(tag)?;
        let log = handle.lock();
        log.rows()
            .iter()
            .rev()
            .find(|row| row.timestamp_obtain < at && (!only_valid || row.is_valid()))
            .cloned()
    }

    /// Closest row strictly after `at` (range anchor substitution).
    pub fn first_after(
        &self,
        tag: TagId,
        at: DateTime<Utc>,
        only_valid: bool,
    ) -> Option<StoredValue> {
        let handle = self.existing(tag)?;
        let log = handle.lock();
        log.rows()
            .iter()
            .find(|row| row.timestamp_obtain > at && (!only_valid || row.is_valid()))
            .cloned()
    }

    /// Valid rows with `before - window < timestamp_obtain < before`,
    /// newest first. The row at `before` itself is excluded: a trend
    /// window anchored at a reading describes the history leading up to
    /// it, not the reading.
    pub fn window_before(
        &self,
        tag: TagId,
        before: DateTime<Utc>,
        window: chrono::Duration,
    ) -> Vec<StoredValue> {
        let Some(handle) = self.existing(tag) else {
            return Vec::new();
        };
        let lower = before - window;
        let log = handle.lock();
        log.rows()
            .iter()
            .rev()
            .filter(|row| {
                row.is_valid() && row.timestamp_obtain < before && row.timestamp_obtain > lower
            })
            .cloned()
            .collect()
    }
}

// =============================================================================
// Tests
// =============================================================================
