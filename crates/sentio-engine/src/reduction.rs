//! Sentio Reduction - Retention Reducer
//!
//! Scheduled background job that bounds per-tag storage growth via
//! declarative, age-gated rules. Each run walks every tag with attached
//! rules, applies the dominant rule set inside the tag's store critical
//! section, and reports per-tag deletion counts. The newest row of a tag
//! is never deleted.
//!
//! Rule dominance, when multiple rules of one kind apply to a tag: sort
//! by age gate ascending and keep only rules whose threshold is strictly
//! greater than every previously kept rule's; retained rules run from the
//! oldest gate down.
//!
//! Scheduling goes through an explicit Scheduler interface injected by
//! the caller; the reducer registers no process-wide state.
//!
//! @version 0.1.0
//! @author Sentio Development Team

use crate::registry::{ReductionRule, Registry};
use crate::store::{TagLog, ValueStore};
use chrono::{DateTime, Duration, Utc};
use sentio_common::{ReducerConfig, Result, SentioError, TagId, TagKind};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

// =============================================================================
// Scheduler
// =============================================================================

/// Handle to a scheduled periodic task.
#[derive(Debug, Clone)]
pub struct TaskHandle {
    cancelled: Arc<AtomicBool>,
}

impl TaskHandle {
    pub fn new() -> Self {
        Self {
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}

impl Default for TaskHandle {
    fn default() -> Self {
        Self::new()
    }
}

/// Periodic task registration interface. Injected into the reducer so no
/// component depends on an ambient process-wide scheduler.
pub trait Scheduler: Send + Sync {
    /// Register a task to run every `interval` until cancelled.
    fn schedule(
        &self,
        name: &str,
        interval: std::time::Duration,
        task: Arc<dyn Fn() + Send + Sync>,
    ) -> TaskHandle;
}

/// Thread-per-task scheduler. Each task runs serially on its own thread,
/// so a task never overlaps with itself.
#[derive(Debug, Default)]
pub struct ThreadScheduler;

impl Scheduler for ThreadScheduler {
    fn schedule(
        &self,
        name: &str,
        interval: std::time::Duration,
        task: Arc<dyn Fn() + Send + Sync>,
    ) -> TaskHandle {
        let handle = TaskHandle::new();
        let task_handle = handle.clone();
        let name = name.to_string();
        std::thread::Builder::new()
            .name(name.clone())
            .spawn(move || loop {
                std::thread::sleep(interval);
                if task_handle.is_cancelled() {
                    tracing::debug!(task = %name, "scheduled task cancelled");
                    break;
                }
                task();
            })
            .expect("failed to spawn scheduler thread");
        handle
    }
}

// =============================================================================
// Reduction Report
// =============================================================================

/// Outcome of one reduction run: tag full name to deleted-row count, with
/// per-tag failures listed separately.
#[derive(Debug, Default, Clone, Serialize)]
pub struct ReductionReport {
    pub deleted: BTreeMap<String, usize>,
    pub failures: BTreeMap<String, String>,
    pub simulated: bool,
}

impl ReductionReport {
    pub fn total_deleted(&self) -> usize {
        self.deleted.values().sum()
    }
}

// =============================================================================
// Retention Reducer
// =============================================================================

/// Applies retention rules to every tag that has them.
pub struct RetentionReducer {
    registry: Arc<Registry>,
    store: Arc<ValueStore>,
    config: ReducerConfig,
}

impl RetentionReducer {
    pub fn new(registry: Arc<Registry>, store: Arc<ValueStore>, config: ReducerConfig) -> Self {
        Self {
            registry,
            store,
            config,
        }
    }

    /// Register this reducer's periodic run with a scheduler.
    pub fn spawn_on(self: &Arc<Self>, scheduler: &dyn Scheduler) -> TaskHandle {
        let reducer = Arc::clone(self);
        scheduler.schedule(
            "retention-reduction",
            self.config.interval(),
            Arc::new(move || {
                let report = reducer.run();
                tracing::info!(
                    deleted = report.total_deleted(),
                    failures = report.failures.len(),
                    simulated = report.simulated,
                    "retention reduction run complete"
                );
            }),
        )
    }

    /// Run one reduction pass with the configured simulate mode.
    pub fn run(&self) -> ReductionReport {
        self.run_at(Utc::now(), self.config.simulate)
    }

    /// Run one reduction pass against an explicit clock.
    pub fn run_at(&self, now: DateTime<Utc>, simulate: bool) -> ReductionReport {
        let mut report = ReductionReport {
            simulated: simulate,
            ..Default::default()
        };
        for tag_id in self.registry.tags_with_rules() {
            let name = self
                .registry
                .full_name(tag_id)
                .unwrap_or_else(|| format!("{:?}", tag_id));
            match self.reduce_tag(tag_id, now, simulate) {
                Ok(count) => {
                    report.deleted.insert(name, count);
                }
                Err(e) => {
                    tracing::warn!(tag = %name, error = %e, "reduction failed for tag");
                    report.failures.insert(name, e.to_string());
                }
            }
        }
        report
    }

    fn reduce_tag(&self, tag_id: TagId, now: DateTime<Utc>, simulate: bool) -> Result<usize> {
        let tag = self
            .registry
            .tag(tag_id)
            .ok_or_else(|| SentioError::TagNotFound(format!("{:?}", tag_id)))?;

        let mut time_rules = Vec::new();
        let mut delta_rules = Vec::new();
        let mut duplicates = false;
        for rule in self.registry.rules_for(tag_id) {
            match rule {
                ReductionRule::TimeBased {
                    time_back_ago,
                    minimum_timespan,
                } => time_rules.push((time_back_ago, minimum_timespan)),
                ReductionRule::DeltaBased {
                    time_back_ago,
                    minimum_delta,
                } => delta_rules.push((time_back_ago, minimum_delta)),
                ReductionRule::Duplicates => duplicates = true,
            }
        }

        let mut total = 0;
        for (gate, span) in dominant_rules(time_rules) {
            total += self.store.with_log(tag_id, |log| {
                apply_time_rule(log, now - seconds(gate), span, simulate)
            });
        }
        if tag.kind == TagKind::Numeric {
            for (gate, delta) in dominant_rules(delta_rules) {
                total += self.store.with_log(tag_id, |log| {
                    apply_delta_rule(log, now - seconds(gate), delta, simulate)
                });
            }
        }
        if duplicates && tag.kind != TagKind::Numeric {
            total += self
                .store
                .with_log(tag_id, |log| apply_duplicates_rule(log, simulate));
        }
        Ok(total)
    }
}

fn seconds(secs: f64) -> Duration {
    Duration::milliseconds((secs * 1000.0) as i64)
}

// =============================================================================
// Rule Dominance
// =============================================================================

/// Keep only rules that are both older-gated and strictly more aggressive
/// than every previously kept rule; return them largest-gate first.
fn dominant_rules(mut rules: Vec<(f64, f64)>) -> Vec<(f64, f64)> {
    rules.sort_by(|a, b| a.0.total_cmp(&b.0));
    let mut kept: Vec<(f64, f64)> = Vec::new();
    for (gate, threshold) in rules {
        if kept.iter().all(|(_, t)| threshold > *t) {
            kept.push((gate, threshold));
        }
    }
    kept.reverse();
    kept
}

// =============================================================================
// Rule Application
// =============================================================================

/// Mark-and-sweep helper: count the false marks, deleting unless simulating.
fn sweep(log: &mut TagLog, keep: Vec<bool>, simulate: bool) -> usize {
    let count = keep.iter().filter(|k| !**k).count();
    if !simulate && count > 0 {
        log.retain_marked(&keep);
    }
    count
}

/// Thin runs of samples older than `cutoff` spaced closer than
/// `minimum_timespan` seconds, keeping one representative per run. Rows
/// carrying an error are never deleted under this rule, but do reset the
/// run anchor.
fn apply_time_rule(
    log: &mut TagLog,
    cutoff: DateTime<Utc>,
    minimum_timespan: f64,
    simulate: bool,
) -> usize {
    let rows = log.rows();
    let newest = rows.len().saturating_sub(1);
    let mut keep = vec![true; rows.len()];
    let mut anchor: Option<DateTime<Utc>> = None;
    for (i, row) in rows.iter().enumerate() {
        if row.timestamp_obtain > cutoff {
            break;
        }
        let Some(previous) = anchor else {
            anchor = Some(row.timestamp_obtain);
            continue;
        };
        let gap = (row.timestamp_obtain - previous).num_milliseconds() as f64 / 1000.0;
        if gap < minimum_timespan && row.error.is_none() && i != newest {
            keep[i] = false;
        } else {
            anchor = Some(row.timestamp_obtain);
        }
    }
    sweep(log, keep, simulate)
}

/// Delete samples older than `cutoff` whose numeric distance from the last
/// retained value is below `minimum_delta`.
fn apply_delta_rule(
    log: &mut TagLog,
    cutoff: DateTime<Utc>,
    minimum_delta: f64,
    simulate: bool,
) -> usize {
    let rows = log.rows();
    let newest = rows.len().saturating_sub(1);
    let mut keep = vec![true; rows.len()];
    let mut anchor: Option<f64> = None;
    for (i, row) in rows.iter().enumerate() {
        if row.timestamp_obtain > cutoff {
            break;
        }
        let Some(value) = row.value.as_f64() else {
            continue;
        };
        let Some(previous) = anchor else {
            anchor = Some(value);
            continue;
        };
        if (value - previous).abs() < minimum_delta && i != newest {
            keep[i] = false;
        } else {
            anchor = Some(value);
        }
    }
    sweep(log, keep, simulate)
}

/// Delete consecutive rows with an identical (value, error) pair. No age
/// gate; applies to Discrete and Text tags.
fn apply_duplicates_rule(log: &mut TagLog, simulate: bool) -> usize {
    let rows = log.rows();
    let newest = rows.len().saturating_sub(1);
    let mut keep = vec![true; rows.len()];
    let mut anchor: Option<(sentio_common::TagValue, Option<sentio_common::ErrorId>)> = None;
    for (i, row) in rows.iter().enumerate() {
        let current = (row.value.clone(), row.error);
        match &anchor {
            Some(previous) if *previous == current && i != newest => keep[i] = false,
            _ => anchor = Some(current),
        }
    }
    sweep(log, keep, simulate)
}

// =============================================================================
// Tests
// =============================================================================
