//! Sentio Registry - Tag and Source Definitions
//!
//! Holds DataSource and Tag definitions, per-tag filter configuration,
//! limit sets, reduction rules, view sets, and the interned error table.
//! All configuration consumed by the other engine components lives here.
//!
//! Key Features:
//! - Lazy tag creation on first ingest for an unseen (source, name)
//! - Shareable input filters (deadband / minimum delay)
//! - Limit sets referencing live boundary tags, with cycle rejection
//! - Many-to-many reduction rule bindings
//! - Global error-message interning
//!
//! @version 0.1.0
//! @author Sentio Development Team

use crate::limits::LimitSet;
use parking_lot::RwLock;
use sentio_common::{
    ErrorId, FilterId, Result, RuleId, SentioError, SourceId, TagId, TagKind, ViewSetId,
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap, HashSet};

// =============================================================================
// Data Source
// =============================================================================

/// An independent producer of readings, owning zero or more tags.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataSource {
    pub uid: SourceId,
    pub name: String,
    pub maintainer: String,
    pub quota: Option<i64>,
    pub active: bool,
}

// =============================================================================
// Input Filter
// =============================================================================

/// Ingestion filter parameters, shareable between numeric tags.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct InputFilter {
    /// Minimum magnitude of numeric change required to insert a new row.
    pub deadband: Option<f64>,
    /// Minimum seconds between retained rows.
    pub minimum_delay: Option<f64>,
}

impl InputFilter {
    fn validate(&self) -> Result<()> {
        if self.deadband.is_some_and(|d| d < 0.0 || !d.is_finite()) {
            return Err(SentioError::Validation("deadband must be >= 0".into()));
        }
        if self.minimum_delay.is_some_and(|d| d < 0.0 || !d.is_finite()) {
            return Err(SentioError::Validation("minimum_delay must be >= 0".into()));
        }
        Ok(())
    }
}

// =============================================================================
// Tag
// =============================================================================

/// A named time series scoped to a data source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tag {
    pub id: TagId,
    pub source: SourceId,
    pub name: String,
    pub display_name: String,
    pub kind: TagKind,
    pub units: String,
    pub ignore_duplicates: bool,
    pub input_filter: Option<FilterId>,
}

// =============================================================================
// Reduction Rule
// =============================================================================

/// A declarative retention rule, bindable to many tags.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum ReductionRule {
    /// Thin samples older than `time_back_ago` to one per `minimum_timespan`.
    /// Both are seconds.
    TimeBased {
        time_back_ago: f64,
        minimum_timespan: f64,
    },
    /// Delete samples older than `time_back_ago` seconds whose distance from
    /// the last retained value is below `minimum_delta`.
    DeltaBased {
        time_back_ago: f64,
        minimum_delta: f64,
    },
    /// Delete consecutive identical (value, error) pairs. No age gate.
    Duplicates,
}

impl ReductionRule {
    pub fn time_back_ago(&self) -> f64 {
        match self {
            ReductionRule::TimeBased { time_back_ago, .. }
            | ReductionRule::DeltaBased { time_back_ago, .. } => *time_back_ago,
            ReductionRule::Duplicates => 0.0,
        }
    }

    fn validate(&self) -> Result<()> {
        let ok = match self {
            ReductionRule::TimeBased {
                time_back_ago,
                minimum_timespan,
            } => *time_back_ago >= 0.0 && *minimum_timespan > 0.0,
            ReductionRule::DeltaBased {
                time_back_ago,
                minimum_delta,
            } => *time_back_ago >= 0.0 && *minimum_delta > 0.0,
            ReductionRule::Duplicates => true,
        };
        if ok {
            Ok(())
        } else {
            Err(SentioError::Validation(
                "reduction rule thresholds must be positive".into(),
            ))
        }
    }
}

// =============================================================================
// View Set
// =============================================================================

/// A named, ordered grouping of tags used purely for combined querying.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ViewSet {
    pub uid: ViewSetId,
    pub owner: String,
    pub name: String,
    pub tags: Vec<TagId>,
}

// =============================================================================
// Error Interning
// =============================================================================

/// An interned error message with optional description.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorInfo {
    pub message: String,
    pub description: Option<String>,
}

// =============================================================================
// Registry
// =============================================================================

#[derive(Default)]
struct RegistryInner {
    sources: HashMap<SourceId, DataSource>,
    tags: HashMap<TagId, Tag>,
    by_name: HashMap<(SourceId, String), TagId>,
    filters: HashMap<FilterId, InputFilter>,
    limit_sets: HashMap<TagId, LimitSet>,
    rules: HashMap<RuleId, (ReductionRule, BTreeSet<TagId>)>,
    viewsets: HashMap<ViewSetId, ViewSet>,
    errors: Vec<ErrorInfo>,
    error_index: HashMap<String, ErrorId>,
    next_tag: u64,
    next_filter: u64,
    next_rule: u64,
}

/// Registry of all engine configuration: sources, tags, filters, limit
/// sets, reduction rules, and view sets.
#[derive(Default)]
pub struct Registry {
    inner: RwLock<RegistryInner>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    // -------------------------------------------------------------------------
    // Data Sources
    // -------------------------------------------------------------------------

    /// Register a new data source and return its identifier.
    pub fn create_source(
        &self,
        name: impl Into<String>,
        maintainer: impl Into<String>,
        quota: Option<i64>,
    ) -> SourceId {
        let source = DataSource {
            uid: SourceId::random(),
            name: name.into(),
            maintainer: maintainer.into(),
            quota,
            active: true,
        };
        let uid = source.uid;
        self.inner.write().sources.insert(uid, source);
        uid
    }

    pub fn source(&self, id: SourceId) -> Option<DataSource> {
        self.inner.read().sources.get(&id).cloned()
    }

    pub fn set_source_active(&self, id: SourceId, active: bool) -> Result<()> {
        let mut inner = self.inner.write();
        let source = inner
            .sources
            .get_mut(&id)
            .ok_or_else(|| SentioError::UnknownDataSource(id.0.to_string()))?;
        source.active = active;
        Ok(())
    }

    /// Delete a source and all of its tags. Returns the removed tag ids so
    /// the caller can cascade into the value store.
    pub fn delete_source(&self, id: SourceId) -> Vec<TagId> {
        let tag_ids: Vec<TagId> = {
            let inner = self.inner.read();
            inner
                .tags
                .values()
                .filter(|t| t.source == id)
                .map(|t| t.id)
                .collect()
        };
        for tag in &tag_ids {
            self.delete_tag(*tag);
        }
        self.inner.write().sources.remove(&id);
        tag_ids
    }

    // -------------------------------------------------------------------------
    // Tags
    // -------------------------------------------------------------------------

    /// Explicitly create a tag. Fails if (source, name) already exists.
    pub fn create_tag(
        &self,
        source: SourceId,
        name: impl Into<String>,
        kind: TagKind,
        units: impl Into<String>,
    ) -> Result<TagId> {
        let name = name.into();
        let mut inner = self.inner.write();
        if !inner.sources.contains_key(&source) {
            return Err(SentioError::UnknownDataSource(source.0.to_string()));
        }
        if inner.by_name.contains_key(&(source, name.clone())) {
            return Err(SentioError::Validation(format!(
                "tag already exists: {}",
                name
            )));
        }
        Ok(Self::insert_tag(&mut inner, source, name, kind, units.into()))
    }

    /// Resolve a tag by (source, name), creating it lazily on first ingest.
    /// The source must exist and be active for creation to proceed.
    pub fn get_or_create_tag(
        &self,
        source: SourceId,
        name: &str,
        kind: TagKind,
        units: &str,
    ) -> Result<TagId> {
        let mut inner = self.inner.write();
        if let Some(id) = inner.by_name.get(&(source, name.to_string())) {
            return Ok(*id);
        }
        let src = inner
            .sources
            .get(&source)
            .ok_or_else(|| SentioError::UnknownDataSource(source.0.to_string()))?;
        if !src.active {
            return Err(SentioError::InactiveDataSource(src.name.clone()));
        }
        Ok(Self::insert_tag(
            &mut inner,
            source,
            name.to_string(),
            kind,
            units.to_string(),
        ))
    }

    fn insert_tag(
        inner: &mut RegistryInner,
        source: SourceId,
        name: String,
        kind: TagKind,
        units: String,
    ) -> TagId {
        let id = TagId(inner.next_tag);
        inner.next_tag += 1;
        inner.by_name.insert((source, name.clone()), id);
        inner.tags.insert(
            id,
            Tag {
                id,
                source,
                name,
                display_name: String::new(),
                kind,
                units,
                ignore_duplicates: false,
                input_filter: None,
            },
        );
        id
    }

    pub fn tag(&self, id: TagId) -> Option<Tag> {
        self.inner.read().tags.get(&id).cloned()
    }

    pub fn tag_by_name(&self, source: SourceId, name: &str) -> Option<Tag> {
        let inner = self.inner.read();
        inner
            .by_name
            .get(&(source, name.to_string()))
            .and_then(|id| inner.tags.get(id))
            .cloned()
    }

    /// Full display name: `"{source.name}.{tag.name}"`.
    pub fn full_name(&self, id: TagId) -> Option<String> {
        let inner = self.inner.read();
        let tag = inner.tags.get(&id)?;
        let source = inner.sources.get(&tag.source)?;
        Some(format!("{}.{}", source.name, tag.name))
    }

    pub fn set_display_name(&self, id: TagId, display_name: impl Into<String>) -> Result<()> {
        self.with_tag_mut(id, |tag| tag.display_name = display_name.into())
    }

    pub fn set_ignore_duplicates(&self, id: TagId, ignore: bool) -> Result<()> {
        self.with_tag_mut(id, |tag| tag.ignore_duplicates = ignore)
    }

    fn with_tag_mut(&self, id: TagId, f: impl FnOnce(&mut Tag)) -> Result<()> {
        let mut inner = self.inner.write();
        let tag = inner
            .tags
            .get_mut(&id)
            .ok_or_else(|| SentioError::TagNotFound(format!("{:?}", id)))?;
        f(tag);
        Ok(())
    }

    /// Delete a tag, cascading into limit sets, rules, and view sets.
    /// Any limit set referencing the tag as a boundary is removed whole.
    pub fn delete_tag(&self, id: TagId) {
        let mut inner = self.inner.write();
        if let Some(tag) = inner.tags.remove(&id) {
            inner.by_name.remove(&(tag.source, tag.name));
        }
        inner
            .limit_sets
            .retain(|owner, set| *owner != id && !set.boundaries().any(|(_, b)| b == id));
        for (_, tags) in inner.rules.values_mut() {
            tags.remove(&id);
        }
        for viewset in inner.viewsets.values_mut() {
            viewset.tags.retain(|t| *t != id);
        }
    }

    // -------------------------------------------------------------------------
    // Input Filters
    // -------------------------------------------------------------------------

    pub fn create_filter(&self, filter: InputFilter) -> Result<FilterId> {
        filter.validate()?;
        let mut inner = self.inner.write();
        let id = FilterId(inner.next_filter);
        inner.next_filter += 1;
        inner.filters.insert(id, filter);
        Ok(id)
    }

    /// Attach (or detach, with None) an input filter to a numeric tag.
    pub fn attach_filter(&self, tag: TagId, filter: Option<FilterId>) -> Result<()> {
        let mut inner = self.inner.write();
        if let Some(fid) = filter {
            if !inner.filters.contains_key(&fid) {
                return Err(SentioError::NotFound(format!("filter {:?}", fid)));
            }
        }
        let t = inner
            .tags
            .get_mut(&tag)
            .ok_or_else(|| SentioError::TagNotFound(format!("{:?}", tag)))?;
        if filter.is_some() && t.kind != TagKind::Numeric {
            return Err(SentioError::TypeMismatch(
                "input filters apply to Numeric tags only".into(),
            ));
        }
        t.input_filter = filter;
        Ok(())
    }

    /// Resolve the effective input filter for a tag, if any.
    pub fn input_filter_for(&self, tag: TagId) -> Option<InputFilter> {
        let inner = self.inner.read();
        let fid = inner.tags.get(&tag)?.input_filter?;
        inner.filters.get(&fid).copied()
    }

    // -------------------------------------------------------------------------
    // Limit Sets
    // -------------------------------------------------------------------------

    /// Install a limit set for a tag.
    ///
    /// Boundary tags must be of a kind comparable with the owning tag, and
    /// the resulting boundary reference graph must stay acyclic.
    pub fn set_limit_set(&self, tag: TagId, set: LimitSet) -> Result<()> {
        let mut inner = self.inner.write();
        let owner = inner
            .tags
            .get(&tag)
            .ok_or_else(|| SentioError::TagNotFound(format!("{:?}", tag)))?
            .clone();
        if owner.kind == TagKind::Text {
            return Err(SentioError::TypeMismatch(
                "limits are not supported for Text tags".into(),
            ));
        }
        for (kind, boundary_id) in set.boundaries() {
            let boundary = inner
                .tags
                .get(&boundary_id)
                .ok_or_else(|| SentioError::TagNotFound(format!("{:?}", boundary_id)))?;
            let expected = if kind.is_strict() {
                owner.kind
            } else {
                TagKind::Numeric
            };
            if boundary.kind != expected || (!kind.is_strict() && owner.kind != TagKind::Numeric) {
                return Err(SentioError::TypeMismatch(format!(
                    "boundary {} has kind {}, incompatible with tag kind {}",
                    boundary.name,
                    boundary.kind.as_str(),
                    owner.kind.as_str()
                )));
            }
        }
        // Reject configuration-time cycles: no boundary may reach back to
        // the owning tag through existing limit sets.
        let mut visited: HashSet<TagId> = HashSet::new();
        let mut stack: Vec<TagId> = set.boundaries().map(|(_, b)| b).collect();
        while let Some(current) = stack.pop() {
            if current == tag {
                return Err(SentioError::Validation(
                    "limit boundary reference cycle detected".into(),
                ));
            }
            if !visited.insert(current) {
                continue;
            }
            if let Some(next) = inner.limit_sets.get(&current) {
                stack.extend(next.boundaries().map(|(_, b)| b));
            }
        }
        inner.limit_sets.insert(tag, set);
        Ok(())
    }

    pub fn clear_limit_set(&self, tag: TagId) {
        self.inner.write().limit_sets.remove(&tag);
    }

    pub fn limit_set(&self, tag: TagId) -> Option<LimitSet> {
        self.inner.read().limit_sets.get(&tag).cloned()
    }

    // -------------------------------------------------------------------------
    // Reduction Rules
    // -------------------------------------------------------------------------

    pub fn add_reduction_rule(&self, rule: ReductionRule, tags: &[TagId]) -> Result<RuleId> {
        rule.validate()?;
        let mut inner = self.inner.write();
        for tag in tags {
            if !inner.tags.contains_key(tag) {
                return Err(SentioError::TagNotFound(format!("{:?}", tag)));
            }
        }
        let id = RuleId(inner.next_rule);
        inner.next_rule += 1;
        inner.rules.insert(id, (rule, tags.iter().copied().collect()));
        Ok(id)
    }

    pub fn remove_reduction_rule(&self, id: RuleId) {
        self.inner.write().rules.remove(&id);
    }

    /// All rules bound to a tag, in rule creation order.
    pub fn rules_for(&self, tag: TagId) -> Vec<ReductionRule> {
        let inner = self.inner.read();
        let mut rules: Vec<(RuleId, ReductionRule)> = inner
            .rules
            .iter()
            .filter(|(_, (_, tags))| tags.contains(&tag))
            .map(|(id, (rule, _))| (*id, *rule))
            .collect();
        rules.sort_by_key(|(id, _)| *id);
        rules.into_iter().map(|(_, rule)| rule).collect()
    }

    /// Every tag with at least one reduction rule attached.
    pub fn tags_with_rules(&self) -> Vec<TagId> {
        let inner = self.inner.read();
        let mut tags: Vec<TagId> = inner
            .rules
            .values()
            .flat_map(|(_, tags)| tags.iter().copied())
            .collect();
        tags.sort();
        tags.dedup();
        tags
    }

    // -------------------------------------------------------------------------
    // View Sets
    // -------------------------------------------------------------------------

    pub fn create_viewset(
        &self,
        owner: impl Into<String>,
        name: impl Into<String>,
        tags: Vec<TagId>,
    ) -> Result<ViewSetId> {
        let mut inner = self.inner.write();
        for tag in &tags {
            if !inner.tags.contains_key(tag) {
                return Err(SentioError::TagNotFound(format!("{:?}", tag)));
            }
        }
        let viewset = ViewSet {
            uid: ViewSetId::random(),
            owner: owner.into(),
            name: name.into(),
            tags,
        };
        let uid = viewset.uid;
        inner.viewsets.insert(uid, viewset);
        Ok(uid)
    }

    pub fn viewset(&self, uid: ViewSetId) -> Option<ViewSet> {
        self.inner.read().viewsets.get(&uid).cloned()
    }

    // -------------------------------------------------------------------------
    // Error Interning
    // -------------------------------------------------------------------------

    /// Intern an error message, deduplicated globally by text.
    pub fn intern_error(&self, message: &str, description: Option<&str>) -> ErrorId {
        let mut inner = self.inner.write();
        if let Some(id) = inner.error_index.get(message) {
            return *id;
        }
        let id = ErrorId(inner.errors.len() as u32);
        inner.errors.push(ErrorInfo {
            message: message.to_string(),
            description: description.map(str::to_string),
        });
        inner.error_index.insert(message.to_string(), id);
        id
    }

    pub fn error_info(&self, id: ErrorId) -> Option<ErrorInfo> {
        self.inner.read().errors.get(id.0 as usize).cloned()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn registry_with_source() -> (Registry, SourceId) {
        let registry = Registry::new();
        let source = registry.create_source("vps_main", "ops", Some(500));
        (registry, source)
    }

    #[test]
    fn test_tag_uniqueness() {
        let (registry, source) = registry_with_source();
        registry
            .create_tag(source, "bme280.Main.temperature", TagKind::Numeric, "C")
            .unwrap();
        let err = registry
            .create_tag(source, "bme280.Main.temperature", TagKind::Numeric, "C")
            .unwrap_err();
        assert!(err.is_user_error());
    }

    #[test]
    fn test_lazy_creation_requires_active_source() {
        let (registry, source) = registry_with_source();
        registry.set_source_active(source, false).unwrap();
        let err = registry
            .get_or_create_tag(source, "hb.Main.alive", TagKind::Discrete, "")
            .unwrap_err();
        assert!(matches!(err, SentioError::InactiveDataSource(_)));
    }

    #[test]
    fn test_get_or_create_is_idempotent() {
        let (registry, source) = registry_with_source();
        let a = registry
            .get_or_create_tag(source, "ds18b20.Out.temperature", TagKind::Numeric, "C")
            .unwrap();
        let b = registry
            .get_or_create_tag(source, "ds18b20.Out.temperature", TagKind::Numeric, "C")
            .unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_full_name() {
        let (registry, source) = registry_with_source();
        let tag = registry
            .create_tag(source, "bme280.Main.pressure", TagKind::Numeric, "hPa")
            .unwrap();
        assert_eq!(
            registry.full_name(tag).unwrap(),
            "vps_main.bme280.Main.pressure"
        );
    }

    #[test]
    fn test_filter_validation() {
        let (registry, _) = registry_with_source();
        let err = registry
            .create_filter(InputFilter {
                deadband: Some(-1.0),
                minimum_delay: None,
            })
            .unwrap_err();
        assert!(matches!(err, SentioError::Validation(_)));
    }

    #[test]
    fn test_filter_rejected_for_text_tag() {
        let (registry, source) = registry_with_source();
        let tag = registry
            .create_tag(source, "net.Main.state", TagKind::Text, "")
            .unwrap();
        let filter = registry
            .create_filter(InputFilter {
                deadband: Some(0.5),
                minimum_delay: None,
            })
            .unwrap();
        let err = registry.attach_filter(tag, Some(filter)).unwrap_err();
        assert!(matches!(err, SentioError::TypeMismatch(_)));
    }

    #[test]
    fn test_limit_cycle_rejected() {
        let (registry, source) = registry_with_source();
        let a = registry
            .create_tag(source, "a", TagKind::Numeric, "")
            .unwrap();
        let b = registry
            .create_tag(source, "b", TagKind::Numeric, "")
            .unwrap();
        registry
            .set_limit_set(a, LimitSet::upper_only(b))
            .unwrap();
        let err = registry
            .set_limit_set(b, LimitSet::upper_only(a))
            .unwrap_err();
        assert!(matches!(err, SentioError::Validation(_)));
    }

    #[test]
    fn test_limit_kind_check() {
        let (registry, source) = registry_with_source();
        let numeric = registry
            .create_tag(source, "n", TagKind::Numeric, "")
            .unwrap();
        let discrete = registry
            .create_tag(source, "d", TagKind::Discrete, "")
            .unwrap();
        let err = registry
            .set_limit_set(numeric, LimitSet::upper_only(discrete))
            .unwrap_err();
        assert!(matches!(err, SentioError::TypeMismatch(_)));
    }

    #[test]
    fn test_error_interning() {
        let (registry, _) = registry_with_source();
        let a = registry.intern_error("Sensor not responding", None);
        let b = registry.intern_error("Sensor not responding", Some("ignored"));
        assert_eq!(a, b);
        assert_eq!(
            registry.error_info(a).unwrap().message,
            "Sensor not responding"
        );
    }

    #[test]
    fn test_delete_tag_cascades() {
        let (registry, source) = registry_with_source();
        let a = registry
            .create_tag(source, "a", TagKind::Numeric, "")
            .unwrap();
        let b = registry
            .create_tag(source, "b", TagKind::Numeric, "")
            .unwrap();
        registry.set_limit_set(a, LimitSet::upper_only(b)).unwrap();
        let rule = ReductionRule::Duplicates;
        registry.add_reduction_rule(rule, &[a, b]).unwrap();
        let viewset = registry.create_viewset("ops", "all", vec![a, b]).unwrap();

        registry.delete_tag(b);

        assert!(registry.limit_set(a).is_none());
        assert_eq!(registry.rules_for(a).len(), 1);
        assert!(registry.rules_for(b).is_empty());
        assert_eq!(registry.viewset(viewset).unwrap().tags, vec![a]);
    }
}
