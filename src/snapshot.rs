use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use chrono::{DateTime, SubsecRound, Utc};

use crate::error::PatchError;
use crate::feature::FeatureId;
use crate::flag::FlagDefinition;

/// Optional provenance of a snapshot.
///
/// Snapshots and patches keep `generated_at` at millisecond precision, the
/// precision of the wire format, so a serialized snapshot parses back equal.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SnapshotMeta {
    pub version: Option<String>,
    pub generated_at: Option<DateTime<Utc>>,
    pub source: Option<String>,
}

impl SnapshotMeta {
    /// Metadata stamped with the current time.
    pub fn generated_now() -> Self {
        Self {
            generated_at: Some(Utc::now()),
            ..Self::default()
        }
        .truncated()
    }

    fn truncated(mut self) -> Self {
        self.generated_at = self.generated_at.map(|t| t.trunc_subsecs(3));
        self
    }
}

/// Immutable set of flag definitions keyed by feature id.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Snapshot {
    flags: BTreeMap<FeatureId, Arc<FlagDefinition>>,
    meta: Option<SnapshotMeta>,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("feature {0} appears more than once in the snapshot")]
pub struct DuplicateFlag(pub FeatureId);

impl Snapshot {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn new<I>(definitions: I) -> Result<Self, DuplicateFlag>
    where
        I: IntoIterator<Item = FlagDefinition>,
    {
        let mut flags = BTreeMap::new();
        for def in definitions {
            let id = def.id().clone();
            if flags.insert(id.clone(), Arc::new(def)).is_some() {
                return Err(DuplicateFlag(id));
            }
        }
        Ok(Self { flags, meta: None })
    }

    pub fn with_meta(mut self, meta: SnapshotMeta) -> Self {
        self.meta = Some(meta.truncated());
        self
    }

    pub fn meta(&self) -> Option<&SnapshotMeta> {
        self.meta.as_ref()
    }

    pub fn get(&self, id: &FeatureId) -> Option<&Arc<FlagDefinition>> {
        self.flags.get(id)
    }

    pub fn contains(&self, id: &FeatureId) -> bool {
        self.flags.contains_key(id)
    }

    /// Definitions ordered by feature id.
    pub fn flags(&self) -> impl Iterator<Item = &Arc<FlagDefinition>> {
        self.flags.values()
    }

    pub fn flags_in<'a>(&'a self, namespace: &'a str) -> impl Iterator<Item = &'a Arc<FlagDefinition>> + 'a {
        self.flags
            .iter()
            .filter(move |(id, _)| id.namespace() == namespace)
            .map(|(_, def)| def)
    }

    pub fn len(&self) -> usize {
        self.flags.len()
    }

    pub fn is_empty(&self) -> bool {
        self.flags.is_empty()
    }

    /// Builds the snapshot that results from `patch`. Removals are applied
    /// first, then upserts, so removing and re-adding a key in one patch may
    /// change its type. `self` is left untouched.
    pub fn apply(&self, patch: &Patch) -> Result<Snapshot, PatchError> {
        let mut flags = self.flags.clone();
        for id in &patch.removals {
            flags.remove(id);
        }
        for def in &patch.upserts {
            if let Some(existing) = flags.get(def.id()) {
                if existing.value_type() != def.value_type() {
                    return Err(PatchError::TypeMismatch {
                        key: def.id().clone(),
                        existing: existing.value_type().clone(),
                        replacement: def.value_type().clone(),
                    });
                }
            }
            flags.insert(def.id().clone(), Arc::clone(def));
        }
        Ok(Snapshot {
            flags,
            meta: patch.meta.clone().or_else(|| self.meta.clone()),
        })
    }
}

/// Incremental update: definitions to add or replace and ids to remove.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Patch {
    upserts: Vec<Arc<FlagDefinition>>,
    removals: BTreeSet<FeatureId>,
    meta: Option<SnapshotMeta>,
}

impl Patch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn upsert(mut self, definition: FlagDefinition) -> Self {
        self.upserts.push(Arc::new(definition));
        self
    }

    pub fn remove(mut self, id: FeatureId) -> Self {
        self.removals.insert(id);
        self
    }

    pub fn with_meta(mut self, meta: SnapshotMeta) -> Self {
        self.meta = Some(meta.truncated());
        self
    }

    pub fn upserts(&self) -> impl Iterator<Item = &FlagDefinition> {
        self.upserts.iter().map(|d| d.as_ref())
    }

    pub fn removals(&self) -> &BTreeSet<FeatureId> {
        &self.removals
    }

    pub fn meta(&self) -> Option<&SnapshotMeta> {
        self.meta.as_ref()
    }

    pub fn is_empty(&self) -> bool {
        self.upserts.is_empty() && self.removals.is_empty()
    }
}
