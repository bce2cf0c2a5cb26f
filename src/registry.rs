//! Holder of the active [`Snapshot`].
//!
//! Reads load the current snapshot through an [`ArcSwap`] and never take a
//! lock. Writers build a complete new snapshot and publish it with a single
//! swap; a write-side mutex serializes `load` and `patch` against each other
//! so a patch is always applied to the snapshot it was computed from.

use std::sync::{Arc, Mutex, MutexGuard};

use arc_swap::ArcSwap;
use tracing::{debug, info, warn};

use crate::context::Context;
use crate::error::{EvaluationError, ParseError, PatchError, PredicateError};
use crate::feature::{FeatureId, FeatureRegistry};
use crate::flag::{FlagDefinition, Resolution};
use crate::parse;
use crate::snapshot::{Patch, Snapshot};
use crate::value::{FlagValue, ValueTypeMismatch};

/// Result of evaluating one flag through a [`Registry`]. Every case is a
/// value; evaluation never panics and never returns a silent default for a
/// missing flag.
#[derive(Debug, Clone, PartialEq)]
pub enum EvaluationOutcome {
    Success(FlagValue),
    FlagNotFound(FeatureId),
    EvaluationError {
        key: FeatureId,
        cause: PredicateError,
    },
}

impl EvaluationOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, EvaluationOutcome::Success(_))
    }

    pub fn ok(self) -> Option<FlagValue> {
        match self {
            EvaluationOutcome::Success(value) => Some(value),
            _ => None,
        }
    }

    pub fn into_result(self) -> Result<FlagValue, EvaluationError> {
        match self {
            EvaluationOutcome::Success(value) => Ok(value),
            EvaluationOutcome::FlagNotFound(key) => Err(EvaluationError::FlagNotFound(key)),
            EvaluationOutcome::EvaluationError { key, cause } => {
                Err(EvaluationError::Predicate { key, cause })
            }
        }
    }
}

pub struct Registry {
    active: ArcSwap<Snapshot>,
    writer: Mutex<()>,
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let snapshot = self.snapshot();
        f.debug_struct("Registry")
            .field("flags", &snapshot.len())
            .field("meta", &snapshot.meta())
            .finish()
    }
}

impl Registry {
    /// A registry serving the empty snapshot.
    pub fn new() -> Self {
        Self::with_snapshot(Snapshot::empty())
    }

    pub fn with_snapshot(snapshot: Snapshot) -> Self {
        Self {
            active: ArcSwap::from_pointee(snapshot),
            writer: Mutex::new(()),
        }
    }

    /// The snapshot active right now. Holding on to it pins that version;
    /// later writes are not visible through it.
    pub fn snapshot(&self) -> Arc<Snapshot> {
        self.active.load_full()
    }

    pub fn get(&self, id: &FeatureId) -> Option<Arc<FlagDefinition>> {
        self.active.load().get(id).cloned()
    }

    pub fn all_flags(&self) -> Vec<Arc<FlagDefinition>> {
        self.active.load().flags().cloned().collect()
    }

    /// Replaces the whole active snapshot.
    pub fn load(&self, snapshot: Snapshot) {
        let _guard = self.lock_writer();
        self.install(snapshot, "load");
    }

    /// Applies `patch` to the active snapshot and installs the result. On error
    /// the active snapshot is unchanged.
    pub fn patch(&self, patch: &Patch) -> Result<(), PatchError> {
        let _guard = self.lock_writer();
        let next = self.active.load().apply(patch)?;
        self.install(next, "patch");
        Ok(())
    }

    /// Parses a full snapshot payload and installs it. A rejected payload is
    /// logged and leaves the last-known-good snapshot serving.
    pub fn load_bytes(&self, bytes: &[u8], features: &FeatureRegistry) -> Result<(), ParseError> {
        match parse::parse_snapshot(bytes, features) {
            Ok(snapshot) => {
                self.load(snapshot);
                Ok(())
            }
            Err(err) => {
                warn!(error = %err, "rejected snapshot payload, keeping active snapshot");
                Err(err)
            }
        }
    }

    /// Parses a patch payload against the active snapshot and installs the
    /// result, with the same rejection behavior as [`Registry::load_bytes`].
    pub fn patch_bytes(&self, bytes: &[u8], features: &FeatureRegistry) -> Result<(), ParseError> {
        let _guard = self.lock_writer();
        let current = self.active.load_full();
        match parse::parse_patch(bytes, &current, features) {
            Ok(next) => {
                self.install(next, "patch");
                Ok(())
            }
            Err(err) => {
                warn!(error = %err, "rejected patch payload, keeping active snapshot");
                Err(err)
            }
        }
    }

    pub fn evaluate(&self, id: &FeatureId, context: &Context) -> EvaluationOutcome {
        let Some(definition) = self.get(id) else {
            return EvaluationOutcome::FlagNotFound(id.clone());
        };
        match definition.evaluate(context) {
            Ok(value) => EvaluationOutcome::Success(value),
            Err(cause) => {
                debug!(flag = %id, error = %cause, "custom predicate failed");
                EvaluationOutcome::EvaluationError {
                    key: id.clone(),
                    cause,
                }
            }
        }
    }

    pub fn explain(&self, id: &FeatureId, context: &Context) -> Result<Resolution, EvaluationError> {
        let definition = self
            .get(id)
            .ok_or_else(|| EvaluationError::FlagNotFound(id.clone()))?;
        definition.explain(context).map_err(|cause| {
            debug!(flag = %id, error = %cause, "custom predicate failed");
            EvaluationError::Predicate {
                key: id.clone(),
                cause,
            }
        })
    }

    /// Evaluates `id` and converts the result into `T`.
    ///
    /// ```
    /// use flagsnap_lib::{Context, FeatureId, FlagDefinition, Registry, Snapshot, Version};
    ///
    /// let id: FeatureId = "feature::global::darkMode".parse().unwrap();
    /// let def = FlagDefinition::builder(id.clone(), true).build().unwrap();
    /// let registry = Registry::with_snapshot(Snapshot::new([def]).unwrap());
    ///
    /// let ctx = Context::new("US", "IOS", Version::new(1, 0, 0));
    /// assert_eq!(registry.value::<bool>(&id, &ctx), Ok(true));
    /// assert!(registry.value::<String>(&id, &ctx).is_err());
    /// ```
    pub fn value<T>(&self, id: &FeatureId, context: &Context) -> Result<T, EvaluationError>
    where
        T: TryFrom<FlagValue, Error = ValueTypeMismatch>,
    {
        let value = self.evaluate(id, context).into_result()?;
        T::try_from(value).map_err(|mismatch| EvaluationError::TypeMismatch {
            key: id.clone(),
            expected: mismatch.expected,
            found: mismatch.found,
        })
    }

    /// Like [`Registry::value`] but returns `fallback` on any error.
    pub fn value_or<T>(&self, id: &FeatureId, context: &Context, fallback: T) -> T
    where
        T: TryFrom<FlagValue, Error = ValueTypeMismatch>,
    {
        match self.value(id, context) {
            Ok(value) => value,
            Err(err) => {
                warn!(flag = %id, error = %err, "using caller fallback");
                fallback
            }
        }
    }

    fn lock_writer(&self) -> MutexGuard<'_, ()> {
        // the guarded data is (), a poisoned lock carries no broken state
        self.writer.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn install(&self, snapshot: Snapshot, operation: &str) {
        let flags = snapshot.len();
        let version = snapshot.meta().and_then(|m| m.version.clone());
        self.active.store(Arc::new(snapshot));
        info!(operation, flags, version = ?version, "installed snapshot");
    }
}
