//! Feature flag evaluation over immutable, hot-swappable snapshots.
//!
//! A [`Snapshot`] maps [`FeatureId`]s to validated [`FlagDefinition`]s. A
//! [`Registry`] serves the active snapshot to any number of readers without
//! locking and replaces it atomically on [`Registry::load`] or
//! [`Registry::patch`]. Untrusted payloads only enter through
//! [`parse_snapshot`] and [`parse_patch`], which reject the whole payload on
//! the first problem.
//!
//! # Examples
//! ```
//! use flagsnap_lib::{
//!     Context, DeclaredType, FeatureRegistry, FlagValue, Registry, StableId, Version,
//! };
//!
//! let features = FeatureRegistry::new()
//!     .with("feature::global::darkMode".parse().unwrap(), DeclaredType::Boolean)
//!     .unwrap();
//!
//! let payload = br#"{"flags": [{
//!     "key": "feature::global::darkMode",
//!     "defaultValue": {"type": "BOOLEAN", "value": false},
//!     "salt": "v1",
//!     "isActive": true,
//!     "rules": [{
//!         "value": {"type": "BOOLEAN", "value": true},
//!         "rampUp": 50.0,
//!         "platforms": ["IOS"],
//!         "locales": [],
//!         "versionRange": {"type": "UNBOUNDED"}
//!     }]
//! }]}"#;
//!
//! let registry = Registry::new();
//! registry.load_bytes(payload, &features).unwrap();
//!
//! let ctx = Context::new("US", "IOS", Version::new(1, 0, 0))
//!     .with_stable_id(StableId::of("user-123"));
//! let id = "feature::global::darkMode".parse().unwrap();
//! // user-123 lands in bucket 8841, outside the 50% rollout
//! assert_eq!(registry.evaluate(&id, &ctx).ok(), Some(FlagValue::Boolean(false)));
//! ```

use std::sync::OnceLock;

pub mod bucket;
pub mod context;
pub mod error;
pub mod feature;
pub mod flag;
pub mod parse;
pub mod registry;
pub mod rule;
pub mod snapshot;
pub mod testfile;
pub mod value;
pub mod version;
pub mod wasm;
pub mod wire;

pub use bucket::{bucket, Rollout};
pub use context::{Atom, Context, StableId};
pub use error::{
    DefinitionError, EvaluationError, ParseError, PatchError, PredicateError, RegistryError,
};
pub use feature::{DeclaredType, FeatureDeclaration, FeatureId, FeatureRegistry, FieldType};
pub use flag::{FlagDefinition, FlagDefinitionBuilder, Reason, Resolution};
pub use parse::{
    parse_patch, parse_patch_document, parse_snapshot, parse_snapshot_with, serialize_snapshot,
    ParseOptions,
};
pub use registry::{EvaluationOutcome, Registry};
pub use rule::{predicate_fn, AttributeEquals, Predicate, Rule, TieBreak};
pub use snapshot::{Patch, Snapshot, SnapshotMeta};
pub use value::{EnumValue, FieldValue, FlagValue, RecordValue, ValueType};
pub use version::{Version, VersionRange};

static GLOBAL: OnceLock<Registry> = OnceLock::new();

/// Process-wide registry, created empty on first use. Prefer passing an
/// explicit [`Registry`] where the call sites allow it.
pub fn global() -> &'static Registry {
    GLOBAL.get_or_init(Registry::new)
}

/// Evaluates a flag against the [`global`] registry.
///
/// ```
/// use flagsnap_lib::{ff, global, Context, EvaluationOutcome, FlagDefinition, Snapshot, Version};
///
/// let id: flagsnap_lib::FeatureId = "feature::docs::welcomeBanner".parse().unwrap();
/// let def = FlagDefinition::builder(id.clone(), true).build().unwrap();
/// global().load(Snapshot::new([def]).unwrap());
///
/// let ctx = Context::new("US", "WEB", Version::new(3, 0, 0));
/// assert!(matches!(ff(&id, &ctx), EvaluationOutcome::Success(_)));
/// ```
pub fn ff(id: &FeatureId, context: &Context) -> EvaluationOutcome {
    global().evaluate(id, context)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_global_is_shared() {
        let id: FeatureId = "feature::libtest::shared".parse().unwrap();
        let def = FlagDefinition::builder(id.clone(), 5i64).build().unwrap();
        global().load(Snapshot::new([def]).unwrap());

        let ctx = Context::new("US", "IOS", Version::new(1, 0, 0));
        assert_eq!(ff(&id, &ctx), EvaluationOutcome::Success(FlagValue::Integer(5)));
        assert!(std::ptr::eq(global(), global()));
    }
}
