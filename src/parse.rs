//! The trust boundary: untrusted JSON bytes in, fully validated [`Snapshot`]s
//! or [`Patch`]es out. Every value is decoded against the type the feature was
//! declared with in the [`FeatureRegistry`]. Any failure rejects the whole
//! payload.
//!
//! Only structure and types are checked. A rule that targets a platform no
//! client reports, or a 0% rollout, is accepted here; see the CLI `lint`
//! command for those.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{TimeZone, Utc};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::debug;

use crate::bucket::Rollout;
use crate::context::StableId;
use crate::error::ParseError;
use crate::feature::{DeclaredType, FeatureId, FeatureRegistry, FieldType};
use crate::flag::FlagDefinition;
use crate::rule::{evaluation_order, Rule, TieBreak};
use crate::snapshot::{Patch, Snapshot, SnapshotMeta};
use crate::value::{FieldValue, FlagValue, ValueKind};
use crate::version::{Version, VersionRange};
use crate::wire::{
    FlagDocument, MetaDocument, PatchDocument, RuleDocument, SnapshotDocument, ValueDocument,
    VersionDocument, VersionRangeDocument, MAX_BOUND, MIN_AND_MAX_BOUND, MIN_BOUND, UNBOUNDED,
};

/// Knobs for building definitions out of a payload.
#[derive(Debug, Clone, Copy, Default)]
pub struct ParseOptions {
    pub tie_break: TieBreak,
}

pub fn parse_snapshot(bytes: &[u8], features: &FeatureRegistry) -> Result<Snapshot, ParseError> {
    parse_snapshot_with(bytes, features, &ParseOptions::default())
}

pub fn parse_snapshot_with(
    bytes: &[u8],
    features: &FeatureRegistry,
    options: &ParseOptions,
) -> Result<Snapshot, ParseError> {
    let doc: SnapshotDocument = decode(bytes)?;
    let definitions = convert_flags(&doc.flags, features, options)?;
    let snapshot = Snapshot::new(definitions)
        .map_err(|e| ParseError::InvalidSnapshot(e.to_string()))?;
    let snapshot = match doc.meta.as_ref().map(convert_meta).transpose()? {
        Some(meta) => snapshot.with_meta(meta),
        None => snapshot,
    };
    debug!(flags = snapshot.len(), "parsed snapshot payload");
    Ok(snapshot)
}

/// Parses a patch payload and applies it to `current`, returning the new
/// snapshot. `current` itself is never modified.
pub fn parse_patch(
    bytes: &[u8],
    current: &Snapshot,
    features: &FeatureRegistry,
) -> Result<Snapshot, ParseError> {
    parse_patch_with(bytes, current, features, &ParseOptions::default())
}

pub fn parse_patch_with(
    bytes: &[u8],
    current: &Snapshot,
    features: &FeatureRegistry,
    options: &ParseOptions,
) -> Result<Snapshot, ParseError> {
    let patch = parse_patch_document_with(bytes, features, options)?;
    Ok(current.apply(&patch)?)
}

/// Parses a patch payload without applying it.
///
/// Removing a known feature that is not in the snapshot is a no-op when the
/// patch is applied. Removing a feature that is not declared at all is
/// [`ParseError::FeatureNotFound`].
pub fn parse_patch_document(bytes: &[u8], features: &FeatureRegistry) -> Result<Patch, ParseError> {
    parse_patch_document_with(bytes, features, &ParseOptions::default())
}

pub fn parse_patch_document_with(
    bytes: &[u8],
    features: &FeatureRegistry,
    options: &ParseOptions,
) -> Result<Patch, ParseError> {
    let doc: PatchDocument = decode(bytes)?;

    let mut patch = Patch::new();
    for key in &doc.remove_keys {
        let id = known_feature(key, features)?;
        patch = patch.remove(id);
    }
    for definition in convert_flags(&doc.flags, features, options)? {
        patch = patch.upsert(definition);
    }
    if let Some(meta) = doc.meta.as_ref().map(convert_meta).transpose()? {
        patch = patch.with_meta(meta);
    }
    debug!(
        upserts = doc.flags.len(),
        removals = patch.removals().len(),
        "parsed patch payload"
    );
    Ok(patch)
}

/// Encodes `snapshot` in the wire format. Custom predicates exist only in
/// code and are left out, so a rule carrying one comes back without it.
pub fn serialize_snapshot(snapshot: &Snapshot) -> serde_json::Result<Vec<u8>> {
    serde_json::to_vec(&snapshot_document(snapshot))
}

pub fn snapshot_document(snapshot: &Snapshot) -> SnapshotDocument {
    SnapshotDocument {
        flags: snapshot.flags().map(|def| flag_document(def)).collect(),
        meta: snapshot.meta().map(meta_document),
    }
}

fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, ParseError> {
    let value: Value =
        serde_json::from_slice(bytes).map_err(|e| ParseError::InvalidJson(e.to_string()))?;
    serde_json::from_value(value).map_err(|e| ParseError::InvalidSnapshot(e.to_string()))
}

fn known_feature(key: &str, features: &FeatureRegistry) -> Result<FeatureId, ParseError> {
    let id: FeatureId = key
        .parse()
        .map_err(|e: crate::feature::InvalidFeatureId| ParseError::InvalidSnapshot(e.to_string()))?;
    if !features.contains(&id) {
        return Err(ParseError::FeatureNotFound(key.to_string()));
    }
    Ok(id)
}

fn convert_flags(
    flags: &[FlagDocument],
    features: &FeatureRegistry,
    options: &ParseOptions,
) -> Result<Vec<FlagDefinition>, ParseError> {
    let mut seen = BTreeSet::new();
    let mut definitions = Vec::with_capacity(flags.len());
    for flag in flags {
        if !seen.insert(flag.key.as_str()) {
            return Err(ParseError::InvalidSnapshot(format!(
                "feature {} appears more than once",
                flag.key
            )));
        }
        definitions.push(convert_flag(flag, features, options)?);
    }
    Ok(definitions)
}

fn convert_flag(
    doc: &FlagDocument,
    features: &FeatureRegistry,
    options: &ParseOptions,
) -> Result<FlagDefinition, ParseError> {
    let key = doc.key.as_str();
    let id = known_feature(key, features)?;
    let declared = features
        .declared_type(&id)
        .ok_or_else(|| ParseError::FeatureNotFound(key.to_string()))?;

    let default = decode_value(key, &doc.default_value, declared)?;
    let mut builder = FlagDefinition::builder(id, default)
        .salt(doc.salt.clone())
        .active(doc.is_active)
        .allowlist(stable_ids(key, &doc.ramp_up_allowlist)?)
        .tie_break(options.tie_break);

    for rule in &doc.rules {
        let value = decode_value(key, &rule.value, declared)?;
        builder = builder.rule(convert_rule(key, rule)?, value);
    }
    if let Some(order) = &doc.evaluation_order {
        builder = builder.evaluation_order(order.clone());
    }
    Ok(builder.build()?)
}

fn convert_rule(key: &str, doc: &RuleDocument) -> Result<Rule, ParseError> {
    let rollout = Rollout::new(doc.ramp_up).map_err(|_| ParseError::InvalidRollout {
        key: key.to_string(),
        value: doc.ramp_up,
    })?;
    let mut rule = Rule::new()
        .platforms(doc.platforms.iter().cloned())
        .locales(doc.locales.iter().cloned())
        .version_range(convert_range(key, &doc.version_range)?)
        .rollout(rollout)
        .allowlist(stable_ids(key, &doc.ramp_up_allowlist)?);
    if let Some(note) = &doc.note {
        rule = rule.note(note.clone());
    }
    Ok(rule)
}

fn stable_ids(key: &str, ids: &[String]) -> Result<Vec<StableId>, ParseError> {
    ids.iter()
        .map(|raw| {
            StableId::from_hex(raw).map_err(|_| ParseError::InvalidStableId {
                key: key.to_string(),
                value: raw.clone(),
            })
        })
        .collect()
}

fn convert_range(key: &str, doc: &VersionRangeDocument) -> Result<VersionRange, ParseError> {
    let invalid = |reason: String| ParseError::InvalidVersionRange {
        key: key.to_string(),
        reason,
    };
    let version = |v: &VersionDocument| -> Result<Version, ParseError> {
        let component = |n: i64| {
            u32::try_from(n).map_err(|_| invalid(format!("version component {n} is out of range")))
        };
        Ok(Version::new(
            component(v.major)?,
            component(v.minor)?,
            component(v.patch)?,
        ))
    };

    match (doc.kind.as_str(), &doc.min, &doc.max) {
        (UNBOUNDED, None, None) => Ok(VersionRange::Unbounded),
        (MIN_BOUND, Some(min), None) => Ok(VersionRange::at_least(version(min)?)),
        (MAX_BOUND, None, Some(max)) => Ok(VersionRange::at_most(version(max)?)),
        (MIN_AND_MAX_BOUND, Some(min), Some(max)) => {
            VersionRange::between(version(min)?, version(max)?).map_err(|e| invalid(e.to_string()))
        }
        (UNBOUNDED | MIN_BOUND | MAX_BOUND | MIN_AND_MAX_BOUND, min, max) => Err(invalid(format!(
            "{} range with min {} and max {}",
            doc.kind,
            if min.is_some() { "present" } else { "absent" },
            if max.is_some() { "present" } else { "absent" },
        ))),
        (other, _, _) => Err(invalid(format!("unknown range type {other:?}"))),
    }
}

fn decode_value(
    key: &str,
    doc: &ValueDocument,
    declared: &DeclaredType,
) -> Result<FlagValue, ParseError> {
    let invalid = |reason: String| ParseError::InvalidValue {
        key: key.to_string(),
        reason,
    };
    let kind = ValueKind::from_wire(&doc.kind)
        .ok_or_else(|| invalid(format!("unknown value type {:?}", doc.kind)))?;
    let expected = declared.value_type();
    if kind != expected.kind() {
        return Err(invalid(format!("expected {expected}, found {kind}")));
    }
    let wrong_json = || invalid(format!("{} is not a valid {kind} value", doc.value));

    let value = match declared {
        DeclaredType::Boolean => doc.value.as_bool().map(FlagValue::Boolean).ok_or_else(wrong_json)?,
        DeclaredType::String => doc
            .value
            .as_str()
            .map(FlagValue::from)
            .ok_or_else(wrong_json)?,
        DeclaredType::Integer => doc.value.as_i64().map(FlagValue::Integer).ok_or_else(wrong_json)?,
        DeclaredType::Double => doc.value.as_f64().map(FlagValue::Double).ok_or_else(wrong_json)?,
        DeclaredType::Enum { class, .. } => {
            check_class(doc.enum_class_name.as_deref(), class).map_err(invalid)?;
            let variant = doc.value.as_str().ok_or_else(wrong_json)?;
            FlagValue::enumeration(class.clone(), variant)
        }
        DeclaredType::Record { class, fields } => {
            check_class(doc.data_class_name.as_deref(), class).map_err(invalid)?;
            let object = doc.value.as_object().ok_or_else(wrong_json)?;
            let mut decoded = BTreeMap::new();
            for (name, raw) in object {
                let field_type = fields
                    .get(name)
                    .ok_or_else(|| invalid(format!("{class} has no field {name:?}")))?;
                let field = decode_field(*field_type, raw).ok_or_else(|| {
                    invalid(format!("field {name:?} of {class} is not a valid {field_type:?}"))
                })?;
                decoded.insert(name.clone(), field);
            }
            if let Some(missing) = fields.keys().find(|name| !decoded.contains_key(*name)) {
                return Err(invalid(format!("{class} is missing field {missing:?}")));
            }
            FlagValue::Record {
                class: class.clone(),
                fields: decoded,
            }
        }
    };

    if !declared.accepts(&value) {
        return Err(invalid(format!("{value:?} is not a member of {expected}")));
    }
    Ok(value)
}

fn check_class(found: Option<&str>, declared: &str) -> Result<(), String> {
    match found {
        Some(name) if name != declared => Err(format!("class {name:?} does not match {declared}")),
        _ => Ok(()),
    }
}

// integers are accepted where a double is declared
fn decode_field(field_type: FieldType, raw: &Value) -> Option<FieldValue> {
    match field_type {
        FieldType::Boolean => raw.as_bool().map(FieldValue::Boolean),
        FieldType::String => raw.as_str().map(|s| FieldValue::String(s.to_string())),
        FieldType::Integer => raw.as_i64().map(FieldValue::Integer),
        FieldType::Double => raw.as_f64().map(FieldValue::Double),
    }
}

fn convert_meta(doc: &MetaDocument) -> Result<SnapshotMeta, ParseError> {
    let generated_at = doc
        .generated_at_epoch_millis
        .map(|ms| {
            Utc.timestamp_millis_opt(ms).single().ok_or_else(|| {
                ParseError::InvalidSnapshot(format!("generatedAtEpochMillis {ms} is out of range"))
            })
        })
        .transpose()?;
    Ok(SnapshotMeta {
        version: doc.version.clone(),
        generated_at,
        source: doc.source.clone(),
    })
}

fn meta_document(meta: &SnapshotMeta) -> MetaDocument {
    MetaDocument {
        version: meta.version.clone(),
        generated_at_epoch_millis: meta.generated_at.map(|t| t.timestamp_millis()),
        source: meta.source.clone(),
    }
}

fn flag_document(def: &FlagDefinition) -> FlagDocument {
    // the order is only written out when parsing with the default tie-break
    // would not reproduce it
    let derived = evaluation_order(def.bounds().iter().map(|b| &b.rule), TieBreak::Note);
    let order = (def.order() != derived.as_slice()).then(|| def.order().to_vec());
    FlagDocument {
        key: def.id().to_string(),
        default_value: value_document(def.default_value()),
        salt: def.salt().to_string(),
        is_active: def.is_active(),
        ramp_up_allowlist: def.allowlist().iter().map(|id| id.to_string()).collect(),
        rules: def
            .bounds()
            .iter()
            .map(|bound| {
                if bound.rule.custom_predicate().is_some() {
                    debug!(flag = %def.id(), "custom predicate is not serializable, dropping it");
                }
                rule_document(&bound.rule, &bound.value)
            })
            .collect(),
        evaluation_order: order,
    }
}

fn rule_document(rule: &Rule, value: &FlagValue) -> RuleDocument {
    RuleDocument {
        value: value_document(value),
        ramp_up: rule.rollout_share().percent(),
        ramp_up_allowlist: rule.allowed_ids().iter().map(|id| id.to_string()).collect(),
        note: rule.note_text().map(str::to_string),
        locales: rule.locale_set().iter().cloned().collect(),
        platforms: rule.platform_set().iter().cloned().collect(),
        version_range: range_document(rule.range()),
    }
}

fn range_document(range: VersionRange) -> VersionRangeDocument {
    let kind = match range {
        VersionRange::Unbounded => UNBOUNDED,
        VersionRange::MinBound(_) => MIN_BOUND,
        VersionRange::MaxBound(_) => MAX_BOUND,
        VersionRange::Bounded { .. } => MIN_AND_MAX_BOUND,
    };
    let version = |v: Version| VersionDocument {
        major: v.major.into(),
        minor: v.minor.into(),
        patch: v.patch.into(),
    };
    VersionRangeDocument {
        kind: kind.to_string(),
        min: range.min().map(version),
        max: range.max().map(version),
    }
}

pub(crate) fn value_document(value: &FlagValue) -> ValueDocument {
    let kind = value.value_type().kind().as_wire().to_string();
    let plain = |value: Value| ValueDocument {
        kind: kind.clone(),
        value,
        enum_class_name: None,
        data_class_name: None,
    };
    match value {
        FlagValue::Boolean(b) => plain(Value::from(*b)),
        FlagValue::String(s) => plain(Value::from(s.as_str())),
        FlagValue::Integer(i) => plain(Value::from(*i)),
        FlagValue::Double(d) => plain(Value::from(*d)),
        FlagValue::Enum { variant, class } => ValueDocument {
            enum_class_name: Some(class.clone()),
            ..plain(Value::from(variant.as_str()))
        },
        FlagValue::Record { class, fields } => {
            let object = fields
                .iter()
                .map(|(name, field)| {
                    let json = match field {
                        FieldValue::Boolean(b) => Value::from(*b),
                        FieldValue::String(s) => Value::from(s.as_str()),
                        FieldValue::Integer(i) => Value::from(*i),
                        FieldValue::Double(d) => Value::from(*d),
                    };
                    (name.clone(), json)
                })
                .collect::<serde_json::Map<_, _>>();
            ValueDocument {
                data_class_name: Some(class.clone()),
                ..plain(Value::Object(object))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::Context;
    use crate::rule::predicate_fn;
    use serde_json::json;

    fn features() -> FeatureRegistry {
        FeatureRegistry::new()
            .with("feature::global::darkMode".parse().unwrap(), DeclaredType::Boolean)
            .unwrap()
            .with("feature::global::timeout".parse().unwrap(), DeclaredType::Integer)
            .unwrap()
            .with("feature::global::ratio".parse().unwrap(), DeclaredType::Double)
            .unwrap()
            .with(
                "feature::global::theme".parse().unwrap(),
                DeclaredType::enumeration("Theme", ["LIGHT", "DARK"]),
            )
            .unwrap()
            .with(
                "feature::global::retry".parse().unwrap(),
                DeclaredType::record(
                    "RetryPolicy",
                    [("attempts", FieldType::Integer), ("backoff", FieldType::Double)],
                ),
            )
            .unwrap()
    }

    fn bytes(value: serde_json::Value) -> Vec<u8> {
        serde_json::to_vec(&value).unwrap()
    }

    fn single_flag(flag: serde_json::Value) -> Vec<u8> {
        bytes(json!({ "flags": [flag] }))
    }

    /// A flag document with every required field and no rules.
    fn flag_json(key: &str, default: serde_json::Value) -> serde_json::Value {
        json!({
            "key": key,
            "defaultValue": default,
            "salt": "v1",
            "isActive": true,
            "rules": []
        })
    }

    /// An unrestricted 100% rule returning `value`.
    fn rule_json(value: serde_json::Value) -> serde_json::Value {
        json!({
            "value": value,
            "rampUp": 100.0,
            "locales": [],
            "platforms": [],
            "versionRange": {"type": "UNBOUNDED"}
        })
    }

    fn with(mut doc: serde_json::Value, fields: serde_json::Value) -> serde_json::Value {
        if let (Some(doc), Some(fields)) = (doc.as_object_mut(), fields.as_object()) {
            for (name, value) in fields {
                doc.insert(name.clone(), value.clone());
            }
        }
        doc
    }

    fn without(mut doc: serde_json::Value, field: &str) -> serde_json::Value {
        doc.as_object_mut().unwrap().remove(field);
        doc
    }

    fn dark_mode() -> serde_json::Value {
        flag_json(
            "feature::global::darkMode",
            json!({"type": "BOOLEAN", "value": false}),
        )
    }

    fn dark_mode_with_rule(rule: serde_json::Value) -> Vec<u8> {
        single_flag(with(dark_mode(), json!({ "rules": [rule] })))
    }

    fn on() -> serde_json::Value {
        json!({"type": "BOOLEAN", "value": true})
    }

    #[test]
    fn test_parse_full_snapshot() {
        let payload = bytes(json!({
            "flags": [
                {
                    "key": "feature::global::darkMode",
                    "defaultValue": {"type": "BOOLEAN", "value": false},
                    "salt": "v1",
                    "isActive": true,
                    "rules": [{
                        "value": {"type": "BOOLEAN", "value": true},
                        "rampUp": 50.0,
                        "rampUpAllowlist": ["0A1B2C3D"],
                        "note": "ios beta",
                        "locales": [],
                        "platforms": ["IOS"],
                        "versionRange": {
                            "type": "MIN_AND_MAX_BOUND",
                            "min": {"major": 1, "minor": 0, "patch": 0},
                            "max": {"major": 2, "minor": 0, "patch": 0}
                        }
                    }]
                },
                {
                    "key": "feature::global::theme",
                    "defaultValue": {"type": "ENUM", "value": "LIGHT", "enumClassName": "Theme"},
                    "salt": "v1",
                    "isActive": true,
                    "rules": []
                }
            ],
            "meta": {"version": "42", "generatedAtEpochMillis": 1700000000000i64, "source": "test"}
        }));
        let snapshot = parse_snapshot(&payload, &features()).unwrap();
        assert_eq!(snapshot.len(), 2);

        let meta = snapshot.meta().unwrap();
        assert_eq!(meta.version.as_deref(), Some("42"));
        assert_eq!(meta.generated_at.unwrap().timestamp_millis(), 1_700_000_000_000);

        let dark = snapshot
            .get(&"feature::global::darkMode".parse().unwrap())
            .unwrap();
        let rule = &dark.bounds()[0].rule;
        assert_eq!(rule.rollout_share().threshold(), 5000);
        assert_eq!(rule.note_text(), Some("ios beta"));
        assert!(rule.allowed_ids().contains(&StableId::from_hex("0a1b2c3d").unwrap()));
        assert_eq!(
            rule.range(),
            VersionRange::between(Version::new(1, 0, 0), Version::new(2, 0, 0)).unwrap()
        );
    }

    #[test]
    fn test_not_json() {
        let err = parse_snapshot(b"{flags: nope", &features()).unwrap_err();
        assert!(matches!(err, ParseError::InvalidJson(_)));
    }

    #[test]
    fn test_wrong_shape() {
        let err = parse_snapshot(&bytes(json!({"flag": []})), &features()).unwrap_err();
        assert!(matches!(err, ParseError::InvalidSnapshot(_)));

        let err = parse_snapshot(&bytes(json!({"flags": {}})), &features()).unwrap_err();
        assert!(matches!(err, ParseError::InvalidSnapshot(_)));

        let err = parse_snapshot(&single_flag(flag_json("darkMode", on())), &features()).unwrap_err();
        assert!(matches!(err, ParseError::InvalidSnapshot(_)));
    }

    #[test]
    fn test_missing_flag_fields() {
        for field in ["key", "defaultValue", "salt", "isActive", "rules"] {
            let err = parse_snapshot(&single_flag(without(dark_mode(), field)), &features())
                .unwrap_err();
            assert!(matches!(err, ParseError::InvalidSnapshot(_)), "{field}: {err}");
        }
    }

    #[test]
    fn test_missing_rule_fields() {
        // a rule without rampUp must not turn into a 100% rollout
        for field in ["value", "rampUp", "locales", "platforms", "versionRange"] {
            let payload = dark_mode_with_rule(without(rule_json(on()), field));
            let err = parse_snapshot(&payload, &features()).unwrap_err();
            assert!(matches!(err, ParseError::InvalidSnapshot(_)), "{field}: {err}");
        }
        assert!(parse_snapshot(&dark_mode_with_rule(rule_json(on())), &features()).is_ok());
    }

    #[test]
    fn test_duplicate_key_in_payload() {
        let flag = with(dark_mode(), json!({"defaultValue": on()}));
        let err = parse_snapshot(&bytes(json!({"flags": [flag.clone(), flag]})), &features())
            .unwrap_err();
        assert!(matches!(err, ParseError::InvalidSnapshot(_)));
    }

    #[test]
    fn test_unknown_feature() {
        let err = parse_snapshot(
            &single_flag(flag_json("feature::global::unknown", on())),
            &features(),
        )
        .unwrap_err();
        assert_eq!(err, ParseError::FeatureNotFound("feature::global::unknown".into()));
    }

    #[test]
    fn test_value_must_match_declared_type() {
        let cases = [
            json!({"type": "STRING", "value": "true"}),
            json!({"type": "BOOLEAN", "value": "true"}),
            json!({"type": "BOOL", "value": true}),
        ];
        for value in cases {
            let err = parse_snapshot(
                &single_flag(flag_json("feature::global::darkMode", value)),
                &features(),
            )
            .unwrap_err();
            assert!(matches!(err, ParseError::InvalidValue { .. }), "{err}");
        }

        // 3.5 is not an integer
        let err = parse_snapshot(
            &single_flag(flag_json(
                "feature::global::timeout",
                json!({"type": "INT", "value": 3.5}),
            )),
            &features(),
        )
        .unwrap_err();
        assert!(matches!(err, ParseError::InvalidValue { .. }));
    }

    #[test]
    fn test_enum_membership() {
        let theme = |value: serde_json::Value| {
            parse_snapshot(
                &single_flag(flag_json("feature::global::theme", value)),
                &features(),
            )
        };
        assert!(theme(json!({"type": "ENUM", "value": "DARK"})).is_ok());
        assert!(matches!(
            theme(json!({"type": "ENUM", "value": "SEPIA", "enumClassName": "Theme"})),
            Err(ParseError::InvalidValue { .. })
        ));
        assert!(matches!(
            theme(json!({"type": "ENUM", "value": "DARK", "enumClassName": "Palette"})),
            Err(ParseError::InvalidValue { .. })
        ));
    }

    #[test]
    fn test_record_fields() {
        let retry = |value: serde_json::Value| {
            parse_snapshot(
                &single_flag(flag_json(
                    "feature::global::retry",
                    json!({"type": "DATA_CLASS", "dataClassName": "RetryPolicy", "value": value}),
                )),
                &features(),
            )
        };
        let snapshot = retry(json!({"attempts": 3, "backoff": 2})).unwrap();
        let def = snapshot.get(&"feature::global::retry".parse().unwrap()).unwrap();
        assert_eq!(
            def.default_value(),
            &FlagValue::record(
                "RetryPolicy",
                [
                    ("attempts", FieldValue::Integer(3)),
                    ("backoff", FieldValue::Double(2.0)),
                ]
            )
        );

        assert!(matches!(
            retry(json!({"attempts": 3})),
            Err(ParseError::InvalidValue { .. })
        ));
        assert!(matches!(
            retry(json!({"attempts": 3, "backoff": 1.5, "jitter": true})),
            Err(ParseError::InvalidValue { .. })
        ));
        assert!(matches!(
            retry(json!({"attempts": 1.5, "backoff": 1.5})),
            Err(ParseError::InvalidValue { .. })
        ));
    }

    #[test]
    fn test_version_range_shapes() {
        let with_range = |range: serde_json::Value| {
            parse_snapshot(
                &dark_mode_with_rule(with(rule_json(on()), json!({ "versionRange": range }))),
                &features(),
            )
        };
        let v = |major: i64| json!({"major": major, "minor": 0, "patch": 0});

        assert!(with_range(json!({"type": "MIN_BOUND", "min": v(1)})).is_ok());
        assert!(with_range(json!({"type": "MAX_BOUND", "max": v(1)})).is_ok());
        for bad in [
            json!({"type": "MIN_AND_MAX_BOUND", "min": v(1)}),
            json!({"type": "MIN_BOUND"}),
            json!({"type": "MIN_AND_MAX_BOUND", "min": v(3), "max": v(2)}),
            json!({"type": "MIN_BOUND", "min": v(-1)}),
            json!({"type": "BETWEEN", "min": v(1), "max": v(2)}),
        ] {
            assert!(
                matches!(with_range(bad.clone()), Err(ParseError::InvalidVersionRange { .. })),
                "{bad}"
            );
        }
    }

    #[test]
    fn test_rollout_and_stable_id_ranges() {
        let err = parse_snapshot(
            &dark_mode_with_rule(with(rule_json(on()), json!({"rampUp": 100.5}))),
            &features(),
        )
        .unwrap_err();
        assert_eq!(
            err,
            ParseError::InvalidRollout {
                key: "feature::global::darkMode".into(),
                value: 100.5,
            }
        );

        let err = parse_snapshot(
            &single_flag(with(dark_mode(), json!({"rampUpAllowlist": ["user-123"]}))),
            &features(),
        )
        .unwrap_err();
        assert_eq!(
            err,
            ParseError::InvalidStableId {
                key: "feature::global::darkMode".into(),
                value: "user-123".into(),
            }
        );
    }

    #[test]
    fn test_semantic_nonsense_is_accepted() {
        let rule = with(rule_json(on()), json!({"rampUp": 0, "platforms": ["TOASTER"]}));
        let payload = single_flag(with(dark_mode(), json!({"isActive": false, "rules": [rule]})));
        assert!(parse_snapshot(&payload, &features()).is_ok());
    }

    #[test]
    fn test_evaluation_order_in_payload() {
        let ios = |note: &str, value: bool| {
            with(
                rule_json(json!({"type": "BOOLEAN", "value": value})),
                json!({"platforms": ["IOS"], "note": note}),
            )
        };
        let flag = with(dark_mode(), json!({"rules": [ios("zeta", true), ios("alpha", false)]}));
        let id: FeatureId = "feature::global::darkMode".parse().unwrap();
        let ctx = Context::new("US", "IOS", Version::new(1, 0, 0));

        let by_note = parse_snapshot(&single_flag(flag.clone()), &features()).unwrap();
        assert_eq!(by_note.get(&id).unwrap().order(), &[1, 0]);

        let fixed = single_flag(with(flag.clone(), json!({"evaluationOrder": [0, 1]})));
        let fixed = parse_snapshot(&fixed, &features()).unwrap();
        assert_eq!(fixed.get(&id).unwrap().order(), &[0, 1]);
        assert_eq!(fixed.get(&id).unwrap().evaluate(&ctx), Ok(FlagValue::Boolean(true)));

        let err = parse_snapshot(
            &single_flag(with(flag, json!({"evaluationOrder": [0, 0]}))),
            &features(),
        )
        .unwrap_err();
        assert!(matches!(err, ParseError::InvalidSnapshot(_)));
    }

    #[test]
    fn test_patch_removals() {
        let current = parse_snapshot(&single_flag(dark_mode()), &features()).unwrap();

        // known but absent is a no-op
        let next = parse_patch(
            &bytes(json!({"flags": [], "removeKeys": ["feature::global::darkMode", "feature::global::theme"]})),
            &current,
            &features(),
        )
        .unwrap();
        assert!(next.is_empty());
        assert_eq!(current.len(), 1);

        let err = parse_patch(
            &bytes(json!({"flags": [], "removeKeys": ["feature::global::nope"]})),
            &current,
            &features(),
        )
        .unwrap_err();
        assert_eq!(err, ParseError::FeatureNotFound("feature::global::nope".into()));
    }

    #[test]
    fn test_serialize_drops_predicates() {
        let id: FeatureId = "feature::global::darkMode".parse().unwrap();
        let def = FlagDefinition::builder(id.clone(), false)
            .rule(
                Rule::new()
                    .platform("IOS")
                    .predicate(predicate_fn("always", |_| Ok(true))),
                true,
            )
            .build()
            .unwrap();
        let snapshot = Snapshot::new([def]).unwrap();
        let encoded = serialize_snapshot(&snapshot).unwrap();
        let decoded = parse_snapshot(&encoded, &features()).unwrap();
        let rule = &decoded.get(&id).unwrap().bounds()[0].rule;
        assert!(rule.custom_predicate().is_none());
        assert_eq!(rule.platform_set().len(), 1);

        let ctx = Context::new("US", "IOS", Version::new(1, 0, 0));
        assert_eq!(decoded.get(&id).unwrap().evaluate(&ctx), Ok(FlagValue::Boolean(true)));
    }

    #[test]
    fn test_order_written_only_when_needed() {
        let id: FeatureId = "feature::global::darkMode".parse().unwrap();
        let builder = FlagDefinition::builder(id, false)
            .rule(Rule::new().platform("IOS").note("zeta"), true)
            .rule(Rule::new().platform("IOS").note("alpha"), false);

        let by_note = builder.clone().build().unwrap();
        assert_eq!(flag_document(&by_note).evaluation_order, None);

        let by_decl = builder.tie_break(TieBreak::DeclarationOrder).build().unwrap();
        assert_eq!(flag_document(&by_decl).evaluation_order, Some(vec![0, 1]));
    }

    #[test]
    fn test_wire_shape_of_values() {
        let doc = value_document(&FlagValue::enumeration("Theme", "DARK"));
        assert_eq!(
            serde_json::to_value(&doc).unwrap(),
            json!({"type": "ENUM", "value": "DARK", "enumClassName": "Theme"})
        );
        let doc = value_document(&FlagValue::Integer(5000));
        assert_eq!(
            serde_json::to_value(&doc).unwrap(),
            json!({"type": "INT", "value": 5000})
        );
    }
}
