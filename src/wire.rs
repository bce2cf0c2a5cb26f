//! Serde mirror of the JSON payload format. These types only describe shape;
//! every value is checked and converted in [`crate::parse`].
//!
//! Fields without `#[serde(default)]` are required: a payload that omits one
//! is rejected as a shape error instead of being filled in.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotDocument {
    pub flags: Vec<FlagDocument>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<MetaDocument>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PatchDocument {
    #[serde(default)]
    pub flags: Vec<FlagDocument>,
    #[serde(default)]
    pub remove_keys: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<MetaDocument>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetaDocument {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub generated_at_epoch_millis: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FlagDocument {
    pub key: String,
    pub default_value: ValueDocument,
    pub salt: String,
    pub is_active: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ramp_up_allowlist: Vec<String>,
    pub rules: Vec<RuleDocument>,
    /// Declaration indices of `rules` from first to last evaluated. Absent
    /// means the order follows from specificity and the parse tie-break.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub evaluation_order: Option<Vec<usize>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleDocument {
    pub value: ValueDocument,
    pub ramp_up: f64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ramp_up_allowlist: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
    pub locales: Vec<String>,
    pub platforms: Vec<String>,
    pub version_range: VersionRangeDocument,
}

/// `{"type": "...", "value": ..., "enumClassName"?: ..., "dataClassName"?: ...}`.
/// The tag stays a string here so an unknown tag is reported as an invalid
/// value rather than a shape error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValueDocument {
    #[serde(rename = "type")]
    pub kind: String,
    pub value: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enum_class_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_class_name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VersionRangeDocument {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min: Option<VersionDocument>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<VersionDocument>,
}

pub const UNBOUNDED: &str = "UNBOUNDED";
pub const MIN_BOUND: &str = "MIN_BOUND";
pub const MAX_BOUND: &str = "MAX_BOUND";
pub const MIN_AND_MAX_BOUND: &str = "MIN_AND_MAX_BOUND";

/// Components are signed so negative numbers reach validation instead of
/// failing as a shape error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionDocument {
    pub major: i64,
    pub minor: i64,
    pub patch: i64,
}

/// Evaluation context as accepted by the wasm bridge.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContextDocument {
    #[serde(default)]
    pub locale: String,
    #[serde(default)]
    pub platform: String,
    #[serde(default)]
    pub app_version: Option<String>,
    #[serde(default)]
    pub stable_id: Option<String>,
    #[serde(default)]
    pub attributes: serde_json::Map<String, serde_json::Value>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_rule_optional_fields() {
        let rule: RuleDocument = serde_json::from_value(json!({
            "value": {"type": "BOOLEAN", "value": true},
            "rampUp": 25.0,
            "locales": [],
            "platforms": ["IOS"],
            "versionRange": {"type": "UNBOUNDED"}
        }))
        .unwrap();
        assert_eq!(rule.ramp_up, 25.0);
        assert!(rule.ramp_up_allowlist.is_empty());
        assert_eq!(rule.note, None);
        assert_eq!(rule.version_range.kind, UNBOUNDED);
    }

    #[test]
    fn test_rule_required_fields() {
        let full = json!({
            "value": {"type": "BOOLEAN", "value": true},
            "rampUp": 100.0,
            "locales": [],
            "platforms": [],
            "versionRange": {"type": "UNBOUNDED"}
        });
        for field in ["value", "rampUp", "locales", "platforms", "versionRange"] {
            let mut doc = full.clone();
            doc.as_object_mut().unwrap().remove(field);
            let err = serde_json::from_value::<RuleDocument>(doc).unwrap_err();
            assert!(err.to_string().contains(field), "{field}: {err}");
        }
    }

    #[test]
    fn test_flag_required_fields() {
        let full = json!({
            "key": "feature::global::darkMode",
            "defaultValue": {"type": "BOOLEAN", "value": false},
            "salt": "v1",
            "isActive": true,
            "rules": []
        });
        let flag: FlagDocument = serde_json::from_value(full.clone()).unwrap();
        assert!(flag.ramp_up_allowlist.is_empty());
        assert_eq!(flag.evaluation_order, None);

        for field in ["key", "defaultValue", "salt", "isActive", "rules"] {
            let mut doc = full.clone();
            doc.as_object_mut().unwrap().remove(field);
            let err = serde_json::from_value::<FlagDocument>(doc).unwrap_err();
            assert!(err.to_string().contains(field), "{field}: {err}");
        }
    }

    #[test]
    fn test_serialized_field_names() {
        let doc = PatchDocument {
            flags: vec![],
            remove_keys: vec!["feature::global::old".into()],
            meta: Some(MetaDocument {
                version: Some("7".into()),
                generated_at_epoch_millis: Some(1_700_000_000_000),
                source: None,
            }),
        };
        assert_eq!(
            serde_json::to_value(&doc).unwrap(),
            json!({
                "flags": [],
                "removeKeys": ["feature::global::old"],
                "meta": {"version": "7", "generatedAtEpochMillis": 1_700_000_000_000i64}
            })
        );
    }
}
