use core::fmt;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::RegistryError;
use crate::value::{FlagValue, FieldValue, ValueType};

const FEATURE_PREFIX: &str = "feature::";
const SEPARATOR: &str = "::";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid feature key {0:?}, expected feature::<namespace>::<key>")]
pub struct InvalidFeatureId(pub String);

/// Globally unique flag identity, written as `feature::<namespace>::<key>`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FeatureId {
    encoded: String,
    namespace_len: usize,
}

impl FeatureId {
    pub fn new(namespace: &str, key: &str) -> Result<Self, InvalidFeatureId> {
        format!("{FEATURE_PREFIX}{namespace}{SEPARATOR}{key}").parse()
    }

    pub fn as_str(&self) -> &str {
        &self.encoded
    }

    pub fn namespace(&self) -> &str {
        let start = FEATURE_PREFIX.len();
        &self.encoded[start..start + self.namespace_len]
    }

    pub fn key(&self) -> &str {
        &self.encoded[FEATURE_PREFIX.len() + self.namespace_len + SEPARATOR.len()..]
    }
}

impl FromStr for FeatureId {
    type Err = InvalidFeatureId;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || InvalidFeatureId(s.to_string());
        let rest = s.strip_prefix(FEATURE_PREFIX).ok_or_else(invalid)?;
        let (namespace, key) = rest.split_once(SEPARATOR).ok_or_else(invalid)?;
        if namespace.is_empty()
            || key.is_empty()
            || key.contains(SEPARATOR)
            || s.chars().any(char::is_whitespace)
        {
            return Err(invalid());
        }
        Ok(FeatureId {
            encoded: s.to_string(),
            namespace_len: namespace.len(),
        })
    }
}

impl fmt::Display for FeatureId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.encoded)
    }
}

/// Primitive kind of a record field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    Boolean,
    String,
    Integer,
    Double,
}

impl FieldType {
    pub fn accepts(&self, value: &FieldValue) -> bool {
        matches!(
            (self, value),
            (FieldType::Boolean, FieldValue::Boolean(_))
                | (FieldType::String, FieldValue::String(_))
                | (FieldType::Integer, FieldValue::Integer(_))
                | (FieldType::Double, FieldValue::Double(_))
        )
    }
}

/// The type a known feature was declared with, including enum variants and
/// record field schemas.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeclaredType {
    Boolean,
    String,
    Integer,
    Double,
    Enum {
        class: String,
        variants: BTreeSet<String>,
    },
    Record {
        class: String,
        fields: BTreeMap<String, FieldType>,
    },
}

impl DeclaredType {
    pub fn enumeration<I, S>(class: impl Into<String>, variants: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        DeclaredType::Enum {
            class: class.into(),
            variants: variants.into_iter().map(Into::into).collect(),
        }
    }

    pub fn record<I, S>(class: impl Into<String>, fields: I) -> Self
    where
        I: IntoIterator<Item = (S, FieldType)>,
        S: Into<String>,
    {
        DeclaredType::Record {
            class: class.into(),
            fields: fields.into_iter().map(|(k, v)| (k.into(), v)).collect(),
        }
    }

    pub fn value_type(&self) -> ValueType {
        match self {
            DeclaredType::Boolean => ValueType::Boolean,
            DeclaredType::String => ValueType::String,
            DeclaredType::Integer => ValueType::Integer,
            DeclaredType::Double => ValueType::Double,
            DeclaredType::Enum { class, .. } => ValueType::Enum(class.clone()),
            DeclaredType::Record { class, .. } => ValueType::Record(class.clone()),
        }
    }

    /// Whether `value` is a member of this type: right tag, a declared enum
    /// variant, or a record with exactly the declared fields.
    pub fn accepts(&self, value: &FlagValue) -> bool {
        match (self, value) {
            (DeclaredType::Enum { class, variants }, FlagValue::Enum { variant, class: c }) => {
                class == c && variants.contains(variant)
            }
            (DeclaredType::Record { class, fields }, FlagValue::Record { class: c, fields: f }) => {
                class == c
                    && fields.len() == f.len()
                    && fields
                        .iter()
                        .all(|(name, ty)| f.get(name).is_some_and(|v| ty.accepts(v)))
            }
            (declared, value) => declared.value_type() == value.value_type(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeclaredKind {
    Boolean,
    String,
    Integer,
    Double,
    Enum,
    Record,
}

/// Serializable form of one known feature, as found in `fsnap.toml` or passed
/// to the wasm bridge as JSON.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureDeclaration {
    pub key: String,
    #[serde(rename = "type")]
    pub kind: DeclaredKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub class: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub variants: Vec<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub fields: BTreeMap<String, FieldType>,
}

impl FeatureDeclaration {
    fn declared_type(&self) -> Result<DeclaredType, RegistryError> {
        let invalid = |reason: &str| RegistryError::InvalidDeclaration {
            key: self.key.clone(),
            reason: reason.to_string(),
        };
        let class = || {
            self.class
                .clone()
                .filter(|c| !c.is_empty())
                .ok_or_else(|| invalid("missing class name"))
        };
        Ok(match self.kind {
            DeclaredKind::Boolean => DeclaredType::Boolean,
            DeclaredKind::String => DeclaredType::String,
            DeclaredKind::Integer => DeclaredType::Integer,
            DeclaredKind::Double => DeclaredType::Double,
            DeclaredKind::Enum => {
                if self.variants.is_empty() {
                    return Err(invalid("enum declares no variants"));
                }
                DeclaredType::enumeration(class()?, self.variants.iter().cloned())
            }
            DeclaredKind::Record => DeclaredType::Record {
                class: class()?,
                fields: self.fields.clone(),
            },
        })
    }
}

/// The set of features the application knows about. Payloads that reference
/// anything else are rejected at the parse boundary.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FeatureRegistry {
    features: HashMap<FeatureId, DeclaredType>,
}

impl FeatureRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn declare(&mut self, id: FeatureId, declared: DeclaredType) -> Result<(), RegistryError> {
        if self.features.contains_key(&id) {
            return Err(RegistryError::DuplicateFeature(id));
        }
        self.features.insert(id, declared);
        Ok(())
    }

    /// Builder-style [`FeatureRegistry::declare`].
    pub fn with(mut self, id: FeatureId, declared: DeclaredType) -> Result<Self, RegistryError> {
        self.declare(id, declared)?;
        Ok(self)
    }

    pub fn from_declarations<'a, I>(declarations: I) -> Result<Self, RegistryError>
    where
        I: IntoIterator<Item = &'a FeatureDeclaration>,
    {
        let mut registry = Self::new();
        for decl in declarations {
            let id = decl
                .key
                .parse::<FeatureId>()
                .map_err(|e| RegistryError::InvalidDeclaration {
                    key: decl.key.clone(),
                    reason: e.to_string(),
                })?;
            registry.declare(id, decl.declared_type()?)?;
        }
        Ok(registry)
    }

    pub fn declared_type(&self, id: &FeatureId) -> Option<&DeclaredType> {
        self.features.get(id)
    }

    pub fn contains(&self, id: &FeatureId) -> bool {
        self.features.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.features.len()
    }

    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }

    pub fn ids(&self) -> impl Iterator<Item = &FeatureId> {
        self.features.keys()
    }

    pub fn namespaces(&self) -> BTreeSet<&str> {
        self.features.keys().map(FeatureId::namespace).collect()
    }

    pub fn features_in<'a>(&'a self, namespace: &'a str) -> impl Iterator<Item = &'a FeatureId> + 'a {
        self.features
            .keys()
            .filter(move |id| id.namespace() == namespace)
    }
}
