use core::fmt;
use std::collections::HashMap;
use std::str::FromStr;

use crate::version::Version;

/// Custom attribute value. Only consumed by a rule's custom predicate.
#[derive(Debug, Clone, PartialEq)]
pub enum Atom {
    String(String),
    Number(i64),
    Float(f64),
    Boolean(bool),
}

impl fmt::Display for Atom {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Atom::String(string) => write!(f, "{string}"),
            Atom::Number(number) => write!(f, "{number}"),
            Atom::Float(float) => write!(f, "{float}"),
            Atom::Boolean(bool) => write!(f, "{bool}"),
        }
    }
}

impl From<&str> for Atom {
    fn from(value: &str) -> Self {
        Atom::String(value.to_string())
    }
}

impl From<String> for Atom {
    fn from(value: String) -> Self {
        Atom::String(value)
    }
}

impl From<i64> for Atom {
    fn from(value: i64) -> Self {
        Atom::Number(value)
    }
}

impl From<f64> for Atom {
    fn from(value: f64) -> Self {
        Atom::Float(value)
    }
}

impl From<bool> for Atom {
    fn from(value: bool) -> Self {
        Atom::Boolean(value)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("stable id {0:?} is not a non-empty hex string")]
pub struct InvalidStableId(pub String);

/// Lower-case hex identifier of an end user or device, the input to bucketing.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct StableId(String);

impl StableId {
    /// Accepts an already hex-encoded id. Upper-case digits are normalized.
    pub fn from_hex(hex_id: &str) -> Result<Self, InvalidStableId> {
        if hex_id.is_empty() || !hex_id.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(InvalidStableId(hex_id.to_string()));
        }
        Ok(StableId(hex_id.to_ascii_lowercase()))
    }

    /// Hex-encodes an arbitrary raw identifier, e.g. `"user-123"` becomes
    /// `"757365722d313233"`.
    pub fn of(raw: &str) -> Self {
        StableId(hex::encode(raw.as_bytes()))
    }

    pub fn as_hex(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for StableId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for StableId {
    type Err = InvalidStableId;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        StableId::from_hex(s)
    }
}

/// Per-call evaluation inputs. Never stored by the engine.
#[derive(Debug, Clone, PartialEq)]
pub struct Context {
    pub locale: String,
    pub platform: String,
    pub app_version: Version,
    pub stable_id: Option<StableId>,
    attributes: HashMap<String, Atom>,
}

impl Context {
    pub fn new(locale: impl Into<String>, platform: impl Into<String>, app_version: Version) -> Self {
        Self {
            locale: locale.into(),
            platform: platform.into(),
            app_version,
            stable_id: None,
            attributes: HashMap::new(),
        }
    }

    pub fn with_stable_id(mut self, stable_id: StableId) -> Self {
        self.stable_id = Some(stable_id);
        self
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<Atom>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    pub fn attribute(&self, key: &str) -> Option<&Atom> {
        self.attributes.get(key)
    }

    pub fn attributes(&self) -> &HashMap<String, Atom> {
        &self.attributes
    }
}
