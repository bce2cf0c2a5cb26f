use crate::feature::FeatureId;
use crate::value::{ValueKind, ValueType};

/// Rejection of an external payload. Nothing from a rejected payload is ever
/// installed.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ParseError {
    #[error("payload is not valid JSON: {0}")]
    InvalidJson(String),
    #[error("payload has an invalid shape: {0}")]
    InvalidSnapshot(String),
    #[error("feature {0} is not registered")]
    FeatureNotFound(String),
    #[error("invalid value for {key}: {reason}")]
    InvalidValue { key: String, reason: String },
    #[error("invalid version range for {key}: {reason}")]
    InvalidVersionRange { key: String, reason: String },
    #[error("invalid rollout {value} for {key}, expected 0 to 100")]
    InvalidRollout { key: String, value: f64 },
    #[error("invalid stable id {value:?} for {key}")]
    InvalidStableId { key: String, value: String },
}

/// A flag definition whose values disagree with its declared type.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum DefinitionError {
    #[error("{key}: rule {index} returns {found}, flag is {expected}")]
    TypeMismatch {
        key: FeatureId,
        index: usize,
        expected: ValueType,
        found: ValueType,
    },
    #[error("{key}: non-finite double values cannot be represented")]
    NonFiniteValue { key: FeatureId },
    #[error("{key}: invalid evaluation order: {reason}")]
    InvalidOrder { key: FeatureId, reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    #[error("feature {0} is declared more than once")]
    DuplicateFeature(FeatureId),
    #[error("invalid feature declaration {key:?}: {reason}")]
    InvalidDeclaration { key: String, reason: String },
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum PatchError {
    #[error("{key}: patch replaces a {existing} flag with a {replacement} flag")]
    TypeMismatch {
        key: FeatureId,
        existing: ValueType,
        replacement: ValueType,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct PredicateError {
    pub message: String,
}

impl PredicateError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Errors of the typed accessor layer on top of [`crate::registry::EvaluationOutcome`].
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum EvaluationError {
    #[error("flag {0} not found")]
    FlagNotFound(FeatureId),
    #[error("evaluating {key} failed: {cause}")]
    Predicate { key: FeatureId, cause: PredicateError },
    #[error("{key} resolved to a {found} value, caller asked for {expected}")]
    TypeMismatch {
        key: FeatureId,
        expected: ValueKind,
        found: ValueType,
    },
}

impl From<DefinitionError> for ParseError {
    fn from(err: DefinitionError) -> Self {
        match &err {
            DefinitionError::TypeMismatch { key, .. } | DefinitionError::NonFiniteValue { key } => {
                ParseError::InvalidValue {
                    key: key.to_string(),
                    reason: err.to_string(),
                }
            }
            DefinitionError::InvalidOrder { .. } => ParseError::InvalidSnapshot(err.to_string()),
        }
    }
}

impl From<PatchError> for ParseError {
    fn from(err: PatchError) -> Self {
        match &err {
            PatchError::TypeMismatch { key, .. } => ParseError::InvalidValue {
                key: key.to_string(),
                reason: err.to_string(),
            },
        }
    }
}
