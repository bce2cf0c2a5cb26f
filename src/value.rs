use core::fmt;
use std::collections::BTreeMap;

/// Wire tag of a flag value, as written in the `"type"` field of a value object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueKind {
    Boolean,
    String,
    Integer,
    Double,
    Enum,
    Record,
}

impl ValueKind {
    pub fn as_wire(&self) -> &'static str {
        match self {
            ValueKind::Boolean => "BOOLEAN",
            ValueKind::String => "STRING",
            ValueKind::Integer => "INT",
            ValueKind::Double => "DOUBLE",
            ValueKind::Enum => "ENUM",
            ValueKind::Record => "DATA_CLASS",
        }
    }

    pub fn from_wire(tag: &str) -> Option<Self> {
        match tag {
            "BOOLEAN" => Some(ValueKind::Boolean),
            "STRING" => Some(ValueKind::String),
            "INT" => Some(ValueKind::Integer),
            "DOUBLE" => Some(ValueKind::Double),
            "ENUM" => Some(ValueKind::Enum),
            "DATA_CLASS" => Some(ValueKind::Record),
            _ => None,
        }
    }
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_wire())
    }
}

/// Type tag of a flag. Enum and record types are identified by their class name,
/// so two enums with different class names are different types.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ValueType {
    Boolean,
    String,
    Integer,
    Double,
    Enum(String),
    Record(String),
}

impl ValueType {
    pub fn kind(&self) -> ValueKind {
        match self {
            ValueType::Boolean => ValueKind::Boolean,
            ValueType::String => ValueKind::String,
            ValueType::Integer => ValueKind::Integer,
            ValueType::Double => ValueKind::Double,
            ValueType::Enum(_) => ValueKind::Enum,
            ValueType::Record(_) => ValueKind::Record,
        }
    }
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValueType::Enum(class) => write!(f, "ENUM({class})"),
            ValueType::Record(class) => write!(f, "DATA_CLASS({class})"),
            other => f.write_str(other.kind().as_wire()),
        }
    }
}

/// Primitive stored inside a record value.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Boolean(bool),
    String(String),
    Integer(i64),
    Double(f64),
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldValue::Boolean(b) => write!(f, "{b}"),
            FieldValue::String(s) => write!(f, "{s:?}"),
            FieldValue::Integer(i) => write!(f, "{i}"),
            FieldValue::Double(d) => write!(f, "{d}"),
        }
    }
}

/// A resolved flag value. Carries its own type tag, see [`FlagValue::value_type`].
#[derive(Debug, Clone, PartialEq)]
pub enum FlagValue {
    Boolean(bool),
    String(String),
    Integer(i64),
    Double(f64),
    Enum {
        variant: String,
        class: String,
    },
    Record {
        class: String,
        fields: BTreeMap<String, FieldValue>,
    },
}

impl FlagValue {
    pub fn enumeration(class: impl Into<String>, variant: impl Into<String>) -> Self {
        FlagValue::Enum {
            variant: variant.into(),
            class: class.into(),
        }
    }

    pub fn record<K, I>(class: impl Into<String>, fields: I) -> Self
    where
        K: Into<String>,
        I: IntoIterator<Item = (K, FieldValue)>,
    {
        FlagValue::Record {
            class: class.into(),
            fields: fields.into_iter().map(|(k, v)| (k.into(), v)).collect(),
        }
    }

    pub fn value_type(&self) -> ValueType {
        match self {
            FlagValue::Boolean(_) => ValueType::Boolean,
            FlagValue::String(_) => ValueType::String,
            FlagValue::Integer(_) => ValueType::Integer,
            FlagValue::Double(_) => ValueType::Double,
            FlagValue::Enum { class, .. } => ValueType::Enum(class.clone()),
            FlagValue::Record { class, .. } => ValueType::Record(class.clone()),
        }
    }

    /// Whether every double inside the value is finite. JSON cannot carry NaN or
    /// infinities, so non-finite values are rejected when definitions are built.
    pub fn is_finite(&self) -> bool {
        match self {
            FlagValue::Double(d) => d.is_finite(),
            FlagValue::Record { fields, .. } => fields.values().all(|f| match f {
                FieldValue::Double(d) => d.is_finite(),
                _ => true,
            }),
            _ => true,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            FlagValue::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            FlagValue::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            FlagValue::Integer(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            FlagValue::Double(d) => Some(*d),
            _ => None,
        }
    }
}

impl fmt::Display for FlagValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FlagValue::Boolean(b) => write!(f, "{b}"),
            FlagValue::String(s) => write!(f, "{s:?}"),
            FlagValue::Integer(i) => write!(f, "{i}"),
            FlagValue::Double(d) => write!(f, "{d}"),
            FlagValue::Enum { variant, class } => write!(f, "{class}.{variant}"),
            FlagValue::Record { class, fields } => {
                write!(f, "{class}(")?;
                for (i, (name, value)) in fields.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{name}={value}")?;
                }
                f.write_str(")")
            }
        }
    }
}

impl From<bool> for FlagValue {
    fn from(value: bool) -> Self {
        FlagValue::Boolean(value)
    }
}

impl From<&str> for FlagValue {
    fn from(value: &str) -> Self {
        FlagValue::String(value.to_string())
    }
}

impl From<String> for FlagValue {
    fn from(value: String) -> Self {
        FlagValue::String(value)
    }
}

impl From<i64> for FlagValue {
    fn from(value: i64) -> Self {
        FlagValue::Integer(value)
    }
}

impl From<f64> for FlagValue {
    fn from(value: f64) -> Self {
        FlagValue::Double(value)
    }
}

/// Enum variant returned by the typed accessors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnumValue {
    pub class: String,
    pub variant: String,
}

/// Record returned by the typed accessors.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordValue {
    pub class: String,
    pub fields: BTreeMap<String, FieldValue>,
}

impl RecordValue {
    pub fn field(&self, name: &str) -> Option<&FieldValue> {
        self.fields.get(name)
    }
}

/// Returned when a [`FlagValue`] is converted into a Rust type it does not hold.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("expected a {expected} value, found {found}")]
pub struct ValueTypeMismatch {
    pub expected: ValueKind,
    pub found: ValueType,
}

macro_rules! impl_try_from_flag_value {
    ($target:ty, $kind:expr, $pattern:pat => $out:expr) => {
        impl TryFrom<FlagValue> for $target {
            type Error = ValueTypeMismatch;

            fn try_from(value: FlagValue) -> Result<Self, Self::Error> {
                match value {
                    $pattern => Ok($out),
                    other => Err(ValueTypeMismatch {
                        expected: $kind,
                        found: other.value_type(),
                    }),
                }
            }
        }
    };
}

impl_try_from_flag_value!(bool, ValueKind::Boolean, FlagValue::Boolean(b) => b);
impl_try_from_flag_value!(String, ValueKind::String, FlagValue::String(s) => s);
impl_try_from_flag_value!(i64, ValueKind::Integer, FlagValue::Integer(i) => i);
impl_try_from_flag_value!(f64, ValueKind::Double, FlagValue::Double(d) => d);
impl_try_from_flag_value!(
    EnumValue,
    ValueKind::Enum,
    FlagValue::Enum { variant, class } => EnumValue { class, variant }
);
impl_try_from_flag_value!(
    RecordValue,
    ValueKind::Record,
    FlagValue::Record { class, fields } => RecordValue { class, fields }
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_tags() {
        for kind in [
            ValueKind::Boolean,
            ValueKind::String,
            ValueKind::Integer,
            ValueKind::Double,
            ValueKind::Enum,
            ValueKind::Record,
        ] {
            assert_eq!(ValueKind::from_wire(kind.as_wire()), Some(kind));
        }
        assert_eq!(ValueKind::from_wire("boolean"), None);
        assert_eq!(ValueKind::from_wire("LONG"), None);
    }

    #[test]
    fn test_value_type_carries_class() {
        let light = FlagValue::enumeration("Theme", "LIGHT");
        let other = FlagValue::enumeration("Palette", "LIGHT");
        assert_eq!(light.value_type(), ValueType::Enum("Theme".into()));
        assert_ne!(light.value_type(), other.value_type());
        assert_eq!(light.to_string(), "Theme.LIGHT");
    }

    #[test]
    fn test_try_from() {
        let val: bool = FlagValue::Boolean(true).try_into().unwrap();
        assert!(val);

        let err = i64::try_from(FlagValue::from("nope")).unwrap_err();
        assert_eq!(err.expected, ValueKind::Integer);
        assert_eq!(err.found, ValueType::String);

        let rec = RecordValue::try_from(FlagValue::record(
            "Retry",
            [("attempts", FieldValue::Integer(3))],
        ))
        .unwrap();
        assert_eq!(rec.field("attempts"), Some(&FieldValue::Integer(3)));
    }

    #[test]
    fn test_finite() {
        assert!(FlagValue::Double(1.5).is_finite());
        assert!(!FlagValue::Double(f64::NAN).is_finite());
        assert!(!FlagValue::record("R", [("x", FieldValue::Double(f64::INFINITY))]).is_finite());
    }

    #[test]
    fn test_record_display() {
        let rec = FlagValue::record(
            "Retry",
            [
                ("backoff", FieldValue::Double(1.5)),
                ("attempts", FieldValue::Integer(3)),
            ],
        );
        assert_eq!(rec.to_string(), "Retry(attempts=3, backoff=1.5)");
    }
}
