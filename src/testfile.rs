//! Expectation files: one assertion per line, checked against a snapshot.
//!
//! ```text
//! // comments and blank lines are skipped
//! feature::global::darkMode(platform=IOS,locale=US,id=user-123) == false
//! feature::global::apiEndpoint(platform=IOS,locale=US) == "https://api-us-ios.example.com"
//! feature::global::theme == Theme.LIGHT
//! ```
//!
//! Context keys `platform`, `locale`, `version` and `stableId` (already hex)
//! fill the matching [`Context`] fields, `id` is a raw id that gets
//! hex-encoded, anything else becomes a custom attribute.

use nom::{
    branch::alt,
    bytes::complete::{is_not, tag, tag_no_case, take_while1},
    character::complete::{char, digit1, multispace0},
    combinator::{all_consuming, map, map_res, opt, recognize, rest},
    error::ParseError as NomParseError,
    multi::separated_list0,
    sequence::{delimited, pair, preceded, separated_pair, tuple},
    IResult,
};

use crate::context::{Atom, Context, StableId};
use crate::feature::FeatureId;
use crate::registry::{EvaluationOutcome, Registry};
use crate::value::{FieldValue, FlagValue};
use crate::version::Version;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ExpectationError {
    #[error("line {line}: cannot parse {text:?}")]
    Syntax { line: usize, text: String },
    #[error("line {line}: {reason}")]
    Context { line: usize, reason: String },
}

/// One parsed assertion.
#[derive(Debug, Clone, PartialEq)]
pub struct Expectation {
    pub line: usize,
    pub text: String,
    pub feature: FeatureId,
    pub context: Context,
    pub expected: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Verdict {
    Pass,
    Fail { actual: FlagValue },
    FlagNotFound,
    Error(String),
}

impl Verdict {
    pub fn passed(&self) -> bool {
        matches!(self, Verdict::Pass)
    }
}

fn ws<'a, F, O, E: NomParseError<&'a str>>(inner: F) -> impl FnMut(&'a str) -> IResult<&'a str, O, E>
where
    F: FnMut(&'a str) -> IResult<&'a str, O, E>,
{
    delimited(multispace0, inner, multispace0)
}

fn feature_key(i: &str) -> IResult<&str, &str> {
    take_while1(|c: char| c.is_alphanumeric() || matches!(c, ':' | '_' | '-' | '.'))(i)
}

fn context_pair(i: &str) -> IResult<&str, (&str, &str)> {
    separated_pair(
        ws(take_while1(|c: char| c.is_alphanumeric() || c == '_')),
        char('='),
        map(opt(is_not(",)")), |v: Option<&str>| v.unwrap_or("").trim()),
    )(i)
}

fn context_pairs(i: &str) -> IResult<&str, Vec<(&str, &str)>> {
    delimited(char('('), separated_list0(char(','), context_pair), char(')'))(i)
}

type Line<'a> = (&'a str, Vec<(&'a str, &'a str)>, &'a str);

fn expectation_line(i: &str) -> IResult<&str, Line<'_>> {
    map(
        tuple((
            ws(feature_key),
            opt(context_pairs),
            preceded(ws(tag("==")), rest),
        )),
        |(key, pairs, expected)| (key, pairs.unwrap_or_default(), expected.trim()),
    )(i)
}

fn parse_number(i: &str) -> IResult<&str, Atom> {
    map_res(recognize(pair(opt(tag("-")), digit1)), |n: &str| {
        n.parse::<i64>().map(Atom::Number)
    })(i)
}

fn parse_float(i: &str) -> IResult<&str, Atom> {
    map_res(
        recognize(tuple((opt(tag("-")), digit1, char('.'), digit1))),
        |n: &str| n.parse::<f64>().map(Atom::Float),
    )(i)
}

fn parse_boolean(i: &str) -> IResult<&str, Atom> {
    alt((
        map(tag_no_case("true"), |_| Atom::Boolean(true)),
        map(tag_no_case("false"), |_| Atom::Boolean(false)),
    ))(i)
}

/// Attribute values are typed by shape: `true`, `42`, `1.5`, anything else
/// is a string (surrounding quotes are stripped).
pub fn parse_attribute(raw: &str) -> Atom {
    let raw = raw.trim();
    match all_consuming(alt((parse_float, parse_number, parse_boolean)))(raw) {
        Ok((_, atom)) => atom,
        Err(_) => Atom::String(unquote(raw).to_string()),
    }
}

fn unquote(s: &str) -> &str {
    s.strip_prefix('"')
        .and_then(|s| s.strip_suffix('"'))
        .unwrap_or(s)
}

/// Builds a context from `key=value` pairs. Missing fields default to empty
/// strings and version `0.0.0`.
pub fn context_from_pairs<'a, I>(pairs: I) -> Result<Context, String>
where
    I: IntoIterator<Item = (&'a str, &'a str)>,
{
    let mut context = Context::new("", "", Version::default());
    for (key, value) in pairs {
        match key {
            "platform" => context.platform = value.to_string(),
            "locale" => context.locale = value.to_string(),
            "version" => {
                context.app_version = value
                    .parse()
                    .map_err(|e: crate::version::VersionParseError| e.to_string())?
            }
            "id" => context.stable_id = Some(StableId::of(value)),
            "stableId" => {
                context.stable_id = Some(StableId::from_hex(value).map_err(|e| e.to_string())?)
            }
            other => context = context.with_attribute(other, parse_attribute(value)),
        }
    }
    Ok(context)
}

/// Parses a whole expectation file. The first bad line fails the parse.
pub fn parse_expectations(content: &str) -> Result<Vec<Expectation>, ExpectationError> {
    let mut expectations = Vec::new();
    for (index, raw) in content.lines().enumerate() {
        let line = index + 1;
        let text = raw.trim();
        if text.is_empty() || text.starts_with("//") || text.starts_with('#') {
            continue;
        }
        let syntax = || ExpectationError::Syntax {
            line,
            text: text.to_string(),
        };
        let (_, (key, pairs, expected)) = all_consuming(expectation_line)(text).map_err(|_| syntax())?;
        if expected.is_empty() {
            return Err(syntax());
        }
        let feature = key.parse::<FeatureId>().map_err(|e| ExpectationError::Context {
            line,
            reason: e.to_string(),
        })?;
        let context = context_from_pairs(pairs)
            .map_err(|reason| ExpectationError::Context { line, reason })?;
        expectations.push(Expectation {
            line,
            text: text.to_string(),
            feature,
            context,
            expected: expected.to_string(),
        });
    }
    Ok(expectations)
}

/// Whether `actual` is what the expectation text describes. Booleans are
/// case-insensitive, strings may be quoted, enums may be written as `VARIANT`
/// or `Class.VARIANT`, records as a JSON object.
pub fn value_matches(actual: &FlagValue, expected: &str) -> bool {
    match actual {
        FlagValue::Boolean(b) => match expected.to_ascii_lowercase().as_str() {
            "true" => *b,
            "false" => !*b,
            _ => false,
        },
        FlagValue::String(s) => s == unquote(expected),
        FlagValue::Integer(i) => expected.parse::<i64>() == Ok(*i),
        FlagValue::Double(d) => expected.parse::<f64>().is_ok_and(|e| e == *d),
        FlagValue::Enum { variant, class } => {
            let expected = unquote(expected);
            expected == variant
                || expected
                    .strip_prefix(class.as_str())
                    .and_then(|rest| rest.strip_prefix('.'))
                    == Some(variant.as_str())
        }
        FlagValue::Record { fields, .. } => {
            let Ok(serde_json::Value::Object(object)) = serde_json::from_str(expected) else {
                return false;
            };
            object.len() == fields.len()
                && fields.iter().all(|(name, field)| {
                    object.get(name).is_some_and(|json| match field {
                        FieldValue::Boolean(b) => json.as_bool() == Some(*b),
                        FieldValue::String(s) => json.as_str() == Some(s.as_str()),
                        FieldValue::Integer(i) => json.as_i64() == Some(*i),
                        FieldValue::Double(d) => json.as_f64() == Some(*d),
                    })
                })
        }
    }
}

pub fn check(registry: &Registry, expectation: &Expectation) -> Verdict {
    match registry.evaluate(&expectation.feature, &expectation.context) {
        EvaluationOutcome::Success(actual) if value_matches(&actual, &expectation.expected) => {
            Verdict::Pass
        }
        EvaluationOutcome::Success(actual) => Verdict::Fail { actual },
        EvaluationOutcome::FlagNotFound(_) => Verdict::FlagNotFound,
        EvaluationOutcome::EvaluationError { cause, .. } => Verdict::Error(cause.to_string()),
    }
}
