//! JSON-in, JSON-out bindings for browsers and other hosts that load the
//! library as a wasm module. Errors are returned as `{"error": "..."}`
//! rather than thrown.

use serde_json::{json, Value};
use wasm_bindgen::prelude::wasm_bindgen;

use crate::context::{Atom, Context, StableId};
use crate::error::EvaluationError;
use crate::feature::{FeatureDeclaration, FeatureId, FeatureRegistry};
use crate::flag::Reason;
use crate::parse::{parse_snapshot, value_document};
use crate::registry::Registry;
use crate::version::Version;
use crate::wire::ContextDocument;

fn error(message: impl std::fmt::Display) -> String {
    json!({ "error": message.to_string() }).to_string()
}

fn features_from_json(features_json: &str) -> Result<FeatureRegistry, String> {
    let declarations: Vec<FeatureDeclaration> =
        serde_json::from_str(features_json).map_err(|e| e.to_string())?;
    FeatureRegistry::from_declarations(&declarations).map_err(|e| e.to_string())
}

fn atom_from_json(value: &Value) -> Atom {
    match value {
        Value::Bool(b) => Atom::Boolean(*b),
        Value::Number(n) => match n.as_i64() {
            Some(i) => Atom::Number(i),
            None => Atom::Float(n.as_f64().unwrap_or_default()),
        },
        Value::String(s) => Atom::String(s.clone()),
        other => Atom::String(other.to_string()),
    }
}

pub fn context_from_document(doc: &ContextDocument) -> Result<Context, String> {
    let version = match &doc.app_version {
        Some(v) => v.parse::<Version>().map_err(|e| e.to_string())?,
        None => Version::default(),
    };
    let mut context = Context::new(doc.locale.clone(), doc.platform.clone(), version);
    if let Some(id) = &doc.stable_id {
        context = context.with_stable_id(StableId::from_hex(id).map_err(|e| e.to_string())?);
    }
    for (key, value) in &doc.attributes {
        context = context.with_attribute(key.clone(), atom_from_json(value));
    }
    Ok(context)
}

/// Validates a snapshot payload against a JSON array of feature declarations.
/// Returns `{"flags": <count>}` or `{"error": ...}`.
#[wasm_bindgen]
pub fn validate_snapshot(snapshot_json: &str, features_json: &str) -> String {
    let features = match features_from_json(features_json) {
        Ok(features) => features,
        Err(e) => return error(e),
    };
    match parse_snapshot(snapshot_json.as_bytes(), &features) {
        Ok(snapshot) => json!({ "flags": snapshot.len() }).to_string(),
        Err(e) => error(e),
    }
}

/// Evaluates one flag. `context_json` uses the field names `locale`,
/// `platform`, `appVersion`, `stableId` and `attributes`. Returns
/// `{"value": <value object>, "reason": ...}` or `{"error": ...}`.
#[wasm_bindgen]
pub fn evaluate_flag(
    snapshot_json: &str,
    features_json: &str,
    key: &str,
    context_json: &str,
) -> String {
    let features = match features_from_json(features_json) {
        Ok(features) => features,
        Err(e) => return error(e),
    };
    let registry = Registry::new();
    if let Err(e) = registry.load_bytes(snapshot_json.as_bytes(), &features) {
        return error(e);
    }
    let id: FeatureId = match key.parse() {
        Ok(id) => id,
        Err(e) => return error(e),
    };
    let context = match serde_json::from_str::<ContextDocument>(context_json)
        .map_err(|e| e.to_string())
        .and_then(|doc| context_from_document(&doc))
    {
        Ok(context) => context,
        Err(e) => return error(e),
    };

    match registry.explain(&id, &context) {
        Ok(resolution) => {
            let reason = match resolution.reason {
                Reason::Inactive => json!("inactive"),
                Reason::Default => json!("default"),
                Reason::Rule { index, note } => json!({ "rule": index, "note": note }),
            };
            json!({
                "value": value_document(&resolution.value),
                "reason": reason,
            })
            .to_string()
        }
        Err(EvaluationError::FlagNotFound(_)) => json!({ "notFound": key }).to_string(),
        Err(e) => error(e),
    }
}
