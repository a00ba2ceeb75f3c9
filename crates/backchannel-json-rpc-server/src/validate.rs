//! Structural validation of request envelopes.
//!
//! Each recognised member has a compiled JSON Schema. The members are checked
//! in a fixed order and every violation is collected, so the diagnostics
//! attached to an `Invalid request` error list the problems in the order a
//! reader would fix them.

use std::sync::LazyLock;

use jsonschema::Validator;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

use crate::request::{JsonRpcRequest, RequestParams};
use crate::types::{JsonRpcVersion, RequestId};
use crate::{JSONRPC_VERSION, RESERVED_METHOD_PREFIX};

/// One reason an envelope was rejected.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvelopeViolation {
    /// JSON pointer of the offending field (`""` for the envelope itself)
    pub path: String,
    pub reason: String,
}

impl EnvelopeViolation {
    fn new(path: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            reason: reason.into(),
        }
    }
}

/// Grammar of one envelope member
struct Member {
    name: &'static str,
    required: bool,
    validator: Result<Validator, String>,
}

impl Member {
    fn compile(name: &'static str, required: bool, schema: Value) -> Self {
        Self {
            name,
            required,
            validator: Validator::new(&schema).map_err(|e| e.to_string()),
        }
    }

    fn check(&self, object: &Map<String, Value>) -> Option<EnvelopeViolation> {
        let path = format!("/{}", self.name);
        let Some(value) = object.get(self.name) else {
            return self
                .required
                .then(|| EnvelopeViolation::new(path, "required property is missing"));
        };
        match &self.validator {
            Ok(validator) => validator
                .iter_errors(value)
                .next()
                .map(|error| EnvelopeViolation::new(path, error.to_string())),
            Err(compile_error) => Some(EnvelopeViolation::new(
                path,
                format!("envelope grammar unavailable: {compile_error}"),
            )),
        }
    }
}

// Check order is the order of this array.
static MEMBERS: LazyLock<[Member; 4]> = LazyLock::new(|| {
    let reserved = format!("^{}", RESERVED_METHOD_PREFIX.replace('.', "\\."));
    [
        Member::compile("jsonrpc", true, json!({"const": JSONRPC_VERSION})),
        Member::compile(
            "method",
            true,
            json!({"type": "string", "minLength": 1, "not": {"pattern": reserved}}),
        ),
        Member::compile("params", false, json!({"type": ["object", "array", "null"]})),
        Member::compile("id", false, json!({"type": ["string", "integer", "null"]})),
    ]
});

/// Validate a decoded JSON value against the JSON-RPC 2.0 request grammar.
pub fn validate_envelope(raw: &Value) -> Result<JsonRpcRequest, Vec<EnvelopeViolation>> {
    let Some(object) = raw.as_object() else {
        return Err(vec![EnvelopeViolation::new(
            "",
            format!("request must be an object, got {}", type_name(raw)),
        )]);
    };

    let mut violations: Vec<EnvelopeViolation> =
        MEMBERS.iter().filter_map(|member| member.check(object)).collect();

    let id = match object.get("id") {
        None | Some(Value::Null) => None,
        Some(value) => {
            let id = RequestId::from_value(value);
            // 1.0 and integers beyond i64 satisfy "integer" but are not usable ids
            if id.is_none() && !violations.iter().any(|v| v.path == "/id") {
                violations.push(EnvelopeViolation::new(
                    "/id",
                    format!("{value} is not a usable integer id"),
                ));
            }
            id
        }
    };

    for key in object.keys() {
        if !MEMBERS.iter().any(|member| member.name == key) {
            violations.push(EnvelopeViolation::new(
                format!("/{key}"),
                "additional properties are not allowed",
            ));
        }
    }

    if !violations.is_empty() {
        return Err(violations);
    }
    match object.get("method") {
        Some(Value::String(method)) => Ok(JsonRpcRequest {
            version: JsonRpcVersion::V2_0,
            method: method.clone(),
            params: object.get("params").cloned().and_then(RequestParams::from_value),
            id,
        }),
        _ => Err(vec![EnvelopeViolation::new("/method", "must be a string")]),
    }
}

/// Extract the id of a rejected envelope when the id itself is well formed.
pub fn recover_id(raw: &Value) -> Option<RequestId> {
    raw.as_object()?.get("id").and_then(RequestId::from_value)
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(n) if n.is_i64() || n.is_u64() => "integer",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
