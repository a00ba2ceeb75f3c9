//! Per-handler parameter schemas.
//!
//! Each handler owns a compiled JSON Schema. The dispatcher runs it before the
//! handler is invoked and reports its diagnostics as `Invalid params` data.

use jsonschema::Validator;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use thiserror::Error;
use tracing::debug;

use crate::request::RequestParams;

/// The supplied schema could not be compiled.
#[derive(Debug, Error)]
pub enum ParamsSchemaError {
    #[error("invalid params schema: {0}")]
    Invalid(String),
}

/// One reason a `params` value failed its schema.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParamsViolation {
    /// JSON pointer into `params` (`""` for the whole value)
    pub path: String,
    pub reason: String,
}

/// A compiled parameter schema.
///
/// Absent params are checked as `null`, so a schema that requires an object
/// also makes `params` mandatory.
#[derive(Debug)]
pub struct ParamsSchema {
    schema: Value,
    // None accepts everything
    validator: Option<Validator>,
}

impl ParamsSchema {
    pub fn new(schema: Value) -> Result<Self, ParamsSchemaError> {
        let validator =
            Validator::new(&schema).map_err(|e| ParamsSchemaError::Invalid(e.to_string()))?;
        Ok(Self {
            schema,
            validator: Some(validator),
        })
    }

    /// Schema that accepts anything, including absent params.
    pub fn any() -> Self {
        Self {
            schema: json!({}),
            validator: None,
        }
    }

    pub fn schema(&self) -> &Value {
        &self.schema
    }

    pub fn validate(&self, params: Option<&RequestParams>) -> Result<(), Vec<ParamsViolation>> {
        let Some(validator) = &self.validator else {
            return Ok(());
        };
        let instance = params.map(RequestParams::to_value).unwrap_or(Value::Null);
        if validator.is_valid(&instance) {
            return Ok(());
        }

        let violations: Vec<ParamsViolation> = validator
            .iter_errors(&instance)
            .map(|error| ParamsViolation {
                path: error.instance_path.to_string(),
                reason: error.to_string(),
            })
            .collect();
        debug!(count = violations.len(), "params rejected by schema");
        Err(violations)
    }
}
