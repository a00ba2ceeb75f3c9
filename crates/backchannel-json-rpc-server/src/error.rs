use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use thiserror::Error;

use crate::error_codes;
use crate::types::RequestId;

/// The closed set of error kinds a response can carry.
///
/// Reserved protocol kinds map to the fixed JSON-RPC codes; everything else
/// is an application (handler-defined) code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JsonRpcErrorCode {
    ParseError,
    InvalidRequest,
    MethodNotFound,
    InvalidParams,
    InternalError,
    Application(i64),
}

impl JsonRpcErrorCode {
    /// Classify a raw numeric code.
    pub fn from_code(code: i64) -> Self {
        match code {
            error_codes::PARSE_ERROR => JsonRpcErrorCode::ParseError,
            error_codes::INVALID_REQUEST => JsonRpcErrorCode::InvalidRequest,
            error_codes::METHOD_NOT_FOUND => JsonRpcErrorCode::MethodNotFound,
            error_codes::INVALID_PARAMS => JsonRpcErrorCode::InvalidParams,
            error_codes::INTERNAL_ERROR => JsonRpcErrorCode::InternalError,
            other => JsonRpcErrorCode::Application(other),
        }
    }

    pub fn code(&self) -> i64 {
        match self {
            JsonRpcErrorCode::ParseError => error_codes::PARSE_ERROR,
            JsonRpcErrorCode::InvalidRequest => error_codes::INVALID_REQUEST,
            JsonRpcErrorCode::MethodNotFound => error_codes::METHOD_NOT_FOUND,
            JsonRpcErrorCode::InvalidParams => error_codes::INVALID_PARAMS,
            JsonRpcErrorCode::InternalError => error_codes::INTERNAL_ERROR,
            JsonRpcErrorCode::Application(code) => *code,
        }
    }

    /// Canonical message for the reserved kinds. Application codes have none.
    pub fn message(&self) -> Option<&'static str> {
        match self {
            JsonRpcErrorCode::ParseError => Some("Parse error"),
            JsonRpcErrorCode::InvalidRequest => Some("Invalid request"),
            JsonRpcErrorCode::MethodNotFound => Some("Method not found"),
            JsonRpcErrorCode::InvalidParams => Some("Invalid params"),
            JsonRpcErrorCode::InternalError => Some("Internal error"),
            JsonRpcErrorCode::Application(_) => None,
        }
    }

    pub fn is_reserved(&self) -> bool {
        !matches!(self, JsonRpcErrorCode::Application(_))
    }

    /// Application code inside the implementation-defined server error range.
    pub fn is_server_error(&self) -> bool {
        matches!(
            self,
            JsonRpcErrorCode::Application(code)
                if (error_codes::SERVER_ERROR_START..=error_codes::SERVER_ERROR_END).contains(code)
        )
    }
}

impl fmt::Display for JsonRpcErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.message() {
            Some(message) => write!(f, "{}: {}", self.code(), message),
            None => write!(f, "{}", self.code()),
        }
    }
}

/// JSON-RPC error object as it appears on the wire
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcErrorObject {
    pub code: i64,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// A well-formed RPC error.
///
/// Produced by the dispatcher for protocol failures and by handlers for
/// business failures. Handlers return it through their boxed error; the
/// dispatcher recognises it by type and forwards code, message and data
/// verbatim instead of wrapping it as an internal error.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("JSON-RPC error {}: {message}", .kind.code())]
pub struct JsonRpcError {
    pub kind: JsonRpcErrorCode,
    pub message: String,
    pub id: Option<RequestId>,
    pub data: Option<Value>,
}

impl JsonRpcError {
    /// Build an error of a reserved kind with its canonical message.
    pub fn reserved(kind: JsonRpcErrorCode, id: Option<RequestId>, data: Option<Value>) -> Self {
        Self {
            kind,
            message: kind.message().unwrap_or("Server error").to_string(),
            id,
            data,
        }
    }

    pub fn parse_error(data: Option<Value>) -> Self {
        Self::reserved(JsonRpcErrorCode::ParseError, None, data)
    }

    pub fn invalid_request(id: Option<RequestId>, data: Option<Value>) -> Self {
        Self::reserved(JsonRpcErrorCode::InvalidRequest, id, data)
    }

    pub fn method_not_found(id: Option<RequestId>, method: &str) -> Self {
        Self::reserved(
            JsonRpcErrorCode::MethodNotFound,
            id,
            Some(Value::String(method.to_string())),
        )
    }

    pub fn invalid_params(id: Option<RequestId>, data: Option<Value>) -> Self {
        Self::reserved(JsonRpcErrorCode::InvalidParams, id, data)
    }

    pub fn internal_error(id: Option<RequestId>, data: Option<Value>) -> Self {
        Self::reserved(JsonRpcErrorCode::InternalError, id, data)
    }

    /// A handler-defined error. Reserved codes keep their reserved kind so the
    /// taxonomy stays consistent with the numeric code.
    pub fn application(code: i64, message: impl Into<String>, data: Option<Value>) -> Self {
        Self {
            kind: JsonRpcErrorCode::from_code(code),
            message: message.into(),
            id: None,
            data,
        }
    }

    pub fn code(&self) -> i64 {
        self.kind.code()
    }

    pub fn with_id(mut self, id: Option<RequestId>) -> Self {
        self.id = id;
        self
    }

    pub fn to_error_object(&self) -> JsonRpcErrorObject {
        JsonRpcErrorObject {
            code: self.code(),
            message: self.message.clone(),
            data: self.data.clone(),
        }
    }
}
