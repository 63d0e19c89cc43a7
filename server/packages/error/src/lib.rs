use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ErrorType {
    Configuration,
    Upstream,
    Transport,
    StreamRead,
    FragmentParse,
    InvalidRequest,
    TokenInvalid,
    NotFound,
}

impl ErrorType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Configuration => "configuration_error",
            Self::Upstream => "upstream_error",
            Self::Transport => "transport_error",
            Self::StreamRead => "stream_read_error",
            Self::FragmentParse => "fragment_parse_error",
            Self::InvalidRequest => "invalid_request",
            Self::TokenInvalid => "token_invalid",
            Self::NotFound => "not_found",
        }
    }

    /// Status used when the error reaches a client before any stream is open.
    /// Stream and fragment errors never do, so they map to 500 for completeness.
    pub fn status_code(&self) -> u16 {
        match self {
            Self::Configuration => 500,
            Self::Upstream => 500,
            Self::Transport => 500,
            Self::StreamRead => 500,
            Self::FragmentParse => 500,
            Self::InvalidRequest => 400,
            Self::TokenInvalid => 401,
            Self::NotFound => 404,
        }
    }
}

/// JSON body returned by every failing endpoint: `{ "error": ..., "type": ... }`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
    #[serde(rename = "type")]
    pub type_: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

#[derive(Debug, Error)]
pub enum ChatError {
    #[error("{message}")]
    Configuration { message: String },
    #[error("failed to {operation}: upstream returned {status} - {body}")]
    Upstream {
        operation: String,
        status: u16,
        body: String,
    },
    #[error("failed to {operation}: {message}")]
    Transport { operation: String, message: String },
    #[error("stream read failed: {message}")]
    StreamRead { message: String },
    #[error("malformed stream fragment: {message}")]
    FragmentParse { message: String },
    #[error("{message}")]
    InvalidRequest { message: String },
    #[error("missing or invalid access token")]
    TokenInvalid,
    #[error("not found: {path}")]
    NotFound { path: String },
}

impl ChatError {
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::InvalidRequest {
            message: message.into(),
        }
    }

    /// A reply body that failed after its headers were accepted.
    pub fn stream_read(err: impl std::fmt::Display) -> Self {
        Self::StreamRead {
            message: err.to_string(),
        }
    }

    pub fn error_type(&self) -> ErrorType {
        match self {
            Self::Configuration { .. } => ErrorType::Configuration,
            Self::Upstream { .. } => ErrorType::Upstream,
            Self::Transport { .. } => ErrorType::Transport,
            Self::StreamRead { .. } => ErrorType::StreamRead,
            Self::FragmentParse { .. } => ErrorType::FragmentParse,
            Self::InvalidRequest { .. } => ErrorType::InvalidRequest,
            Self::TokenInvalid => ErrorType::TokenInvalid,
            Self::NotFound { .. } => ErrorType::NotFound,
        }
    }

    pub fn status_code(&self) -> u16 {
        self.error_type().status_code()
    }

    pub fn to_error_body(&self) -> ErrorBody {
        let details = match self {
            Self::Upstream {
                operation,
                status,
                body,
            } => {
                let mut map = Map::new();
                map.insert("operation".to_string(), Value::String(operation.clone()));
                map.insert(
                    "upstreamStatus".to_string(),
                    Value::Number(serde_json::Number::from(*status)),
                );
                if !body.is_empty() {
                    map.insert("upstreamBody".to_string(), Value::String(body.clone()));
                }
                Some(Value::Object(map))
            }
            Self::Transport { operation, .. } => {
                let mut map = Map::new();
                map.insert("operation".to_string(), Value::String(operation.clone()));
                Some(Value::Object(map))
            }
            Self::NotFound { path } => {
                let mut map = Map::new();
                map.insert("path".to_string(), Value::String(path.clone()));
                Some(Value::Object(map))
            }
            _ => None,
        };

        ErrorBody {
            error: self.to_string(),
            type_: self.error_type().as_str().to_string(),
            details,
        }
    }
}

impl From<&ChatError> for ErrorBody {
    fn from(value: &ChatError) -> Self {
        value.to_error_body()
    }
}
