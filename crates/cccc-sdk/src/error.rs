//! Error types for cccc daemon IPC operations

use std::fmt;

use serde_json::{Map, Value};
use thiserror::Error;

use crate::types::{ErrorPayload, Response};

/// Errors that can occur when talking to the cccc daemon
///
/// Every failure surfaced by this crate is one of these variants.
#[derive(Debug, Error)]
pub enum ClientError {
    /// The daemon could not be reached or spoke something other than the
    /// framing protocol (connect failure, timeout, premature close, oversized
    /// line, unparsable JSON)
    #[error("daemon unavailable: {message}")]
    Unavailable { message: String },

    /// The daemon answered with `ok: false`
    #[error(transparent)]
    Api(#[from] DaemonApiError),

    /// The daemon does not meet the version/capability/operation requirements
    #[error("incompatible daemon: {message}")]
    Incompatible { message: String },

    /// A convenience method was given arguments it refuses to send
    #[error("invalid argument: {message}")]
    InvalidArgument { message: String },
}

impl ClientError {
    pub(crate) fn unavailable(message: impl Into<String>) -> Self {
        Self::Unavailable {
            message: message.into(),
        }
    }

    pub(crate) fn incompatible(message: impl Into<String>) -> Self {
        Self::Incompatible {
            message: message.into(),
        }
    }

    /// Returns the daemon error code when this is an API error
    pub fn api_code(&self) -> Option<&str> {
        match self {
            Self::Api(err) => Some(&err.code),
            _ => None,
        }
    }

    /// True when the failure happened before the daemon could answer
    pub fn is_unavailable(&self) -> bool {
        matches!(self, Self::Unavailable { .. })
    }
}

/// Error returned by the daemon itself (`ok: false`)
///
/// `raw` keeps the whole response envelope for diagnostics.
#[derive(Debug, Clone, PartialEq)]
pub struct DaemonApiError {
    /// Stable machine-readable identifier, e.g. `unknown_op`
    pub code: String,
    /// Human-readable description
    pub message: String,
    /// Structured context, empty when the daemon sent none
    pub details: Map<String, Value>,
    /// The response envelope the error was built from
    pub raw: Option<Response>,
}

impl DaemonApiError {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            details: Map::new(),
            raw: None,
        }
    }

    pub fn with_details(mut self, details: Map<String, Value>) -> Self {
        self.details = details;
        self
    }

    /// Build the error from a failed response, falling back to the given
    /// code/message when the daemon omitted its error payload
    pub(crate) fn from_response(
        response: Response,
        default_code: &str,
        default_message: &str,
    ) -> Self {
        let payload = response.error.clone().unwrap_or_else(|| ErrorPayload {
            code: String::new(),
            message: String::new(),
            details: None,
        });

        let code = non_empty_or(payload.code, default_code);
        let message = non_empty_or(payload.message, default_message);

        Self {
            code,
            message,
            details: payload.details.unwrap_or_default(),
            raw: Some(response),
        }
    }
}

fn non_empty_or(value: String, fallback: &str) -> String {
    if value.is_empty() {
        fallback.to_string()
    } else {
        value
    }
}

impl fmt::Display for DaemonApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)?;
        if !self.details.is_empty() {
            let details = Value::Object(self.details.clone());
            write!(f, " ({})", details)?;
        }
        Ok(())
    }
}

impl std::error::Error for DaemonApiError {}
