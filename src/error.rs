use crate::domain::{OperationKind, ResultCode};
use serde::Serialize;
use std::collections::BTreeMap;
use std::time::Duration;
use thiserror::Error;

/// Client-level errors
#[derive(Debug, Error)]
pub enum LdapError {
    #[error("Failed to initialize connection to {host}:{port}: {message}")]
    Initialization {
        host: String,
        port: u16,
        code: Option<ResultCode>,
        message: String,
    },

    #[error("Authentication failed ({mechanism}): {message}")]
    Authentication {
        mechanism: String,
        code: Option<ResultCode>,
        message: String,
    },

    #[error("Unsupported bind mechanism: {0}")]
    UnsupportedMechanism(String),

    #[error("Connection is not initialized")]
    NotConnected,

    #[error("Connection is not bound")]
    NotBound,

    #[error("Connection has been disposed")]
    Disposed,

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Unsupported operation: {0}")]
    UnsupportedOperation(String),

    #[error("{operation} call failed: {message} [{code}]")]
    Call {
        operation: String,
        code: ResultCode,
        message: String,
        context: BTreeMap<String, String>,
    },

    #[error("{operation} failed: {code}{}{}", fmt_detail("matched", .matched_dn), fmt_detail("diagnostic", .diagnostic))]
    Result {
        operation: OperationKind,
        code: ResultCode,
        matched_dn: String,
        diagnostic: String,
    },

    #[error("Unexpected result type 0x{result_type:02x} for {operation}")]
    UnexpectedResult {
        operation: OperationKind,
        result_type: i32,
    },

    #[error("{operation} timed out after {waited:?}")]
    Timeout {
        operation: OperationKind,
        waited: Duration,
    },

    #[error("{operation} cancelled")]
    Cancelled {
        operation: OperationKind,
        message_id: Option<i32>,
    },

    #[error("Marshaling error: {0}")]
    Marshal(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Worker error: {0}")]
    Worker(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

fn fmt_detail(label: &str, value: &str) -> String {
    if value.is_empty() {
        String::new()
    } else {
        format!("; {}: {}", label, value)
    }
}

/// Serializable error report
#[derive(Debug, Serialize)]
pub struct ErrorReport {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result_code: Option<i32>,
}

impl From<&LdapError> for ErrorReport {
    fn from(err: &LdapError) -> Self {
        ErrorReport {
            code: err.error_code().to_string(),
            message: err.to_string(),
            result_code: err.result_code().map(|c| c.0),
        }
    }
}

impl Serialize for LdapError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        ErrorReport::from(self).serialize(serializer)
    }
}

impl LdapError {
    /// Stable machine-readable identifier for the error kind
    pub fn error_code(&self) -> &'static str {
        match self {
            LdapError::Initialization { .. } => "INIT_FAILED",
            LdapError::Authentication { .. } => "AUTH_FAILED",
            LdapError::UnsupportedMechanism(_) => "UNSUPPORTED_MECHANISM",
            LdapError::NotConnected => "NOT_CONNECTED",
            LdapError::NotBound => "NOT_BOUND",
            LdapError::Disposed => "DISPOSED",
            LdapError::InvalidRequest(_) => "INVALID_REQUEST",
            LdapError::UnsupportedOperation(_) => "UNSUPPORTED_OPERATION",
            LdapError::Call { .. } => "CALL_FAILED",
            LdapError::Result { .. } => "RESULT_ERROR",
            LdapError::UnexpectedResult { .. } => "UNEXPECTED_RESULT",
            LdapError::Timeout { .. } => "TIMEOUT",
            LdapError::Cancelled { .. } => "CANCELLED",
            LdapError::Marshal(_) => "MARSHAL_ERROR",
            LdapError::Config(_) => "CONFIG_ERROR",
            LdapError::Worker(_) => "WORKER_ERROR",
            LdapError::Io(_) => "IO_ERROR",
            LdapError::Serialization(_) => "SERIALIZATION_ERROR",
        }
    }

    /// Native or protocol result code carried by the error, if any
    pub fn result_code(&self) -> Option<ResultCode> {
        match self {
            LdapError::Initialization { code, .. } | LdapError::Authentication { code, .. } => *code,
            LdapError::Call { code, .. } | LdapError::Result { code, .. } => Some(*code),
            _ => None,
        }
    }

    /// True for errors raised before any native call was made
    pub fn is_precondition(&self) -> bool {
        matches!(
            self,
            LdapError::NotConnected
                | LdapError::NotBound
                | LdapError::Disposed
                | LdapError::InvalidRequest(_)
        )
    }
}

pub type LdapResult<T> = Result<T, LdapError>;
