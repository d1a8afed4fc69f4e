//! Unified error handling for pingfetch
//!
//! A single outcome is fanned out to every caller coalesced on a request key,
//! so the error type is cheap to clone and carries no foreign error values.

use std::fmt;

/// Unified error types for the orchestration layer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchError {
    /// Network failures reported by the transport
    Transport(String),

    /// Non-2xx response
    Status { status: u16, status_text: String },

    /// Response body could not be parsed
    Decode(String),

    /// Batch item discarded before it was dispatched
    Cancelled,

    /// Configuration-related errors
    Configuration(String),

    /// Internal system errors
    Internal(String),
}

impl FetchError {
    /// True when the request was discarded by `clear()` rather than failed.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, FetchError::Cancelled)
    }

    /// HTTP status carried by a `Status` error.
    pub fn status(&self) -> Option<u16> {
        match self {
            FetchError::Status { status, .. } => Some(*status),
            _ => None,
        }
    }
}

impl fmt::Display for FetchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FetchError::Transport(msg) => write!(f, "Transport error: {msg}"),
            FetchError::Status {
                status,
                status_text,
            } => write!(f, "HTTP error! status: {status} {status_text}"),
            FetchError::Decode(msg) => write!(f, "Decode error: {msg}"),
            FetchError::Cancelled => write!(f, "Batch cleared"),
            FetchError::Configuration(msg) => write!(f, "Configuration error: {msg}"),
            FetchError::Internal(msg) => write!(f, "Internal error: {msg}"),
        }
    }
}

impl std::error::Error for FetchError {}

impl From<reqwest::Error> for FetchError {
    fn from(err: reqwest::Error) -> Self {
        FetchError::Transport(err.to_string())
    }
}

impl From<serde_json::Error> for FetchError {
    fn from(err: serde_json::Error) -> Self {
        FetchError::Decode(err.to_string())
    }
}

/// Result type alias for orchestration operations
pub type FetchResult<T> = std::result::Result<T, FetchError>;

/// Helper trait for adding context to errors
pub trait ErrorContext<T> {
    fn with_context(self, context: &str) -> FetchResult<T>;
}

impl<T, E> ErrorContext<T> for std::result::Result<T, E>
where
    E: fmt::Display,
{
    fn with_context(self, context: &str) -> FetchResult<T> {
        self.map_err(|e| FetchError::Internal(format!("{context}: {e}")))
    }
}

/// Convenience macros for error creation
#[macro_export]
macro_rules! config_error {
    ($msg:expr) => {
        $crate::core::FetchError::Configuration($msg.to_string())
    };
    ($fmt:expr, $($arg:tt)*) => {
        $crate::core::FetchError::Configuration(format!($fmt, $($arg)*))
    };
}

#[macro_export]
macro_rules! internal_error {
    ($msg:expr) => {
        $crate::core::FetchError::Internal($msg.to_string())
    };
    ($fmt:expr, $($arg:tt)*) => {
        $crate::core::FetchError::Internal(format!($fmt, $($arg)*))
    };
}
