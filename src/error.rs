use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Type alias for Result with EngineError
pub type Result<T> = std::result::Result<T, EngineError>;

/// Error taxonomy surfaced by the engine.
///
/// Variants describe outcome kinds, not transport codes; HTTP status mapping
/// happens once in the `From<google_gmail1::Error>` impl below.
#[derive(Error, Debug)]
pub enum EngineError {
    /// Schema violation or semantically inconsistent input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Request named a tool that is not in the catalogue
    #[error("Unknown tool: {0}")]
    ToolNotFound(String),

    /// Tool exists but is not exposed at the current phase
    #[error("Tool not available in current phase: {0}")]
    ToolNotAvailable(String),

    /// Gmail returned 401/403; the request cannot proceed
    #[error("Authentication failed: {0}")]
    Auth(String),

    /// Target resource (message, thread, draft, rule, label) is missing
    #[error("Not found: {0}")]
    NotFound(String),

    /// 429 / quota exhaustion - retried internally, surfaced on exhaustion
    #[error("Rate limit exceeded, retry after {retry_after} seconds")]
    RateLimited { retry_after: u64 },

    /// Server returned 5xx - retried internally, surfaced on exhaustion
    #[error("Backend error (HTTP {status}): {message}")]
    TransientBackend { status: u16, message: String },

    /// Connection-level failure (reset, DNS, timeout on a retryable call)
    #[error("Network error: {0}")]
    Network(String),

    /// Deadline expired or the client cancelled the call
    #[error("Operation cancelled: {0}")]
    Cancelled(String),

    /// Permanent-delete outcome indeterminate after a timeout; never retried
    #[error("Deletion outcome ambiguous: {0}")]
    AmbiguousDeletion(String),

    /// add_rule with a duplicate name
    #[error("Rule conflict: {0}")]
    RuleConflict(String),

    /// Destructive call without the required confirmation
    #[error("Policy denied: {0}")]
    PolicyDenied(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Rule-store persistence failure
    #[error("Rule store error: {0}")]
    Store(String),

    /// IO error (file operations, etc.)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Unexpected programming error
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Wire-level error kind carried in per-item outcomes and summaries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    InvalidInput,
    ToolNotFound,
    ToolNotAvailable,
    Auth,
    NotFound,
    RateLimited,
    TransientBackend,
    Cancelled,
    AmbiguousDeletion,
    RuleConflict,
    PolicyDenied,
    Internal,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ErrorKind::InvalidInput => "InvalidInput",
            ErrorKind::ToolNotFound => "ToolNotFound",
            ErrorKind::ToolNotAvailable => "ToolNotAvailable",
            ErrorKind::Auth => "AuthError",
            ErrorKind::NotFound => "NotFound",
            ErrorKind::RateLimited => "RateLimited",
            ErrorKind::TransientBackend => "TransientBackend",
            ErrorKind::Cancelled => "Cancelled",
            ErrorKind::AmbiguousDeletion => "AmbiguousDeletion",
            ErrorKind::RuleConflict => "RuleConflict",
            ErrorKind::PolicyDenied => "PolicyDenied",
            ErrorKind::Internal => "Internal",
        };
        f.write_str(name)
    }
}

impl EngineError {
    /// Check if the error is transient and should be retried
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            EngineError::RateLimited { .. }
                | EngineError::TransientBackend { .. }
                | EngineError::Network(_)
        )
    }

    /// Check if the error is permanent and should not be retried
    pub fn is_permanent(&self) -> bool {
        !self.is_transient()
    }

    /// Collapse to the wire-level kind used in outcomes and summaries
    pub fn kind(&self) -> ErrorKind {
        match self {
            EngineError::InvalidInput(_) => ErrorKind::InvalidInput,
            EngineError::ToolNotFound(_) => ErrorKind::ToolNotFound,
            EngineError::ToolNotAvailable(_) => ErrorKind::ToolNotAvailable,
            EngineError::Auth(_) => ErrorKind::Auth,
            EngineError::NotFound(_) => ErrorKind::NotFound,
            EngineError::RateLimited { .. } => ErrorKind::RateLimited,
            EngineError::TransientBackend { .. } => ErrorKind::TransientBackend,
            EngineError::Network(_) => ErrorKind::TransientBackend,
            EngineError::Cancelled(_) => ErrorKind::Cancelled,
            EngineError::AmbiguousDeletion(_) => ErrorKind::AmbiguousDeletion,
            EngineError::RuleConflict(_) => ErrorKind::RuleConflict,
            EngineError::PolicyDenied(_) => ErrorKind::PolicyDenied,
            EngineError::Config(_)
            | EngineError::Store(_)
            | EngineError::Io(_)
            | EngineError::Serialization(_)
            | EngineError::Internal(_) => ErrorKind::Internal,
        }
    }
}

/// Parse the Retry-After header from an HTTP response
///
/// The Retry-After header can be specified in two formats:
/// 1. Delay-seconds: An integer indicating seconds to wait (e.g., "120")
/// 2. HTTP-date: An HTTP date format (e.g., "Wed, 21 Oct 2015 07:28:00 GMT")
///
/// Returns the number of seconds to wait. If the header is missing or invalid,
/// returns a default of 5 seconds.
fn parse_retry_after_header<B>(response: &hyper::Response<B>) -> u64 {
    const DEFAULT_RETRY_AFTER: u64 = 5;

    if let Some(retry_after_value) = response.headers().get("retry-after") {
        if let Ok(retry_after_str) = retry_after_value.to_str() {
            // Try to parse as integer (delay-seconds format)
            if let Ok(seconds) = retry_after_str.parse::<u64>() {
                return seconds;
            }

            // Try to parse as HTTP date format
            if let Ok(http_date) = httpdate::parse_http_date(retry_after_str) {
                let now = std::time::SystemTime::now();
                if let Ok(duration) = http_date.duration_since(now) {
                    return duration.as_secs();
                }
            }
        }
    }

    DEFAULT_RETRY_AFTER
}

impl From<google_gmail1::Error> for EngineError {
    fn from(error: google_gmail1::Error) -> Self {
        match error {
            // HTTP response with status code (non-success responses)
            google_gmail1::Error::Failure(ref response) => {
                let status = response.status();
                let status_code = status.as_u16();
                let message = format!(
                    "HTTP {}: {}",
                    status_code,
                    status.canonical_reason().unwrap_or("Unknown")
                );

                match status_code {
                    // Rate limiting - transient
                    429 => {
                        let retry_after = parse_retry_after_header(response);
                        EngineError::RateLimited { retry_after }
                    }
                    404 => EngineError::NotFound("resource not found".to_string()),
                    400 => EngineError::InvalidInput(message),
                    401 | 403 => EngineError::Auth(message),
                    // 501 means the verb itself is unsupported; retrying cannot help
                    501 => EngineError::Internal(message),
                    // Remaining server errors - transient
                    500..=599 => EngineError::TransientBackend {
                        status: status_code,
                        message,
                    },
                    _ => EngineError::Internal(message),
                }
            }
            // BadRequest variant (request not understood by server)
            google_gmail1::Error::BadRequest(ref err) => {
                EngineError::InvalidInput(format!("{err}"))
            }
            // Network/connection errors - transient
            google_gmail1::Error::HttpError(ref err) => {
                EngineError::Network(format!("connection error: {err}"))
            }
            // IO errors - transient
            google_gmail1::Error::Io(err) => EngineError::Network(err.to_string()),
            _ => EngineError::Internal(error.to_string()),
        }
    }
}
