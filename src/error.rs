use thiserror::Error;

/// Type alias for Result with TriageError
pub type Result<T> = std::result::Result<T, TriageError>;

/// Error types for the mail triage system
///
/// Everything except the mail-transport variants aborts a run: the
/// orchestrator does not isolate failures per session.
#[derive(Error, Debug)]
pub enum TriageError {
    /// Gmail API returned an error
    #[error("Gmail API error: {0}")]
    ApiError(String),

    /// Authentication failed
    #[error("Authentication failed: {0}")]
    AuthError(String),

    /// Rate limit exceeded - should retry after specified seconds
    #[error("Rate limit exceeded, retry after {retry_after} seconds")]
    RateLimitExceeded { retry_after: u64 },

    /// Network-related error (connection issues, timeouts, etc.)
    #[error("Network error: {0}")]
    NetworkError(String),

    /// Server returned 5xx error
    #[error("Server error (HTTP {status}): {message}")]
    ServerError { status: u16, message: String },

    /// Resource not found (404)
    #[error("Message not found: {0}")]
    MessageNotFound(String),

    /// Bad request (400)
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// Forbidden (403)
    #[error("Access forbidden: {0}")]
    Forbidden(String),

    /// Invalid message format or parsing error
    #[error("Invalid message format: {0}")]
    InvalidMessageFormat(String),

    /// The model API rejected or failed a request
    #[error("Inference failed: {0}")]
    InferenceFailure(String),

    /// Waiting on a batch job was cancelled before it ended
    #[error("Batch {batch_id} wait cancelled")]
    BatchCancelled { batch_id: String },

    /// A session queued a named step outside the step catalog
    #[error("Unknown action: {0}")]
    UnknownStep(String),

    /// The model asked for a tool that is not in the catalog
    #[error("Tool {0} not found")]
    UnknownTool(String),

    /// A tool invocation block arrived without a tool name
    #[error("Tool invocation from the model has no name")]
    MissingToolName,

    /// The model signalled tool use but sent no tool invocation block
    #[error("Tool call not found in response {response_id}")]
    MissingToolCall { response_id: String },

    /// A batch result line carried no correlation id
    #[error("Batch result is missing its custom_id")]
    MissingCorrelationId,

    /// A batch result referenced a session that is not part of this run
    #[error("Batch result for unknown session {0}")]
    UnknownCorrelationId(String),

    /// Tool input did not match the tool's schema
    #[error("Invalid input for tool {tool}: {reason}")]
    InvalidToolInput { tool: String, reason: String },

    /// A session was driven through a transition its state does not allow
    #[error("Session {session_id}: {reason}")]
    InvalidTransition { session_id: String, reason: String },

    /// A required credential could not be resolved
    #[error("Missing credential: {0}")]
    MissingCredential(String),

    /// IO error (file operations, etc.)
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    /// JSON serialization/deserialization error
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    /// Configuration error
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Generic catch-all error
    #[error("Unknown error: {0}")]
    Unknown(String),
}

impl TriageError {
    /// Check if the error is transient and should be retried
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            TriageError::RateLimitExceeded { .. }
                | TriageError::ServerError { .. }
                | TriageError::NetworkError(_)
        )
    }
}

/// Parse the Retry-After header from an HTTP response
///
/// Only the delay-seconds form is honoured; a missing, past or HTTP-date
/// value falls back to a default of 5 seconds.
fn parse_retry_after_header<B>(response: &hyper::Response<B>) -> u64 {
    const DEFAULT_RETRY_AFTER: u64 = 5;

    response
        .headers()
        .get("retry-after")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.trim().parse::<u64>().ok())
        .unwrap_or(DEFAULT_RETRY_AFTER)
}

impl From<google_gmail1::Error> for TriageError {
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
                    429 => {
                        let retry_after = parse_retry_after_header(response);
                        TriageError::RateLimitExceeded { retry_after }
                    }
                    404 => TriageError::MessageNotFound("Resource not found".to_string()),
                    400 => TriageError::BadRequest(message),
                    403 => TriageError::Forbidden(message),
                    500..=599 => TriageError::ServerError {
                        status: status_code,
                        message,
                    },
                    _ => TriageError::ApiError(message),
                }
            }
            google_gmail1::Error::BadRequest(ref err) => TriageError::BadRequest(format!("{}", err)),
            google_gmail1::Error::HttpError(ref err) => {
                TriageError::NetworkError(format!("Connection error: {}", err))
            }
            google_gmail1::Error::Io(err) => TriageError::NetworkError(err.to_string()),
            _ => TriageError::ApiError(error.to_string()),
        }
    }
}

impl From<reqwest::Error> for TriageError {
    fn from(error: reqwest::Error) -> Self {
        if error.is_decode() {
            TriageError::InferenceFailure(format!("Undecodable response: {}", error))
        } else if let Some(status) = error.status() {
            TriageError::InferenceFailure(format!("HTTP {}: {}", status.as_u16(), error))
        } else {
            TriageError::NetworkError(error.to_string())
        }
    }
}
