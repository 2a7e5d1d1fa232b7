use thiserror::Error;

/// Errors produced by [`dispatch`](crate::dispatch::RtcBridge::dispatch).
///
/// Every variant maps to a stable host-facing code so callers on the other
/// side of a bridge boundary can switch on it without parsing messages.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CommandError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("feature not enabled: {0}")]
    FeatureNotEnabled(String),
    #[error("init failed: {0}")]
    Init(String),
    #[error("engine call failed: {0}")]
    Native(String),
    #[error("not implemented: {0}")]
    NotImplemented(String),
}

impl CommandError {
    /// Stable code delivered to the host alongside the message.
    pub fn code(&self) -> &'static str {
        match self {
            CommandError::InvalidArgument(_) => "INVALID_ARGUMENT",
            CommandError::FeatureNotEnabled(_) => "FEATURE_NOT_ENABLED",
            CommandError::Init(_) => "INIT_ERROR",
            CommandError::Native(_) => "NATIVE_ERROR",
            CommandError::NotImplemented(_) => "NOT_IMPLEMENTED",
        }
    }

    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        CommandError::InvalidArgument(msg.into())
    }
}

/// Errors produced by the HTTP-facing components: the capability gate
/// fetch, the [`RoomClient`](crate::rooms::RoomClient), and the
/// passthrough request helper.
#[derive(Debug, Error)]
pub enum ApiError {
    /// The server answered with a status >= 400. Never treated as success.
    #[error("http {status}: {body}")]
    Http { status: u16, body: String },
    /// The response body matched none of the accepted shapes.
    #[error("failed to parse response: {0}")]
    Parse(String),
    /// Transport failure or timeout before a response arrived.
    #[error("network error: {0}")]
    Network(String),
    /// The request could not be built (bad URL, bad method).
    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

impl From<reqwest::Error> for ApiError {
    fn from(e: reqwest::Error) -> Self {
        ApiError::Network(e.to_string())
    }
}
