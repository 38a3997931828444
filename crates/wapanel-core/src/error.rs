use thiserror::Error;

/// Top-level error type for wapanel.
#[derive(Debug, Error)]
pub enum PanelError {
    /// The backend could not be reached at all (refused, DNS, timeout).
    #[error("network error: {0}")]
    Network(String),

    /// The backend answered with a non-success status.
    #[error("api error ({status}): {message}")]
    Api { status: u16, message: String },

    /// Port discovery failed to produce a usable endpoint.
    #[error("discovery error: {0}")]
    Discovery(String),

    /// Realtime channel error.
    #[error("realtime error: {0}")]
    Realtime(String),

    /// Configuration error.
    #[error("config error: {0}")]
    Config(String),

    /// Persisted state error.
    #[error("store error: {0}")]
    Store(String),

    /// I/O error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl PanelError {
    /// Whether this error is a transport-level failure rather than an
    /// application answer from the backend.
    pub fn is_network(&self) -> bool {
        matches!(self, Self::Network(_))
    }

    /// HTTP status carried by an API error, if any.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Api { status, .. } => Some(*status),
            _ => None,
        }
    }
}
