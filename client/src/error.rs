use thiserror::Error;

/// Failures seen by client callers, split by what the user can do about them.
#[derive(Debug, Error)]
pub enum ClientError {
    /// The server could not be reached; the live feed falls back to polling.
    #[error("server unreachable: {0}")]
    Offline(String),
    /// The server refused the request (validation or permission).
    #[error("{message}")]
    Rejected { status: u16, message: String },
    /// The server failed; retrying may help.
    #[error("server error ({status}): {message}")]
    Internal { status: u16, message: String },
    #[error("invalid url: {0}")]
    InvalidUrl(String),
}

impl ClientError {
    /// Classify a non-success response by status.
    pub fn from_status(status: u16, message: String) -> Self {
        if (400..500).contains(&status) {
            ClientError::Rejected { status, message }
        } else {
            ClientError::Internal { status, message }
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, ClientError::Offline(_) | ClientError::Internal { .. })
    }
}

impl From<reqwest::Error> for ClientError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_connect() || e.is_timeout() || e.is_request() {
            return ClientError::Offline(e.to_string());
        }
        ClientError::Internal {
            status: e.status().map_or(0, |s| s.as_u16()),
            message: e.to_string(),
        }
    }
}

impl From<url::ParseError> for ClientError {
    fn from(e: url::ParseError) -> Self {
        ClientError::InvalidUrl(e.to_string())
    }
}

pub type ClientResult<T> = Result<T, ClientError>;
