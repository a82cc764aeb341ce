use thiserror::Error;

/// Failure kinds of a request handled by [`crate::MessageService`].
#[derive(Debug, Error)]
pub enum ChatError {
    /// No caller identity on the request.
    #[error("Unauthorized")]
    Unauthenticated,
    /// A required field is missing.
    #[error("{0}")]
    BadRequest(String),
    /// Container or message absent, or the caller is not a participant.
    #[error("{0}")]
    NotFound(String),
    /// Known caller and resource, insufficient permission.
    #[error("Forbidden")]
    Forbidden,
    /// Storage or transport collaborator failure.
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

pub type ChatResult<T> = Result<T, ChatError>;

impl ChatError {
    /// HTTP status for the error. Forbidden shares 401 with Unauthenticated.
    pub fn status(&self) -> u16 {
        match self {
            ChatError::Unauthenticated | ChatError::Forbidden => 401,
            ChatError::BadRequest(_) => 400,
            ChatError::NotFound(_) => 404,
            ChatError::Internal(_) => 500,
        }
    }

    /// Message safe to show to the caller.
    pub fn public_message(&self) -> String {
        match self {
            ChatError::Internal(_) => "Internal server error".into(),
            other => other.to_string(),
        }
    }

    pub fn is_internal(&self) -> bool {
        matches!(self, ChatError::Internal(_))
    }
}
