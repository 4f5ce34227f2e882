use thiserror::Error;

pub type SessionResult<T> = Result<T, SessionError>;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("browser launch failed: {0}")]
    Launch(String),
    #[error("cdp error: {0}")]
    Cdp(#[from] chromiumoxide::error::CdpError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("configuration error: {0}")]
    Configuration(String),
    #[error("challenge not solved within the attempt budget")]
    ChallengeNotSolved,
    #[error("session unusable: {0}")]
    Unusable(String),
}

impl SessionError {
    /// Session-level faults require the owning worker to recreate its
    /// session before accepting another task. A reported solve failure does
    /// not: the session stays usable.
    pub fn is_fault(&self) -> bool {
        !matches!(self, SessionError::ChallengeNotSolved)
    }
}

impl From<tokio::task::JoinError> for SessionError {
    fn from(err: tokio::task::JoinError) -> Self {
        SessionError::Unusable(err.to_string())
    }
}
