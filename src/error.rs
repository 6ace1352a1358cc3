use crate::data_structures::SignalId;
use thiserror::Error;

/// Coarse classification handed back to callers so they can tell
/// "fix your input" apart from "this id does not exist".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    InvalidRequest,
    Internal,
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("signal {0} is not in the registry")]
    SignalNotFound(SignalId),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),

    #[error("amqp error: {0}")]
    Amqp(#[from] amiquip::Error),

    #[error("background task failed: {0}")]
    Task(String),
}

impl EngineError {
    pub fn invalid(message: impl Into<String>) -> Self {
        EngineError::InvalidRequest(message.into())
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            EngineError::SignalNotFound(_) => ErrorKind::NotFound,
            EngineError::InvalidRequest(_) => ErrorKind::InvalidRequest,
            EngineError::Config(_)
            | EngineError::Io(_)
            | EngineError::Json(_)
            | EngineError::Csv(_)
            | EngineError::Amqp(_)
            | EngineError::Task(_) => ErrorKind::Internal,
        }
    }
}

pub type EngineResult<T> = Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_separate_lookup_from_validation() {
        let missing = EngineError::SignalNotFound(SignalId::new("SIG-404"));
        assert_eq!(missing.kind(), ErrorKind::NotFound);
        assert_eq!(missing.to_string(), "signal SIG-404 is not in the registry");

        let bad = EngineError::invalid("distance must be non-negative");
        assert_eq!(bad.kind(), ErrorKind::InvalidRequest);
    }
}
