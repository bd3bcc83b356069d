use std::time::Duration;

use thiserror::Error;

use crate::domain::{ParseTaskIdError, SessionId};
use crate::ports::LogError;

#[derive(Debug, Error)]
pub enum WorkQueueError {
    /// Rejected locally; nothing was submitted.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// No commit notification in time. The command may still commit later.
    #[error("{operation} timed out after {after:?}; outcome unknown")]
    Timeout {
        operation: &'static str,
        after: Duration,
    },

    #[error("session expired: {0}")]
    SessionExpired(SessionId),

    #[error("a task processor is already registered")]
    AlreadyProcessing,

    #[error(transparent)]
    Log(LogError),

    #[error("payload codec: {0}")]
    Codec(#[from] serde_json::Error),

    /// The task carrying a submission died before reporting back.
    #[error("submission aborted: {0}")]
    Aborted(String),
}

impl From<LogError> for WorkQueueError {
    fn from(err: LogError) -> Self {
        match err {
            LogError::SessionExpired(session) => WorkQueueError::SessionExpired(session),
            other => WorkQueueError::Log(other),
        }
    }
}

impl From<ParseTaskIdError> for WorkQueueError {
    fn from(err: ParseTaskIdError) -> Self {
        WorkQueueError::InvalidArgument(err.to_string())
    }
}
