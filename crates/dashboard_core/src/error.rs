use shared::{
    domain::ObjRef,
    error::{CommandFailure, FailureReason},
    protocol::ParentFiltersValidation,
};
use thiserror::Error;

use crate::backend::BackendError;

/// Invariant violations detected while applying a mutation batch.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StateError {
    #[error("widget {0} is referenced more than once in the layout")]
    DuplicateWidget(ObjRef),
    #[error("widget {0} is not part of the layout")]
    UnknownWidget(ObjRef),
    #[error("filter {0} appears more than once in the filter context")]
    DuplicateFilter(String),
}

#[derive(Debug, Error)]
pub enum CommandError {
    #[error("invalid arguments: {0}")]
    InvalidArguments(String),
    #[error("parent filter validation failed: {0:?}")]
    Rejected(ParentFiltersValidation),
    #[error("backend call failed: {0}")]
    Backend(#[from] BackendError),
    #[error("inconsistent state: {0}")]
    InconsistentState(String),
    #[error(transparent)]
    State(#[from] StateError),
    #[error("superseded: {0}")]
    Superseded(String),
}

impl CommandError {
    pub fn invalid(message: impl Into<String>) -> Self {
        Self::InvalidArguments(message.into())
    }

    pub fn into_failure(self) -> CommandFailure {
        let message = self.to_string();
        match self {
            Self::InvalidArguments(_) => {
                CommandFailure::new(FailureReason::InvalidArguments, message)
            }
            Self::Rejected(_) => CommandFailure::new(FailureReason::ValidationRejected, message),
            Self::Backend(err) => CommandFailure::new(FailureReason::BackendFailure, message)
                .with_error(err.to_payload()),
            Self::InconsistentState(_) | Self::State(_) => {
                CommandFailure::new(FailureReason::InconsistentState, message)
            }
            Self::Superseded(_) => CommandFailure::new(FailureReason::Superseded, message),
        }
    }
}

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("dashboard engine is no longer running")]
    EngineStopped,
    #[error("command failed: {0}")]
    CommandFailed(CommandFailure),
    #[error("timed out waiting for {event_type}")]
    Timeout { event_type: String },
}
