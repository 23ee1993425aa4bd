//! Queue contract violations.

use fnsched_model::{Status, StatusCode};
use thiserror::Error;

/// Errors returned by [`ScheduleQueue`](crate::ScheduleQueue) operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QueueError {
    #[error("get instance requestId failed")]
    MissingRequestId,

    #[error("instance priority is greater than maxPriority")]
    PriorityTooHigh,

    #[error("request {0} is already in the queue")]
    Duplicate(String),

    #[error("queue is empty")]
    Empty,

    #[error("aggregateItem.reqQueue is not empty")]
    AggregateNotDrained,

    #[error("queueItem is invalid")]
    InvalidItem,
}

impl QueueError {
    /// Status code reported to callers for this error.
    pub fn code(&self) -> StatusCode {
        match self {
            QueueError::MissingRequestId | QueueError::PriorityTooHigh | QueueError::Duplicate(_) => {
                StatusCode::ErrParamInvalid
            }
            QueueError::Empty | QueueError::AggregateNotDrained | QueueError::InvalidItem => StatusCode::Failed,
        }
    }

    pub fn to_status(&self) -> Status {
        Status::new(self.code(), self.to_string())
    }
}

pub type QueueResult<T> = Result<T, QueueError>;
