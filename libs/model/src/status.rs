//! Status codes shared by every fallible scheduling step.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Outcome code of a scheduling operation. `Success` is the only
/// non-failure value.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StatusCode {
    #[default]
    Success,
    Failed,
    ErrParamInvalid,
    ParameterError,
    InvalidResourceParameter,
    ResourceNotEnough,
    AffinityScheduleFailed,
    InstanceAllocated,
    ErrScheduleCanceled,
    ScheduleConflicted,
}

impl StatusCode {
    /// Numeric code, with 0 meaning success.
    pub fn as_i32(self) -> i32 {
        match self {
            StatusCode::Success => 0,
            StatusCode::Failed => 1,
            StatusCode::ErrParamInvalid => 1001,
            StatusCode::ParameterError => 1002,
            StatusCode::InvalidResourceParameter => 1003,
            StatusCode::ResourceNotEnough => 1004,
            StatusCode::AffinityScheduleFailed => 1005,
            StatusCode::InstanceAllocated => 1006,
            StatusCode::ErrScheduleCanceled => 1007,
            StatusCode::ScheduleConflicted => 1008,
        }
    }

    pub fn is_success(self) -> bool {
        self == StatusCode::Success
    }
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            StatusCode::Success => "SUCCESS",
            StatusCode::Failed => "FAILED",
            StatusCode::ErrParamInvalid => "ERR_PARAM_INVALID",
            StatusCode::ParameterError => "PARAMETER_ERROR",
            StatusCode::InvalidResourceParameter => "INVALID_RESOURCE_PARAMETER",
            StatusCode::ResourceNotEnough => "RESOURCE_NOT_ENOUGH",
            StatusCode::AffinityScheduleFailed => "AFFINITY_SCHEDULE_FAILED",
            StatusCode::InstanceAllocated => "INSTANCE_ALLOCATED",
            StatusCode::ErrScheduleCanceled => "ERR_SCHEDULE_CANCELED",
            StatusCode::ScheduleConflicted => "SCHEDULE_CONFLICTED",
        };
        write!(f, "{}({})", name, self.as_i32())
    }
}

/// A status code paired with a human-readable reason.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Status {
    pub code: StatusCode,
    #[serde(default)]
    pub message: String,
}

impl Status {
    pub fn ok() -> Self {
        Self::default()
    }

    pub fn new(code: StatusCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.code.is_success()
    }

    pub fn is_err(&self) -> bool {
        !self.is_ok()
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.message.is_empty() {
            write!(f, "{}", self.code)
        } else {
            write!(f, "{}: {}", self.code, self.message)
        }
    }
}
