//! Last scheduling error of requests that are waiting for resources.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use fnsched_model::Status;

use crate::item::lock;

/// Shared record of why suspended requests could not be placed yet.
///
/// Cloning shares the underlying map, so the service can answer queries
/// while the scheduler records.
#[derive(Debug, Clone, Default)]
pub struct ScheduleRecorder {
    errors: Arc<Mutex<HashMap<String, Status>>>,
}

impl ScheduleRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_schedule_err(&self, request_id: &str, status: Status) {
        lock(&self.errors).insert(request_id.to_string(), status);
    }

    pub fn try_query_schedule_err(&self, request_id: &str) -> Option<Status> {
        lock(&self.errors).get(request_id).cloned()
    }

    pub fn erase_schedule_err(&self, request_id: &str) {
        lock(&self.errors).remove(request_id);
    }

    pub fn len(&self) -> usize {
        lock(&self.errors).len()
    }

    pub fn is_empty(&self) -> bool {
        lock(&self.errors).is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fnsched_model::StatusCode;

    #[test]
    fn test_record_query_erase() {
        let recorder = ScheduleRecorder::new();
        let shared = recorder.clone();
        recorder.record_schedule_err("req-1", Status::new(StatusCode::ResourceNotEnough, "CPU: Not Enough"));
        assert_eq!(
            shared.try_query_schedule_err("req-1").unwrap().code,
            StatusCode::ResourceNotEnough
        );
        shared.erase_schedule_err("req-1");
        assert!(recorder.try_query_schedule_err("req-1").is_none());
        assert!(recorder.is_empty());
    }
}
