//! Scheduling outcomes delivered through item promises.

use fnsched_model::{Resources, Status, StatusCode};
use serde::{Deserialize, Serialize};

/// Placement decision for one instance.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScheduleResult {
    /// Owner of the selected unit (the node hosting it).
    pub id: String,
    /// The selected resource unit.
    pub unit_id: String,
    pub code: StatusCode,
    pub reason: String,
    /// Resources reserved on the unit.
    pub allocated: Resources,
    pub score: i64,
}

impl ScheduleResult {
    pub fn failure(code: StatusCode, reason: impl Into<String>) -> Self {
        Self {
            code,
            reason: reason.into(),
            ..Default::default()
        }
    }

    pub fn from_status(status: &Status) -> Self {
        Self::failure(status.code, status.message.clone())
    }

    pub fn is_success(&self) -> bool {
        self.code.is_success()
    }

    /// Success or already placed by an earlier round.
    pub fn is_placed(&self) -> bool {
        matches!(self.code, StatusCode::Success | StatusCode::InstanceAllocated)
    }
}

/// Outcome of a gang request, one result per scheduled member.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GroupScheduleResult {
    pub code: StatusCode,
    pub reason: String,
    pub results: Vec<ScheduleResult>,
}

impl GroupScheduleResult {
    pub fn failure(code: StatusCode, reason: impl Into<String>) -> Self {
        Self {
            code,
            reason: reason.into(),
            results: Vec::new(),
        }
    }

    /// Collect member results. The group takes the code of the first member
    /// that was neither placed nor already allocated.
    pub fn collect(results: Vec<ScheduleResult>) -> Self {
        let (code, reason) = match results.iter().find(|result| !result.is_placed()) {
            Some(failed) => (failed.code, format!("\n{}", failed.reason)),
            None => (StatusCode::Success, String::new()),
        };
        Self { code, reason, results }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn placed(unit: &str) -> ScheduleResult {
        ScheduleResult {
            id: "node-1".into(),
            unit_id: unit.into(),
            ..Default::default()
        }
    }

    #[test]
    fn test_collect_all_placed() {
        let allocated = ScheduleResult::failure(StatusCode::InstanceAllocated, "already there");
        let group = GroupScheduleResult::collect(vec![placed("pod-1"), allocated]);
        assert_eq!(group.code, StatusCode::Success);
        assert!(group.reason.is_empty());
        assert_eq!(group.results.len(), 2);
    }

    #[test]
    fn test_collect_takes_member_failure() {
        let group = GroupScheduleResult::collect(vec![
            placed("pod-1"),
            ScheduleResult::failure(StatusCode::ResourceNotEnough, "CPU: Not Enough"),
        ]);
        assert_eq!(group.code, StatusCode::ResourceNotEnough);
        assert_eq!(group.reason, "\nCPU: Not Enough");
    }

    #[test]
    fn test_result_json_shape() {
        let json = serde_json::to_value(placed("pod-1")).unwrap();
        assert_eq!(json["unit_id"], "pod-1");
        assert_eq!(json["code"], "SUCCESS");
    }
}
