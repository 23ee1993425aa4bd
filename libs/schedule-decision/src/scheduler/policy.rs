//! Admission policies deciding whether a request may be scheduled while
//! others are waiting for resources.

use std::borrow::Cow;
use std::fmt;
use std::str::FromStr;

use fnsched_model::{InnerAffinity, PendingAffinity, PendingResource, ScheduleRequest, Selector, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::item::QueueItem;

/// Suspendable failures wait for resources instead of failing the caller.
pub fn need_suspend(code: StatusCode, timeout_ms: i64) -> bool {
    matches!(code, StatusCode::ResourceNotEnough | StatusCode::AffinityScheduleFailed) && timeout_ms > 0
}

pub trait PriorityPolicy: Send {
    fn kind(&self) -> PriorityPolicyKind;

    /// May `item` be scheduled now, given what is pending?
    fn can_schedule(&self, item: &QueueItem) -> bool;

    fn need_suspend(&self, code: StatusCode, timeout_ms: i64) -> bool {
        need_suspend(code, timeout_ms)
    }

    /// Remember a request that was suspended for lack of resources.
    fn store_pending_info(&mut self, item: &QueueItem);

    /// Forget every pending request, once they are given another chance.
    fn clear_pending_infos(&mut self);

    /// The request as it should be handed to the performer.
    fn prepare<'a>(&self, request: &'a ScheduleRequest) -> Cow<'a, ScheduleRequest> {
        Cow::Borrowed(request)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PriorityPolicyKind {
    /// Queue order only.
    #[default]
    Fifo,
    /// Keep units free for pending requests of equal or higher priority.
    Fairness,
}

impl PriorityPolicyKind {
    pub fn build(self) -> Box<dyn PriorityPolicy> {
        match self {
            PriorityPolicyKind::Fifo => Box::new(FifoPolicy),
            PriorityPolicyKind::Fairness => Box::new(FairnessPolicy::default()),
        }
    }
}

impl FromStr for PriorityPolicyKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "fifo" => Ok(PriorityPolicyKind::Fifo),
            "fairness" => Ok(PriorityPolicyKind::Fairness),
            other => Err(format!("unknown priority policy '{other}', expected fifo or fairness")),
        }
    }
}

impl fmt::Display for PriorityPolicyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PriorityPolicyKind::Fifo => f.write_str("fifo"),
            PriorityPolicyKind::Fairness => f.write_str("fairness"),
        }
    }
}

// =============================================================================
// FIFO
// =============================================================================

/// Serves the running queue in order; pending requests never hold anything
/// back.
#[derive(Debug, Default, Clone, Copy)]
pub struct FifoPolicy;

impl PriorityPolicy for FifoPolicy {
    fn kind(&self) -> PriorityPolicyKind {
        PriorityPolicyKind::Fifo
    }

    fn can_schedule(&self, _item: &QueueItem) -> bool {
        true
    }

    fn store_pending_info(&mut self, _item: &QueueItem) {}

    fn clear_pending_infos(&mut self) {}
}

// =============================================================================
// Fairness
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
struct PendingInfo {
    request_id: String,
    priority: u16,
    required_affinity: Option<Selector>,
    required_anti_affinity: Option<Selector>,
}

impl PendingInfo {
    fn is_unconstrained(&self) -> bool {
        self.required_affinity.is_none() && self.required_anti_affinity.is_none()
    }
}

/// Resource required (anti-)affinity of the request that stands for `item`.
fn resource_requirements(item: &QueueItem) -> (Option<Selector>, Option<Selector>) {
    let representative = item.instances().into_iter().next();
    let resource = representative
        .as_ref()
        .and_then(|member| member.request.instance.affinity().resource.as_ref());
    match resource {
        Some(resource) => (
            resource.required_affinity.clone(),
            resource.required_anti_affinity.clone(),
        ),
        None => (None, None),
    }
}

/// Holds back a request while a pending request of equal or higher
/// priority competes for the same units: one without resource constraints,
/// or one with the same resource required affinity.
///
/// Requests that do run carry the pending requests' resource constraints
/// as inner `pending` affinity, so the label filter leaves matching units
/// to the pending work.
#[derive(Debug, Default)]
pub struct FairnessPolicy {
    pending: Vec<PendingInfo>,
}

impl FairnessPolicy {
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    fn pending_resources(&self, priority: u16) -> Vec<PendingResource> {
        let mut resources: Vec<PendingResource> = Vec::new();
        for info in self.pending.iter().filter(|info| info.priority >= priority) {
            if info.is_unconstrained() {
                continue;
            }
            let resource = PendingResource {
                required_affinity: info.required_affinity.clone(),
                required_anti_affinity: info.required_anti_affinity.clone(),
            };
            if !resources.contains(&resource) {
                resources.push(resource);
            }
        }
        resources
    }
}

impl PriorityPolicy for FairnessPolicy {
    fn kind(&self) -> PriorityPolicyKind {
        PriorityPolicyKind::Fairness
    }

    fn can_schedule(&self, item: &QueueItem) -> bool {
        let priority = item.priority();
        let (required, _) = resource_requirements(item);
        let blocker = self.pending.iter().find(|info| {
            info.priority >= priority && (info.required_affinity.is_none() || info.required_affinity == required)
        });
        match blocker {
            Some(info) => {
                debug!(
                    request_id = %item.request_id(),
                    pending = %info.request_id,
                    "Similar request is pending"
                );
                false
            }
            None => true,
        }
    }

    fn store_pending_info(&mut self, item: &QueueItem) {
        let (required_affinity, required_anti_affinity) = resource_requirements(item);
        self.pending.push(PendingInfo {
            request_id: item.request_id(),
            priority: item.priority(),
            required_affinity,
            required_anti_affinity,
        });
    }

    fn clear_pending_infos(&mut self) {
        self.pending.clear();
    }

    fn prepare<'a>(&self, request: &'a ScheduleRequest) -> Cow<'a, ScheduleRequest> {
        let resources = self.pending_resources(request.instance.priority());
        if resources.is_empty() {
            return Cow::Borrowed(request);
        }
        let mut prepared = request.clone();
        let inner = prepared
            .instance
            .schedule_option
            .affinity
            .inner
            .get_or_insert_with(InnerAffinity::default);
        inner.pending = Some(PendingAffinity { resources });
        Cow::Owned(prepared)
    }
}
