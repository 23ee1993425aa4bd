use std::collections::HashMap;
use std::sync::Arc;

use fnsched_model::{LabelMap, ResourceViewInfo, ScheduleRequest, StatusCode};
use fnsched_schedule_plugin::affinity::required_anti_affinity_filter;
use fnsched_schedule_plugin::{PreAllocatedContext, SchedulerFramework};
use tracing::{debug, warn};

use super::select_from_results;
use super::InstanceSchedulePerformer;
use crate::item::{GroupItem, GroupPolicy, RangeOpt};
use crate::result::{GroupScheduleResult, ScheduleResult};

/// Places the members of a gang.
#[derive(Clone)]
pub struct GroupSchedulePerformer {
    framework: Arc<dyn SchedulerFramework>,
    instance: InstanceSchedulePerformer,
}

/// Range members share one feasibility pass unless their own labels would
/// violate their required anti-affinity.
fn can_batch(range: Option<RangeOpt>, first: &ScheduleRequest) -> bool {
    if range.is_none() {
        return false;
    }
    let anti = first
        .instance
        .affinity()
        .instance
        .as_ref()
        .and_then(|affinity| affinity.required_anti_affinity.as_ref());
    match anti {
        Some(selector) => {
            let own = LabelMap::from_labels(first.instance.labels.as_slice());
            required_anti_affinity_filter("", selector, &own)
        }
        None => true,
    }
}

impl GroupSchedulePerformer {
    pub fn new(framework: Arc<dyn SchedulerFramework>) -> Self {
        Self {
            instance: InstanceSchedulePerformer::new(Arc::clone(&framework)),
            framework,
        }
    }

    /// `requests` are the member requests, in member order.
    pub fn schedule(
        &self,
        ctx: &mut PreAllocatedContext,
        view: &ResourceViewInfo,
        group: &GroupItem,
        requests: &[&ScheduleRequest],
    ) -> GroupScheduleResult {
        if requests.is_empty() {
            return GroupScheduleResult::default();
        }
        match group.policy {
            GroupPolicy::StrictPack => self.strict_pack_schedule(ctx, view, group, requests),
            GroupPolicy::Individual => self.member_schedule(ctx, view, group, requests),
        }
    }

    /// Undo the reservations behind every successful member result.
    pub fn roll_back(&self, ctx: &mut PreAllocatedContext, requests: &[&ScheduleRequest], result: &GroupScheduleResult) {
        for (member, placed) in requests.iter().zip(&result.results) {
            if placed.code != StatusCode::Success {
                continue;
            }
            debug!(
                request_id = %member.request_id,
                unit_id = %placed.unit_id,
                "Rolling back group member"
            );
            ctx.roll_back(&member.instance, &placed.unit_id);
        }
    }

    /// Sum the members into one request and place it on a single unit.
    fn strict_pack_schedule(
        &self,
        ctx: &mut PreAllocatedContext,
        view: &ResourceViewInfo,
        group: &GroupItem,
        requests: &[&ScheduleRequest],
    ) -> GroupScheduleResult {
        let mut total = requests[0].clone();
        for member in &requests[1..] {
            total.instance.resources += &member.instance.resources;
        }
        debug!(group_id = %group.group_id, members = requests.len(), "Packing group as one instance");

        let result = self.instance.schedule(ctx, view, &total);
        if !result.is_success() {
            return GroupScheduleResult::failure(result.code, result.reason);
        }
        // Reservations are accounted per member so that roll back undoes them.
        ctx.roll_back(&total.instance, &result.unit_id);
        for member in requests {
            ctx.pre_allocate(&member.instance, &result.unit_id);
        }
        let results = requests
            .iter()
            .map(|member| ScheduleResult {
                allocated: member.instance.resources.clone(),
                ..result.clone()
            })
            .collect();
        GroupScheduleResult {
            code: StatusCode::Success,
            reason: String::new(),
            results,
        }
    }

    fn member_schedule(
        &self,
        ctx: &mut PreAllocatedContext,
        view: &ResourceViewInfo,
        group: &GroupItem,
        requests: &[&ScheduleRequest],
    ) -> GroupScheduleResult {
        let mut shared = None;
        if can_batch(group.range, requests[0]) {
            ctx.plugin_ctx = Some(requests[0].contexts.clone());
            let expected = u32::try_from(requests.len()).unwrap_or(u32::MAX);
            shared = Some(
                self.framework
                    .select_feasible(ctx, &requests[0].instance, &view.resource_unit, expected),
            );
        }

        let min = group.range.map_or(requests.len(), |range| range.min as usize);
        let mut reserved = HashMap::new();
        let mut results = Vec::with_capacity(requests.len());
        let mut success = 0usize;
        for request in requests {
            let result = match shared.as_mut() {
                Some(feasible) if !feasible.code.is_success() => {
                    ScheduleResult::failure(feasible.code, feasible.reason.clone())
                }
                Some(feasible) => select_from_results(ctx, view, request, feasible, &mut reserved),
                None => self.instance.schedule(ctx, view, request),
            };
            if result.is_placed() {
                success += 1;
                results.push(result);
                continue;
            }
            if success >= min {
                break;
            }
            results.push(result);
            break;
        }
        self.collect(ctx, group, requests, results, success)
    }

    /// Trim a range result to the largest size reachable from `max` in
    /// whole steps, never below `min`.
    fn collect(
        &self,
        ctx: &mut PreAllocatedContext,
        group: &GroupItem,
        requests: &[&ScheduleRequest],
        results: Vec<ScheduleResult>,
        success: usize,
    ) -> GroupScheduleResult {
        let Some(range) = group.range else {
            return GroupScheduleResult::collect(results);
        };
        let (min, max, step) = (range.min as usize, range.max as usize, range.step.max(1) as usize);
        if success <= min {
            return GroupScheduleResult::collect(results);
        }

        let step_count = max.saturating_sub(success).div_ceil(step) * step;
        let keep = max.saturating_sub(step_count).max(min);
        warn!(group_id = %group.group_id, success, keep, "Trimming range group result");

        let mut kept = Vec::with_capacity(keep);
        for (index, result) in results.into_iter().enumerate() {
            if index < keep {
                kept.push(result);
            } else if result.code == StatusCode::Success {
                ctx.roll_back(&requests[index].instance, &result.unit_id);
            }
        }
        GroupScheduleResult::collect(kept)
    }
}
