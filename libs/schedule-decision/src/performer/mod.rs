//! Turn feasibility results into placements.
//!
//! Performers sit between the scheduler and the [`SchedulerFramework`]:
//! they ask the framework for feasible units, pick one per request,
//! provisionally allocate it in the round's [`PreAllocatedContext`] and
//! report a [`ScheduleResult`].

mod aggregated;
mod group;
mod instance;

use std::collections::HashMap;

use fnsched_model::{ResourceViewInfo, ScheduleRequest, StatusCode};
use fnsched_schedule_plugin::{NodeScore, PreAllocatedContext, ScheduleResults, UNLIMITED};
use tracing::{info, warn};

pub use aggregated::AggregatedSchedulePerformer;
pub use group::GroupSchedulePerformer;
pub use instance::InstanceSchedulePerformer;

use crate::result::ScheduleResult;

pub(crate) const NO_AVAILABLE_RESOURCE: &str = "no available resource that meets the request requirements";

/// Node that owns `unit_id` in the snapshot.
fn owner_of(view: &ResourceViewInfo, unit_id: &str) -> String {
    let unit = &view.resource_unit;
    match unit.fragments.get(unit_id) {
        Some(fragment) => fragment.owner_id.clone(),
        None if unit.id == unit_id && !unit.owner_id.is_empty() => unit.owner_id.clone(),
        None => unit_id.to_string(),
    }
}

fn placed(view: &ResourceViewInfo, node: &NodeScore, request: &ScheduleRequest) -> ScheduleResult {
    ScheduleResult {
        id: owner_of(view, &node.name),
        unit_id: node.name.clone(),
        code: StatusCode::Success,
        reason: String::new(),
        allocated: request.instance.resources.clone(),
        score: node.score,
    }
}

/// `InstanceAllocated` result when the snapshot says the request already
/// runs somewhere.
fn already_scheduled(view: &ResourceViewInfo, request: &ScheduleRequest) -> Option<ScheduleResult> {
    let unit_id = view.already_scheduled.get(&request.request_id)?;
    warn!(
        request_id = %request.request_id,
        trace_id = %request.trace_id,
        unit_id = %unit_id,
        "Request is already scheduled"
    );
    Some(ScheduleResult {
        id: owner_of(view, unit_id),
        unit_id: unit_id.clone(),
        code: StatusCode::InstanceAllocated,
        reason: format!("request is already scheduled to {unit_id}"),
        ..Default::default()
    })
}

/// Place `request` on the unit a group decision set aside for it.
///
/// Falls through (`None`) when the request carries no reservation or the
/// unit is gone from the snapshot. The placement is counted in `reserved`
/// so that a later pass over the feasibility heap does not hand the same
/// slot out twice.
fn reserved_placement(
    ctx: &mut PreAllocatedContext,
    view: &ResourceViewInfo,
    request: &ScheduleRequest,
    reserved: &mut HashMap<String, i32>,
) -> Option<ScheduleResult> {
    let unit_id = request.reserved_unit()?;
    let Some(fragment) = view.resource_unit.fragments.get(unit_id) else {
        warn!(
            request_id = %request.request_id,
            unit_id = %unit_id,
            "Reserved unit is missing from the resource view"
        );
        return None;
    };

    let taken = reserved.entry(unit_id.to_string()).or_insert(0);
    if !view.already_scheduled.contains_key(&request.request_id) {
        *taken += 1;
        ctx.pre_allocate(&request.instance, unit_id);
    }
    info!(
        request_id = %request.request_id,
        trace_id = %request.trace_id,
        unit_id = %unit_id,
        "Reserved unit selected"
    );
    Some(ScheduleResult {
        id: fragment.owner_id.clone(),
        unit_id: unit_id.to_string(),
        code: StatusCode::Success,
        reason: String::new(),
        allocated: request.instance.resources.clone(),
        score: 0,
    })
}

/// A decision that needs no feasibility pass: a reserved unit, or a unit
/// the snapshot already reports.
pub(crate) fn is_scheduled(
    ctx: &mut PreAllocatedContext,
    view: &ResourceViewInfo,
    request: &ScheduleRequest,
    reserved: &mut HashMap<String, i32>,
) -> Option<ScheduleResult> {
    reserved_placement(ctx, view, request, reserved).or_else(|| already_scheduled(view, request))
}

/// Take the best unit from `results` for `request` and reserve it.
///
/// `reserved` carries counts already taken from a unit outside the heap,
/// by reservations or an earlier pass over the same results; they are
/// deducted the first time the unit comes up again. Units with capacity left go back on the heap.
pub(crate) fn select_from_results(
    ctx: &mut PreAllocatedContext,
    view: &ResourceViewInfo,
    request: &ScheduleRequest,
    results: &mut ScheduleResults,
    reserved: &mut HashMap<String, i32>,
) -> ScheduleResult {
    if let Some(result) = is_scheduled(ctx, view, request, reserved) {
        return result;
    }
    take_best(ctx, view, request, results, reserved)
}

/// Pop the best unit with capacity left off the heap.
pub(crate) fn take_best(
    ctx: &mut PreAllocatedContext,
    view: &ResourceViewInfo,
    request: &ScheduleRequest,
    results: &mut ScheduleResults,
    reserved: &mut HashMap<String, i32>,
) -> ScheduleResult {
    while let Some(mut node) = results.sorted_feasible_nodes.pop() {
        if node.available_for_request == UNLIMITED {
            let result = placed(view, &node, request);
            results.sorted_feasible_nodes.push(node);
            return result;
        }
        if let Some(taken) = reserved.remove(&node.name) {
            node.available_for_request -= taken;
            if node.available_for_request <= 0 {
                continue;
            }
        }
        node.available_for_request -= 1;
        let result = placed(view, &node, request);
        let unit_id = node.name.clone();
        if node.available_for_request > 0 {
            results.sorted_feasible_nodes.push(node);
        }
        ctx.pre_allocate(&request.instance, &unit_id);
        info!(
            request_id = %request.request_id,
            trace_id = %request.trace_id,
            unit_id = %unit_id,
            "Unit selected"
        );
        return result;
    }

    ScheduleResult::failure(StatusCode::ResourceNotEnough, NO_AVAILABLE_RESOURCE)
}
