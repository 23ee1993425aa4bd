use std::collections::HashMap;
use std::sync::Arc;

use fnsched_model::{ResourceViewInfo, ScheduleRequest};
use fnsched_schedule_plugin::{PreAllocatedContext, SchedulerFramework};
use tracing::debug;

use super::select_from_results;
use crate::result::ScheduleResult;

/// Places a batch of same-shape requests with a single feasibility pass.
#[derive(Clone)]
pub struct AggregatedSchedulePerformer {
    framework: Arc<dyn SchedulerFramework>,
}

impl AggregatedSchedulePerformer {
    pub fn new(framework: Arc<dyn SchedulerFramework>) -> Self {
        Self { framework }
    }

    /// One result per request, in order, stopping after the first failure.
    /// A failed feasibility pass yields a single result for the whole batch.
    pub fn schedule(
        &self,
        ctx: &mut PreAllocatedContext,
        view: &ResourceViewInfo,
        requests: &[&ScheduleRequest],
    ) -> Vec<ScheduleResult> {
        let Some(first) = requests.first() else {
            return Vec::new();
        };
        ctx.plugin_ctx = Some(first.contexts.clone());
        self.multi_schedule(ctx, view, requests, first)
    }

    fn multi_schedule(
        &self,
        ctx: &mut PreAllocatedContext,
        view: &ResourceViewInfo,
        requests: &[&ScheduleRequest],
        spec: &ScheduleRequest,
    ) -> Vec<ScheduleResult> {
        let expected = u32::try_from(requests.len()).unwrap_or(u32::MAX);
        let mut feasible = self
            .framework
            .select_feasible(ctx, &spec.instance, &view.resource_unit, expected);
        if !feasible.code.is_success() {
            debug!(
                request_id = %spec.request_id,
                batch = requests.len(),
                code = %feasible.code,
                "Batch has no feasible unit"
            );
            return vec![ScheduleResult::failure(feasible.code, feasible.reason)];
        }

        let mut reserved = HashMap::new();
        let mut results = Vec::with_capacity(requests.len());
        for request in requests {
            let result = select_from_results(ctx, view, request, &mut feasible, &mut reserved);
            let placed = result.is_placed();
            results.push(result);
            if !placed {
                break;
            }
        }
        results
    }
}
