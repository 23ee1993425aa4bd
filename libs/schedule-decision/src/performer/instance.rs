use std::collections::HashMap;
use std::sync::Arc;

use fnsched_model::{ResourceViewInfo, ScheduleRequest};
use fnsched_schedule_plugin::{PreAllocatedContext, SchedulerFramework};

use super::{is_scheduled, take_best};
use crate::result::ScheduleResult;

/// Places one request at a time.
#[derive(Clone)]
pub struct InstanceSchedulePerformer {
    framework: Arc<dyn SchedulerFramework>,
}

impl InstanceSchedulePerformer {
    pub fn new(framework: Arc<dyn SchedulerFramework>) -> Self {
        Self { framework }
    }

    pub fn schedule(
        &self,
        ctx: &mut PreAllocatedContext,
        view: &ResourceViewInfo,
        request: &ScheduleRequest,
    ) -> ScheduleResult {
        ctx.plugin_ctx = Some(request.contexts.clone());
        let mut reserved = HashMap::new();
        if let Some(result) = is_scheduled(ctx, view, request, &mut reserved) {
            return result;
        }
        let mut results = self
            .framework
            .select_feasible(ctx, &request.instance, &view.resource_unit, 1);
        if !results.code.is_success() {
            return ScheduleResult::failure(results.code, results.reason);
        }
        take_best(ctx, view, request, &mut results, &mut reserved)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fnsched_model::StatusCode;
    use fnsched_schedule_plugin::PluginFramework;
    use fnsched_testing::{labelled_pod, resource_view, shaped_request};

    fn performer() -> InstanceSchedulePerformer {
        InstanceSchedulePerformer::new(Arc::new(PluginFramework::with_defaults(true)))
    }

    #[test]
    fn test_places_and_reserves() {
        let view = resource_view(vec![labelled_pod("pod-a", "node-1", &[])]);
        let mut ctx = PreAllocatedContext::new(view.all_local_labels.clone());

        let first = performer().schedule(&mut ctx, &view, &shaped_request("req-1", 0, 600.0, 600.0));
        assert_eq!(first.code, StatusCode::Success);
        assert_eq!(first.unit_id, "pod-a");
        assert_eq!(first.id, "node-1");
        assert_eq!(first.allocated.cpu(), Some(600.0));

        let second = performer().schedule(&mut ctx, &view, &shaped_request("req-2", 0, 600.0, 600.0));
        assert_eq!(second.code, StatusCode::ResourceNotEnough);
        assert!(second.reason.contains("CPU: Not Enough"));
    }

    #[test]
    fn test_already_scheduled_skips_selection() {
        let mut view = resource_view(vec![labelled_pod("pod-a", "node-1", &[])]);
        view.already_scheduled.insert("req-1".into(), "pod-a".into());
        let mut ctx = PreAllocatedContext::default();
        let result = performer().schedule(&mut ctx, &view, &shaped_request("req-1", 0, 1.0, 1.0));
        assert_eq!(result.code, StatusCode::InstanceAllocated);
        assert!(ctx.allocated.is_empty());
    }
}
