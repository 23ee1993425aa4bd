//! Priority scheduler: drains the running queue through the performers and
//! parks requests that must wait for resources in the pending queue.

mod policy;

use std::borrow::Cow;
use std::sync::Arc;

use fnsched_model::{ResourceViewInfo, ScheduleRequest, Status, StatusCode};
use fnsched_schedule_plugin::{PreAllocatedContext, SchedulerFramework};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

pub use policy::{need_suspend, FairnessPolicy, FifoPolicy, PriorityPolicy, PriorityPolicyKind};

use crate::error::{QueueError, QueueResult};
use crate::item::{AggregatedItem, GroupItem, InstanceItem, QueueItem};
use crate::performer::{AggregatedSchedulePerformer, GroupSchedulePerformer, InstanceSchedulePerformer};
use crate::queue::{AggregatedQueue, AggregationStrategy, ScheduleQueue, TimeSortedQueue};
use crate::recorder::ScheduleRecorder;
use crate::result::{GroupScheduleResult, ScheduleResult};

/// Object-safe face of a [`PriorityScheduler`], whatever queue it uses.
pub trait ScheduleStrategy: Send {
    /// Queue `item` for scheduling. Items the policy holds back go straight
    /// to the pending queue.
    fn enqueue(&mut self, item: QueueItem) -> QueueResult<()>;

    /// Schedule everything in the running queue against the current view.
    fn consume_running_queue(&mut self);

    /// Give every pending request another chance.
    fn activate_pending_requests(&mut self);

    /// Replace the resource view and start a fresh provisional context.
    fn handle_resource_info_update(&mut self, view: ResourceViewInfo);

    fn is_running_queue_empty(&self) -> bool;

    fn is_pending_queue_empty(&self) -> bool;

    fn running_queue_size(&self) -> usize;

    fn pending_queue_size(&self) -> usize;

    fn recorder(&self) -> &ScheduleRecorder;
}

/// Knobs for [`new_priority_scheduler`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchedulerOptions {
    pub max_priority: u16,
    pub aggregation: AggregationStrategy,
    pub policy: PriorityPolicyKind,
}

impl Default for SchedulerOptions {
    fn default() -> Self {
        Self {
            max_priority: 3,
            aggregation: AggregationStrategy::NoAggregate,
            policy: PriorityPolicyKind::Fifo,
        }
    }
}

/// Build a scheduler over the queue type matching `options.aggregation`.
pub fn new_priority_scheduler(
    options: SchedulerOptions,
    framework: Arc<dyn SchedulerFramework>,
    recorder: ScheduleRecorder,
) -> Box<dyn ScheduleStrategy> {
    let policy = options.policy.build();
    info!(
        max_priority = options.max_priority,
        aggregation = %options.aggregation,
        policy = %options.policy,
        "Creating priority scheduler"
    );
    match options.aggregation {
        AggregationStrategy::NoAggregate => Box::new(PriorityScheduler::new(
            TimeSortedQueue::new(options.max_priority),
            TimeSortedQueue::new(options.max_priority),
            policy,
            framework,
            recorder,
        )),
        strategy => Box::new(PriorityScheduler::new(
            AggregatedQueue::new(options.max_priority, strategy),
            AggregatedQueue::new(options.max_priority, strategy),
            policy,
            framework,
            recorder,
        )),
    }
}

pub struct PriorityScheduler<Q: ScheduleQueue> {
    running: Q,
    pending: Q,
    policy: Box<dyn PriorityPolicy>,
    recorder: ScheduleRecorder,
    view: ResourceViewInfo,
    ctx: PreAllocatedContext,
    instance: InstanceSchedulePerformer,
    aggregated: AggregatedSchedulePerformer,
    group: GroupSchedulePerformer,
}

impl<Q: ScheduleQueue> PriorityScheduler<Q> {
    pub fn new(
        running: Q,
        pending: Q,
        policy: Box<dyn PriorityPolicy>,
        framework: Arc<dyn SchedulerFramework>,
        recorder: ScheduleRecorder,
    ) -> Self {
        Self {
            running,
            pending,
            policy,
            recorder,
            view: ResourceViewInfo::default(),
            ctx: PreAllocatedContext::default(),
            instance: InstanceSchedulePerformer::new(Arc::clone(&framework)),
            aggregated: AggregatedSchedulePerformer::new(Arc::clone(&framework)),
            group: GroupSchedulePerformer::new(framework),
        }
    }

    pub fn policy_kind(&self) -> PriorityPolicyKind {
        self.policy.kind()
    }

    pub fn context(&self) -> &PreAllocatedContext {
        &self.ctx
    }

    /// Drop the running front after it was consumed.
    fn pop_running(&mut self) {
        let result = self.running.dequeue();
        if !is_expected_dequeue(&result) {
            warn!(
                running = self.running.size(),
                result = ?result,
                "Running queue out of step with consumption"
            );
        }
    }

    /// Move the running front to the pending queue without scheduling it.
    fn defer_front(&mut self, item: QueueItem) {
        debug!(request_id = %item.request_id(), "Deferring request to pending queue");
        if let Err(e) = self.pending.enqueue(item.clone()) {
            warn!(request_id = %item.request_id(), error = %e, "Failed to defer request");
            item.resolve_with_error(&e.to_status());
        }
        self.pop_running();
    }

    fn consume_instance(&mut self, item: Arc<InstanceItem>) {
        if item.cancel_tag().is_cancelled() {
            debug!(request_id = %item.request_id(), "Skipping cancelled request");
            self.pop_running();
            return;
        }
        let queued = QueueItem::Instance(Arc::clone(&item));
        if !self.policy.can_schedule(&queued) {
            self.defer_front(queued);
            return;
        }
        let request = self.policy.prepare(&item.request);
        let result = self.instance.schedule(&mut self.ctx, &self.view, &request);
        self.pop_running();
        self.on_instance_done(item, result);
    }

    fn consume_group(&mut self, group: Arc<GroupItem>) {
        if group.cancel_tag().is_cancelled() {
            debug!(group_id = %group.group_id, "Skipping cancelled group");
            self.pop_running();
            return;
        }
        if group.members.is_empty() {
            group.set_result(GroupScheduleResult::default());
            self.pop_running();
            return;
        }
        let queued = QueueItem::Group(Arc::clone(&group));
        if !self.policy.can_schedule(&queued) {
            self.defer_front(queued);
            return;
        }
        let prepared: Vec<Cow<'_, ScheduleRequest>> = group
            .members
            .iter()
            .map(|member| self.policy.prepare(&member.request))
            .collect();
        let requests: Vec<&ScheduleRequest> = prepared.iter().map(AsRef::as_ref).collect();
        let result = self.group.schedule(&mut self.ctx, &self.view, &group, &requests);
        self.pop_running();
        self.on_group_done(&group, &requests, result);
    }

    fn consume_aggregated(&mut self, batch: Arc<AggregatedItem>) {
        while let Some(front) = batch.front() {
            if !front.cancel_tag().is_cancelled() {
                break;
            }
            debug!(request_id = %front.request_id(), "Dropping cancelled batch member");
            batch.pop_front();
            self.pop_running();
        }
        let Some(front) = batch.front() else {
            return;
        };

        if !self.policy.can_schedule(&QueueItem::Instance(Arc::clone(&front))) {
            while let Some(member) = batch.pop_front() {
                let queued = QueueItem::Instance(member);
                if let Err(e) = self.pending.enqueue(queued.clone()) {
                    warn!(request_id = %queued.request_id(), error = %e, "Failed to defer batch member");
                    queued.resolve_with_error(&e.to_status());
                }
                self.pop_running();
            }
            return;
        }

        let members = batch.members();
        let prepared: Vec<Cow<'_, ScheduleRequest>> = members
            .iter()
            .map(|member| self.policy.prepare(&member.request))
            .collect();
        let requests: Vec<&ScheduleRequest> = prepared.iter().map(AsRef::as_ref).collect();
        let results = self.aggregated.schedule(&mut self.ctx, &self.view, &requests);
        debug!(key = %batch.key, batch = members.len(), results = results.len(), "Batch scheduled");

        // Members without a result stay in the batch for the next pass.
        for result in results {
            let Some(member) = batch.pop_front() else {
                break;
            };
            self.pop_running();
            self.on_instance_done(member, result);
        }
    }

    fn on_instance_done(&mut self, item: Arc<InstanceItem>, result: ScheduleResult) {
        let request_id = item.request_id().to_string();
        if item.cancel_tag().is_cancelled() {
            info!(request_id = %request_id, "Request cancelled while scheduling");
            if result.code == StatusCode::Success {
                self.ctx.roll_back(&item.request.instance, &result.unit_id);
            }
            self.recorder.erase_schedule_err(&request_id);
            return;
        }

        if self.policy.need_suspend(result.code, item.timeout_ms()) {
            info!(
                request_id = %request_id,
                code = %result.code,
                reason = %result.reason,
                "Request suspended until resources change"
            );
            self.recorder
                .record_schedule_err(&request_id, Status::new(result.code, result.reason));
            item.tag_failure();
            let queued = QueueItem::Instance(item);
            self.policy.store_pending_info(&queued);
            if let Err(e) = self.pending.enqueue(queued.clone()) {
                warn!(request_id = %request_id, error = %e, "Failed to suspend request");
                queued.resolve_with_error(&e.to_status());
            }
            return;
        }

        if item.has_failed() {
            self.recorder.erase_schedule_err(&request_id);
        }
        info!(
            request_id = %request_id,
            trace_id = %item.request.trace_id,
            code = %result.code,
            unit_id = %result.unit_id,
            "Request scheduled"
        );
        item.set_result(result);
    }

    fn on_group_done(&mut self, group: &Arc<GroupItem>, requests: &[&ScheduleRequest], result: GroupScheduleResult) {
        if group.cancel_tag().is_cancelled() {
            info!(group_id = %group.group_id, "Group cancelled while scheduling");
            self.group.roll_back(&mut self.ctx, requests, &result);
            self.recorder.erase_schedule_err(&group.group_id);
            return;
        }

        if self.policy.need_suspend(result.code, group.timeout_ms) {
            info!(
                group_id = %group.group_id,
                code = %result.code,
                "Group suspended until resources change"
            );
            self.group.roll_back(&mut self.ctx, requests, &result);
            self.recorder
                .record_schedule_err(&group.group_id, Status::new(result.code, result.reason.clone()));
            group.tag_failure();
            let queued = QueueItem::Group(Arc::clone(group));
            self.policy.store_pending_info(&queued);
            if let Err(e) = self.pending.enqueue(queued.clone()) {
                warn!(group_id = %group.group_id, error = %e, "Failed to suspend group");
                queued.resolve_with_error(&e.to_status());
            }
            return;
        }

        if group.has_failed() {
            self.recorder.erase_schedule_err(&group.group_id);
        }
        info!(
            group_id = %group.group_id,
            code = %result.code,
            members = result.results.len(),
            "Group scheduled"
        );
        let succeeded = result.code == StatusCode::Success;
        let placed = result.clone();
        group.set_result(result);
        if !succeeded {
            self.group.roll_back(&mut self.ctx, requests, &placed);
        }
    }
}

/// Partial drains of an aggregated front are routine; anything else means
/// the front and the queue disagree.
fn is_expected_dequeue(result: &QueueResult<()>) -> bool {
    matches!(result, Ok(()) | Err(QueueError::AggregateNotDrained))
}

impl<Q: ScheduleQueue> ScheduleStrategy for PriorityScheduler<Q> {
    fn enqueue(&mut self, item: QueueItem) -> QueueResult<()> {
        if self.policy.can_schedule(&item) {
            self.running.enqueue(item)
        } else {
            debug!(request_id = %item.request_id(), "Queueing request behind pending work");
            self.pending.enqueue(item)
        }
    }

    fn consume_running_queue(&mut self) {
        while let Some(front) = self.running.front() {
            match front {
                QueueItem::Instance(item) => self.consume_instance(item),
                QueueItem::Group(group) => self.consume_group(group),
                QueueItem::Aggregated(batch) => self.consume_aggregated(batch),
            }
        }
    }

    fn activate_pending_requests(&mut self) {
        if self.pending.is_empty() {
            return;
        }
        debug!(
            pending = self.pending.size(),
            running = self.running.size(),
            "Activating pending requests"
        );
        self.pending.extend(&mut self.running);
        self.running.swap(&mut self.pending);
        self.policy.clear_pending_infos();
    }

    fn handle_resource_info_update(&mut self, view: ResourceViewInfo) {
        self.ctx = PreAllocatedContext::new(view.all_local_labels.clone());
        self.view = view;
    }

    fn is_running_queue_empty(&self) -> bool {
        self.running.is_empty()
    }

    fn is_pending_queue_empty(&self) -> bool {
        self.pending.is_empty()
    }

    fn running_queue_size(&self) -> usize {
        self.running.size()
    }

    fn pending_queue_size(&self) -> usize {
        self.pending.size()
    }

    fn recorder(&self) -> &ScheduleRecorder {
        &self.recorder
    }
}
