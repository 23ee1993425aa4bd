//! Schedule queue actor - owns the priority scheduler and drives it from
//! its mailbox.
//!
//! ## State Machine
//!
//! ```text
//!            enqueue                   queue drained, nothing pending
//! waiting ───────────> running ──────────────────────────────────> waiting
//!                       │   ^
//!   queue drained,      │   │ resource update / idle timer
//!   requests suspended  v   │ (pending requests activated)
//!                      pending
//! ```
//!
//! Entering `running` posts a consumer round to the actor's own mailbox, so
//! requests arriving in a burst are scheduled together.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use fnsched_model::{ScheduleRequest, Status, StatusCode};
use fnsched_schedule_decision::{
    new_priority_scheduler, CancelTag, GroupItem, GroupPolicy, GroupScheduleResult, InstanceItem, QueueItem, RangeOpt,
    ScheduleRecorder, ScheduleResult, ScheduleStrategy, DEFAULT_GROUP_TIMEOUT_MS,
};
use fnsched_schedule_plugin::PluginFramework;
use serde::{Deserialize, Serialize};
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

use crate::actor::{self, Actor, ActorContext, ActorError, ActorHandle, WeakActorHandle};
use crate::config::Config;
use crate::source::ResourceViewSource;

// =============================================================================
// Messages
// =============================================================================

/// A gang of requests scheduled together.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupSpec {
    pub group_id: String,
    pub requests: Vec<ScheduleRequest>,
    #[serde(default)]
    pub range: Option<RangeOpt>,
    #[serde(default)]
    pub policy: GroupPolicy,
    /// How long the group may wait for resources; defaults to one second.
    #[serde(default)]
    pub timeout_ms: Option<i64>,
}

#[derive(Debug)]
pub enum QueueMessage {
    ScheduleDecision {
        request: Box<ScheduleRequest>,
        cancel: CancelTag,
        reply: oneshot::Sender<oneshot::Receiver<ScheduleResult>>,
    },
    GroupScheduleDecision {
        spec: GroupSpec,
        cancel: CancelTag,
        reply: oneshot::Sender<oneshot::Receiver<GroupScheduleResult>>,
    },
    /// The resource view changed.
    UpdateResourceInfo,
    /// Idle timer armed by generation `generation` fired.
    ResourceIdle { generation: u64 },
    /// Run a consumer round.
    Consume,
    /// Outcome of deploying a placement downstream.
    ScheduleConfirm {
        response: ScheduleResult,
        reply: oneshot::Sender<Status>,
    },
    QueryState { reply: oneshot::Sender<QueueState> },
}

/// Queue state, derived from which queues hold requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueState {
    /// Nothing queued.
    Waiting,
    /// Only suspended requests, waiting for resources.
    Pending,
    /// Requests ready to be scheduled.
    Running,
}

impl QueueState {
    pub fn from_queues(running_empty: bool, pending_empty: bool) -> Self {
        match (running_empty, pending_empty) {
            (true, true) => QueueState::Waiting,
            (true, false) => QueueState::Pending,
            (false, _) => QueueState::Running,
        }
    }
}

/// Map a downstream confirmation onto the status reported to the caller.
pub fn confirm_status(response: &ScheduleResult) -> Status {
    match response.code {
        StatusCode::Success => Status::ok(),
        StatusCode::ResourceNotEnough => Status::new(
            StatusCode::ScheduleConflicted,
            format!("schedule conflicted: {}", response.reason),
        ),
        code => Status::new(code, response.reason.clone()),
    }
}

// =============================================================================
// Actor
// =============================================================================

pub struct ScheduleQueueActor {
    scheduler: Box<dyn ScheduleStrategy>,
    source: Arc<dyn ResourceViewSource>,
    recorder: ScheduleRecorder,
    state: QueueState,
    new_resource_available: bool,
    consumer_requested: bool,
    idle: IdleTimer,
    me: WeakActorHandle<QueueMessage>,
}

impl ScheduleQueueActor {
    pub fn new(
        scheduler: Box<dyn ScheduleStrategy>,
        source: Arc<dyn ResourceViewSource>,
        idle: Duration,
        me: WeakActorHandle<QueueMessage>,
    ) -> Self {
        Self {
            recorder: scheduler.recorder().clone(),
            scheduler,
            source,
            state: QueueState::Waiting,
            new_resource_available: false,
            consumer_requested: false,
            idle: IdleTimer::new(idle),
            me,
        }
    }

    fn schedule_decision(&mut self, request: ScheduleRequest, cancel: CancelTag) -> oneshot::Receiver<ScheduleResult> {
        let (item, rx) = InstanceItem::new(request, cancel.clone());
        let watched = Arc::clone(&item);
        let recorder = self.recorder.clone();
        watch_cancel(cancel, move |reason| {
            let reason = cancel_reason(&recorder, watched.request_id(), reason);
            if watched.set_result(ScheduleResult::failure(StatusCode::ErrScheduleCanceled, reason)) {
                info!(request_id = %watched.request_id(), "Request cancelled");
            }
        });

        if let Err(e) = self.scheduler.enqueue(QueueItem::Instance(Arc::clone(&item))) {
            warn!(request_id = %item.request_id(), error = %e, "Failed to enqueue request");
            item.set_result(ScheduleResult::from_status(&e.to_status()));
            return rx;
        }
        self.update_state();
        rx
    }

    fn group_schedule_decision(&mut self, spec: GroupSpec, cancel: CancelTag) -> oneshot::Receiver<GroupScheduleResult> {
        let members = spec
            .requests
            .into_iter()
            .map(|request| InstanceItem::new(request, cancel.clone()).0)
            .collect::<Vec<_>>();
        let (group, rx) = GroupItem::new(spec.group_id, members, cancel.clone());
        let group = Arc::new(
            group
                .with_range(spec.range)
                .with_policy(spec.policy)
                .with_timeout_ms(spec.timeout_ms.unwrap_or(DEFAULT_GROUP_TIMEOUT_MS)),
        );
        if group.members.is_empty() {
            group.set_result(GroupScheduleResult::default());
            return rx;
        }

        let watched = Arc::clone(&group);
        let recorder = self.recorder.clone();
        watch_cancel(cancel, move |reason| {
            let reason = cancel_reason(&recorder, &watched.group_id, reason);
            if watched.set_result(GroupScheduleResult::failure(StatusCode::ErrScheduleCanceled, reason)) {
                info!(group_id = %watched.group_id, "Group cancelled");
            }
        });

        if let Err(e) = self.scheduler.enqueue(QueueItem::Group(Arc::clone(&group))) {
            warn!(group_id = %group.group_id, error = %e, "Failed to enqueue group");
            let status = e.to_status();
            group.set_result(GroupScheduleResult::failure(status.code, status.message));
            return rx;
        }
        self.update_state();
        rx
    }

    /// Recompute the state; entering `Running` requests a consumer round.
    fn update_state(&mut self) {
        let next = QueueState::from_queues(
            self.scheduler.is_running_queue_empty(),
            self.scheduler.is_pending_queue_empty(),
        );
        if next != self.state {
            debug!(from = ?self.state, to = ?next, "Queue state changed");
            self.state = next;
        }
        if self.state == QueueState::Running && !self.consumer_requested {
            self.request_consumer();
        }
    }

    fn request_consumer(&mut self) {
        match self.me.try_send(QueueMessage::Consume) {
            Ok(()) => self.consumer_requested = true,
            Err(e) => warn!(error = %e, "Failed to request consumer"),
        }
    }

    fn on_resource_update(&mut self) {
        self.new_resource_available = true;
        if self.state == QueueState::Pending {
            info!(pending = self.scheduler.pending_queue_size(), "Activating pending requests");
            self.scheduler.activate_pending_requests();
            self.update_state();
        }
        self.arm_idle_timer();
    }

    fn on_resource_idle(&mut self, generation: u64) {
        if !self.idle.is_current(generation) || self.scheduler.is_pending_queue_empty() {
            return;
        }
        debug!(generation, "Resource view idle, retrying pending requests");
        self.on_resource_update();
    }

    fn arm_idle_timer(&mut self) {
        let me = self.me.clone();
        self.idle.arm(move |generation| async move {
            let _ = me.send(QueueMessage::ResourceIdle { generation }).await;
        });
    }

    #[instrument(skip(self))]
    fn consume(&mut self) {
        self.consumer_requested = false;
        if self.new_resource_available {
            match self.source.latest() {
                Ok(view) => {
                    self.scheduler.handle_resource_info_update(view);
                    self.new_resource_available = false;
                }
                Err(e) => warn!(error = %e, "Failed to fetch resource view, scheduling with current view"),
            }
        }
        self.scheduler.consume_running_queue();
        self.update_state();
        if self.state == QueueState::Pending {
            self.arm_idle_timer();
        }
        debug!(
            state = ?self.state,
            pending = self.scheduler.pending_queue_size(),
            "Consumer round finished"
        );
    }

    fn schedule_confirm(&mut self, response: &ScheduleResult) -> Status {
        let status = confirm_status(response);
        if status.code == StatusCode::ScheduleConflicted {
            warn!(unit_id = %response.unit_id, reason = %response.reason, "Placement conflicted downstream");
            self.new_resource_available = true;
        }
        status
    }
}

/// Single pending idle timer. Arming it aborts the previous one; a firing
/// that was already queued is recognised as stale by its generation.
struct IdleTimer {
    idle: Duration,
    generation: u64,
    task: Option<JoinHandle<()>>,
}

impl IdleTimer {
    fn new(idle: Duration) -> Self {
        Self {
            idle,
            generation: 0,
            task: None,
        }
    }

    fn arm<F, Fut>(&mut self, fire: F)
    where
        F: FnOnce(u64) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.cancel();
        self.generation += 1;
        let generation = self.generation;
        let idle = self.idle;
        self.task = Some(tokio::spawn(async move {
            tokio::time::sleep(idle).await;
            fire(generation).await;
        }));
    }

    fn is_current(&self, generation: u64) -> bool {
        generation == self.generation
    }

    fn cancel(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

/// Cancel reason, with the last recorded failure when there is one.
fn cancel_reason(recorder: &ScheduleRecorder, request_id: &str, reason: String) -> String {
    let last = recorder.try_query_schedule_err(request_id);
    recorder.erase_schedule_err(request_id);
    match last {
        Some(status) => format!("{reason} (last failure: {})", status.message),
        None => reason,
    }
}

/// Run `on_cancel` once `tag` fires. The watcher ends when the cancel handle
/// is dropped.
fn watch_cancel<F>(tag: CancelTag, on_cancel: F)
where
    F: FnOnce(String) + Send + 'static,
{
    tokio::spawn(async move {
        if let Some(reason) = tag.cancelled().await {
            on_cancel(reason);
        }
    });
}

#[async_trait]
impl Actor for ScheduleQueueActor {
    type Message = QueueMessage;

    fn name(&self) -> &str {
        "schedule_queue"
    }

    async fn handle(&mut self, msg: QueueMessage, _ctx: &mut ActorContext) -> Result<bool, ActorError> {
        match msg {
            QueueMessage::ScheduleDecision { request, cancel, reply } => {
                let _ = reply.send(self.schedule_decision(*request, cancel));
            }
            QueueMessage::GroupScheduleDecision { spec, cancel, reply } => {
                let _ = reply.send(self.group_schedule_decision(spec, cancel));
            }
            QueueMessage::UpdateResourceInfo => self.on_resource_update(),
            QueueMessage::ResourceIdle { generation } => self.on_resource_idle(generation),
            QueueMessage::Consume => self.consume(),
            QueueMessage::ScheduleConfirm { response, reply } => {
                let _ = reply.send(self.schedule_confirm(&response));
            }
            QueueMessage::QueryState { reply } => {
                let _ = reply.send(self.state);
            }
        }
        Ok(true)
    }

    async fn on_stop(&mut self, _ctx: &mut ActorContext) {
        self.idle.cancel();
        info!(
            running = self.scheduler.running_queue_size(),
            pending = self.scheduler.pending_queue_size(),
            "Schedule queue stopping"
        );
    }
}

// =============================================================================
// Handle
// =============================================================================

/// Client side of a running [`ScheduleQueueActor`].
#[derive(Clone)]
pub struct SchedulerHandle {
    inner: ActorHandle<QueueMessage>,
}

impl SchedulerHandle {
    /// Submit `request`. The returned receiver resolves with its result.
    pub async fn schedule(
        &self,
        request: ScheduleRequest,
        cancel: CancelTag,
    ) -> Result<oneshot::Receiver<ScheduleResult>, ActorError> {
        let (reply, rx) = oneshot::channel();
        self.inner
            .send(QueueMessage::ScheduleDecision {
                request: Box::new(request),
                cancel,
                reply,
            })
            .await?;
        rx.await.map_err(|_| ActorError::ActorStopped)
    }

    pub async fn schedule_group(
        &self,
        spec: GroupSpec,
        cancel: CancelTag,
    ) -> Result<oneshot::Receiver<GroupScheduleResult>, ActorError> {
        let (reply, rx) = oneshot::channel();
        self.inner
            .send(QueueMessage::GroupScheduleDecision { spec, cancel, reply })
            .await?;
        rx.await.map_err(|_| ActorError::ActorStopped)
    }

    pub async fn update_resource_info(&self) -> Result<(), ActorError> {
        self.inner.send(QueueMessage::UpdateResourceInfo).await
    }

    pub async fn confirm(&self, response: ScheduleResult) -> Result<Status, ActorError> {
        let (reply, rx) = oneshot::channel();
        self.inner
            .send(QueueMessage::ScheduleConfirm { response, reply })
            .await?;
        rx.await.map_err(|_| ActorError::ActorStopped)
    }

    pub async fn state(&self) -> Result<QueueState, ActorError> {
        let (reply, rx) = oneshot::channel();
        self.inner.send(QueueMessage::QueryState { reply }).await?;
        rx.await.map_err(|_| ActorError::ActorStopped)
    }
}

/// Build the scheduler described by `config` and start its actor.
pub fn spawn_schedule_queue(
    config: &Config,
    source: Arc<dyn ResourceViewSource>,
    shutdown: watch::Receiver<bool>,
) -> (SchedulerHandle, JoinHandle<()>) {
    let framework = Arc::new(PluginFramework::with_defaults(config.relaxed));
    let scheduler = new_priority_scheduler(config.scheduler_options(), framework, ScheduleRecorder::new());
    let idle = config.resource_idle;
    let (inner, task) = actor::spawn(
        move |me| ScheduleQueueActor::new(scheduler, source, idle, me),
        config.mailbox_size,
        shutdown,
    );
    (SchedulerHandle { inner }, task)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(true, true, QueueState::Waiting)]
    #[case(true, false, QueueState::Pending)]
    #[case(false, true, QueueState::Running)]
    #[case(false, false, QueueState::Running)]
    fn test_state_from_queues(#[case] running_empty: bool, #[case] pending_empty: bool, #[case] expected: QueueState) {
        assert_eq!(QueueState::from_queues(running_empty, pending_empty), expected);
    }

    #[rstest]
    #[case(StatusCode::Success, StatusCode::Success)]
    #[case(StatusCode::ResourceNotEnough, StatusCode::ScheduleConflicted)]
    #[case(StatusCode::Failed, StatusCode::Failed)]
    fn test_confirm_status(#[case] confirmed: StatusCode, #[case] expected: StatusCode) {
        let status = confirm_status(&ScheduleResult::failure(confirmed, "downstream"));
        assert_eq!(status.code, expected);
    }

    #[tokio::test]
    async fn test_rearming_idle_timer_aborts_previous() {
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let mut timer = IdleTimer::new(Duration::from_millis(20));
        for _ in 0..3 {
            let tx = tx.clone();
            timer.arm(move |generation| async move {
                let _ = tx.send(generation);
            });
        }
        drop(tx);

        assert_eq!(rx.recv().await, Some(3));
        assert_eq!(rx.recv().await, None);
        assert!(timer.is_current(3));
        assert!(!timer.is_current(2));
    }

    #[tokio::test]
    async fn test_cancelled_idle_timer_never_fires() {
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel::<u64>();
        let mut timer = IdleTimer::new(Duration::from_millis(10));
        timer.arm(move |generation| async move {
            let _ = tx.send(generation);
        });
        timer.cancel();
        assert_eq!(rx.recv().await, None);
    }

    #[test]
    fn test_cancel_reason_carries_last_failure() {
        let recorder = ScheduleRecorder::new();
        recorder.record_schedule_err("req-1", Status::new(StatusCode::ResourceNotEnough, "CPU: Not Enough"));
        let reason = cancel_reason(&recorder, "req-1", "timeout".into());
        assert_eq!(reason, "timeout (last failure: CPU: Not Enough)");
        assert!(recorder.is_empty());
        assert_eq!(cancel_reason(&recorder, "req-2", "timeout".into()), "timeout");
    }
}
