//! Priority scheduler scenarios: policies, suspension, activation and
//! aggregated consumption.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use fnsched_model::{
    Affinity, InstanceInfo, PendingResource, ResourceAffinity, ResourceUnit, ScheduleRequest, Selector, StatusCode,
};
use fnsched_schedule_decision::scheduler::{FairnessPolicy, FifoPolicy, PriorityPolicy};
use fnsched_schedule_decision::{
    cancel_pair, AggregatedQueue, AggregationStrategy, CancelTag, InstanceItem, PriorityScheduler, QueueItem,
    ScheduleQueue, ScheduleRecorder, ScheduleResult, ScheduleStrategy, TimeSortedQueue,
};
use fnsched_schedule_plugin::{NodeScore, PreAllocatedContext, ScheduleResults, SchedulerFramework, UNLIMITED};
use fnsched_testing::{exists, instance, pod, request, resource_view, selector, with_affinity, with_timestamp};
use tokio::sync::oneshot;

/// Answers feasibility passes from a script and records what it was asked.
#[derive(Default)]
struct ScriptedFramework {
    script: Mutex<VecDeque<StatusCode>>,
    calls: Mutex<Vec<InstanceInfo>>,
}

impl ScriptedFramework {
    fn answering(codes: &[StatusCode]) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(codes.iter().copied().collect()),
            calls: Mutex::default(),
        })
    }

    fn calls(&self) -> Vec<InstanceInfo> {
        self.calls.lock().unwrap().clone()
    }

    fn push(&self, code: StatusCode) {
        self.script.lock().unwrap().push_back(code);
    }
}

impl SchedulerFramework for ScriptedFramework {
    fn select_feasible(
        &self,
        _ctx: &mut PreAllocatedContext,
        instance: &InstanceInfo,
        _unit: &ResourceUnit,
        _expected: u32,
    ) -> ScheduleResults {
        self.calls.lock().unwrap().push(instance.clone());
        let code = self.script.lock().unwrap().pop_front().unwrap_or(StatusCode::ResourceNotEnough);
        if code != StatusCode::Success {
            return ScheduleResults {
                code,
                reason: "scripted failure".into(),
                ..Default::default()
            };
        }
        ScheduleResults {
            sorted_feasible_nodes: [NodeScore::new("pod-a", 1, UNLIMITED)].into_iter().collect(),
            ..Default::default()
        }
    }
}

fn scheduler<Q: ScheduleQueue>(
    running: Q,
    pending: Q,
    policy: Box<dyn PriorityPolicy>,
    framework: Arc<ScriptedFramework>,
) -> PriorityScheduler<Q> {
    let mut scheduler = PriorityScheduler::new(running, pending, policy, framework, ScheduleRecorder::new());
    scheduler.handle_resource_info_update(resource_view(vec![pod("pod-a", "node-1", 100.0, 100.0)]));
    scheduler
}

fn time_sorted(max_priority: u16, policy: Box<dyn PriorityPolicy>, framework: Arc<ScriptedFramework>) -> PriorityScheduler<TimeSortedQueue> {
    scheduler(
        TimeSortedQueue::new(max_priority),
        TimeSortedQueue::new(max_priority),
        policy,
        framework,
    )
}

fn affinity_on(key: &str) -> Selector {
    selector(true, vec![vec![exists(key)]])
}

/// A request that waits for resources, optionally bound to units by a
/// resource required affinity.
fn waiting(request_id: &str, priority: u16, required: Option<Selector>) -> ScheduleRequest {
    let affinity = Affinity {
        resource: required.map(|selector| ResourceAffinity {
            required_affinity: Some(selector),
            ..Default::default()
        }),
        ..Default::default()
    };
    let mut inst = with_affinity(instance(request_id, priority, 1.0, 1.0), affinity);
    inst.schedule_option.schedule_timeout_ms = 1;
    request(inst)
}

fn submit<S: ScheduleStrategy>(scheduler: &mut S, request: ScheduleRequest) -> oneshot::Receiver<ScheduleResult> {
    let (item, rx) = InstanceItem::new(request, CancelTag::never());
    scheduler.enqueue(item.into()).unwrap();
    rx
}

fn pending_of(instance: &InstanceInfo) -> Vec<PendingResource> {
    instance
        .affinity()
        .inner
        .as_ref()
        .and_then(|inner| inner.pending.as_ref())
        .map(|pending| pending.resources.clone())
        .unwrap_or_default()
}

#[test]
fn test_fairness_with_same_priority() {
    let framework = ScriptedFramework::answering(&[]);
    let mut scheduler = time_sorted(3, Box::new(FairnessPolicy::default()), framework.clone());

    let _ins1 = submit(&mut scheduler, waiting("ins1", 0, Some(affinity_on("key1"))));
    let _ins2 = submit(&mut scheduler, waiting("ins2", 0, Some(affinity_on("key2"))));
    scheduler.consume_running_queue();
    assert_eq!(scheduler.pending_queue_size(), 2);

    let _ins3 = submit(&mut scheduler, waiting("ins3", 0, Some(affinity_on("key1"))));
    let _ins4 = submit(&mut scheduler, waiting("ins4", 0, Some(affinity_on("key2"))));
    assert_eq!(scheduler.pending_queue_size(), 4);

    framework.push(StatusCode::Success);
    let mut ins5 = submit(&mut scheduler, waiting("ins5", 0, Some(affinity_on("key3"))));
    assert_eq!(scheduler.running_queue_size(), 1);
    scheduler.consume_running_queue();
    assert_eq!(ins5.try_recv().unwrap().code, StatusCode::Success);

    let calls = framework.calls();
    let kept_free: Vec<Selector> = pending_of(&calls[2])
        .into_iter()
        .filter_map(|resource| resource.required_affinity)
        .collect();
    assert_eq!(kept_free, vec![affinity_on("key1"), affinity_on("key2")]);
}

#[test]
fn test_fairness_with_different_priority() {
    let framework = ScriptedFramework::answering(&[]);
    let mut scheduler = time_sorted(20, Box::new(FairnessPolicy::default()), framework.clone());

    let _ins1 = submit(&mut scheduler, waiting("ins1", 10, Some(affinity_on("key1"))));
    let _ins2 = submit(&mut scheduler, waiting("ins2", 8, Some(affinity_on("key2"))));
    scheduler.consume_running_queue();
    assert_eq!(scheduler.pending_queue_size(), 2);

    // ins2 ran after ins1 was suspended, so it had to leave key1 units alone.
    let calls = framework.calls();
    assert!(pending_of(&calls[0]).is_empty());
    assert_eq!(pending_of(&calls[1]).len(), 1);

    let _ins3 = submit(&mut scheduler, waiting("ins3", 9, Some(affinity_on("key1"))));
    let _ins4 = submit(&mut scheduler, waiting("ins4", 10, Some(affinity_on("key1"))));
    assert_eq!(scheduler.pending_queue_size(), 4);

    framework.push(StatusCode::Success);
    let mut ins5 = submit(&mut scheduler, waiting("ins5", 11, Some(affinity_on("key1"))));
    assert_eq!(scheduler.running_queue_size(), 1);
    scheduler.consume_running_queue();
    assert_eq!(ins5.try_recv().unwrap().code, StatusCode::Success);
    assert!(pending_of(&framework.calls()[2]).is_empty());
}

#[test]
fn test_fairness_with_unconstrained_pending() {
    let framework = ScriptedFramework::answering(&[]);
    let mut scheduler = time_sorted(20, Box::new(FairnessPolicy::default()), framework.clone());

    let _ins1 = submit(&mut scheduler, waiting("ins1", 10, None));
    scheduler.consume_running_queue();
    assert_eq!(scheduler.pending_queue_size(), 1);

    let _ins2 = submit(&mut scheduler, waiting("ins2", 10, None));
    assert_eq!(scheduler.pending_queue_size(), 2);

    framework.push(StatusCode::Success);
    let mut ins3 = submit(&mut scheduler, waiting("ins3", 11, None));
    scheduler.consume_running_queue();
    assert_eq!(ins3.try_recv().unwrap().code, StatusCode::Success);
    assert!(pending_of(&framework.calls()[1]).is_empty());

    let _ins4 = submit(&mut scheduler, waiting("ins4", 9, Some(affinity_on("key1"))));
    assert_eq!(scheduler.pending_queue_size(), 3);

    scheduler.activate_pending_requests();
    assert!(scheduler.is_pending_queue_empty());
    assert_eq!(scheduler.running_queue_size(), 3);
    scheduler.consume_running_queue();
    // Only ins1 is tried; the others queue up behind it again.
    assert_eq!(framework.calls().len(), 3);
    assert_eq!(scheduler.pending_queue_size(), 3);
}

#[test]
fn test_fairness_keeps_request_order() {
    let framework = ScriptedFramework::answering(&[]);
    let mut scheduler = time_sorted(3, Box::new(FairnessPolicy::default()), framework.clone());

    let mut ins1 = submit(&mut scheduler, waiting("ins1", 0, Some(affinity_on("key1"))));
    let mut ins2 = submit(&mut scheduler, waiting("ins2", 0, Some(affinity_on("key1"))));
    scheduler.consume_running_queue();
    assert_eq!(framework.calls().len(), 1);
    assert_eq!(scheduler.pending_queue_size(), 2);

    framework.push(StatusCode::Success);
    scheduler.activate_pending_requests();
    scheduler.consume_running_queue();
    assert_eq!(ins1.try_recv().unwrap().code, StatusCode::Success);
    assert!(ins2.try_recv().is_err());
    assert_eq!(scheduler.pending_queue_size(), 1);

    let calls = framework.calls();
    assert_eq!(calls[1].request_id, "ins1");
    assert_eq!(calls[2].request_id, "ins2");
}

#[test]
fn test_fifo_never_holds_back() {
    let framework = ScriptedFramework::answering(&[]);
    let mut scheduler = time_sorted(3, Box::new(FifoPolicy), framework.clone());

    let _ins1 = submit(&mut scheduler, waiting("ins1", 0, Some(affinity_on("key1"))));
    let _ins2 = submit(&mut scheduler, waiting("ins2", 0, None));
    scheduler.consume_running_queue();
    assert_eq!(scheduler.pending_queue_size(), 2);

    let _ins3 = submit(&mut scheduler, waiting("ins3", 0, Some(affinity_on("key1"))));
    let _ins4 = submit(&mut scheduler, waiting("ins4", 0, None));
    let _ins5 = submit(&mut scheduler, waiting("ins5", 0, Some(affinity_on("key2"))));
    assert_eq!(scheduler.running_queue_size(), 3);

    scheduler.consume_running_queue();
    assert!(framework.calls().iter().all(|call| pending_of(call).is_empty()));
}

#[test]
fn test_time_sorted_consumption_order() {
    let framework = ScriptedFramework::answering(&[StatusCode::Success; 3]);
    let mut scheduler = time_sorted(3, Box::new(FifoPolicy), framework.clone());

    let _late = submit(&mut scheduler, request(with_timestamp(instance("late", 1, 1.0, 1.0), 30)));
    let _early = submit(&mut scheduler, request(with_timestamp(instance("early", 1, 1.0, 1.0), 10)));
    let _urgent = submit(&mut scheduler, request(with_timestamp(instance("urgent", 2, 1.0, 1.0), 50)));
    scheduler.consume_running_queue();

    let order: Vec<String> = framework.calls().into_iter().map(|call| call.request_id).collect();
    assert_eq!(order, vec!["urgent", "early", "late"]);
}

#[test]
fn test_cancelled_while_pending_is_dropped_on_activation() {
    let framework = ScriptedFramework::answering(&[]);
    let mut scheduler = time_sorted(3, Box::new(FifoPolicy), framework.clone());

    let (handle, tag) = cancel_pair();
    let (item, mut rx) = InstanceItem::new(waiting("ins1", 0, None), tag);
    scheduler.enqueue(item.into()).unwrap();
    scheduler.consume_running_queue();
    assert_eq!(scheduler.pending_queue_size(), 1);
    assert!(scheduler.recorder().try_query_schedule_err("ins1").is_some());

    handle.cancel("caller gave up");
    scheduler.activate_pending_requests();
    scheduler.consume_running_queue();
    assert_eq!(framework.calls().len(), 1);
    assert!(scheduler.is_running_queue_empty());
    assert!(scheduler.is_pending_queue_empty());
    assert!(rx.try_recv().is_err());
}

#[test]
fn test_aggregated_batch_is_scheduled_in_one_pass() {
    let framework = ScriptedFramework::answering(&[StatusCode::Success]);
    let mut scheduler = scheduler(
        AggregatedQueue::new(3, AggregationStrategy::Relaxed),
        AggregatedQueue::new(3, AggregationStrategy::Relaxed),
        Box::new(FifoPolicy),
        framework.clone(),
    );

    let receivers: Vec<_> = (0..3)
        .map(|n| submit(&mut scheduler, request(instance(&format!("req-{n}"), 0, 10.0, 10.0))))
        .collect();
    assert_eq!(scheduler.running_queue_size(), 3);

    scheduler.consume_running_queue();
    assert_eq!(framework.calls().len(), 1);
    assert!(scheduler.is_running_queue_empty());
    for mut rx in receivers {
        assert_eq!(rx.try_recv().unwrap().unit_id, "pod-a");
    }
}

#[test]
fn test_aggregated_batch_skips_cancelled_leaders() {
    let framework = ScriptedFramework::answering(&[StatusCode::Success]);
    let mut scheduler = scheduler(
        AggregatedQueue::new(3, AggregationStrategy::Strictly),
        AggregatedQueue::new(3, AggregationStrategy::Strictly),
        Box::new(FifoPolicy),
        framework.clone(),
    );

    let (handle, tag) = cancel_pair();
    let (leader, mut leader_rx) = InstanceItem::new(request(instance("req-0", 0, 10.0, 10.0)), tag);
    scheduler.enqueue(QueueItem::from(leader)).unwrap();
    let mut follower = submit(&mut scheduler, request(instance("req-1", 0, 10.0, 10.0)));
    handle.cancel("gone");

    scheduler.consume_running_queue();
    assert_eq!(framework.calls()[0].request_id, "req-1");
    assert!(leader_rx.try_recv().is_err());
    assert_eq!(follower.try_recv().unwrap().code, StatusCode::Success);
    assert!(scheduler.is_running_queue_empty());
}
