//! End-to-end tests for the schedule queue actor and the JSON-lines driver.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use fnsched_model::{ScheduleRequest, StatusCode};
use fnsched_schedule_decision::{cancel_pair, GroupPolicy, ScheduleResult};
use fnsched_scheduler::driver::run_driver;
use fnsched_scheduler::{spawn_schedule_queue, Config, GroupSpec, QueueState, SchedulerHandle, StaticResourceView};
use fnsched_testing::{pod, resource_view, shaped_request};
use tokio::io::AsyncReadExt;
use tokio::sync::watch;
use tokio::task::JoinHandle;

struct Harness {
    handle: SchedulerHandle,
    source: Arc<StaticResourceView>,
    _shutdown: watch::Sender<bool>,
    _task: JoinHandle<()>,
}

async fn start(config: Config) -> Harness {
    let source = Arc::new(StaticResourceView::default());
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let (handle, task) = spawn_schedule_queue(&config, source.clone(), shutdown_rx);
    handle.update_resource_info().await.unwrap();
    Harness {
        handle,
        source,
        _shutdown: shutdown_tx,
        _task: task,
    }
}

async fn start_with_pod(cpu: f64, memory: f64) -> Harness {
    let harness = start(Config::default()).await;
    harness
        .source
        .replace(resource_view(vec![pod("pod-a", "node-1", cpu, memory)]));
    harness.handle.update_resource_info().await.unwrap();
    harness
}

fn waiting(request_id: &str, cpu: f64) -> ScheduleRequest {
    let mut request = shaped_request(request_id, 0, cpu, cpu);
    request.instance.schedule_option.schedule_timeout_ms = 5_000;
    request
}

#[tokio::test]
async fn test_initial_state_is_waiting() {
    let harness = start(Config::default()).await;
    assert_eq!(harness.handle.state().await.unwrap(), QueueState::Waiting);
}

#[tokio::test]
async fn test_schedules_request() {
    let harness = start_with_pod(1000.0, 1000.0).await;
    let (_cancel, tag) = cancel_pair();
    let rx = harness
        .handle
        .schedule(shaped_request("req-1", 0, 300.0, 300.0), tag)
        .await
        .unwrap();

    let result = rx.await.unwrap();
    assert_eq!(result.code, StatusCode::Success);
    assert_eq!(result.unit_id, "pod-a");
    assert_eq!(result.id, "node-1");
    assert_eq!(harness.handle.state().await.unwrap(), QueueState::Waiting);
}

#[tokio::test]
async fn test_rejects_priority_above_max() {
    let harness = start_with_pod(1000.0, 1000.0).await;
    let (_cancel, tag) = cancel_pair();
    let rx = harness
        .handle
        .schedule(shaped_request("req-1", 4, 1.0, 1.0), tag)
        .await
        .unwrap();

    let result = rx.await.unwrap();
    assert_eq!(result.code, StatusCode::ErrParamInvalid);
    assert_eq!(result.reason, "instance priority is greater than maxPriority");
}

#[tokio::test]
async fn test_no_timeout_fails_immediately() {
    let harness = start(Config::default()).await;
    let (_cancel, tag) = cancel_pair();
    let rx = harness
        .handle
        .schedule(shaped_request("req-1", 0, 1.0, 1.0), tag)
        .await
        .unwrap();

    assert_eq!(rx.await.unwrap().code, StatusCode::ResourceNotEnough);
    assert_eq!(harness.handle.state().await.unwrap(), QueueState::Waiting);
}

#[tokio::test]
async fn test_suspended_request_can_be_cancelled() {
    let harness = start(Config::default()).await;
    let (cancel, tag) = cancel_pair();
    let rx = harness.handle.schedule(waiting("req-1", 1.0), tag).await.unwrap();
    assert_eq!(harness.handle.state().await.unwrap(), QueueState::Pending);

    cancel.cancel("caller gave up");
    let result = rx.await.unwrap();
    assert_eq!(result.code, StatusCode::ErrScheduleCanceled);
    assert!(result.reason.starts_with("caller gave up"));
}

#[tokio::test]
async fn test_pending_request_retried_on_resource_update() {
    let harness = start(Config::default()).await;
    let (_cancel, tag) = cancel_pair();
    let rx = harness.handle.schedule(waiting("req-1", 300.0), tag).await.unwrap();
    assert_eq!(harness.handle.state().await.unwrap(), QueueState::Pending);

    harness
        .source
        .replace(resource_view(vec![pod("pod-a", "node-1", 1000.0, 1000.0)]));
    harness.handle.update_resource_info().await.unwrap();

    let result = rx.await.unwrap();
    assert_eq!(result.code, StatusCode::Success);
    assert_eq!(result.unit_id, "pod-a");
}

#[tokio::test]
async fn test_pending_request_retried_when_idle() {
    let harness = start(Config {
        resource_idle: Duration::from_millis(50),
        ..Config::default()
    })
    .await;
    let (_cancel, tag) = cancel_pair();
    let rx = harness.handle.schedule(waiting("req-1", 300.0), tag).await.unwrap();
    assert_eq!(harness.handle.state().await.unwrap(), QueueState::Pending);

    // No update message; the idle timer picks the new view up.
    harness
        .source
        .replace(resource_view(vec![pod("pod-a", "node-1", 1000.0, 1000.0)]));

    let result = tokio::time::timeout(Duration::from_secs(5), rx).await.unwrap().unwrap();
    assert_eq!(result.code, StatusCode::Success);
}

#[tokio::test]
async fn test_empty_group_succeeds() {
    let harness = start(Config::default()).await;
    let (_cancel, tag) = cancel_pair();
    let spec = GroupSpec {
        group_id: "g1".into(),
        requests: Vec::new(),
        range: None,
        policy: GroupPolicy::default(),
        timeout_ms: None,
    };
    let result = harness.handle.schedule_group(spec, tag).await.unwrap().await.unwrap();
    assert_eq!(result.code, StatusCode::Success);
    assert!(result.results.is_empty());
}

#[tokio::test]
async fn test_group_members_placed_together() {
    let harness = start_with_pod(1000.0, 1000.0).await;
    let (_cancel, tag) = cancel_pair();
    let spec = GroupSpec {
        group_id: "g1".into(),
        requests: vec![
            shaped_request("m1", 0, 300.0, 300.0),
            shaped_request("m2", 0, 300.0, 300.0),
        ],
        range: None,
        policy: GroupPolicy::default(),
        timeout_ms: None,
    };
    let result = harness.handle.schedule_group(spec, tag).await.unwrap().await.unwrap();
    assert_eq!(result.code, StatusCode::Success);
    assert_eq!(result.results.len(), 2);
    assert!(result.results.iter().all(|placed| placed.unit_id == "pod-a"));
}

#[tokio::test]
async fn test_group_rejection_keeps_queue_error_code() {
    let harness = start_with_pod(1000.0, 1000.0).await;
    let (_cancel, tag) = cancel_pair();
    let spec = GroupSpec {
        group_id: "g1".into(),
        requests: vec![shaped_request("m1", 9, 1.0, 1.0)],
        range: None,
        policy: GroupPolicy::default(),
        timeout_ms: None,
    };
    let group = harness.handle.schedule_group(spec, tag).await.unwrap().await.unwrap();

    let (_cancel, tag) = cancel_pair();
    let single = harness
        .handle
        .schedule(shaped_request("m1", 9, 1.0, 1.0), tag)
        .await
        .unwrap()
        .await
        .unwrap();

    assert_eq!(group.code, StatusCode::ErrParamInvalid);
    assert_eq!(group.reason, "instance priority is greater than maxPriority");
    assert_eq!(group.code, single.code);
    assert_eq!(group.reason, single.reason);
}

#[tokio::test]
async fn test_confirm_conflict() {
    let harness = start(Config::default()).await;
    let status = harness
        .handle
        .confirm(ScheduleResult::failure(StatusCode::ResourceNotEnough, "taken"))
        .await
        .unwrap();
    assert_eq!(status.code, StatusCode::ScheduleConflicted);

    let status = harness
        .handle
        .confirm(ScheduleResult::failure(StatusCode::Success, ""))
        .await
        .unwrap();
    assert!(status.code.is_success());
}

#[tokio::test]
async fn test_driver_answers_every_line() {
    let harness = start_with_pod(1000.0, 1000.0).await;
    let input = [
        serde_json::to_string(&shaped_request("fits", 0, 300.0, 300.0)).unwrap(),
        serde_json::to_string(&shaped_request("too-big", 0, 3000.0, 300.0)).unwrap(),
        "not json".to_string(),
    ]
    .join("\n");

    let (writer, mut reader) = tokio::io::duplex(64 * 1024);
    let (_shutdown_tx, shutdown_rx) = watch::channel(false);
    let submitted = run_driver(harness.handle.clone(), input.as_bytes(), writer, shutdown_rx)
        .await
        .unwrap();
    assert_eq!(submitted, 2);

    let mut output = String::new();
    reader.read_to_string(&mut output).await.unwrap();
    let codes: HashMap<String, serde_json::Value> = output
        .lines()
        .map(|line| {
            let value: serde_json::Value = serde_json::from_str(line).unwrap();
            (value["request_id"].as_str().unwrap().to_string(), value["code"].clone())
        })
        .collect();

    assert_eq!(codes.len(), 3);
    assert_eq!(codes["fits"], serde_json::to_value(StatusCode::Success).unwrap());
    assert_eq!(codes["too-big"], serde_json::to_value(StatusCode::ResourceNotEnough).unwrap());
    assert_eq!(codes[""], serde_json::to_value(StatusCode::ErrParamInvalid).unwrap());
}
