//! Queue items: single instances, gangs and coalesced batches.
//!
//! Items are shared between the queue, the scheduler and the requester, so
//! each variant lives behind an `Arc`. The completion promise and failure
//! flag use interior mutability; everything else is fixed at creation.

use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use fnsched_model::{ScheduleRequest, Status};
use serde::{Deserialize, Serialize};
use tokio::sync::{oneshot, watch};

use crate::result::{GroupScheduleResult, ScheduleResult};

/// Default wait, in milliseconds, for a gang to find resources.
pub const DEFAULT_GROUP_TIMEOUT_MS: i64 = 1000;

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

// =============================================================================
// Cancellation
// =============================================================================

/// Receiving side of an out-of-band cancellation signal.
///
/// Observing cancellation never removes an item from its queue; the
/// scheduler checks the tag when it reaches the item.
#[derive(Debug, Clone, Default)]
pub struct CancelTag {
    rx: Option<watch::Receiver<Option<String>>>,
}

impl CancelTag {
    /// A tag that never fires.
    pub fn never() -> Self {
        Self::default()
    }

    pub fn is_cancelled(&self) -> bool {
        self.reason().is_some()
    }

    pub fn reason(&self) -> Option<String> {
        self.rx.as_ref().and_then(|rx| rx.borrow().clone())
    }

    /// Wait for the cancel reason. Returns `None` once the handle is dropped
    /// without cancelling, or immediately for a tag that never fires.
    pub async fn cancelled(&self) -> Option<String> {
        let mut rx = self.rx.clone()?;
        let reason = rx.wait_for(Option::is_some).await.ok()?;
        reason.clone()
    }
}

/// Sending side of a [`CancelTag`]. The first reason wins.
#[derive(Debug)]
pub struct CancelHandle {
    tx: watch::Sender<Option<String>>,
}

impl CancelHandle {
    pub fn cancel(&self, reason: impl Into<String>) {
        let reason = reason.into();
        self.tx.send_if_modified(|current| {
            if current.is_some() {
                return false;
            }
            *current = Some(reason);
            true
        });
    }

    pub fn tag(&self) -> CancelTag {
        CancelTag {
            rx: Some(self.tx.subscribe()),
        }
    }
}

pub fn cancel_pair() -> (CancelHandle, CancelTag) {
    let (tx, rx) = watch::channel(None);
    (CancelHandle { tx }, CancelTag { rx: Some(rx) })
}

// =============================================================================
// Promise
// =============================================================================

/// One-shot completion shared between the scheduler and the actor.
///
/// The first `set_value` resolves the waiter; later calls are ignored.
pub struct Promise<T> {
    tx: Mutex<Option<oneshot::Sender<T>>>,
}

impl<T> Promise<T> {
    pub fn new() -> (Self, oneshot::Receiver<T>) {
        let (tx, rx) = oneshot::channel();
        (Self { tx: Mutex::new(Some(tx)) }, rx)
    }

    /// Returns `true` when this call resolved the promise.
    pub fn set_value(&self, value: T) -> bool {
        let Some(tx) = lock(&self.tx).take() else {
            return false;
        };
        // A dropped receiver still counts as resolved.
        let _ = tx.send(value);
        true
    }

    pub fn is_resolved(&self) -> bool {
        lock(&self.tx).is_none()
    }
}

impl<T> fmt::Debug for Promise<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Promise")
            .field("resolved", &self.is_resolved())
            .finish()
    }
}

// =============================================================================
// Instance
// =============================================================================

#[derive(Debug)]
pub struct InstanceItem {
    pub request: ScheduleRequest,
    promise: Promise<ScheduleResult>,
    cancel: CancelTag,
    failed: AtomicBool,
}

impl InstanceItem {
    pub fn new(request: ScheduleRequest, cancel: CancelTag) -> (Arc<Self>, oneshot::Receiver<ScheduleResult>) {
        let (promise, rx) = Promise::new();
        let item = Arc::new(Self {
            request,
            promise,
            cancel,
            failed: AtomicBool::new(false),
        });
        (item, rx)
    }

    pub fn request_id(&self) -> &str {
        &self.request.request_id
    }

    pub fn priority(&self) -> u16 {
        self.request.instance.priority()
    }

    pub fn create_timestamp(&self) -> i64 {
        self.request.instance.create_timestamp()
    }

    pub fn timeout_ms(&self) -> i64 {
        self.request.instance.schedule_option.schedule_timeout_ms
    }

    pub fn cancel_tag(&self) -> &CancelTag {
        &self.cancel
    }

    pub fn set_result(&self, result: ScheduleResult) -> bool {
        self.promise.set_value(result)
    }

    pub fn is_resolved(&self) -> bool {
        self.promise.is_resolved()
    }

    /// Sticky: once failed, always failed.
    pub fn tag_failure(&self) {
        self.failed.store(true, Ordering::Release);
    }

    pub fn has_failed(&self) -> bool {
        self.failed.load(Ordering::Acquire)
    }
}

// =============================================================================
// Group
// =============================================================================

/// Accept any member count from `min` to `max`, shrinking by `step`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RangeOpt {
    pub min: u32,
    pub max: u32,
    pub step: u32,
}

/// Placement policy of a gang.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GroupPolicy {
    /// Members are placed one by one.
    #[default]
    Individual,
    /// All members on a single unit.
    StrictPack,
}

/// Members of a gang share one promise and one cancel tag.
#[derive(Debug)]
pub struct GroupItem {
    pub group_id: String,
    pub members: Vec<Arc<InstanceItem>>,
    pub range: Option<RangeOpt>,
    pub policy: GroupPolicy,
    pub timeout_ms: i64,
    promise: Promise<GroupScheduleResult>,
    cancel: CancelTag,
    failed: AtomicBool,
}

impl GroupItem {
    pub fn new(
        group_id: impl Into<String>,
        members: Vec<Arc<InstanceItem>>,
        cancel: CancelTag,
    ) -> (Self, oneshot::Receiver<GroupScheduleResult>) {
        let (promise, rx) = Promise::new();
        let item = Self {
            group_id: group_id.into(),
            members,
            range: None,
            policy: GroupPolicy::default(),
            timeout_ms: DEFAULT_GROUP_TIMEOUT_MS,
            promise,
            cancel,
            failed: AtomicBool::new(false),
        };
        (item, rx)
    }

    pub fn with_range(mut self, range: Option<RangeOpt>) -> Self {
        self.range = range;
        self
    }

    pub fn with_policy(mut self, policy: GroupPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_timeout_ms(mut self, timeout_ms: i64) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }

    pub fn request_id(&self) -> &str {
        &self.group_id
    }

    /// Priority of the first member, 0 for an empty group.
    pub fn priority(&self) -> u16 {
        self.members.first().map_or(0, |member| member.priority())
    }

    pub fn create_timestamp(&self) -> i64 {
        self.members.first().map_or(0, |member| member.create_timestamp())
    }

    pub fn cancel_tag(&self) -> &CancelTag {
        &self.cancel
    }

    pub fn set_result(&self, result: GroupScheduleResult) -> bool {
        self.promise.set_value(result)
    }

    pub fn is_resolved(&self) -> bool {
        self.promise.is_resolved()
    }

    pub fn tag_failure(&self) {
        self.failed.store(true, Ordering::Release);
    }

    pub fn has_failed(&self) -> bool {
        self.failed.load(Ordering::Acquire)
    }
}

// =============================================================================
// Aggregated
// =============================================================================

/// Instances sharing one aggregation key, served in insertion order.
///
/// The scheduler pops members as it places them; the owning queue removes
/// the item once it has been drained.
#[derive(Debug)]
pub struct AggregatedItem {
    pub key: String,
    requests: Mutex<VecDeque<Arc<InstanceItem>>>,
}

impl AggregatedItem {
    pub fn new(key: impl Into<String>, first: Arc<InstanceItem>) -> Self {
        Self {
            key: key.into(),
            requests: Mutex::new(VecDeque::from([first])),
        }
    }

    pub fn push(&self, item: Arc<InstanceItem>) {
        lock(&self.requests).push_back(item);
    }

    pub fn front(&self) -> Option<Arc<InstanceItem>> {
        lock(&self.requests).front().cloned()
    }

    pub fn pop_front(&self) -> Option<Arc<InstanceItem>> {
        lock(&self.requests).pop_front()
    }

    pub fn len(&self) -> usize {
        lock(&self.requests).len()
    }

    pub fn is_empty(&self) -> bool {
        lock(&self.requests).is_empty()
    }

    /// Members in scheduling order.
    pub fn members(&self) -> Vec<Arc<InstanceItem>> {
        lock(&self.requests).iter().cloned().collect()
    }

    /// Take every member, leaving the item drained.
    pub fn drain(&self) -> Vec<Arc<InstanceItem>> {
        lock(&self.requests).drain(..).collect()
    }

    pub fn request_id(&self) -> String {
        self.front()
            .map(|item| item.request_id().to_string())
            .unwrap_or_default()
    }

    pub fn priority(&self) -> u16 {
        self.front().map_or(0, |item| item.priority())
    }

    pub fn create_timestamp(&self) -> i64 {
        self.front().map_or(0, |item| item.create_timestamp())
    }
}

// =============================================================================
// QueueItem
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemKind {
    Instance,
    Group,
    Aggregated,
}

/// Anything a schedule queue holds.
#[derive(Debug, Clone)]
pub enum QueueItem {
    Instance(Arc<InstanceItem>),
    Group(Arc<GroupItem>),
    Aggregated(Arc<AggregatedItem>),
}

impl QueueItem {
    pub fn kind(&self) -> ItemKind {
        match self {
            QueueItem::Instance(_) => ItemKind::Instance,
            QueueItem::Group(_) => ItemKind::Group,
            QueueItem::Aggregated(_) => ItemKind::Aggregated,
        }
    }

    pub fn request_id(&self) -> String {
        match self {
            QueueItem::Instance(item) => item.request_id().to_string(),
            QueueItem::Group(item) => item.request_id().to_string(),
            QueueItem::Aggregated(item) => item.request_id(),
        }
    }

    pub fn priority(&self) -> u16 {
        match self {
            QueueItem::Instance(item) => item.priority(),
            QueueItem::Group(item) => item.priority(),
            QueueItem::Aggregated(item) => item.priority(),
        }
    }

    pub fn create_timestamp(&self) -> i64 {
        match self {
            QueueItem::Instance(item) => item.create_timestamp(),
            QueueItem::Group(item) => item.create_timestamp(),
            QueueItem::Aggregated(item) => item.create_timestamp(),
        }
    }

    /// Aggregated batches carry no tag of their own; their members do.
    pub fn is_cancelled(&self) -> bool {
        match self {
            QueueItem::Instance(item) => item.cancel_tag().is_cancelled(),
            QueueItem::Group(item) => item.cancel_tag().is_cancelled(),
            QueueItem::Aggregated(_) => false,
        }
    }

    /// Instances held directly or inside this item.
    pub fn instances(&self) -> Vec<Arc<InstanceItem>> {
        match self {
            QueueItem::Instance(item) => vec![Arc::clone(item)],
            QueueItem::Group(item) => item.members.clone(),
            QueueItem::Aggregated(item) => item.members(),
        }
    }

    /// Resolve every promise behind this item with `status`.
    pub fn resolve_with_error(&self, status: &Status) {
        match self {
            QueueItem::Instance(instance) => {
                instance.set_result(ScheduleResult::from_status(status));
            }
            QueueItem::Group(group) => {
                group.set_result(GroupScheduleResult::failure(status.code, status.message.clone()));
            }
            QueueItem::Aggregated(batch) => {
                for member in batch.members() {
                    member.set_result(ScheduleResult::from_status(status));
                }
            }
        }
    }
}

impl From<Arc<InstanceItem>> for QueueItem {
    fn from(item: Arc<InstanceItem>) -> Self {
        QueueItem::Instance(item)
    }
}

impl From<Arc<GroupItem>> for QueueItem {
    fn from(item: Arc<GroupItem>) -> Self {
        QueueItem::Group(item)
    }
}

impl From<GroupItem> for QueueItem {
    fn from(item: GroupItem) -> Self {
        QueueItem::Group(Arc::new(item))
    }
}
