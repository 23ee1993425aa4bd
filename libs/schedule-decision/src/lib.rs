//! # fnsched-schedule-decision
//!
//! Scheduling decisions on top of the feasibility framework.
//!
//! ## Modules
//!
//! - [`queue`]: priority-bucketed queues, including the aggregating queue
//!   that coalesces same-shape instances into batches
//! - [`performer`]: instance, batch and gang placement
//! - [`scheduler`]: the priority scheduler with its FIFO and fairness
//!   policies
//!
//! Requests enter as [`QueueItem`]s and leave through the item's promise
//! as a [`ScheduleResult`] or [`GroupScheduleResult`].

mod error;
mod item;
pub mod performer;
pub mod queue;
mod recorder;
mod result;
pub mod scheduler;

pub use error::{QueueError, QueueResult};
pub use item::{
    cancel_pair, AggregatedItem, CancelHandle, CancelTag, GroupItem, GroupPolicy, InstanceItem, ItemKind, Promise,
    QueueItem, RangeOpt, DEFAULT_GROUP_TIMEOUT_MS,
};
pub use queue::{aggregation_key, AggregatedQueue, AggregationStrategy, PriorityQueue, ScheduleQueue, TimeSortedQueue};
pub use recorder::ScheduleRecorder;
pub use result::{GroupScheduleResult, ScheduleResult};
pub use scheduler::{new_priority_scheduler, PriorityPolicyKind, PriorityScheduler, ScheduleStrategy, SchedulerOptions};
