//! Priority-bucketed schedule queues.
//!
//! Every queue serves the highest non-empty priority level first. Within a
//! level, [`PriorityQueue`] is FIFO, [`TimeSortedQueue`] orders by creation
//! timestamp and [`AggregatedQueue`] coalesces same-shape instances into
//! batches.

mod aggregated;
mod priority;
mod time_sorted;

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

pub use aggregated::{aggregation_key, AggregatedQueue};
pub use priority::PriorityQueue;
pub use time_sorted::TimeSortedQueue;

use crate::error::{QueueError, QueueResult};
use crate::item::QueueItem;

/// Queue contract shared by the scheduler's running and pending queues.
///
/// Mutation is serialized by the owner; the scheduler actor holds both
/// queues exclusively.
pub trait ScheduleQueue: Send {
    /// Validate and append `item` to its priority level.
    fn enqueue(&mut self, item: QueueItem) -> QueueResult<()>;

    /// Head of the highest non-empty priority level.
    fn front(&mut self) -> Option<QueueItem>;

    /// Remove the head returned by [`front`](Self::front).
    fn dequeue(&mut self) -> QueueResult<()>;

    /// Exchange the whole contents with `other`.
    fn swap(&mut self, other: &mut Self)
    where
        Self: Sized;

    /// Move everything from `other` into this queue, leaving `other` empty.
    fn extend(&mut self, other: &mut Self)
    where
        Self: Sized;

    fn is_empty(&self) -> bool;

    fn size(&self) -> usize;

    fn max_priority(&self) -> u16;
}

/// Reject items that no queue may hold.
pub(crate) fn check_item_valid(item: &QueueItem, max_priority: u16) -> QueueResult<()> {
    if item.request_id().is_empty() {
        return Err(QueueError::MissingRequestId);
    }
    if item.priority() > max_priority {
        return Err(QueueError::PriorityTooHigh);
    }
    Ok(())
}

/// How instances of equal shape are coalesced.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AggregationStrategy {
    /// Every instance is scheduled on its own.
    #[default]
    NoAggregate,
    /// Consecutive instances of one shape share a batch.
    Strictly,
    /// Instances of one shape share a batch wherever they arrive.
    Relaxed,
}

impl FromStr for AggregationStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "no_aggregate" | "none" => Ok(AggregationStrategy::NoAggregate),
            "strictly" | "strict" => Ok(AggregationStrategy::Strictly),
            "relaxed" => Ok(AggregationStrategy::Relaxed),
            other => Err(format!(
                "unknown aggregation strategy '{other}', expected no_aggregate, strictly or relaxed"
            )),
        }
    }
}

impl fmt::Display for AggregationStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AggregationStrategy::NoAggregate => "no_aggregate",
            AggregationStrategy::Strictly => "strictly",
            AggregationStrategy::Relaxed => "relaxed",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("no_aggregate", AggregationStrategy::NoAggregate)]
    #[case("STRICTLY", AggregationStrategy::Strictly)]
    #[case(" relaxed ", AggregationStrategy::Relaxed)]
    fn test_parse_strategy(#[case] raw: &str, #[case] expected: AggregationStrategy) {
        assert_eq!(raw.parse::<AggregationStrategy>().unwrap(), expected);
    }

    #[test]
    fn test_unknown_strategy() {
        let err = "greedy".parse::<AggregationStrategy>().unwrap_err();
        assert!(err.contains("greedy"));
    }
}
