use std::collections::{BTreeMap, HashSet};
use std::mem;

use tracing::warn;

use super::{check_item_valid, ScheduleQueue};
use crate::error::{QueueError, QueueResult};
use crate::item::QueueItem;

/// Position inside one priority level: creation timestamp, then arrival.
type Slot = (i64, u64);

/// Priority levels whose items are ordered by creation time, earliest
/// first. Items created at the same instant keep their arrival order.
#[derive(Debug)]
pub struct TimeSortedQueue {
    max_priority: u16,
    buckets: BTreeMap<u16, BTreeMap<Slot, QueueItem>>,
    index: HashSet<String>,
    next_seq: u64,
}

impl TimeSortedQueue {
    pub fn new(max_priority: u16) -> Self {
        Self {
            max_priority,
            buckets: BTreeMap::new(),
            index: HashSet::new(),
            next_seq: 0,
        }
    }
}

impl ScheduleQueue for TimeSortedQueue {
    fn enqueue(&mut self, item: QueueItem) -> QueueResult<()> {
        check_item_valid(&item, self.max_priority)?;
        let request_id = item.request_id();
        if self.index.contains(&request_id) {
            return Err(QueueError::Duplicate(request_id));
        }
        let slot = (item.create_timestamp(), self.next_seq);
        self.next_seq += 1;
        self.buckets.entry(item.priority()).or_default().insert(slot, item);
        self.index.insert(request_id);
        Ok(())
    }

    fn front(&mut self) -> Option<QueueItem> {
        self.buckets
            .values()
            .next_back()
            .and_then(|bucket| bucket.first_key_value())
            .map(|(_, item)| item.clone())
    }

    fn dequeue(&mut self) -> QueueResult<()> {
        let Some(mut bucket) = self.buckets.last_entry() else {
            return Err(QueueError::Empty);
        };
        let item = bucket.get_mut().pop_first();
        if bucket.get().is_empty() {
            bucket.remove();
        }
        if let Some((_, item)) = item {
            self.index.remove(&item.request_id());
        }
        Ok(())
    }

    fn swap(&mut self, other: &mut Self) {
        mem::swap(&mut self.buckets, &mut other.buckets);
        mem::swap(&mut self.index, &mut other.index);
        mem::swap(&mut self.next_seq, &mut other.next_seq);
    }

    fn extend(&mut self, other: &mut Self) {
        let buckets = mem::take(&mut other.buckets);
        other.index.clear();
        for (_, bucket) in buckets.into_iter().rev() {
            for (_, item) in bucket {
                if let Err(e) = self.enqueue(item.clone()) {
                    warn!(request_id = %item.request_id(), error = %e, "Rejected item while extending queue");
                    item.resolve_with_error(&e.to_status());
                }
            }
        }
    }

    fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }

    fn size(&self) -> usize {
        self.index.len()
    }

    fn max_priority(&self) -> u16 {
        self.max_priority
    }
}
