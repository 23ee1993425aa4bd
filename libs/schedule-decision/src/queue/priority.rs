use std::collections::{BTreeMap, HashSet, VecDeque};
use std::mem;

use tracing::warn;

use super::{check_item_valid, ScheduleQueue};
use crate::error::{QueueError, QueueResult};
use crate::item::QueueItem;

/// FIFO per priority level, with request IDs indexed for duplicate checks.
#[derive(Debug)]
pub struct PriorityQueue {
    max_priority: u16,
    buckets: BTreeMap<u16, VecDeque<QueueItem>>,
    index: HashSet<String>,
}

impl PriorityQueue {
    pub fn new(max_priority: u16) -> Self {
        Self {
            max_priority,
            buckets: BTreeMap::new(),
            index: HashSet::new(),
        }
    }

    pub fn contains(&self, request_id: &str) -> bool {
        self.index.contains(request_id)
    }
}

impl ScheduleQueue for PriorityQueue {
    fn enqueue(&mut self, item: QueueItem) -> QueueResult<()> {
        check_item_valid(&item, self.max_priority)?;
        let request_id = item.request_id();
        if self.index.contains(&request_id) {
            return Err(QueueError::Duplicate(request_id));
        }
        self.buckets.entry(item.priority()).or_default().push_back(item);
        self.index.insert(request_id);
        Ok(())
    }

    fn front(&mut self) -> Option<QueueItem> {
        self.buckets
            .values()
            .next_back()
            .and_then(|bucket| bucket.front().cloned())
    }

    fn dequeue(&mut self) -> QueueResult<()> {
        let Some(mut bucket) = self.buckets.last_entry() else {
            return Err(QueueError::Empty);
        };
        let item = bucket.get_mut().pop_front();
        if bucket.get().is_empty() {
            bucket.remove();
        }
        if let Some(item) = item {
            self.index.remove(&item.request_id());
        }
        Ok(())
    }

    fn swap(&mut self, other: &mut Self) {
        mem::swap(&mut self.buckets, &mut other.buckets);
        mem::swap(&mut self.index, &mut other.index);
    }

    fn extend(&mut self, other: &mut Self) {
        let buckets = mem::take(&mut other.buckets);
        other.index.clear();
        for (_, bucket) in buckets.into_iter().rev() {
            for item in bucket {
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::item::{CancelTag, GroupItem, InstanceItem};
    use fnsched_testing::shaped_request;
    use proptest::prelude::*;

    fn item(request_id: &str, priority: u16) -> QueueItem {
        let (item, _rx) = InstanceItem::new(shaped_request(request_id, priority, 10.0, 10.0), CancelTag::never());
        QueueItem::Instance(item)
    }

    #[test]
    fn test_enqueue_validation() {
        let mut queue = PriorityQueue::new(3);
        assert_eq!(queue.enqueue(item("", 1)), Err(QueueError::MissingRequestId));
        assert_eq!(queue.enqueue(item("req-1", 4)), Err(QueueError::PriorityTooHigh));
        queue.enqueue(item("req-1", 3)).unwrap();
        assert_eq!(
            queue.enqueue(item("req-1", 1)),
            Err(QueueError::Duplicate("req-1".into()))
        );
        assert_eq!(queue.size(), 1);
    }

    #[test]
    fn test_dequeue_empty() {
        let mut queue = PriorityQueue::new(3);
        assert_eq!(queue.dequeue(), Err(QueueError::Empty));
        assert!(queue.front().is_none());
    }

    #[test]
    fn test_fifo_within_level() {
        let mut queue = PriorityQueue::new(3);
        queue.enqueue(item("a", 1)).unwrap();
        queue.enqueue(item("b", 1)).unwrap();
        assert_eq!(queue.front().unwrap().request_id(), "a");
        queue.dequeue().unwrap();
        assert_eq!(queue.front().unwrap().request_id(), "b");
        assert!(!queue.contains("a"));
    }

    #[test]
    fn test_group_items_share_the_queue() {
        let mut queue = PriorityQueue::new(3);
        let (member, _) = InstanceItem::new(shaped_request("m1", 2, 1.0, 1.0), CancelTag::never());
        let (group, _rx) = GroupItem::new("group-1", vec![member], CancelTag::never());
        queue.enqueue(item("a", 1)).unwrap();
        queue.enqueue(group.into()).unwrap();
        assert_eq!(queue.front().unwrap().request_id(), "group-1");
    }

    #[test]
    fn test_swap_and_extend() {
        let mut running = PriorityQueue::new(3);
        let mut pending = PriorityQueue::new(3);
        running.enqueue(item("a", 1)).unwrap();
        running.enqueue(item("b", 2)).unwrap();
        pending.swap(&mut running);
        assert!(running.is_empty());
        assert_eq!(pending.size(), 2);

        running.enqueue(item("c", 2)).unwrap();
        running.extend(&mut pending);
        assert!(pending.is_empty());
        assert_eq!(pending.size(), 0);
        let order: Vec<String> = std::iter::from_fn(|| {
            let front = running.front()?;
            running.dequeue().ok()?;
            Some(front.request_id())
        })
        .collect();
        assert_eq!(order, vec!["c", "b", "a"]);
    }

    proptest! {
        #[test]
        fn prop_dequeue_order_is_priority_then_fifo(priorities in proptest::collection::vec(0u16..=3, 1..40)) {
            let mut queue = PriorityQueue::new(3);
            for (n, priority) in priorities.iter().enumerate() {
                queue.enqueue(item(&format!("req-{n}"), *priority)).unwrap();
            }
            prop_assert_eq!(queue.size(), priorities.len());

            let mut served = Vec::new();
            while let Some(front) = queue.front() {
                served.push((front.priority(), front.request_id()));
                queue.dequeue().unwrap();
            }
            prop_assert_eq!(served.len(), priorities.len());
            for pair in served.windows(2) {
                prop_assert!(pair[0].0 >= pair[1].0);
                if pair[0].0 == pair[1].0 {
                    let seq = |id: &str| id.trim_start_matches("req-").parse::<usize>().unwrap();
                    prop_assert!(seq(&pair[0].1) < seq(&pair[1].1));
                }
            }
        }
    }

    #[test]
    fn test_extend_resolves_rejected_items() {
        let mut running = PriorityQueue::new(3);
        running.enqueue(item("req-1", 1)).unwrap();

        let (duplicate, mut rx) = InstanceItem::new(shaped_request("req-1", 2, 10.0, 10.0), CancelTag::never());
        let mut pending = PriorityQueue::new(3);
        pending.enqueue(QueueItem::Instance(duplicate)).unwrap();
        pending.enqueue(item("req-2", 1)).unwrap();

        running.extend(&mut pending);
        assert!(pending.is_empty());
        assert_eq!(running.size(), 2);
        let rejected = rx.try_recv().unwrap();
        assert_eq!(rejected.code, fnsched_model::StatusCode::ErrParamInvalid);
        assert_eq!(rejected.reason, "request req-1 is already in the queue");
    }
}
