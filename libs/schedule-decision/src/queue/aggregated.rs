use std::collections::{BTreeMap, HashMap, VecDeque};
use std::fmt::Write as _;
use std::mem;
use std::sync::Arc;

use fnsched_model::{InstanceInfo, CPU_RESOURCE_NAME, MEMORY_RESOURCE_NAME};
use tracing::{debug, warn};

use super::{check_item_valid, AggregationStrategy, ScheduleQueue};
use crate::error::{QueueError, QueueResult};
use crate::item::{AggregatedItem, InstanceItem, QueueItem};

/// Key shared by instances that the scheduling algorithm cannot tell apart:
/// same priority and the same amount of every resource.
///
/// `None` when the instance requests no resources at all.
pub fn aggregation_key(instance: &InstanceInfo) -> Option<String> {
    if instance.resources.is_empty() {
        return None;
    }
    let cpu = instance.resources.cpu().unwrap_or(0.0);
    let memory = instance.resources.memory().unwrap_or(0.0);
    let mut key = format!(
        "priority:{}_{CPU_RESOURCE_NAME}:{cpu}_{MEMORY_RESOURCE_NAME}:{memory}",
        instance.priority()
    );
    for (name, value) in instance.resources.iter() {
        if name != CPU_RESOURCE_NAME && name != MEMORY_RESOURCE_NAME {
            let _ = write!(key, "_{name}:{value}");
        }
    }
    Some(key)
}

/// Queue that coalesces same-shape instances into [`AggregatedItem`]
/// batches so the scheduling algorithm runs once per batch.
///
/// `size` counts raw requests, not batches. The scheduler pops members off
/// the front batch and calls `dequeue` after each one; `dequeue` removes the
/// batch only once it is drained.
#[derive(Debug)]
pub struct AggregatedQueue {
    max_priority: u16,
    strategy: AggregationStrategy,
    buckets: BTreeMap<u16, VecDeque<QueueItem>>,
    /// Open batches by key. Only used by the relaxed strategy.
    key_index: HashMap<String, Arc<AggregatedItem>>,
    queue_size: usize,
    /// Level of the item last returned by `front`.
    front_priority: Option<u16>,
}

impl AggregatedQueue {
    pub fn new(max_priority: u16, strategy: AggregationStrategy) -> Self {
        Self {
            max_priority,
            strategy,
            buckets: BTreeMap::new(),
            key_index: HashMap::new(),
            queue_size: 0,
            front_priority: None,
        }
    }

    pub fn strategy(&self) -> AggregationStrategy {
        self.strategy
    }

    /// Number of entries (batches and groups) at `priority`.
    pub fn bucket_len(&self, priority: u16) -> usize {
        self.buckets.get(&priority).map_or(0, VecDeque::len)
    }

    /// Only instances are coalesced, and only by the strict and relaxed
    /// strategies.
    pub fn is_item_need_aggregate(&self, item: &QueueItem) -> bool {
        matches!(item, QueueItem::Instance(_))
            && matches!(
                self.strategy,
                AggregationStrategy::Strictly | AggregationStrategy::Relaxed
            )
    }

    fn aggregate(&mut self, item: Arc<InstanceItem>) -> QueueResult<()> {
        let key = aggregation_key(&item.request.instance).ok_or(QueueError::InvalidItem)?;
        let bucket = self.buckets.entry(item.priority()).or_default();

        if self.strategy == AggregationStrategy::Relaxed {
            if let Some(open) = self.key_index.get(&key).filter(|open| !open.is_empty()) {
                open.push(item);
                return Ok(());
            }
            let batch = Arc::new(AggregatedItem::new(key.clone(), item));
            bucket.push_back(QueueItem::Aggregated(Arc::clone(&batch)));
            self.key_index.insert(key, batch);
            return Ok(());
        }

        if let Some(QueueItem::Aggregated(tail)) = bucket.back() {
            if tail.key == key && !tail.is_empty() {
                tail.push(item);
                return Ok(());
            }
        }
        bucket.push_back(QueueItem::Aggregated(Arc::new(AggregatedItem::new(key, item))));
        Ok(())
    }

    fn front_level(&mut self) -> Option<u16> {
        let cached = self
            .front_priority
            .filter(|priority| self.buckets.contains_key(priority));
        let level = cached.or_else(|| self.buckets.keys().next_back().copied());
        self.front_priority = level;
        level
    }

    fn forget_batch(&mut self, batch: &Arc<AggregatedItem>) {
        if self
            .key_index
            .get(&batch.key)
            .is_some_and(|open| Arc::ptr_eq(open, batch))
        {
            self.key_index.remove(&batch.key);
        }
    }
}

impl ScheduleQueue for AggregatedQueue {
    fn enqueue(&mut self, item: QueueItem) -> QueueResult<()> {
        check_item_valid(&item, self.max_priority)?;
        let aggregate = self.is_item_need_aggregate(&item);
        let priority = item.priority();
        let count = match &item {
            QueueItem::Aggregated(batch) => batch.len(),
            _ => 1,
        };
        match item {
            QueueItem::Instance(instance) if aggregate => self.aggregate(instance)?,
            QueueItem::Instance(instance) => {
                let key = aggregation_key(&instance.request.instance).ok_or(QueueError::InvalidItem)?;
                let single = AggregatedItem::new(key, instance);
                self.buckets
                    .entry(priority)
                    .or_default()
                    .push_back(QueueItem::Aggregated(Arc::new(single)));
            }
            other => self.buckets.entry(priority).or_default().push_back(other),
        }
        self.queue_size += count;
        Ok(())
    }

    fn front(&mut self) -> Option<QueueItem> {
        self.front_priority = None;
        let level = self.front_level()?;
        self.buckets.get(&level).and_then(|bucket| bucket.front().cloned())
    }

    fn dequeue(&mut self) -> QueueResult<()> {
        let Some(level) = self.front_level() else {
            return Err(QueueError::Empty);
        };
        let Some(bucket) = self.buckets.get_mut(&level) else {
            return Err(QueueError::Empty);
        };
        if let Some(QueueItem::Aggregated(batch)) = bucket.front() {
            if !batch.is_empty() {
                // The caller took one member off the batch.
                self.queue_size = self.queue_size.saturating_sub(1);
                return Err(QueueError::AggregateNotDrained);
            }
        }
        let removed = bucket.pop_front();
        if bucket.is_empty() {
            self.buckets.remove(&level);
            self.front_priority = None;
        }
        if let Some(QueueItem::Aggregated(batch)) = &removed {
            self.forget_batch(batch);
        }
        self.queue_size = self.queue_size.saturating_sub(1);
        debug!(priority = level, size = self.queue_size, "Dequeued front item");
        Ok(())
    }

    fn swap(&mut self, other: &mut Self) {
        mem::swap(&mut self.buckets, &mut other.buckets);
        mem::swap(&mut self.key_index, &mut other.key_index);
        mem::swap(&mut self.queue_size, &mut other.queue_size);
        mem::swap(&mut self.front_priority, &mut other.front_priority);
    }

    fn extend(&mut self, other: &mut Self) {
        let buckets = mem::take(&mut other.buckets);
        other.key_index.clear();
        other.queue_size = 0;
        other.front_priority = None;

        for (_, bucket) in buckets.into_iter().rev() {
            for item in bucket {
                let items = match item {
                    QueueItem::Aggregated(batch) => batch.drain().into_iter().map(QueueItem::Instance).collect(),
                    other => vec![other],
                };
                for item in items {
                    if let Err(e) = self.enqueue(item.clone()) {
                        warn!(request_id = %item.request_id(), error = %e, "Rejected item while extending queue");
                        item.resolve_with_error(&e.to_status());
                    }
                }
            }
        }
    }

    fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }

    fn size(&self) -> usize {
        self.queue_size
    }

    fn max_priority(&self) -> u16 {
        self.max_priority
    }
}
