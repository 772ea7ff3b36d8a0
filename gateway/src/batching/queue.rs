//! Pending-request queues used by the batcher.
//!
//! FIFO strategies keep one queue per batch key. The priority-aware strategy
//! keeps a single min-heap ordered by aged priority, with per-key counts so
//! size triggering still works.

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap, VecDeque};

use fininfer_common::Priority;
use tokio::sync::oneshot;
use tokio::time::Instant;

use crate::compute::{ComputeRequest, ComputeResult};
use crate::error::GatewayError;

pub type ResultSender = oneshot::Sender<Result<ComputeResult, GatewayError>>;

/// Age weight of the priority score, per second waited.
const AGE_WEIGHT: f64 = 0.1;

/// A request waiting for its batch to fire.
pub struct PendingRequest {
    pub request: ComputeRequest,
    pub priority: Priority,
    pub batch_key: String,
    pub enqueued_at: Instant,
    pub deadline: Instant,
    /// Arrival order, used as the heap tie-break.
    pub seq: u64,
    pub response_tx: ResultSender,
}

impl PendingRequest {
    pub fn timeout_ms(&self) -> u64 {
        self.deadline.saturating_duration_since(self.enqueued_at).as_millis() as u64
    }
}

/// Per-key FIFO queue.
pub struct KeyQueue {
    requests: VecDeque<PendingRequest>,
}

impl KeyQueue {
    pub fn new() -> Self {
        Self {
            requests: VecDeque::new(),
        }
    }

    pub fn push(&mut self, request: PendingRequest) {
        self.requests.push_back(request);
    }

    pub fn len(&self) -> usize {
        self.requests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.requests.is_empty()
    }

    pub fn take_batch(&mut self, max_size: usize) -> Vec<PendingRequest> {
        let take_count = max_size.min(self.requests.len());
        self.requests.drain(..take_count).collect()
    }

    pub fn remove(&mut self, request_id: &str) -> Option<PendingRequest> {
        let pos = self.requests.iter().position(|r| r.request.request_id == request_id)?;
        self.requests.remove(pos)
    }
}

impl Default for KeyQueue {
    fn default() -> Self {
        Self::new()
    }
}

struct HeapEntry {
    /// `priority + AGE_WEIGHT × arrival_secs`. Equivalent to ordering by
    /// `priority − AGE_WEIGHT × age` at any instant, but fixed at insertion.
    score: f64,
    pending: PendingRequest,
}

impl PartialEq for HeapEntry {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for HeapEntry {}

impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for HeapEntry {
    // Reversed: BinaryHeap is a max-heap and the lowest score is served first.
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .score
            .total_cmp(&self.score)
            .then_with(|| other.pending.seq.cmp(&self.pending.seq))
    }
}

/// Min-heap of pending requests across all batch keys.
pub struct PriorityQueue {
    heap: BinaryHeap<HeapEntry>,
    counts: HashMap<String, usize>,
    epoch: Instant,
}

impl PriorityQueue {
    pub fn new(epoch: Instant) -> Self {
        Self {
            heap: BinaryHeap::new(),
            counts: HashMap::new(),
            epoch,
        }
    }

    pub fn push(&mut self, pending: PendingRequest) {
        let arrival_secs = pending.enqueued_at.saturating_duration_since(self.epoch).as_secs_f64();
        let score = pending.priority.as_u8() as f64 + AGE_WEIGHT * arrival_secs;
        *self.counts.entry(pending.batch_key.clone()).or_default() += 1;
        self.heap.push(HeapEntry { score, pending });
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    pub fn count(&self, batch_key: &str) -> usize {
        self.counts.get(batch_key).copied().unwrap_or(0)
    }

    /// Pop up to `max_size` requests of `batch_key` in priority order,
    /// restoring requests of other keys.
    pub fn take_batch(&mut self, batch_key: &str, max_size: usize) -> Vec<PendingRequest> {
        let mut batch = Vec::new();
        let mut others = Vec::new();
        while batch.len() < max_size {
            let Some(entry) = self.heap.pop() else { break };
            if entry.pending.batch_key == batch_key {
                batch.push(entry.pending);
            } else {
                others.push(entry);
            }
        }
        self.heap.extend(others);
        self.decrement(batch_key, batch.len());
        batch
    }

    pub fn remove(&mut self, request_id: &str) -> Option<PendingRequest> {
        let entries = std::mem::take(&mut self.heap).into_vec();
        let mut removed = None;
        for entry in entries {
            if removed.is_none() && entry.pending.request.request_id == request_id {
                removed = Some(entry.pending);
            } else {
                self.heap.push(entry);
            }
        }
        if let Some(pending) = &removed {
            let key = pending.batch_key.clone();
            self.decrement(&key, 1);
        }
        removed
    }

    fn decrement(&mut self, batch_key: &str, by: usize) {
        if let Some(count) = self.counts.get_mut(batch_key) {
            *count = count.saturating_sub(by);
            if *count == 0 {
                self.counts.remove(batch_key);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fininfer_common::{BackendKind, Operation};
    use std::time::Duration;

    fn pending(id: &str, key: &str, priority: Priority, enqueued_at: Instant, seq: u64) -> PendingRequest {
        let (tx, _rx) = oneshot::channel();
        let mut request = ComputeRequest::new("u", Operation::BudgetOptimization, serde_json::json!({}), BackendKind::SingleModel);
        request.request_id = id.to_string();
        PendingRequest {
            request,
            priority,
            batch_key: key.to_string(),
            enqueued_at,
            deadline: enqueued_at + Duration::from_secs(5),
            seq,
            response_tx: tx,
        }
    }

    fn ids(batch: &[PendingRequest]) -> Vec<&str> {
        batch.iter().map(|p| p.request.request_id.as_str()).collect()
    }

    #[tokio::test]
    async fn test_key_queue_take_batch() {
        let now = Instant::now();
        let mut queue = KeyQueue::new();
        for i in 0..5 {
            queue.push(pending(&format!("r{}", i), "k", Priority::Medium, now, i));
        }
        let batch = queue.take_batch(3);
        assert_eq!(ids(&batch), vec!["r0", "r1", "r2"]);
        assert_eq!(queue.len(), 2);
        assert!(queue.remove("r3").is_some());
        assert!(queue.remove("r3").is_none());
        assert_eq!(queue.len(), 1);
    }

    #[tokio::test]
    async fn test_priority_order_with_fifo_ties() {
        let now = Instant::now();
        let mut heap = PriorityQueue::new(now);
        heap.push(pending("low", "k", Priority::Low, now, 0));
        heap.push(pending("med-a", "k", Priority::Medium, now, 1));
        heap.push(pending("high", "k", Priority::High, now, 2));
        heap.push(pending("med-b", "k", Priority::Medium, now, 3));

        let batch = heap.take_batch("k", 10);
        assert_eq!(ids(&batch), vec!["high", "med-a", "med-b", "low"]);
        assert!(heap.is_empty());
        assert_eq!(heap.count("k"), 0);
    }

    #[tokio::test]
    async fn test_age_outranks_priority_eventually() {
        let epoch = Instant::now();
        let mut heap = PriorityQueue::new(epoch);
        heap.push(pending("old-low", "k", Priority::Low, epoch, 0));
        // Arrived 25s later: 2 + 2.5 > 3 + 0.
        heap.push(pending("new-med", "k", Priority::Medium, epoch + Duration::from_secs(25), 1));
        let batch = heap.take_batch("k", 1);
        assert_eq!(ids(&batch), vec!["old-low"]);
    }

    #[tokio::test]
    async fn test_take_batch_restores_other_keys() {
        let now = Instant::now();
        let mut heap = PriorityQueue::new(now);
        heap.push(pending("a1", "a", Priority::High, now, 0));
        heap.push(pending("b1", "b", Priority::High, now, 1));
        heap.push(pending("a2", "a", Priority::Medium, now, 2));
        heap.push(pending("b2", "b", Priority::Low, now, 3));

        let batch = heap.take_batch("b", 1);
        assert_eq!(ids(&batch), vec!["b1"]);
        assert_eq!(heap.len(), 3);
        assert_eq!(heap.count("a"), 2);
        assert_eq!(heap.count("b"), 1);

        assert!(heap.remove("a2").is_some());
        assert_eq!(heap.count("a"), 1);
        assert_eq!(ids(&heap.take_batch("a", 5)), vec!["a1"]);
    }
}
