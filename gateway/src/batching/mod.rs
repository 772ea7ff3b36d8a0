//! Request batching.
//!
//! Compatible requests are grouped by batch key and flushed to a
//! [`BatchCompute`] either when a group reaches `max_batch_size` or when the
//! group's window expires. Queues, the priority heap and the timer map live
//! behind one mutex; compute runs outside it on a spawned task.

pub mod adaptive;
pub mod key;
pub mod queue;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use fininfer_common::Priority;
use serde::{Deserialize, Serialize};
use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::compute::{BatchCompute, ComputeRequest, ComputeResult};
use crate::config::BatchingConfig;
use crate::error::GatewayError;
use crate::metrics::GatewayMetrics;

pub use adaptive::AdaptiveState;
pub use key::batch_key;
pub use queue::{KeyQueue, PendingRequest, PriorityQueue};

/// How a batch decides when to fire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchStrategy {
    /// Fire only when the window expires.
    TimeBased,
    /// Fire when full, with the base window as a fallback.
    SizeBased,
    /// Fire when full, or after a window that shrinks with queue fill and
    /// grows with recent batch latency.
    #[default]
    Adaptive,
    /// Like size-based, but requests are served in aged priority order.
    PriorityAware,
}

/// Processed totals for one batch key.
#[derive(Debug, Clone, Default, Serialize)]
pub struct KeyStats {
    pub processed: u64,
    pub total_time_ms: f64,
}

/// Snapshot of batcher state.
#[derive(Debug, Clone, Serialize)]
pub struct BatchStats {
    pub strategy: BatchStrategy,
    pub queue_sizes: HashMap<String, usize>,
    pub timers_pending: usize,
    pub priority_queue_size: usize,
    pub batch_stats: HashMap<String, KeyStats>,
    pub avg_recent_latency_ms: f64,
    pub load_factor: f64,
}

struct Timer {
    generation: u64,
    handle: JoinHandle<()>,
}

struct State {
    queues: HashMap<String, KeyQueue>,
    heap: PriorityQueue,
    timers: HashMap<String, Timer>,
    next_seq: u64,
    next_timer: u64,
}

impl State {
    fn pending_count(&self, strategy: BatchStrategy, batch_key: &str) -> usize {
        if strategy == BatchStrategy::PriorityAware {
            self.heap.count(batch_key)
        } else {
            self.queues.get(batch_key).map(KeyQueue::len).unwrap_or(0)
        }
    }
}

struct Inner {
    max_batch_size: usize,
    base_wait: Duration,
    strategy: BatchStrategy,
    compatibility_check: bool,
    compute: Arc<dyn BatchCompute>,
    metrics: Arc<GatewayMetrics>,
    state: Mutex<State>,
    adaptive: parking_lot::Mutex<AdaptiveState>,
    key_stats: parking_lot::Mutex<HashMap<String, KeyStats>>,
}

/// Size/time/priority triggered request batcher.
#[derive(Clone)]
pub struct RequestBatcher {
    inner: Arc<Inner>,
}

/// Handle to a submitted request.
pub struct BatchTicket {
    request_id: String,
    batch_key: String,
    deadline: Instant,
    timeout_ms: u64,
    rx: oneshot::Receiver<Result<ComputeResult, GatewayError>>,
    inner: Arc<Inner>,
}

impl BatchTicket {
    pub fn batch_key(&self) -> &str {
        &self.batch_key
    }

    /// Wait for the batch result until the request's deadline.
    ///
    /// On expiry the request is withdrawn from its queue and the call fails
    /// with `RequestTimeout`.
    pub async fn wait(self) -> Result<ComputeResult, GatewayError> {
        let BatchTicket {
            request_id,
            batch_key,
            deadline,
            timeout_ms,
            rx,
            inner,
        } = self;
        match tokio::time::timeout_at(deadline, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(GatewayError::BatchCompute(
                "batch was dropped before producing a result".to_string(),
            )),
            Err(_) => {
                inner.withdraw(&batch_key, &request_id).await;
                Err(GatewayError::RequestTimeout { after_ms: timeout_ms })
            }
        }
    }
}

impl RequestBatcher {
    pub fn new(config: &BatchingConfig, compute: Arc<dyn BatchCompute>, metrics: Arc<GatewayMetrics>) -> Self {
        let max_batch_size = config.max_batch_size.max(1);
        Self {
            inner: Arc::new(Inner {
                max_batch_size,
                base_wait: Duration::from_millis(config.base_wait_ms),
                strategy: config.strategy,
                compatibility_check: config.compatibility_check,
                compute,
                metrics,
                state: Mutex::new(State {
                    queues: HashMap::new(),
                    heap: PriorityQueue::new(Instant::now()),
                    timers: HashMap::new(),
                    next_seq: 0,
                    next_timer: 0,
                }),
                adaptive: parking_lot::Mutex::new(AdaptiveState::default()),
                key_stats: parking_lot::Mutex::new(HashMap::new()),
            }),
        }
    }

    pub fn strategy(&self) -> BatchStrategy {
        self.inner.strategy
    }

    pub fn max_batch_size(&self) -> usize {
        self.inner.max_batch_size
    }

    /// Queue a request for batched execution.
    ///
    /// Fails immediately with `RequestTimeout` when `timeout` is already spent.
    pub async fn submit(
        &self,
        request: ComputeRequest,
        priority: Priority,
        timeout: Duration,
    ) -> Result<BatchTicket, GatewayError> {
        let timeout_ms = timeout.as_millis() as u64;
        if timeout.is_zero() {
            return Err(GatewayError::RequestTimeout { after_ms: timeout_ms });
        }

        let inner = &self.inner;
        let batch_key = batch_key(request.backend, request.operation, &request.data, inner.compatibility_check);
        let request_id = request.request_id.clone();
        let now = Instant::now();
        let deadline = now + timeout;
        let (tx, rx) = oneshot::channel();

        let mut state = inner.state.lock().await;
        let seq = state.next_seq;
        state.next_seq += 1;
        let pending = PendingRequest {
            request,
            priority,
            batch_key: batch_key.clone(),
            enqueued_at: now,
            deadline,
            seq,
            response_tx: tx,
        };
        if inner.strategy == BatchStrategy::PriorityAware {
            state.heap.push(pending);
        } else {
            state.queues.entry(batch_key.clone()).or_default().push(pending);
        }
        inner
            .metrics
            .batch_queue_size
            .with_label_values(&[&priority.to_string()])
            .inc();

        let ready = Inner::maybe_trigger(inner, &mut state, &batch_key);
        drop(state);

        if let Some(batch) = ready {
            Inner::dispatch(inner, batch_key.clone(), batch);
        }

        Ok(BatchTicket {
            request_id,
            batch_key,
            deadline,
            timeout_ms,
            rx,
            inner: Arc::clone(inner),
        })
    }

    /// Submit and wait for the result.
    pub async fn execute(
        &self,
        request: ComputeRequest,
        priority: Priority,
        timeout: Duration,
    ) -> Result<ComputeResult, GatewayError> {
        self.submit(request, priority, timeout).await?.wait().await
    }

    /// Scale the adaptive window, e.g. under system load.
    pub fn set_load_factor(&self, load_factor: f64) {
        self.inner.adaptive.lock().set_load_factor(load_factor);
    }

    /// Window the next timer for `batch_key` would use at `queue_len`.
    pub fn wait_time(&self, queue_len: usize) -> Duration {
        self.inner.wait_time(queue_len)
    }

    /// Number of requests waiting across all keys.
    pub async fn pending_count(&self) -> usize {
        let state = self.inner.state.lock().await;
        state.queues.values().map(KeyQueue::len).sum::<usize>() + state.heap.len()
    }

    pub async fn stats(&self) -> BatchStats {
        let state = self.inner.state.lock().await;
        let queue_sizes = state
            .queues
            .iter()
            .filter(|(_, q)| !q.is_empty())
            .map(|(k, q)| (k.clone(), q.len()))
            .collect();
        let adaptive = self.inner.adaptive.lock();
        BatchStats {
            strategy: self.inner.strategy,
            queue_sizes,
            timers_pending: state.timers.len(),
            priority_queue_size: state.heap.len(),
            batch_stats: self.inner.key_stats.lock().clone(),
            avg_recent_latency_ms: adaptive.avg_latency_ms().unwrap_or(0.0),
            load_factor: adaptive.load_factor(),
        }
    }
}

impl Inner {
    fn wait_time(&self, queue_len: usize) -> Duration {
        if self.strategy == BatchStrategy::Adaptive {
            self.adaptive
                .lock()
                .wait_time(self.base_wait, queue_len, self.max_batch_size)
        } else {
            self.base_wait
        }
    }

    /// Decide whether `batch_key` fires now. Starts the key's timer if it has
    /// pending requests and none is running.
    fn maybe_trigger(this: &Arc<Self>, state: &mut State, batch_key: &str) -> Option<Vec<PendingRequest>> {
        let count = state.pending_count(this.strategy, batch_key);
        if count >= this.max_batch_size && this.strategy != BatchStrategy::TimeBased {
            if let Some(timer) = state.timers.remove(batch_key) {
                timer.handle.abort();
            }
            let batch = this.take_batch(state, batch_key);
            Self::schedule(this, state, batch_key);
            return Some(batch);
        }
        Self::schedule(this, state, batch_key);
        None
    }

    fn schedule(this: &Arc<Self>, state: &mut State, batch_key: &str) {
        let count = state.pending_count(this.strategy, batch_key);
        if count == 0 || state.timers.contains_key(batch_key) {
            return;
        }
        let wait = this.wait_time(count);
        let generation = state.next_timer;
        state.next_timer += 1;

        let inner = Arc::clone(this);
        let key = batch_key.to_string();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(wait).await;
            Inner::on_timer(&inner, key, generation).await;
        });
        state.timers.insert(batch_key.to_string(), Timer { generation, handle });
    }

    async fn on_timer(this: &Arc<Self>, batch_key: String, generation: u64) {
        let mut state = this.state.lock().await;
        if state.timers.get(&batch_key).map(|t| t.generation) != Some(generation) {
            return;
        }
        state.timers.remove(&batch_key);
        let batch = this.take_batch(&mut state, &batch_key);
        Self::schedule(this, &mut state, &batch_key);
        drop(state);

        if !batch.is_empty() {
            Self::dispatch(this, batch_key, batch);
        }
    }

    fn take_batch(&self, state: &mut State, batch_key: &str) -> Vec<PendingRequest> {
        let batch = if self.strategy == BatchStrategy::PriorityAware {
            state.heap.take_batch(batch_key, self.max_batch_size)
        } else {
            let batch = match state.queues.get_mut(batch_key) {
                Some(queue) => queue.take_batch(self.max_batch_size),
                None => Vec::new(),
            };
            if state.queues.get(batch_key).is_some_and(KeyQueue::is_empty) {
                state.queues.remove(batch_key);
            }
            batch
        };
        for pending in &batch {
            self.metrics
                .batch_queue_size
                .with_label_values(&[&pending.priority.to_string()])
                .dec();
        }
        batch
    }

    async fn withdraw(&self, batch_key: &str, request_id: &str) {
        let mut state = self.state.lock().await;
        let removed = if self.strategy == BatchStrategy::PriorityAware {
            state.heap.remove(request_id)
        } else {
            let removed = state.queues.get_mut(batch_key).and_then(|q| q.remove(request_id));
            if state.queues.get(batch_key).is_some_and(KeyQueue::is_empty) {
                state.queues.remove(batch_key);
            }
            removed
        };
        if let Some(pending) = removed {
            self.metrics
                .batch_queue_size
                .with_label_values(&[&pending.priority.to_string()])
                .dec();
            tracing::debug!("Withdrew timed-out request {} from {}", request_id, batch_key);
        }
        if state.pending_count(self.strategy, batch_key) == 0 {
            if let Some(timer) = state.timers.remove(batch_key) {
                timer.handle.abort();
            }
        }
    }

    fn dispatch(this: &Arc<Self>, batch_key: String, batch: Vec<PendingRequest>) {
        let inner = Arc::clone(this);
        tokio::spawn(async move {
            inner.process_batch(batch_key, batch).await;
        });
    }

    async fn process_batch(&self, batch_key: String, batch: Vec<PendingRequest>) {
        let now = Instant::now();
        let mut live = Vec::with_capacity(batch.len());
        for pending in batch {
            if pending.response_tx.is_closed() {
                continue;
            }
            if pending.deadline <= now {
                let after_ms = pending.timeout_ms();
                let _ = pending
                    .response_tx
                    .send(Err(GatewayError::RequestTimeout { after_ms }));
                continue;
            }
            live.push(pending);
        }
        if live.is_empty() {
            return;
        }

        let size = live.len();
        if let Some(oldest) = live.iter().map(|p| p.enqueued_at).min() {
            self.metrics
                .batch_wait_seconds
                .observe(now.saturating_duration_since(oldest).as_secs_f64());
        }
        self.metrics.batch_size.observe(size as f64);
        self.metrics.active_batches.inc();
        tracing::info!("Processing batch of {} requests for {}", size, batch_key);

        let (requests, senders): (Vec<ComputeRequest>, Vec<_>) =
            live.into_iter().map(|p| (p.request, p.response_tx)).unzip();

        let started = Instant::now();
        let outcome = self.compute.compute_batch(requests).await;
        let elapsed = started.elapsed();
        let elapsed_ms = elapsed.as_secs_f64() * 1000.0;
        self.metrics.batch_processing_seconds.observe(elapsed.as_secs_f64());
        self.metrics.active_batches.dec();

        let outcome = match outcome {
            Ok(results) if results.len() == size => Ok(results),
            Ok(results) => Err(GatewayError::BatchCompute(format!(
                "compute returned {} results for {} requests",
                results.len(),
                size
            ))),
            Err(e) => Err(e),
        };

        match outcome {
            Ok(results) => {
                self.adaptive.lock().record_latency(elapsed_ms);
                {
                    let mut stats = self.key_stats.lock();
                    let entry = stats.entry(batch_key.clone()).or_default();
                    entry.processed += size as u64;
                    entry.total_time_ms += elapsed_ms;
                }
                for (tx, result) in senders.into_iter().zip(results) {
                    let _ = tx.send(Ok(result));
                }
                tracing::info!("Completed batch processing: {} requests in {:.1}ms", size, elapsed_ms);
            }
            Err(err) => {
                tracing::error!("Batch processing error for {}: {}", batch_key, err);
                for tx in senders {
                    let _ = tx.send(Err(err.clone()));
                }
            }
        }
    }
}
