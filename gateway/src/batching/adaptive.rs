//! Adaptive batch window.

use std::collections::VecDeque;
use std::time::Duration;

/// Recent batch latencies kept for the latency factor.
const LATENCY_HISTORY: usize = 100;
/// Batch latency the window is tuned around.
const TARGET_LATENCY_MS: f64 = 200.0;
const MIN_WAIT: Duration = Duration::from_millis(10);

/// Inputs to the adaptive window that change over time.
#[derive(Debug)]
pub struct AdaptiveState {
    recent_latencies_ms: VecDeque<f64>,
    load_factor: f64,
}

impl Default for AdaptiveState {
    fn default() -> Self {
        Self {
            recent_latencies_ms: VecDeque::with_capacity(LATENCY_HISTORY),
            load_factor: 1.0,
        }
    }
}

impl AdaptiveState {
    pub fn record_latency(&mut self, latency_ms: f64) {
        if self.recent_latencies_ms.len() == LATENCY_HISTORY {
            self.recent_latencies_ms.pop_front();
        }
        self.recent_latencies_ms.push_back(latency_ms);
    }

    pub fn avg_latency_ms(&self) -> Option<f64> {
        if self.recent_latencies_ms.is_empty() {
            return None;
        }
        Some(self.recent_latencies_ms.iter().sum::<f64>() / self.recent_latencies_ms.len() as f64)
    }

    pub fn load_factor(&self) -> f64 {
        self.load_factor
    }

    pub fn set_load_factor(&mut self, load_factor: f64) {
        self.load_factor = load_factor.max(0.0);
    }

    /// Window for a key whose queue currently holds `queue_len` requests.
    pub fn wait_time(&self, base: Duration, queue_len: usize, max_batch_size: usize) -> Duration {
        adaptive_wait(base, queue_len, max_batch_size, self.avg_latency_ms(), self.load_factor)
    }
}

/// `base × (1 − 0.5·fill) × latency_factor × load_factor`, clamped to `[10ms, 2×base]`.
///
/// `fill` is the queue's share of a full batch (capped at 1); the latency
/// factor is the recent average over 200ms, clamped to `[0.5, 2.0]`, or 1.0
/// without history.
pub fn adaptive_wait(
    base: Duration,
    queue_len: usize,
    max_batch_size: usize,
    avg_latency_ms: Option<f64>,
    load_factor: f64,
) -> Duration {
    let base_secs = base.as_secs_f64();
    let fill = if max_batch_size == 0 {
        1.0
    } else {
        (queue_len as f64 / max_batch_size as f64).min(1.0)
    };
    let latency_factor = avg_latency_ms
        .map(|avg| (avg / TARGET_LATENCY_MS).clamp(0.5, 2.0))
        .unwrap_or(1.0);

    let wait = base_secs * (1.0 - fill * 0.5) * latency_factor * load_factor;
    let upper = (base_secs * 2.0).max(MIN_WAIT.as_secs_f64());
    Duration::from_secs_f64(wait.clamp(MIN_WAIT.as_secs_f64(), upper))
}
