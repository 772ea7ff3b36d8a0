//! Per-endpoint circuit breaker.

use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;
use tokio::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    Closed,
    HalfOpen,
    Open,
}

impl CircuitState {
    /// Gauge encoding: 0 closed, 1 half-open, 2 open.
    pub fn as_gauge(self) -> i64 {
        match self {
            CircuitState::Closed => 0,
            CircuitState::HalfOpen => 1,
            CircuitState::Open => 2,
        }
    }
}

#[derive(Debug)]
struct BreakerState {
    state: CircuitState,
    failures: u32,
    last_failure: Option<Instant>,
}

/// Opens after `threshold` consecutive failures and lets one probe through
/// once `timeout` has passed since the last failure.
#[derive(Debug)]
pub struct CircuitBreaker {
    threshold: u32,
    timeout: Duration,
    inner: Mutex<BreakerState>,
}

impl CircuitBreaker {
    pub fn new(threshold: u32, timeout: Duration) -> Self {
        Self {
            threshold: threshold.max(1),
            timeout,
            inner: Mutex::new(BreakerState {
                state: CircuitState::Closed,
                failures: 0,
                last_failure: None,
            }),
        }
    }

    /// Current state, moving open to half-open when the timeout has elapsed.
    pub fn state(&self) -> CircuitState {
        let mut inner = self.inner.lock();
        if inner.state == CircuitState::Open {
            let elapsed = inner.last_failure.map(|t| t.elapsed()).unwrap_or(Duration::MAX);
            if elapsed >= self.timeout {
                inner.state = CircuitState::HalfOpen;
                tracing::info!("Circuit breaker half-open after {:?}", elapsed);
            }
        }
        inner.state
    }

    /// Closed and half-open circuits accept requests.
    pub fn allows_request(&self) -> bool {
        self.state() != CircuitState::Open
    }

    pub fn failures(&self) -> u32 {
        self.inner.lock().failures
    }

    pub fn record_success(&self) {
        let mut inner = self.inner.lock();
        inner.failures = 0;
        inner.state = CircuitState::Closed;
    }

    /// Record a failure. Returns true when this failure opened the circuit.
    pub fn record_failure(&self) -> bool {
        let mut inner = self.inner.lock();
        inner.failures = inner.failures.saturating_add(1);
        inner.last_failure = Some(Instant::now());
        let trip = match inner.state {
            CircuitState::HalfOpen => true,
            CircuitState::Closed => inner.failures >= self.threshold,
            CircuitState::Open => false,
        };
        if trip {
            inner.state = CircuitState::Open;
        }
        trip
    }
}
