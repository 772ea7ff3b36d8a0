//! Backend endpoint state.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use fininfer_common::Operation;
use parking_lot::Mutex;
use serde::Serialize;

use super::circuit::{CircuitBreaker, CircuitState};
use crate::config::EndpointConfig;

/// Smoothing factor of the latency moving average.
const LATENCY_ALPHA: f64 = 0.1;
const SUCCESS_STEP: f64 = 0.01;
const FAILURE_STEP: f64 = 0.05;

#[derive(Debug)]
struct Performance {
    avg_latency_ms: f64,
    success_rate: f64,
    last_health_check: Option<DateTime<Utc>>,
}

/// A model endpoint with live load, health and breaker state.
///
/// `0 <= load <= capacity` holds at all times: the load counter only moves
/// through [`try_acquire`](Self::try_acquire) and [`release_slot`](Self::release_slot).
#[derive(Debug)]
pub struct BackendEndpoint {
    pub id: String,
    pub address: String,
    pub capacity: u32,
    pub weight: f64,
    pub pool: String,
    /// Operations served. Empty means all.
    pub operations: Vec<Operation>,
    pub breaker: CircuitBreaker,
    load: AtomicU32,
    healthy: AtomicBool,
    total_requests: AtomicU64,
    failed_requests: AtomicU64,
    perf: Mutex<Performance>,
}

/// Point-in-time view of an endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct EndpointStats {
    pub id: String,
    pub address: String,
    pub pool: String,
    pub current_load: u32,
    pub capacity: u32,
    pub load_percentage: f64,
    pub avg_response_time_ms: f64,
    pub success_rate: f64,
    pub is_healthy: bool,
    pub weight: f64,
    pub total_requests: u64,
    pub failed_requests: u64,
    pub circuit_breaker_state: CircuitState,
    pub circuit_breaker_failures: u32,
    pub last_health_check: Option<DateTime<Utc>>,
}

impl BackendEndpoint {
    pub fn new(config: &EndpointConfig, breaker: CircuitBreaker) -> Self {
        Self {
            id: config.id.clone(),
            address: config.address.trim_end_matches('/').to_string(),
            capacity: config.capacity,
            weight: config.weight,
            pool: config.pool.clone(),
            operations: config.operations.clone(),
            breaker,
            load: AtomicU32::new(0),
            healthy: AtomicBool::new(true),
            total_requests: AtomicU64::new(0),
            failed_requests: AtomicU64::new(0),
            perf: Mutex::new(Performance {
                avg_latency_ms: 0.0,
                success_rate: 1.0,
                last_health_check: None,
            }),
        }
    }

    pub fn load(&self) -> u32 {
        self.load.load(Ordering::Acquire)
    }

    pub fn has_capacity(&self) -> bool {
        self.load() < self.capacity
    }

    pub fn is_healthy(&self) -> bool {
        self.healthy.load(Ordering::Acquire)
    }

    pub fn set_healthy(&self, healthy: bool) {
        self.healthy.store(healthy, Ordering::Release);
    }

    pub fn supports(&self, operation: Option<Operation>) -> bool {
        match operation {
            Some(op) => self.operations.is_empty() || self.operations.contains(&op),
            None => true,
        }
    }

    pub fn avg_latency_ms(&self) -> f64 {
        self.perf.lock().avg_latency_ms
    }

    pub fn success_rate(&self) -> f64 {
        self.perf.lock().success_rate
    }

    /// Take a slot unless the endpoint is at capacity.
    pub fn try_acquire(&self) -> bool {
        self.load
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |load| {
                (load < self.capacity).then_some(load + 1)
            })
            .is_ok()
    }

    /// Return a slot. Never goes below zero.
    pub fn release_slot(&self) {
        let _ = self
            .load
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |load| load.checked_sub(1));
    }

    /// Fold an observed call into the success rate. Only successful calls move the latency average.
    pub fn record_outcome(&self, latency: Duration, success: bool) {
        self.total_requests.fetch_add(1, Ordering::Relaxed);
        if !success {
            self.failed_requests.fetch_add(1, Ordering::Relaxed);
        }
        let mut perf = self.perf.lock();
        if success {
            let latency_ms = latency.as_secs_f64() * 1000.0;
            perf.avg_latency_ms = LATENCY_ALPHA * latency_ms + (1.0 - LATENCY_ALPHA) * perf.avg_latency_ms;
            perf.success_rate = (perf.success_rate + SUCCESS_STEP).min(1.0);
        } else {
            perf.success_rate = (perf.success_rate - FAILURE_STEP).max(0.0);
        }
    }

    pub(crate) fn reset_success_rate(&self, rate: f64) {
        self.perf.lock().success_rate = rate.clamp(0.0, 1.0);
    }

    pub(crate) fn mark_checked(&self) {
        self.perf.lock().last_health_check = Some(Utc::now());
    }

    pub fn stats(&self) -> EndpointStats {
        let load = self.load();
        let perf = self.perf.lock();
        EndpointStats {
            id: self.id.clone(),
            address: self.address.clone(),
            pool: self.pool.clone(),
            current_load: load,
            capacity: self.capacity,
            load_percentage: if self.capacity == 0 {
                100.0
            } else {
                load as f64 / self.capacity as f64 * 100.0
            },
            avg_response_time_ms: perf.avg_latency_ms,
            success_rate: perf.success_rate,
            is_healthy: self.is_healthy(),
            weight: self.weight,
            total_requests: self.total_requests.load(Ordering::Relaxed),
            failed_requests: self.failed_requests.load(Ordering::Relaxed),
            circuit_breaker_state: self.breaker.state(),
            circuit_breaker_failures: self.breaker.failures(),
            last_health_check: perf.last_health_check,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn endpoint(capacity: u32) -> BackendEndpoint {
        let config = EndpointConfig {
            id: "ep".to_string(),
            address: "http://localhost:9000/".to_string(),
            capacity,
            weight: 1.0,
            pool: "general".to_string(),
            operations: vec![Operation::BudgetOptimization],
        };
        BackendEndpoint::new(&config, CircuitBreaker::new(5, Duration::from_secs(60)))
    }

    #[test]
    fn test_acquire_refuses_at_capacity() {
        let ep = endpoint(2);
        assert!(ep.try_acquire());
        assert!(ep.try_acquire());
        assert!(!ep.try_acquire());
        assert_eq!(ep.load(), 2);
        ep.release_slot();
        assert!(ep.try_acquire());
    }

    #[test]
    fn test_release_saturates_at_zero() {
        let ep = endpoint(1);
        ep.release_slot();
        assert_eq!(ep.load(), 0);
    }

    #[test]
    fn test_concurrent_acquire_never_exceeds_capacity() {
        let ep = std::sync::Arc::new(endpoint(10));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let ep = ep.clone();
                std::thread::spawn(move || (0..100).filter(|_| ep.try_acquire()).count())
            })
            .collect();
        let acquired: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();
        assert_eq!(acquired, 10);
        assert_eq!(ep.load(), 10);
    }

    #[test]
    fn test_outcome_updates_ema_and_success_rate() {
        let ep = endpoint(1);
        ep.record_outcome(Duration::from_millis(100), true);
        assert!((ep.avg_latency_ms() - 10.0).abs() < 1e-9);
        assert_eq!(ep.success_rate(), 1.0);
        ep.record_outcome(Duration::from_millis(100), true);
        assert!((ep.avg_latency_ms() - 19.0).abs() < 1e-9);
        ep.record_outcome(Duration::from_millis(100), false);
        assert!((ep.success_rate() - 0.95).abs() < 1e-9);
    }

    #[test]
    fn test_failed_call_leaves_latency_average() {
        let ep = endpoint(1);
        ep.record_outcome(Duration::from_millis(200), true);
        let before = ep.avg_latency_ms();
        ep.record_outcome(Duration::from_millis(1), false);
        ep.record_outcome(Duration::from_millis(1), false);
        assert_eq!(ep.avg_latency_ms(), before);
        assert!((ep.success_rate() - 0.9).abs() < 1e-9);
    }

    #[test]
    fn test_operation_support_and_address_normalization() {
        let ep = endpoint(1);
        assert!(ep.supports(Some(Operation::BudgetOptimization)));
        assert!(!ep.supports(Some(Operation::DebtStrategy)));
        assert!(ep.supports(None));
        assert_eq!(ep.address, "http://localhost:9000");
    }
}
