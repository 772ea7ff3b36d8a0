//! Performance monitoring: rolling metrics, threshold alerts and health grading.

pub mod alerts;
pub mod collector;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;
use serde_json::json;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::Instant;

pub use alerts::{default_thresholds, Alert, AlertSummary, Severity, Threshold, Transition};
pub use collector::{MetricCollector, MetricStats, MetricType};

use alerts::AlertBook;

use crate::config::MonitorConfig;
use crate::error::GatewayError;
use crate::metrics::GatewayMetrics;
use crate::store::KvStore;

const ALERT_TTL_SECS: u64 = 86_400;
const ACTIVE_ALERTS_KEY: &str = "perf_alerts:active";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SystemHealth {
    Excellent,
    Good,
    Fair,
    Poor,
}

/// Letter grade from p95 latency and aggregate cache-hit rate.
pub fn grade(p95_ms: Option<f64>, hit_rate: Option<f64>) -> &'static str {
    let (Some(p95), Some(hit)) = (p95_ms, hit_rate) else {
        return "N/A";
    };
    match (p95, hit) {
        (p, h) if p <= 200.0 && h >= 0.9 => "A+",
        (p, h) if p <= 300.0 && h >= 0.8 => "A",
        (p, h) if p <= 400.0 && h >= 0.7 => "B",
        (p, h) if p <= 600.0 && h >= 0.6 => "C",
        _ => "D",
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct MonitorStatus {
    pub system_health: SystemHealth,
    pub performance_grade: &'static str,
    pub total_requests: u64,
    pub cache_hit_rate: Option<f64>,
    pub response_time: Option<MetricStats>,
    pub alerts: AlertSummary,
}

struct ThroughputWindow {
    since: Instant,
    requests_at_start: u64,
}

pub struct PerformanceMonitor {
    collector: MetricCollector,
    thresholds: Vec<Threshold>,
    alerts: Mutex<AlertBook>,
    window: Duration,
    evaluation_interval: Duration,
    store: Arc<dyn KvStore>,
    metrics: Arc<GatewayMetrics>,
    events: broadcast::Sender<Transition>,
    total_requests: AtomicU64,
    cache_hits: AtomicU64,
    throughput: Mutex<ThroughputWindow>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl PerformanceMonitor {
    pub fn new(config: &MonitorConfig, store: Arc<dyn KvStore>, metrics: Arc<GatewayMetrics>) -> Self {
        let (events, _) = broadcast::channel(64);
        Self {
            collector: MetricCollector::new(config.buffer_size),
            thresholds: default_thresholds(config.window_minutes, config.min_samples),
            alerts: Mutex::new(AlertBook::new(config.history_size)),
            window: Duration::from_secs(config.window_minutes * 60),
            evaluation_interval: Duration::from_secs(config.evaluation_interval_secs.max(1)),
            store,
            metrics,
            events,
            total_requests: AtomicU64::new(0),
            cache_hits: AtomicU64::new(0),
            throughput: Mutex::new(ThroughputWindow {
                since: Instant::now(),
                requests_at_start: 0,
            }),
            task: Mutex::new(None),
        }
    }

    pub fn record_sample(&self, metric: MetricType, value: f64) {
        self.collector.record(metric, value);
    }

    /// Record one served request.
    pub fn record_request(&self, response_time_ms: f64, cache_hit: bool, error: bool) {
        self.total_requests.fetch_add(1, Ordering::Relaxed);
        if cache_hit {
            self.cache_hits.fetch_add(1, Ordering::Relaxed);
        }
        self.collector.record(MetricType::ResponseTime, response_time_ms);
        self.collector
            .record(MetricType::CacheHitRate, if cache_hit { 100.0 } else { 0.0 });
        self.collector
            .record(MetricType::ErrorRate, if error { 100.0 } else { 0.0 });
    }

    pub fn statistics(&self, metric: MetricType, window_minutes: u64) -> Option<MetricStats> {
        self.collector
            .statistics(metric, Duration::from_secs(window_minutes * 60))
    }

    /// Receive triggered, changed and resolved alerts.
    pub fn subscribe(&self) -> broadcast::Receiver<Transition> {
        self.events.subscribe()
    }

    pub fn active_alerts(&self) -> Vec<Alert> {
        self.alerts.lock().active()
    }

    pub fn cache_hit_rate(&self) -> Option<f64> {
        let total = self.total_requests.load(Ordering::Relaxed);
        if total == 0 {
            return None;
        }
        Some(self.cache_hits.load(Ordering::Relaxed) as f64 / total as f64)
    }

    fn sample_throughput(&self) {
        let total = self.total_requests.load(Ordering::Relaxed);
        let mut window = self.throughput.lock();
        let served = total.saturating_sub(window.requests_at_start);
        let elapsed = window.since.elapsed().as_secs_f64();
        window.since = Instant::now();
        window.requests_at_start = total;
        if served == 0 || elapsed <= 0.0 {
            return;
        }
        self.collector
            .record(MetricType::Throughput, served as f64 / elapsed);
    }

    /// Sample throughput, check every threshold and persist alert changes.
    ///
    /// Returns the transitions this round produced.
    pub async fn evaluate(&self) -> Vec<Transition> {
        self.sample_throughput();

        let mut transitions = Vec::new();
        for threshold in self.thresholds.iter().filter(|t| t.enabled) {
            let window = Duration::from_secs(threshold.window_minutes * 60);
            let Some(stats) = self.collector.statistics(threshold.metric, window) else {
                continue;
            };
            if stats.count < threshold.min_samples {
                continue;
            }
            let value = threshold.statistic.pick(&stats);
            let crossed = threshold.classify(value);
            let transition = self
                .alerts
                .lock()
                .apply(threshold.metric, value, crossed, stats);
            if let Some(transition) = transition {
                transitions.push(transition);
            }
        }
        self.alerts.lock().refresh_durations();
        self.metrics
            .active_alerts
            .set(self.alerts.lock().active_len() as i64);

        for transition in &transitions {
            self.announce(transition);
            if let Err(e) = self.persist(transition.alert()).await {
                tracing::error!("Failed to store alert {}: {}", transition.alert().alert_id, e);
            }
            let _ = self.events.send(transition.clone());
        }
        transitions
    }

    fn announce(&self, transition: &Transition) {
        match transition {
            Transition::Triggered(alert) | Transition::SeverityChanged(alert) => {
                self.metrics
                    .alerts_total
                    .with_label_values(&[alert.metric.as_str(), alert.severity.as_str()])
                    .inc();
                match alert.severity {
                    Severity::Emergency | Severity::Critical => {
                        tracing::error!("PERFORMANCE ALERT: {}", alert.message)
                    }
                    Severity::Warning => tracing::warn!("PERFORMANCE ALERT: {}", alert.message),
                    Severity::Info => tracing::info!("PERFORMANCE ALERT: {}", alert.message),
                }
            }
            Transition::Resolved(alert) => tracing::info!(
                "Alert resolved: {} (duration: {}s)",
                alert.alert_id,
                alert.duration_seconds
            ),
        }
    }

    async fn persist(&self, alert: &Alert) -> Result<(), GatewayError> {
        let key = format!("perf_alert:{}:{}", alert.alert_id, alert.timestamp.timestamp());
        let body = json!({
            "alert_id": alert.alert_id,
            "metric_type": alert.metric,
            "severity": alert.severity,
            "message": alert.message,
            "current_value": alert.current_value,
            "threshold_value": alert.threshold_value,
            "timestamp": alert.timestamp.to_rfc3339(),
            "duration_seconds": alert.duration_seconds,
            "resolved": alert.resolved,
            "metadata": {"stats": alert.stats},
        });
        let monitoring = |e: crate::store::StoreError| GatewayError::Monitoring(e.to_string());
        self.store
            .set_ex(&key, &body.to_string(), ALERT_TTL_SECS)
            .await
            .map_err(monitoring)?;
        if alert.resolved {
            self.store
                .srem(ACTIVE_ALERTS_KEY, &alert.alert_id)
                .await
                .map_err(monitoring)?;
        } else {
            self.store
                .sadd(ACTIVE_ALERTS_KEY, &alert.alert_id)
                .await
                .map_err(monitoring)?;
        }
        Ok(())
    }

    pub fn system_health(&self) -> SystemHealth {
        let book = self.alerts.lock();
        if book.count(Severity::Critical) + book.count(Severity::Emergency) > 0 {
            return SystemHealth::Poor;
        }
        if book.count(Severity::Warning) > 2 {
            return SystemHealth::Fair;
        }
        if book.active_len() > 0 {
            return SystemHealth::Good;
        }
        drop(book);
        match self.collector.statistics(MetricType::ResponseTime, self.window) {
            Some(stats) if stats.p95 < 200.0 => SystemHealth::Excellent,
            _ => SystemHealth::Good,
        }
    }

    pub fn performance_grade(&self) -> &'static str {
        let p95 = self
            .collector
            .statistics(MetricType::ResponseTime, self.window)
            .map(|s| s.p95);
        grade(p95, self.cache_hit_rate())
    }

    pub fn summary(&self) -> AlertSummary {
        self.alerts.lock().summary()
    }

    pub fn status(&self) -> MonitorStatus {
        MonitorStatus {
            system_health: self.system_health(),
            performance_grade: self.performance_grade(),
            total_requests: self.total_requests.load(Ordering::Relaxed),
            cache_hit_rate: self.cache_hit_rate(),
            response_time: self.collector.statistics(MetricType::ResponseTime, self.window),
            alerts: self.summary(),
        }
    }

    /// Start the evaluation loop. Calling twice has no effect.
    pub fn start(self: &Arc<Self>) {
        let mut task = self.task.lock();
        if task.is_some() {
            return;
        }
        let this = Arc::clone(self);
        *task = Some(tokio::spawn(async move {
            loop {
                tokio::time::sleep(this.evaluation_interval).await;
                this.evaluate().await;
            }
        }));
        tracing::info!(
            "Performance monitoring started (every {}s)",
            self.evaluation_interval.as_secs()
        );
    }

    pub fn stop(&self) {
        if let Some(task) = self.task.lock().take() {
            task.abort();
            tracing::info!("Performance monitoring stopped");
        }
    }

    pub fn is_running(&self) -> bool {
        self.task.lock().is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    fn monitor() -> (Arc<MemoryStore>, Arc<PerformanceMonitor>) {
        let store = Arc::new(MemoryStore::new());
        let monitor = PerformanceMonitor::new(
            &MonitorConfig::default(),
            store.clone(),
            Arc::new(GatewayMetrics::new().unwrap()),
        );
        (store, Arc::new(monitor))
    }

    #[test]
    fn test_grade_bands() {
        assert_eq!(grade(Some(150.0), Some(0.95)), "A+");
        assert_eq!(grade(Some(150.0), Some(0.85)), "A");
        assert_eq!(grade(Some(350.0), Some(0.75)), "B");
        assert_eq!(grade(Some(550.0), Some(0.95)), "C");
        assert_eq!(grade(Some(900.0), Some(0.95)), "D");
        assert_eq!(grade(None, Some(0.95)), "N/A");
    }

    #[tokio::test]
    async fn test_below_min_samples_raises_nothing() {
        let (_store, monitor) = monitor();
        for _ in 0..9 {
            monitor.record_sample(MetricType::ResponseTime, 2000.0);
        }
        assert!(monitor.evaluate().await.is_empty());
        assert!(monitor.active_alerts().is_empty());
    }

    #[tokio::test]
    async fn test_alert_is_persisted_and_resolved() {
        let (store, monitor) = monitor();
        let mut events = monitor.subscribe();
        for _ in 0..10 {
            monitor.record_sample(MetricType::QueueSize, 600.0);
        }

        let transitions = monitor.evaluate().await;
        assert_eq!(transitions.len(), 1);
        let alert = transitions[0].alert().clone();
        assert_eq!(alert.alert_id, "queue_size_threshold");
        assert_eq!(alert.severity, Severity::Critical);
        assert_eq!(monitor.system_health(), SystemHealth::Poor);
        assert!(matches!(events.recv().await.unwrap(), Transition::Triggered(_)));

        let active = store.smembers(ACTIVE_ALERTS_KEY).await.unwrap();
        assert_eq!(active, vec!["queue_size_threshold".to_string()]);
        let key = format!("perf_alert:queue_size_threshold:{}", alert.timestamp.timestamp());
        let stored: serde_json::Value = serde_json::from_str(&store.get(&key).await.unwrap().unwrap()).unwrap();
        assert_eq!(stored["severity"], "critical");
        assert_eq!(stored["resolved"], false);

        for _ in 0..1000 {
            monitor.record_sample(MetricType::QueueSize, 1.0);
        }
        let transitions = monitor.evaluate().await;
        assert!(matches!(transitions.as_slice(), [Transition::Resolved(_)]));
        assert!(store.smembers(ACTIVE_ALERTS_KEY).await.unwrap().is_empty());
        assert_eq!(monitor.summary().resolved_last_24h, 1);
    }

    #[tokio::test]
    async fn test_request_recording_and_grade() {
        let (_store, monitor) = monitor();
        assert_eq!(monitor.performance_grade(), "N/A");
        for i in 0..10 {
            monitor.record_request(100.0, i != 0, false);
        }
        assert_eq!(monitor.cache_hit_rate(), Some(0.9));
        assert_eq!(monitor.performance_grade(), "A+");
        assert_eq!(monitor.system_health(), SystemHealth::Excellent);

        let errors = monitor.statistics(MetricType::ErrorRate, 5).unwrap();
        assert_eq!(errors.mean, 0.0);
        let hits = monitor.statistics(MetricType::CacheHitRate, 5).unwrap();
        assert_eq!(hits.mean, 90.0);
    }

    #[tokio::test]
    async fn test_warnings_make_health_fair() {
        let (_store, monitor) = monitor();
        for _ in 0..10 {
            monitor.record_sample(MetricType::ResponseTime, 350.0);
            monitor.record_sample(MetricType::CpuUsage, 75.0);
            monitor.record_sample(MetricType::MemoryUsage, 85.0);
        }
        monitor.evaluate().await;
        assert_eq!(monitor.summary().active_alerts, 3);
        assert_eq!(monitor.system_health(), SystemHealth::Fair);
    }

    #[tokio::test(start_paused = true)]
    async fn test_throughput_sampled_per_evaluation() {
        let (_store, monitor) = monitor();
        tokio::time::advance(Duration::from_secs(10)).await;
        for _ in 0..50 {
            monitor.record_request(10.0, false, false);
        }
        monitor.evaluate().await;
        let throughput = monitor.statistics(MetricType::Throughput, 5).unwrap();
        assert_eq!(throughput.count, 1);
        assert!((throughput.mean - 5.0).abs() < 1e-6);

        tokio::time::advance(Duration::from_secs(10)).await;
        monitor.evaluate().await;
        assert_eq!(monitor.statistics(MetricType::Throughput, 5).unwrap().count, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_loop_evaluates_in_background() {
        let (_store, monitor) = monitor();
        let mut events = monitor.subscribe();
        for _ in 0..10 {
            monitor.record_sample(MetricType::ErrorRate, 30.0);
        }
        monitor.start();
        assert!(monitor.is_running());
        tokio::time::sleep(Duration::from_secs(11)).await;
        let event = events.recv().await.unwrap();
        assert_eq!(event.alert().severity, Severity::Emergency);
        monitor.stop();
        assert!(!monitor.is_running());
    }
}
