//! Rolling metric buffers and windowed statistics.

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;
use tokio::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricType {
    ResponseTime,
    Throughput,
    ErrorRate,
    CacheHitRate,
    MemoryUsage,
    CpuUsage,
    QueueSize,
    ConnectionCount,
}

impl MetricType {
    pub const ALL: [MetricType; 8] = [
        MetricType::ResponseTime,
        MetricType::Throughput,
        MetricType::ErrorRate,
        MetricType::CacheHitRate,
        MetricType::MemoryUsage,
        MetricType::CpuUsage,
        MetricType::QueueSize,
        MetricType::ConnectionCount,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            MetricType::ResponseTime => "response_time",
            MetricType::Throughput => "throughput",
            MetricType::ErrorRate => "error_rate",
            MetricType::CacheHitRate => "cache_hit_rate",
            MetricType::MemoryUsage => "memory_usage",
            MetricType::CpuUsage => "cpu_usage",
            MetricType::QueueSize => "queue_size",
            MetricType::ConnectionCount => "connection_count",
        }
    }

    /// Metrics where a low value is the bad direction.
    pub fn lower_is_worse(&self) -> bool {
        matches!(self, MetricType::Throughput | MetricType::CacheHitRate)
    }
}

impl std::fmt::Display for MetricType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Summary of one metric over a time window.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricStats {
    pub count: usize,
    pub mean: f64,
    pub median: f64,
    pub min: f64,
    pub max: f64,
    pub std_dev: f64,
    pub p50: f64,
    pub p95: f64,
    pub p99: f64,
}

/// Nearest-rank percentile over sorted values: `sorted[min(⌊n·p⌋, n−1)]`.
pub fn percentile(sorted: &[f64], p: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    let idx = ((sorted.len() as f64 * p) as usize).min(sorted.len() - 1);
    sorted[idx]
}

impl MetricStats {
    pub fn from_values(mut values: Vec<f64>) -> Option<Self> {
        if values.is_empty() {
            return None;
        }
        values.sort_by(f64::total_cmp);
        let n = values.len();
        let mean = values.iter().sum::<f64>() / n as f64;
        let median = if n % 2 == 1 {
            values[n / 2]
        } else {
            (values[n / 2 - 1] + values[n / 2]) / 2.0
        };
        let std_dev = if n > 1 {
            let var = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n - 1) as f64;
            var.sqrt()
        } else {
            0.0
        };
        Some(Self {
            count: n,
            mean,
            median,
            min: values[0],
            max: values[n - 1],
            std_dev,
            p50: percentile(&values, 0.5),
            p95: percentile(&values, 0.95),
            p99: percentile(&values, 0.99),
        })
    }
}

#[derive(Debug, Clone, Copy)]
struct Sample {
    at: Instant,
    value: f64,
}

/// Bounded per-metric sample buffers.
pub struct MetricCollector {
    capacity: usize,
    buffers: Mutex<HashMap<MetricType, VecDeque<Sample>>>,
}

impl MetricCollector {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            buffers: Mutex::new(HashMap::new()),
        }
    }

    pub fn record(&self, metric: MetricType, value: f64) {
        let mut buffers = self.buffers.lock();
        let buffer = buffers.entry(metric).or_default();
        if buffer.len() == self.capacity {
            buffer.pop_front();
        }
        buffer.push_back(Sample {
            at: Instant::now(),
            value,
        });
    }

    /// Statistics over samples younger than `window`. `None` without samples.
    pub fn statistics(&self, metric: MetricType, window: Duration) -> Option<MetricStats> {
        let values: Vec<f64> = {
            let buffers = self.buffers.lock();
            let buffer = buffers.get(&metric)?;
            buffer
                .iter()
                .filter(|s| s.at.elapsed() <= window)
                .map(|s| s.value)
                .collect()
        };
        MetricStats::from_values(values)
    }

    pub fn latest(&self, metric: MetricType) -> Option<f64> {
        self.buffers.lock().get(&metric)?.back().map(|s| s.value)
    }

    pub fn len(&self, metric: MetricType) -> usize {
        self.buffers.lock().get(&metric).map_or(0, VecDeque::len)
    }
}
