//! Threshold rules and the alert lifecycle.

use std::collections::{BTreeMap, HashMap, VecDeque};

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::Serialize;

use super::collector::{MetricStats, MetricType};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Info,
    Warning,
    Critical,
    Emergency,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Info => "info",
            Severity::Warning => "warning",
            Severity::Critical => "critical",
            Severity::Emergency => "emergency",
        }
    }
}

/// Which statistic of the window a threshold compares.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Statistic {
    P95,
    Mean,
    Max,
}

impl Statistic {
    pub fn pick(&self, stats: &MetricStats) -> f64 {
        match self {
            Statistic::P95 => stats.p95,
            Statistic::Mean => stats.mean,
            Statistic::Max => stats.max,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Threshold {
    pub metric: MetricType,
    pub warning: f64,
    pub critical: f64,
    pub emergency: Option<f64>,
    pub statistic: Statistic,
    pub window_minutes: u64,
    pub min_samples: usize,
    pub enabled: bool,
}

impl Threshold {
    fn new(metric: MetricType, warning: f64, critical: f64, emergency: f64, statistic: Statistic) -> Self {
        Self {
            metric,
            warning,
            critical,
            emergency: Some(emergency),
            statistic,
            window_minutes: 5,
            min_samples: 10,
            enabled: true,
        }
    }

    pub fn exceeded(&self, value: f64, limit: f64) -> bool {
        if self.metric.lower_is_worse() {
            value < limit
        } else {
            value > limit
        }
    }

    /// Highest severity whose limit `value` crosses.
    pub fn classify(&self, value: f64) -> Option<(Severity, f64)> {
        if let Some(limit) = self.emergency.filter(|l| self.exceeded(value, *l)) {
            return Some((Severity::Emergency, limit));
        }
        if self.exceeded(value, self.critical) {
            return Some((Severity::Critical, self.critical));
        }
        if self.exceeded(value, self.warning) {
            return Some((Severity::Warning, self.warning));
        }
        None
    }
}

/// Default rules with the given window and sample floor.
pub fn default_thresholds(window_minutes: u64, min_samples: usize) -> Vec<Threshold> {
    use MetricType::*;
    use Statistic::*;
    [
        Threshold::new(ResponseTime, 300.0, 500.0, 1000.0, P95),
        Threshold::new(Throughput, 50.0, 25.0, 10.0, Mean),
        Threshold::new(ErrorRate, 5.0, 10.0, 25.0, Mean),
        Threshold::new(CacheHitRate, 70.0, 50.0, 25.0, Mean),
        Threshold::new(MemoryUsage, 80.0, 90.0, 95.0, Max),
        Threshold::new(CpuUsage, 70.0, 85.0, 95.0, Max),
        Threshold::new(QueueSize, 100.0, 500.0, 1000.0, P95),
    ]
    .into_iter()
    .map(|t| Threshold {
        window_minutes,
        min_samples,
        ..t
    })
    .collect()
}

pub fn alert_message(metric: MetricType, value: f64, limit: f64, severity: Severity) -> String {
    let name = metric
        .as_str()
        .split('_')
        .map(|w| {
            let mut chars = w.chars();
            match chars.next() {
                Some(c) => c.to_uppercase().chain(chars).collect::<String>(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ");
    let direction = if metric.lower_is_worse() { "below" } else { "above" };
    format!(
        "{}: {} ({:.1}) {} threshold ({:.1})",
        severity.as_str().to_uppercase(),
        name,
        value,
        direction,
        limit
    )
}

#[derive(Debug, Clone, Serialize)]
pub struct Alert {
    pub alert_id: String,
    pub metric: MetricType,
    pub severity: Severity,
    pub message: String,
    pub current_value: f64,
    pub threshold_value: f64,
    pub timestamp: DateTime<Utc>,
    pub duration_seconds: i64,
    pub resolved: bool,
    pub stats: MetricStats,
}

/// What an evaluation did to an alert.
#[derive(Debug, Clone)]
pub enum Transition {
    Triggered(Alert),
    SeverityChanged(Alert),
    Resolved(Alert),
}

impl Transition {
    pub fn alert(&self) -> &Alert {
        match self {
            Transition::Triggered(a) | Transition::SeverityChanged(a) | Transition::Resolved(a) => a,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct AlertDetail {
    pub alert_id: String,
    pub severity: Severity,
    pub message: String,
    pub duration_seconds: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct AlertSummary {
    pub timestamp: DateTime<Utc>,
    pub active_alerts: usize,
    pub active_by_severity: BTreeMap<Severity, usize>,
    pub resolved_last_24h: usize,
    pub alert_details: Vec<AlertDetail>,
}

/// Active alerts keyed by id plus a bounded history of resolved ones.
pub struct AlertBook {
    active: HashMap<String, Alert>,
    history: VecDeque<Alert>,
    history_size: usize,
}

pub fn alert_id(metric: MetricType) -> String {
    format!("{}_threshold", metric.as_str())
}

impl AlertBook {
    pub fn new(history_size: usize) -> Self {
        Self {
            active: HashMap::new(),
            history: VecDeque::new(),
            history_size: history_size.max(1),
        }
    }

    /// Apply one threshold evaluation.
    ///
    /// `crossed` is the classified severity and limit, `None` when the value
    /// is back under the lowest threshold.
    pub fn apply(
        &mut self,
        metric: MetricType,
        value: f64,
        crossed: Option<(Severity, f64)>,
        stats: MetricStats,
    ) -> Option<Transition> {
        let id = alert_id(metric);
        let now = Utc::now();
        match crossed {
            Some((severity, limit)) => match self.active.get_mut(&id) {
                None => {
                    let alert = Alert {
                        alert_id: id.clone(),
                        metric,
                        severity,
                        message: alert_message(metric, value, limit, severity),
                        current_value: value,
                        threshold_value: limit,
                        timestamp: now,
                        duration_seconds: 0,
                        resolved: false,
                        stats,
                    };
                    self.active.insert(id, alert.clone());
                    Some(Transition::Triggered(alert))
                }
                Some(existing) => {
                    existing.current_value = value;
                    existing.stats = stats;
                    existing.duration_seconds = (now - existing.timestamp).num_seconds();
                    if existing.severity == severity {
                        return None;
                    }
                    existing.severity = severity;
                    existing.threshold_value = limit;
                    existing.message = alert_message(metric, value, limit, severity);
                    Some(Transition::SeverityChanged(existing.clone()))
                }
            },
            None => {
                let mut alert = self.active.remove(&id)?;
                alert.resolved = true;
                alert.current_value = value;
                alert.duration_seconds = (now - alert.timestamp).num_seconds();
                if self.history.len() == self.history_size {
                    self.history.pop_front();
                }
                self.history.push_back(alert.clone());
                Some(Transition::Resolved(alert))
            }
        }
    }

    pub fn refresh_durations(&mut self) {
        let now = Utc::now();
        for alert in self.active.values_mut() {
            alert.duration_seconds = (now - alert.timestamp).num_seconds();
        }
    }

    pub fn active(&self) -> Vec<Alert> {
        let mut alerts: Vec<Alert> = self.active.values().cloned().collect();
        alerts.sort_by(|a, b| a.alert_id.cmp(&b.alert_id));
        alerts
    }

    pub fn history(&self) -> &VecDeque<Alert> {
        &self.history
    }

    pub fn count(&self, severity: Severity) -> usize {
        self.active.values().filter(|a| a.severity == severity).count()
    }

    pub fn active_len(&self) -> usize {
        self.active.len()
    }

    pub fn summary(&self) -> AlertSummary {
        let now = Utc::now();
        let mut by_severity = BTreeMap::new();
        for alert in self.active.values() {
            *by_severity.entry(alert.severity).or_insert(0) += 1;
        }
        AlertSummary {
            timestamp: now,
            active_alerts: self.active.len(),
            active_by_severity: by_severity,
            resolved_last_24h: self
                .history
                .iter()
                .filter(|a| a.timestamp > now - ChronoDuration::hours(24))
                .count(),
            alert_details: self
                .active()
                .into_iter()
                .map(|a| AlertDetail {
                    alert_id: a.alert_id,
                    severity: a.severity,
                    message: a.message,
                    duration_seconds: a.duration_seconds,
                })
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn stats(v: f64) -> MetricStats {
        MetricStats::from_values(vec![v]).unwrap()
    }

    fn threshold(metric: MetricType) -> Threshold {
        default_thresholds(5, 10)
            .into_iter()
            .find(|t| t.metric == metric)
            .unwrap()
    }

    #[rstest]
    #[case(MetricType::ResponseTime, 250.0, None)]
    #[case(MetricType::ResponseTime, 350.0, Some(Severity::Warning))]
    #[case(MetricType::ResponseTime, 700.0, Some(Severity::Critical))]
    #[case(MetricType::ResponseTime, 1500.0, Some(Severity::Emergency))]
    #[case(MetricType::Throughput, 60.0, None)]
    #[case(MetricType::Throughput, 40.0, Some(Severity::Warning))]
    #[case(MetricType::Throughput, 5.0, Some(Severity::Emergency))]
    #[case(MetricType::CacheHitRate, 45.0, Some(Severity::Critical))]
    #[case(MetricType::ErrorRate, 5.0, None)]
    #[case(MetricType::CpuUsage, 96.0, Some(Severity::Emergency))]
    fn test_classify(#[case] metric: MetricType, #[case] value: f64, #[case] expected: Option<Severity>) {
        let got = threshold(metric).classify(value).map(|(s, _)| s);
        assert_eq!(got, expected);
    }

    #[test]
    fn test_message_direction() {
        assert_eq!(
            alert_message(MetricType::CacheHitRate, 40.0, 50.0, Severity::Critical),
            "CRITICAL: Cache Hit Rate (40.0) below threshold (50.0)"
        );
        assert_eq!(
            alert_message(MetricType::ResponseTime, 612.34, 500.0, Severity::Critical),
            "CRITICAL: Response Time (612.3) above threshold (500.0)"
        );
    }

    #[test]
    fn test_lifecycle() {
        let mut book = AlertBook::new(10);
        let t = threshold(MetricType::ResponseTime);

        let first = book.apply(MetricType::ResponseTime, 350.0, t.classify(350.0), stats(350.0));
        assert!(matches!(first, Some(Transition::Triggered(ref a)) if a.severity == Severity::Warning));

        assert!(book
            .apply(MetricType::ResponseTime, 360.0, t.classify(360.0), stats(360.0))
            .is_none());
        assert_eq!(book.active()[0].current_value, 360.0);

        let changed = book.apply(MetricType::ResponseTime, 800.0, t.classify(800.0), stats(800.0));
        assert!(matches!(changed, Some(Transition::SeverityChanged(ref a)) if a.severity == Severity::Critical));
        assert_eq!(book.active_len(), 1);
        assert_eq!(book.count(Severity::Critical), 1);

        let resolved = book.apply(MetricType::ResponseTime, 100.0, t.classify(100.0), stats(100.0));
        assert!(matches!(resolved, Some(Transition::Resolved(ref a)) if a.resolved));
        assert_eq!(book.active_len(), 0);
        assert_eq!(book.history().len(), 1);
        assert_eq!(book.summary().resolved_last_24h, 1);

        assert!(book
            .apply(MetricType::ResponseTime, 100.0, None, stats(100.0))
            .is_none());
    }

    #[test]
    fn test_history_is_bounded() {
        let mut book = AlertBook::new(2);
        let t = threshold(MetricType::QueueSize);
        for _ in 0..3 {
            book.apply(MetricType::QueueSize, 200.0, t.classify(200.0), stats(200.0));
            book.apply(MetricType::QueueSize, 1.0, None, stats(1.0));
        }
        assert_eq!(book.history().len(), 2);
    }
}
