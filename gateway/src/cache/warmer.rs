//! Proactive cache warming for popular request patterns.

use std::sync::Arc;
use std::time::Duration;

use fininfer_common::{BackendKind, Operation};
use parking_lot::Mutex;
use serde_json::json;
use tokio::task::JoinHandle;

use super::{CachePolicy, InferenceCache};
use crate::compute::{BatchCompute, ComputeRequest};

/// Patterns warmed per operation per round.
const TOP_PATTERNS: usize = 5;

/// Runs one background loop per warmup-enabled operation.
pub struct CacheWarmer {
    cache: InferenceCache,
    compute: Arc<dyn BatchCompute>,
    interval: Duration,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl CacheWarmer {
    pub fn new(cache: InferenceCache, compute: Arc<dyn BatchCompute>, interval: Duration) -> Self {
        Self {
            cache,
            compute,
            interval,
            tasks: Mutex::new(Vec::new()),
        }
    }

    /// Popular request patterns for an operation.
    pub fn popular_patterns(operation: Operation) -> &'static [&'static str] {
        match operation {
            Operation::BudgetOptimization => &["monthly_review", "category_analysis", "spending_trend"],
            Operation::PortfolioAnalysis => &["risk_assessment", "rebalancing", "performance_review"],
            Operation::MarketIntelligence => &["sector_analysis", "volatility_check", "trend_analysis"],
            Operation::FinancialAnalysis => &["net_worth", "cash_flow", "debt_ratio"],
            Operation::DebtStrategy | Operation::GoalPlanning => &[],
        }
    }

    fn sample_request(operation: Operation, pattern: &str) -> ComputeRequest {
        ComputeRequest::new(
            format!("warmup_user_{}", pattern),
            operation,
            json!({"pattern": pattern, "warmup": true}),
            BackendKind::SingleModel,
        )
    }

    /// Compute and cache the popular samples of `operation` that are not cached yet.
    ///
    /// Returns the number of entries written.
    pub async fn warm_operation(&self, operation: Operation) -> usize {
        let mut warmed = 0;
        for pattern in Self::popular_patterns(operation).iter().take(TOP_PATTERNS) {
            let sample = Self::sample_request(operation, pattern);
            if self.cache.contains(operation, &sample.user_id, &sample.data).await {
                continue;
            }
            tracing::info!("Warming up cache for {} pattern: {}", operation, pattern);
            let user_id = sample.user_id.clone();
            let payload = sample.data.clone();
            match self.compute.compute_batch(vec![sample]).await {
                Ok(results) => {
                    if let Some(result) = results.first() {
                        if self.cache.put(operation, &user_id, &payload, result).await {
                            warmed += 1;
                        }
                    }
                }
                Err(e) => tracing::error!("Error warming up {}: {}", operation, e),
            }
        }
        tracing::debug!("Warmed up {} cache entries for {}", warmed, operation);
        warmed
    }

    /// Start the warmup loops. Calling twice has no effect.
    pub fn start(self: &Arc<Self>) {
        let mut tasks = self.tasks.lock();
        if !tasks.is_empty() {
            return;
        }
        for policy in CachePolicy::all().into_iter().filter(|p| p.warmup) {
            let this = Arc::clone(self);
            tasks.push(tokio::spawn(async move {
                loop {
                    tokio::time::sleep(this.interval).await;
                    this.warm_operation(policy.operation).await;
                }
            }));
        }
        tracing::info!("Started cache warming for {} operations", tasks.len());
    }

    pub fn stop(&self) {
        let mut tasks = self.tasks.lock();
        for task in tasks.drain(..) {
            task.abort();
        }
        tracing::info!("Stopped cache warming scheduler");
    }

    pub fn is_running(&self) -> bool {
        !self.tasks.lock().is_empty()
    }
}
