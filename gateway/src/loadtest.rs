//! In-process load driver for the orchestrator.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use fininfer_common::{AIRequest, Operation};
use futures_util::future::join_all;
use rand::seq::SliceRandom;
use rand::Rng;
use serde::Serialize;
use serde_json::{json, Value};
use tokio::time::Instant;

use crate::config::LoadTestConfig;
use crate::engine::Orchestrator;
use crate::monitor::collector::percentile;

struct Sample {
    latency_ms: f64,
    success: bool,
    cache_hit: bool,
    batch_size: usize,
    error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct LoadTestReport {
    pub concurrent_users: usize,
    pub total_requests: usize,
    pub successful_requests: usize,
    pub failed_requests: usize,
    pub duration_secs: f64,
    pub requests_per_second: f64,
    pub success_rate: f64,
    pub cache_hit_rate: f64,
    pub avg_batch_size: f64,
    pub p50_ms: f64,
    pub p90_ms: f64,
    pub p95_ms: f64,
    pub p99_ms: f64,
    pub errors: BTreeMap<String, usize>,
    pub meets_p95_target: bool,
    pub meets_success_target: bool,
}

/// Payload for one simulated user request.
///
/// Users draw from a few fixed variants so repeated requests can hit the cache.
pub fn request_payload<R: Rng>(rng: &mut R, operation: Operation) -> Value {
    match operation {
        Operation::BudgetOptimization => {
            let analysis_type = ["monthly_review", "category_analysis"].choose(rng).copied();
            json!({
                "analysis_type": analysis_type,
                "categories": ["food", "transportation", "entertainment"],
                "budget_period": "2024-01",
            })
        }
        Operation::PortfolioAnalysis => {
            let risk_tolerance = ["conservative", "moderate", "aggressive"].choose(rng).copied();
            json!({
                "risk_tolerance": risk_tolerance,
                "investment_horizon": rng.gen_range(1..=3) * 5,
                "portfolio_value": 100_000,
            })
        }
        Operation::FinancialAnalysis => json!({
            "analysis_scope": "comprehensive",
            "include_projections": rng.gen_bool(0.5),
        }),
        Operation::MarketIntelligence => json!({
            "symbols": ["AAPL", "GOOGL", "TSLA"],
            "alert_types": ["price_change", "volume_spike"],
        }),
        Operation::DebtStrategy => {
            let strategy = ["avalanche", "snowball"].choose(rng).copied();
            json!({
                "strategy": strategy,
                "monthly_payment": 500,
            })
        }
        Operation::GoalPlanning => {
            let goal = ["retirement", "house", "education"].choose(rng).copied();
            json!({
                "goal": goal,
                "target_years": 10,
            })
        }
    }
}

async fn simulate_user(engine: Arc<Orchestrator>, user: usize, start_delay: Duration, config: LoadTestConfig) -> Vec<Sample> {
    tokio::time::sleep(start_delay).await;
    let user_id = format!("load_test_user_{}", user);
    let mut samples = Vec::with_capacity(config.requests_per_user);
    for n in 0..config.requests_per_user {
        let operation = config.operations[n % config.operations.len()];
        let payload = request_payload(&mut rand::thread_rng(), operation);
        let started = Instant::now();
        let response = engine
            .process(AIRequest::new(user_id.clone(), operation, payload))
            .await;
        samples.push(Sample {
            latency_ms: started.elapsed().as_secs_f64() * 1000.0,
            success: response.success,
            cache_hit: response.cache_hit,
            batch_size: response.batch_size,
            error: response.error.map(|e| e.kind.to_string()),
        });
        tokio::time::sleep(Duration::from_millis(config.think_time_ms)).await;
    }
    samples
}

/// Drive `engine` with the configured user population and summarize.
pub async fn run(engine: Arc<Orchestrator>, config: &LoadTestConfig) -> LoadTestReport {
    let users = config.concurrent_users.max(1);
    let mut config = config.clone();
    if config.operations.is_empty() {
        config.operations = Operation::ALL.to_vec();
    }
    tracing::info!(
        "Starting load test: {} users, {} requests each",
        users,
        config.requests_per_user
    );

    let stagger = Duration::from_millis(config.ramp_up_ms) / users as u32;
    let start = Instant::now();
    let tasks: Vec<_> = (0..users)
        .map(|user| {
            tokio::spawn(simulate_user(
                engine.clone(),
                user,
                stagger * user as u32,
                config.clone(),
            ))
        })
        .collect();

    let mut samples = Vec::new();
    for outcome in join_all(tasks).await {
        match outcome {
            Ok(user_samples) => samples.extend(user_samples),
            Err(e) => tracing::error!("Load test user task failed: {}", e),
        }
    }
    let report = summarize(users, &config, samples, start.elapsed());
    tracing::info!(
        "Load test finished: {} requests, {:.1} rps, p95 {:.1}ms, success {:.2}%",
        report.total_requests,
        report.requests_per_second,
        report.p95_ms,
        report.success_rate * 100.0
    );
    report
}

fn summarize(users: usize, config: &LoadTestConfig, samples: Vec<Sample>, elapsed: Duration) -> LoadTestReport {
    let total = samples.len();
    let successful = samples.iter().filter(|s| s.success).count();
    let cache_hits = samples.iter().filter(|s| s.cache_hit).count();
    let ratio = |n: usize| if total == 0 { 0.0 } else { n as f64 / total as f64 };

    let mut latencies: Vec<f64> = samples.iter().map(|s| s.latency_ms).collect();
    latencies.sort_by(f64::total_cmp);
    let served: Vec<&Sample> = samples.iter().filter(|s| s.success).collect();
    let avg_batch_size = if served.is_empty() {
        0.0
    } else {
        served.iter().map(|s| s.batch_size as f64).sum::<f64>() / served.len() as f64
    };

    let mut errors = BTreeMap::new();
    for error in samples.iter().filter_map(|s| s.error.clone()) {
        *errors.entry(error).or_insert(0) += 1;
    }

    let duration_secs = elapsed.as_secs_f64();
    let p95 = percentile(&latencies, 0.95);
    let success_rate = ratio(successful);
    LoadTestReport {
        concurrent_users: users,
        total_requests: total,
        successful_requests: successful,
        failed_requests: total - successful,
        duration_secs,
        requests_per_second: if duration_secs > 0.0 { total as f64 / duration_secs } else { 0.0 },
        success_rate,
        cache_hit_rate: ratio(cache_hits),
        avg_batch_size,
        p50_ms: percentile(&latencies, 0.50),
        p90_ms: percentile(&latencies, 0.90),
        p95_ms: p95,
        p99_ms: percentile(&latencies, 0.99),
        errors,
        meets_p95_target: total > 0 && p95 <= config.target_p95_ms,
        meets_success_target: total > 0 && success_rate >= config.target_success_rate,
    }
}
