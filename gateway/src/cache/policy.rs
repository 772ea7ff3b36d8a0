//! Per-operation cache policy and adaptive time-to-live.

use fininfer_common::Operation;
use serde::Serialize;

pub const MIN_TTL_SECS: u64 = 60;
pub const MAX_TTL_SECS: u64 = 7200;
/// Lifetime of a `cache_deps:{tag}` membership set.
pub const DEPENDENCY_TTL_SECS: u64 = 86_400;
/// Retention of `cache_stats:{key}` access counters.
pub const ACCESS_STATS_TTL_SECS: u64 = 3600;

/// How an operation's entries become stale.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum InvalidationStrategy {
    Ttl,
    Dependency,
    Event,
    Adaptive,
}

#[derive(Debug, Clone, Serialize)]
pub struct CachePolicy {
    pub operation: Operation,
    pub base_ttl_secs: u64,
    pub strategy: InvalidationStrategy,
    pub batch_compatible: bool,
    pub warmup: bool,
}

impl CachePolicy {
    pub fn for_operation(operation: Operation) -> Self {
        use InvalidationStrategy::*;
        let (base_ttl_secs, strategy, batch_compatible, warmup) = match operation {
            Operation::BudgetOptimization => (1800, Dependency, true, true),
            Operation::PortfolioAnalysis => (600, Event, true, true),
            Operation::DebtStrategy => (3600, Ttl, false, false),
            Operation::MarketIntelligence => (60, Adaptive, true, true),
            Operation::GoalPlanning => (7200, Dependency, false, false),
            Operation::FinancialAnalysis => (900, Adaptive, true, true),
        };
        Self {
            operation,
            base_ttl_secs,
            strategy,
            batch_compatible,
            warmup,
        }
    }

    pub fn all() -> Vec<CachePolicy> {
        Operation::ALL.into_iter().map(Self::for_operation).collect()
    }
}

/// How quickly an operation's answers go stale. Lower is more volatile.
pub fn volatility(operation: Operation) -> f64 {
    match operation {
        Operation::MarketIntelligence => 0.3,
        Operation::PortfolioAnalysis => 0.6,
        Operation::BudgetOptimization => 0.8,
        Operation::DebtStrategy => 1.0,
        Operation::GoalPlanning => 1.2,
        Operation::FinancialAnalysis => 1.0,
    }
}

/// Time-to-live for a result, from the operation's base TTL, the result's
/// confidence (absent counts as 0.5) and the operation's volatility.
///
/// Always within `[MIN_TTL_SECS, MAX_TTL_SECS]`.
pub fn adaptive_ttl(operation: Operation, confidence: Option<f64>) -> u64 {
    let base = CachePolicy::for_operation(operation).base_ttl_secs as f64;
    let confidence = confidence.unwrap_or(0.5);
    let confidence_factor = if confidence > 0.9 {
        1.5
    } else if confidence < 0.7 {
        0.5
    } else {
        1.0
    };
    let ttl = (base * confidence_factor).floor();
    let ttl = (ttl * volatility(operation)).floor() as u64;
    ttl.clamp(MIN_TTL_SECS, MAX_TTL_SECS)
}

/// Invalidation tags an entry is registered under.
pub fn dependency_tags(operation: Operation, user_id: &str) -> Vec<String> {
    match operation {
        Operation::BudgetOptimization => {
            vec![format!("user_budget:{}", user_id), format!("user_transactions:{}", user_id)]
        }
        Operation::PortfolioAnalysis => {
            vec![format!("user_portfolio:{}", user_id), "market_data".to_string()]
        }
        Operation::FinancialAnalysis => {
            vec![format!("user_data:{}", user_id), format!("user_accounts:{}", user_id)]
        }
        Operation::GoalPlanning => {
            vec![format!("user_goals:{}", user_id), format!("user_progress:{}", user_id)]
        }
        Operation::DebtStrategy | Operation::MarketIntelligence => vec![],
    }
}
