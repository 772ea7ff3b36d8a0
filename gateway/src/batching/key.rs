//! Grouping keys for compatible requests.

use fininfer_common::{BackendKind, Operation};
use serde_json::Value;

/// Features that must match for two requests of an operation to share a batch,
/// with the value assumed when the payload omits them.
fn grouping_features(operation: Operation) -> &'static [(&'static str, &'static str)] {
    match operation {
        Operation::BudgetOptimization => &[("analysis_type", "standard"), ("time_period", "monthly")],
        Operation::PortfolioAnalysis => &[("analysis_depth", "standard"), ("risk_tolerance", "moderate")],
        Operation::MarketIntelligence => &[("asset_class", "equity"), ("time_horizon", "short")],
        Operation::DebtStrategy | Operation::GoalPlanning | Operation::FinancialAnalysis => &[],
    }
}

fn feature_value(payload: &Value, field: &str, default: &str) -> String {
    match payload.get(field) {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Null) | None => default.to_string(),
        Some(other) => other.to_string(),
    }
}

/// Key under which a request is grouped.
///
/// Requests only share a batch when they target the same backend. With
/// `compatibility_check` off, every request of an operation shares a key.
pub fn batch_key(backend: BackendKind, operation: Operation, payload: &Value, compatibility_check: bool) -> String {
    let features = grouping_features(operation);
    if !compatibility_check || features.is_empty() {
        return format!("{}:{}", backend, operation);
    }
    // Feature tables are already in name order.
    let parts: Vec<String> = features
        .iter()
        .map(|(field, default)| format!("{}={}", field, feature_value(payload, field, default)))
        .collect();
    format!("{}:{}_{}", backend, operation, parts.join("_"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_defaults_fill_missing_features() {
        let key = batch_key(BackendKind::SingleModel, Operation::BudgetOptimization, &json!({"income": 1}), true);
        assert_eq!(key, "single_model:budget_optimization_analysis_type=standard_time_period=monthly");
        let explicit = batch_key(
            BackendKind::SingleModel,
            Operation::BudgetOptimization,
            &json!({"analysis_type": "standard", "time_period": "monthly", "income": 2}),
            true,
        );
        assert_eq!(key, explicit);
    }

    #[test]
    fn test_features_split_groups() {
        let weekly = batch_key(
            BackendKind::SingleModel,
            Operation::BudgetOptimization,
            &json!({"time_period": "weekly"}),
            true,
        );
        assert!(weekly.ends_with("time_period=weekly"));
        let crypto = batch_key(
            BackendKind::SingleModel,
            Operation::MarketIntelligence,
            &json!({"asset_class": "crypto"}),
            true,
        );
        assert_eq!(crypto, "single_model:market_intelligence_asset_class=crypto_time_horizon=short");
    }

    #[test]
    fn test_operation_only_keys() {
        assert_eq!(
            batch_key(BackendKind::CoordinatedAgents, Operation::DebtStrategy, &json!({"x": 1}), true),
            "coordinated_agents:debt_strategy"
        );
        assert_eq!(
            batch_key(BackendKind::SingleModel, Operation::PortfolioAnalysis, &json!({"risk_tolerance": "high"}), false),
            "single_model:portfolio_analysis"
        );
    }

    #[test]
    fn test_backend_separates_groups() {
        let payload = json!({});
        assert_ne!(
            batch_key(BackendKind::SingleModel, Operation::PortfolioAnalysis, &payload, true),
            batch_key(BackendKind::CoordinatedAgents, Operation::PortfolioAnalysis, &payload, true)
        );
    }
}
