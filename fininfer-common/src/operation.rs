//! Operation types for financial inference requests.

use serde::{Deserialize, Serialize};

/// A named category of inference request.
///
/// Each operation carries its own cache lifetime, batching pattern and
/// routing weight. The set is closed; unknown names are rejected at parse time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    BudgetOptimization,
    PortfolioAnalysis,
    DebtStrategy,
    MarketIntelligence,
    GoalPlanning,
    FinancialAnalysis,
}

impl Operation {
    /// All operation variants for iteration.
    pub const ALL: [Operation; 6] = [
        Operation::BudgetOptimization,
        Operation::PortfolioAnalysis,
        Operation::DebtStrategy,
        Operation::MarketIntelligence,
        Operation::GoalPlanning,
        Operation::FinancialAnalysis,
    ];

    /// Get the string representation used in keys and metric labels.
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::BudgetOptimization => "budget_optimization",
            Operation::PortfolioAnalysis => "portfolio_analysis",
            Operation::DebtStrategy => "debt_strategy",
            Operation::MarketIntelligence => "market_intelligence",
            Operation::GoalPlanning => "goal_planning",
            Operation::FinancialAnalysis => "financial_analysis",
        }
    }

    /// Parse an operation name (case-insensitive).
    pub fn parse(s: &str) -> Option<Self> {
        let lowered = s.trim().to_lowercase();
        Self::ALL.into_iter().find(|op| op.as_str() == lowered)
    }
}

impl std::fmt::Display for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Operation {
    type Err = UnknownOperation;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s).ok_or_else(|| UnknownOperation(s.to_string()))
    }
}

/// Error returned when parsing an unknown operation name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownOperation(pub String);

impl std::fmt::Display for UnknownOperation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "unknown operation '{}'", self.0)
    }
}

impl std::error::Error for UnknownOperation {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_operation_serialization() {
        let op = Operation::BudgetOptimization;
        let json = serde_json::to_string(&op).unwrap();
        assert_eq!(json, r#""budget_optimization""#);

        let parsed: Operation = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, Operation::BudgetOptimization);
    }

    #[test]
    fn test_display_matches_serde_name() {
        for op in Operation::ALL {
            let json = serde_json::to_string(&op).unwrap();
            assert_eq!(json.trim_matches('"'), op.to_string());
        }
    }

    #[test]
    fn test_parse_is_case_insensitive() {
        assert_eq!(Operation::parse("Market_Intelligence"), Some(Operation::MarketIntelligence));
        assert_eq!(Operation::parse(" goal_planning "), Some(Operation::GoalPlanning));
        assert_eq!(Operation::parse("crypto_trading"), None);
    }

    #[test]
    fn test_from_str_error() {
        let err = "nope".parse::<Operation>().unwrap_err();
        assert_eq!(err.to_string(), "unknown operation 'nope'");
    }
}
