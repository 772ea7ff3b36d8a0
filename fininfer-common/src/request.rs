//! Inbound request envelope.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::Operation;

/// Default request timeout in milliseconds.
pub const DEFAULT_TIMEOUT_MS: u64 = 5000;

/// Request priority. Lower numbers are served first.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum Priority {
    High = 1,
    #[default]
    Medium = 2,
    Low = 3,
}

impl Priority {
    pub fn as_u8(self) -> u8 {
        self as u8
    }
}

impl TryFrom<u8> for Priority {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(Priority::High),
            2 => Ok(Priority::Medium),
            3 => Ok(Priority::Low),
            other => Err(format!("priority must be 1, 2 or 3 (got {})", other)),
        }
    }
}

impl From<Priority> for u8 {
    fn from(p: Priority) -> Self {
        p.as_u8()
    }
}

impl std::fmt::Display for Priority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_u8())
    }
}

/// Unified AI request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AIRequest {
    #[serde(default = "new_request_id")]
    pub request_id: String,
    pub user_id: String,
    pub operation: Operation,
    /// Operation payload. Usually a JSON object.
    #[serde(default)]
    pub data: serde_json::Value,
    /// User context attached by the engine (interaction history etc.).
    #[serde(default)]
    pub context: serde_json::Map<String, serde_json::Value>,
    #[serde(default)]
    pub preferences: serde_json::Map<String, serde_json::Value>,
    #[serde(default)]
    pub priority: Priority,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default = "default_true")]
    pub cache_enabled: bool,
    #[serde(default = "default_true")]
    pub batch_enabled: bool,
    #[serde(default = "Utc::now")]
    pub submitted_at: DateTime<Utc>,
}

fn new_request_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

fn default_timeout_ms() -> u64 {
    DEFAULT_TIMEOUT_MS
}

fn default_true() -> bool {
    true
}

impl AIRequest {
    pub fn new(user_id: impl Into<String>, operation: Operation, data: serde_json::Value) -> Self {
        Self {
            request_id: new_request_id(),
            user_id: user_id.into(),
            operation,
            data,
            context: serde_json::Map::new(),
            preferences: serde_json::Map::new(),
            priority: Priority::default(),
            timeout_ms: DEFAULT_TIMEOUT_MS,
            cache_enabled: true,
            batch_enabled: true,
            submitted_at: Utc::now(),
        }
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }

    pub fn without_cache(mut self) -> Self {
        self.cache_enabled = false;
        self
    }

    pub fn without_batching(mut self) -> Self {
        self.batch_enabled = false;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_defaults_from_json() {
        let json = r#"{"user_id": "u1", "operation": "debt_strategy"}"#;
        let req: AIRequest = serde_json::from_str(json).unwrap();
        assert_eq!(req.operation, Operation::DebtStrategy);
        assert_eq!(req.priority, Priority::Medium);
        assert_eq!(req.timeout_ms, DEFAULT_TIMEOUT_MS);
        assert!(req.cache_enabled);
        assert!(req.batch_enabled);
        assert!(!req.request_id.is_empty());
        assert!(req.data.is_null());
    }

    #[test]
    fn test_priority_serializes_as_number() {
        let json = serde_json::to_string(&Priority::High).unwrap();
        assert_eq!(json, "1");
        let parsed: Priority = serde_json::from_str("3").unwrap();
        assert_eq!(parsed, Priority::Low);
        assert!(serde_json::from_str::<Priority>("7").is_err());
    }

    #[test]
    fn test_builder_flags() {
        let req = AIRequest::new("u2", Operation::GoalPlanning, serde_json::json!({}))
            .with_priority(Priority::High)
            .with_timeout_ms(250)
            .without_cache()
            .without_batching();
        assert_eq!(req.priority, Priority::High);
        assert_eq!(req.timeout_ms, 250);
        assert!(!req.cache_enabled);
        assert!(!req.batch_enabled);
    }
}
