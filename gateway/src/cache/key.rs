//! Deterministic keys for cache entries and coalescing groups.

use fininfer_common::Operation;
use serde_json::Value;
use sha2::{Digest, Sha256};

/// Payload fields that do not affect what a computation returns.
const PATTERN_EXCLUDED_FIELDS: [&str; 3] = ["user_id", "timestamp", "request_id"];

/// Serialize a JSON value with object keys sorted at every depth and no
/// insignificant whitespace.
pub fn canonical_json(value: &Value) -> String {
    let mut out = String::new();
    write_canonical(value, &mut out);
    out
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&Value::String(key.clone()).to_string());
                out.push(':');
                write_canonical(&map[key], out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        other => out.push_str(&other.to_string()),
    }
}

/// First 16 hex chars of the SHA-256 of `input`.
pub fn short_hash(input: &str) -> String {
    let digest = Sha256::digest(input.as_bytes());
    let mut hex = hex::encode(digest);
    hex.truncate(16);
    hex
}

/// `ai_inference:{operation}:{user}:{hash}`
pub fn cache_key(operation: Operation, user_id: &str, payload: &Value) -> String {
    format!(
        "ai_inference:{}:{}:{}",
        operation,
        user_id,
        short_hash(&canonical_json(payload))
    )
}

/// Fingerprint of a payload with per-request fields removed.
pub fn batch_pattern(payload: &Value) -> String {
    let pattern = match payload {
        Value::Object(map) => Value::Object(
            map.iter()
                .filter(|(k, _)| !PATTERN_EXCLUDED_FIELDS.contains(&k.as_str()))
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        ),
        other => other.clone(),
    };
    short_hash(&canonical_json(&pattern))
}

/// `ai_batch:{operation}:{pattern}`
pub fn coalesce_key(operation: Operation, payload: &Value) -> String {
    format!("ai_batch:{}:{}", operation, batch_pattern(payload))
}

pub fn dependency_key(tag: &str) -> String {
    format!("cache_deps:{}", tag)
}

pub fn access_stats_key(cache_key: &str) -> String {
    format!("cache_stats:{}", cache_key)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_canonical_json_sorts_nested_keys() {
        let value = json!({"b": 1, "a": {"z": [3, {"y": 1, "x": 2}], "c": null}});
        assert_eq!(
            canonical_json(&value),
            r#"{"a":{"c":null,"z":[3,{"x":2,"y":1}]},"b":1}"#
        );
    }

    #[test]
    fn test_cache_key_ignores_field_order() {
        let a: Value = serde_json::from_str(r#"{"income": 5000, "categories": {"rent": 1500, "food": 400}}"#).unwrap();
        let b: Value = serde_json::from_str(r#"{"categories": {"food": 400, "rent": 1500}, "income": 5000}"#).unwrap();
        let key_a = cache_key(Operation::BudgetOptimization, "u1", &a);
        let key_b = cache_key(Operation::BudgetOptimization, "u1", &b);
        assert_eq!(key_a, key_b);
        assert!(key_a.starts_with("ai_inference:budget_optimization:u1:"));
        assert_eq!(key_a.rsplit(':').next().unwrap().len(), 16);
    }

    #[test]
    fn test_cache_key_differs_per_user_and_payload() {
        let payload = json!({"income": 5000});
        let base = cache_key(Operation::BudgetOptimization, "u1", &payload);
        assert_ne!(base, cache_key(Operation::BudgetOptimization, "u2", &payload));
        assert_ne!(base, cache_key(Operation::BudgetOptimization, "u1", &json!({"income": 5001})));
        assert_ne!(base, cache_key(Operation::DebtStrategy, "u1", &payload));
    }

    #[test]
    fn test_batch_pattern_strips_request_fields() {
        let a = json!({"user_id": "u1", "timestamp": 1, "request_id": "r1", "time_period": "monthly"});
        let b = json!({"user_id": "u2", "timestamp": 2, "request_id": "r2", "time_period": "monthly"});
        assert_eq!(batch_pattern(&a), batch_pattern(&b));
        assert_ne!(batch_pattern(&a), batch_pattern(&json!({"time_period": "weekly"})));
        assert_eq!(
            coalesce_key(Operation::PortfolioAnalysis, &a),
            format!("ai_batch:portfolio_analysis:{}", batch_pattern(&a))
        );
    }
}
