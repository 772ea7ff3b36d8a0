//! Per-user context kept between requests.

use std::sync::Arc;

use chrono::Utc;
use fininfer_common::{AIRequest, AIResponse};
use serde_json::{json, Map, Value};

use crate::store::KvStore;

fn context_key(user_id: &str) -> String {
    format!("ai_context:{}", user_id)
}

/// Loads and updates `ai_context:{user}` documents.
///
/// Store failures are logged and treated as an empty context.
pub struct ContextManager {
    store: Arc<dyn KvStore>,
    ttl_secs: u64,
    history: usize,
}

impl ContextManager {
    pub fn new(store: Arc<dyn KvStore>, ttl_secs: u64, history: usize) -> Self {
        Self {
            store,
            ttl_secs,
            history: history.max(1),
        }
    }

    pub async fn load(&self, user_id: &str) -> Map<String, Value> {
        match self.store.get(&context_key(user_id)).await {
            Ok(Some(raw)) => match serde_json::from_str::<Value>(&raw) {
                Ok(Value::Object(map)) => map,
                Ok(_) | Err(_) => {
                    tracing::warn!("Discarding malformed context for user {}", user_id);
                    Map::new()
                }
            },
            Ok(None) => Map::new(),
            Err(e) => {
                tracing::error!("Error loading context for user {}: {}", user_id, e);
                Map::new()
            }
        }
    }

    /// Add stored context to the request. Keys the caller sent win.
    pub fn enrich(request: &mut AIRequest, stored: Map<String, Value>) {
        for (key, value) in stored {
            request.context.entry(key).or_insert(value);
        }
    }

    /// Append this interaction to the user's history and refresh the TTL.
    pub async fn record(&self, request: &AIRequest, response: &AIResponse) {
        let mut context = self.load(&request.user_id).await;
        let mut interactions = match context.remove("interactions") {
            Some(Value::Array(items)) => items,
            _ => Vec::new(),
        };
        interactions.push(json!({
            "request_id": request.request_id,
            "operation": request.operation,
            "timestamp": Utc::now().to_rfc3339(),
            "success": response.success,
            "confidence": response.confidence,
        }));
        if interactions.len() > self.history {
            interactions.drain(..interactions.len() - self.history);
        }
        context.insert("user_id".to_string(), json!(request.user_id));
        context.insert("interactions".to_string(), Value::Array(interactions));
        context.insert("last_updated".to_string(), json!(Utc::now().to_rfc3339()));

        let body = Value::Object(context).to_string();
        if let Err(e) = self
            .store
            .set_ex(&context_key(&request.user_id), &body, self.ttl_secs)
            .await
        {
            tracing::error!("Error updating context for user {}: {}", request.user_id, e);
        }
    }
}
