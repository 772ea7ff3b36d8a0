//! Adaptive inference cache.
//!
//! Results are stored under content-addressed keys with a TTL derived from
//! the operation and the result's confidence. Entries of operations with
//! user-scoped dependencies are registered under invalidation tags, so an
//! external mutation event can evict them in one call.
//!
//! The cache also offers a coalescing compute path: concurrent misses with
//! the same operation and payload pattern share a single compute call.

pub mod key;
pub mod policy;
pub mod warmer;

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use fininfer_common::Operation;
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::oneshot;

use crate::compute::{BatchCompute, ComputeRequest, ComputeResult};
use crate::error::GatewayError;
use crate::metrics::GatewayMetrics;
use crate::store::KvStore;

pub use policy::{adaptive_ttl, dependency_tags, CachePolicy, InvalidationStrategy};
pub use warmer::CacheWarmer;

type ResultSender = oneshot::Sender<Result<ComputeResult, GatewayError>>;

struct PendingCompute {
    request: ComputeRequest,
    tx: ResultSender,
}

#[derive(Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
    errors: AtomicU64,
    writes: AtomicU64,
    invalidations: AtomicU64,
}

/// Result of a lookup-or-compute call.
#[derive(Debug, Clone)]
pub struct Lookup {
    pub result: ComputeResult,
    pub cache_hit: bool,
}

/// Snapshot of cache activity.
#[derive(Debug, Clone, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub errors: u64,
    pub writes: u64,
    pub invalidations: u64,
    pub hit_rate: f64,
    pub pending_groups: usize,
    pub policies: Vec<CachePolicy>,
}

/// Inference result cache over a [`KvStore`].
///
/// Cloning is cheap; clones share the store, counters and pending groups.
/// Store failures never reach the caller: a failed read is a miss and a
/// failed write is logged.
#[derive(Clone)]
pub struct InferenceCache {
    store: Arc<dyn KvStore>,
    metrics: Arc<GatewayMetrics>,
    pending: Arc<Mutex<HashMap<String, Vec<PendingCompute>>>>,
    counters: Arc<Counters>,
}

impl InferenceCache {
    pub fn new(store: Arc<dyn KvStore>, metrics: Arc<GatewayMetrics>) -> Self {
        Self {
            store,
            metrics,
            pending: Arc::new(Mutex::new(HashMap::new())),
            counters: Arc::new(Counters::default()),
        }
    }

    pub fn store(&self) -> &Arc<dyn KvStore> {
        &self.store
    }

    /// Look up a cached result.
    pub async fn get(&self, operation: Operation, user_id: &str, payload: &Value) -> Option<ComputeResult> {
        let cache_key = key::cache_key(operation, user_id, payload);
        let started = Instant::now();
        let raw = self.store.get(&cache_key).await;
        self.observe("get", started);

        let raw = match raw {
            Ok(Some(raw)) => raw,
            Ok(None) => {
                self.record_miss(operation);
                return None;
            }
            Err(e) => {
                tracing::error!("Cache get error for {}: {}", cache_key, e);
                self.record_error(operation);
                return None;
            }
        };

        match serde_json::from_str::<ComputeResult>(&raw) {
            Ok(result) => {
                self.counters.hits.fetch_add(1, Ordering::Relaxed);
                self.metrics
                    .cache_requests
                    .with_label_values(&[operation.as_str(), "hit"])
                    .inc();
                tracing::debug!("Cache hit for {} - key: {}", operation, cache_key);
                self.update_access_stats(&cache_key).await;
                Some(result)
            }
            Err(e) => {
                tracing::error!("Discarding undecodable cache entry {}: {}", cache_key, e);
                self.record_error(operation);
                None
            }
        }
    }

    /// Store a result. Returns whether the write succeeded.
    pub async fn put(&self, operation: Operation, user_id: &str, payload: &Value, result: &ComputeResult) -> bool {
        let cache_key = key::cache_key(operation, user_id, payload);
        let serialized = match serde_json::to_string(result) {
            Ok(s) => s,
            Err(e) => {
                tracing::error!("Cache serialize error for {}: {}", cache_key, e);
                return false;
            }
        };
        let ttl = adaptive_ttl(operation, result.confidence);

        let started = Instant::now();
        let written = self.store.set_ex(&cache_key, &serialized, ttl).await;
        self.observe("set", started);
        if let Err(e) = written {
            tracing::error!("Cache set error for {}: {}", cache_key, e);
            self.counters.errors.fetch_add(1, Ordering::Relaxed);
            return false;
        }

        self.counters.writes.fetch_add(1, Ordering::Relaxed);
        self.metrics.cache_writes.inc();

        // Adaptive operations are tagged as well.
        if CachePolicy::for_operation(operation).strategy != InvalidationStrategy::Ttl {
            self.register_dependencies(&cache_key, operation, user_id).await;
        }

        tracing::debug!("Cached {} result - key: {}, ttl: {}s", operation, cache_key, ttl);
        true
    }

    /// Look up several entries with one round-trip. Results are in request order.
    pub async fn get_many(&self, requests: &[(Operation, &str, &Value)]) -> Vec<Option<ComputeResult>> {
        if requests.is_empty() {
            return vec![];
        }
        let keys: Vec<String> = requests
            .iter()
            .map(|(op, user, payload)| key::cache_key(*op, user, payload))
            .collect();

        let started = Instant::now();
        let values = self.store.mget(&keys).await;
        self.observe("batch_get", started);

        let values = match values {
            Ok(values) => values,
            Err(e) => {
                tracing::error!("Batch cache get error: {}", e);
                for (op, _, _) in requests {
                    self.record_error(*op);
                }
                return vec![None; requests.len()];
            }
        };

        requests
            .iter()
            .zip(values)
            .map(|((op, _, _), raw)| {
                match raw.and_then(|raw| serde_json::from_str::<ComputeResult>(&raw).ok()) {
                    Some(result) => {
                        self.counters.hits.fetch_add(1, Ordering::Relaxed);
                        self.metrics.cache_requests.with_label_values(&[op.as_str(), "hit"]).inc();
                        Some(result)
                    }
                    None => {
                        self.record_miss(*op);
                        None
                    }
                }
            })
            .collect()
    }

    /// Return a cached result, or compute one.
    ///
    /// Batch-compatible operations join a pending group keyed by operation
    /// and payload pattern; the group is computed once after `window` and
    /// each member's result is cached under its own key. Other operations
    /// compute immediately.
    pub async fn get_or_compute_batched(
        &self,
        request: ComputeRequest,
        compute: Arc<dyn BatchCompute>,
        window: Duration,
    ) -> Result<Lookup, GatewayError> {
        if let Some(result) = self.get(request.operation, &request.user_id, &request.data).await {
            return Ok(Lookup {
                result,
                cache_hit: true,
            });
        }

        if !CachePolicy::for_operation(request.operation).batch_compatible {
            let operation = request.operation;
            let user_id = request.user_id.clone();
            let payload = request.data.clone();
            let mut results = compute.compute_batch(vec![request]).await?;
            let result = results
                .pop()
                .filter(|_| results.is_empty())
                .ok_or_else(|| GatewayError::BatchCompute("expected exactly one result".to_string()))?;
            self.put(operation, &user_id, &payload, &result).await;
            return Ok(Lookup {
                result,
                cache_hit: false,
            });
        }

        let group_key = key::coalesce_key(request.operation, &request.data);
        let (tx, rx) = oneshot::channel();
        let first = {
            let mut pending = self.pending.lock();
            let group = pending.entry(group_key.clone()).or_default();
            group.push(PendingCompute { request, tx });
            group.len() == 1
        };

        if first {
            let this = self.clone();
            tokio::spawn(async move {
                tokio::time::sleep(window).await;
                this.flush_group(&group_key, compute).await;
            });
        }

        let result = rx
            .await
            .map_err(|_| GatewayError::BatchCompute("coalesced group dropped".to_string()))??;
        Ok(Lookup {
            result,
            cache_hit: false,
        })
    }

    async fn flush_group(&self, group_key: &str, compute: Arc<dyn BatchCompute>) {
        let Some(group) = self.pending.lock().remove(group_key) else {
            return;
        };
        let (requests, senders): (Vec<_>, Vec<_>) = group
            .into_iter()
            .filter(|p| !p.tx.is_closed())
            .map(|p| (p.request, p.tx))
            .unzip();
        if requests.is_empty() {
            return;
        }

        self.metrics.batch_size.observe(requests.len() as f64);
        tracing::info!("Executing coalesced group of {} requests for {}", requests.len(), group_key);

        let expected = requests.len();
        let keys: Vec<(Operation, String, Value)> = requests
            .iter()
            .map(|r| (r.operation, r.user_id.clone(), r.data.clone()))
            .collect();

        match compute.compute_batch(requests).await {
            Ok(results) if results.len() == expected => {
                for ((tx, result), (op, user_id, payload)) in senders.into_iter().zip(results).zip(keys) {
                    self.put(op, &user_id, &payload, &result).await;
                    let _ = tx.send(Ok(result));
                }
            }
            Ok(results) => {
                let err = GatewayError::BatchCompute(format!(
                    "compute returned {} results for {} requests",
                    results.len(),
                    expected
                ));
                tracing::error!("Coalesced group {} failed: {}", group_key, err);
                for tx in senders {
                    let _ = tx.send(Err(err.clone()));
                }
            }
            Err(err) => {
                tracing::error!("Coalesced group {} failed: {}", group_key, err);
                for tx in senders {
                    let _ = tx.send(Err(err.clone()));
                }
            }
        }
    }

    /// Evict every entry registered under `tag`. Returns the number of entries removed.
    pub async fn invalidate_tag(&self, tag: &str) -> Result<u64, GatewayError> {
        let set_key = key::dependency_key(tag);
        let members = self.store.smembers(&set_key).await?;
        if members.is_empty() {
            return Ok(0);
        }
        let mut keys = members;
        keys.push(set_key);
        let removed = self.store.del(&keys).await?;
        let invalidated = removed.saturating_sub(1);

        self.counters.invalidations.fetch_add(invalidated, Ordering::Relaxed);
        self.metrics.cache_invalidations.inc_by(invalidated);
        tracing::info!("Invalidated {} cache entries for tag: {}", invalidated, tag);
        Ok(invalidated)
    }

    /// Whether an entry exists for the request.
    pub async fn contains(&self, operation: Operation, user_id: &str, payload: &Value) -> bool {
        let cache_key = key::cache_key(operation, user_id, payload);
        self.store.exists(&cache_key).await.unwrap_or(false)
    }

    pub fn stats(&self) -> CacheStats {
        let hits = self.counters.hits.load(Ordering::Relaxed);
        let misses = self.counters.misses.load(Ordering::Relaxed);
        let lookups = hits + misses;
        CacheStats {
            hits,
            misses,
            errors: self.counters.errors.load(Ordering::Relaxed),
            writes: self.counters.writes.load(Ordering::Relaxed),
            invalidations: self.counters.invalidations.load(Ordering::Relaxed),
            hit_rate: if lookups == 0 { 0.0 } else { hits as f64 / lookups as f64 },
            pending_groups: self.pending.lock().len(),
            policies: CachePolicy::all(),
        }
    }

    async fn register_dependencies(&self, cache_key: &str, operation: Operation, user_id: &str) {
        for tag in dependency_tags(operation, user_id) {
            let set_key = key::dependency_key(&tag);
            if let Err(e) = self.store.sadd(&set_key, cache_key).await {
                tracing::error!("Failed to register {} under {}: {}", cache_key, set_key, e);
                continue;
            }
            if let Err(e) = self.store.expire(&set_key, policy::DEPENDENCY_TTL_SECS).await {
                tracing::error!("Failed to set expiry on {}: {}", set_key, e);
            }
        }
    }

    async fn update_access_stats(&self, cache_key: &str) {
        let stats_key = key::access_stats_key(cache_key);
        let now = chrono::Utc::now().timestamp().to_string();
        let outcome = async {
            self.store.hincr_by(&stats_key, "access_count", 1).await?;
            self.store.hset(&stats_key, "last_accessed", &now).await?;
            self.store.expire(&stats_key, policy::ACCESS_STATS_TTL_SECS).await?;
            Ok::<_, crate::store::StoreError>(())
        }
        .await;
        if let Err(e) = outcome {
            tracing::warn!("Failed to update access stats for {}: {}", cache_key, e);
        }
    }

    fn record_miss(&self, operation: Operation) {
        self.counters.misses.fetch_add(1, Ordering::Relaxed);
        self.metrics
            .cache_requests
            .with_label_values(&[operation.as_str(), "miss"])
            .inc();
    }

    fn record_error(&self, operation: Operation) {
        self.counters.errors.fetch_add(1, Ordering::Relaxed);
        self.record_miss(operation);
    }

    fn observe(&self, op: &str, started: Instant) {
        self.metrics
            .cache_operation_seconds
            .with_label_values(&[op])
            .observe(started.elapsed().as_secs_f64());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use crate::test_util::{sample_result, CountingCompute, FailingStore};
    use fininfer_common::BackendKind;
    use serde_json::json;

    fn cache_with_store() -> (InferenceCache, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        let metrics = Arc::new(GatewayMetrics::new().unwrap());
        (InferenceCache::new(store.clone(), metrics), store)
    }

    #[tokio::test]
    async fn test_put_then_get() {
        let (cache, _) = cache_with_store();
        let payload = json!({"income": 5000, "expenses": {"rent": 1500}});
        assert!(cache.get(Operation::DebtStrategy, "u1", &payload).await.is_none());

        let result = sample_result(0.92);
        assert!(cache.put(Operation::DebtStrategy, "u1", &payload, &result).await);

        let reordered: Value = serde_json::from_str(r#"{"expenses": {"rent": 1500}, "income": 5000}"#).unwrap();
        let hit = cache.get(Operation::DebtStrategy, "u1", &reordered).await;
        assert_eq!(hit, Some(result));

        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.writes, 1);
    }

    #[tokio::test]
    async fn test_put_uses_adaptive_ttl() {
        let (cache, store) = cache_with_store();
        let payload = json!({"symbols": ["SPY"]});
        cache
            .put(Operation::MarketIntelligence, "u1", &payload, &sample_result(0.95))
            .await;
        let ttl = store
            .ttl(&key::cache_key(Operation::MarketIntelligence, "u1", &payload))
            .await
            .unwrap();
        assert!(ttl <= Duration::from_secs(60));
        assert!(ttl > Duration::from_secs(55));
    }

    #[tokio::test]
    async fn test_hit_updates_access_stats() {
        let (cache, store) = cache_with_store();
        let payload = json!({"a": 1});
        cache.put(Operation::DebtStrategy, "u1", &payload, &sample_result(0.8)).await;
        cache.get(Operation::DebtStrategy, "u1", &payload).await;
        cache.get(Operation::DebtStrategy, "u1", &payload).await;

        let stats_key = key::access_stats_key(&key::cache_key(Operation::DebtStrategy, "u1", &payload));
        let stats = store.hgetall(&stats_key).await.unwrap();
        assert_eq!(stats.get("access_count").map(String::as_str), Some("2"));
        assert!(stats.contains_key("last_accessed"));
    }

    #[tokio::test]
    async fn test_invalidate_tag_removes_dependent_entries() {
        let (cache, store) = cache_with_store();
        let march = json!({"month": "2024-03"});
        let april = json!({"month": "2024-04"});
        cache.put(Operation::BudgetOptimization, "u1", &march, &sample_result(0.9)).await;
        cache.put(Operation::BudgetOptimization, "u1", &april, &sample_result(0.9)).await;
        cache.put(Operation::BudgetOptimization, "u2", &march, &sample_result(0.9)).await;

        let removed = cache.invalidate_tag("user_budget:u1").await.unwrap();
        assert_eq!(removed, 2);
        assert!(cache.get(Operation::BudgetOptimization, "u1", &march).await.is_none());
        assert!(cache.get(Operation::BudgetOptimization, "u2", &march).await.is_some());
        assert!(!store.exists("cache_deps:user_budget:u1").await.unwrap());

        assert_eq!(cache.invalidate_tag("user_budget:u1").await.unwrap(), 0);
        assert_eq!(cache.stats().invalidations, 2);
    }

    #[tokio::test]
    async fn test_adaptive_entries_are_tagged() {
        let (cache, store) = cache_with_store();
        let payload = json!({"scope": "full"});
        cache.put(Operation::FinancialAnalysis, "u1", &payload, &sample_result(0.9)).await;
        cache.put(Operation::DebtStrategy, "u1", &payload, &sample_result(0.9)).await;

        assert_eq!(cache.invalidate_tag("user_accounts:u1").await.unwrap(), 1);
        assert!(cache.get(Operation::FinancialAnalysis, "u1", &payload).await.is_none());
        assert!(cache.get(Operation::DebtStrategy, "u1", &payload).await.is_some());
        assert!(store.exists("cache_deps:user_data:u1").await.unwrap());
    }

    #[tokio::test]
    async fn test_ttl_strategy_registers_no_dependencies() {
        let (cache, store) = cache_with_store();
        cache.put(Operation::DebtStrategy, "u1", &json!({}), &sample_result(0.9)).await;
        // Only the entry itself.
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn test_store_failure_degrades_to_miss() {
        let metrics = Arc::new(GatewayMetrics::new().unwrap());
        let cache = InferenceCache::new(Arc::new(FailingStore), metrics);
        let payload = json!({"a": 1});
        assert!(cache.get(Operation::GoalPlanning, "u1", &payload).await.is_none());
        assert!(!cache.put(Operation::GoalPlanning, "u1", &payload, &sample_result(0.9)).await);
        assert_eq!(cache.get_many(&[(Operation::GoalPlanning, "u1", &payload)]).await, vec![None]);
        assert_eq!(cache.stats().errors, 3);
    }

    #[tokio::test]
    async fn test_get_many_preserves_order() {
        let (cache, _) = cache_with_store();
        let a = json!({"a": 1});
        let b = json!({"b": 2});
        cache.put(Operation::DebtStrategy, "u1", &b, &sample_result(0.8)).await;
        let results = cache
            .get_many(&[(Operation::DebtStrategy, "u1", &a), (Operation::DebtStrategy, "u1", &b)])
            .await;
        assert!(results[0].is_none());
        assert!(results[1].is_some());
    }

    #[tokio::test]
    async fn test_coalesced_group_computes_once() {
        let (cache, _) = cache_with_store();
        let compute = Arc::new(CountingCompute::default());

        let mut handles = Vec::new();
        for user in ["u1", "u2", "u3"] {
            let cache = cache.clone();
            let compute: Arc<dyn BatchCompute> = compute.clone();
            let request = ComputeRequest::new(
                user,
                Operation::PortfolioAnalysis,
                json!({"user_id": user, "analysis_depth": "standard"}),
                BackendKind::SingleModel,
            );
            handles.push(tokio::spawn(async move {
                cache
                    .get_or_compute_batched(request, compute, Duration::from_millis(20))
                    .await
            }));
        }

        for handle in handles {
            let lookup = handle.await.unwrap().unwrap();
            assert!(!lookup.cache_hit);
            assert_eq!(lookup.result.batch_size, 3);
        }
        assert_eq!(compute.calls(), 1);

        // Each member was cached under its own key.
        let again = cache
            .get_or_compute_batched(
                ComputeRequest::new(
                    "u2",
                    Operation::PortfolioAnalysis,
                    json!({"user_id": "u2", "analysis_depth": "standard"}),
                    BackendKind::SingleModel,
                ),
                compute.clone(),
                Duration::from_millis(20),
            )
            .await
            .unwrap();
        assert!(again.cache_hit);
        assert_eq!(compute.calls(), 1);
    }

    #[tokio::test]
    async fn test_non_batchable_operation_computes_immediately() {
        let (cache, _) = cache_with_store();
        let compute = Arc::new(CountingCompute::default());
        let lookup = cache
            .get_or_compute_batched(
                ComputeRequest::new("u1", Operation::DebtStrategy, json!({"debts": []}), BackendKind::SingleModel),
                compute.clone(),
                Duration::from_secs(10),
            )
            .await
            .unwrap();
        assert_eq!(lookup.result.batch_size, 1);
        assert_eq!(compute.calls(), 1);
        assert_eq!(cache.stats().pending_groups, 0);
    }

    #[tokio::test]
    async fn test_coalesced_group_shares_error() {
        let (cache, _) = cache_with_store();
        let compute = Arc::new(CountingCompute::failing());
        let lookup = cache
            .get_or_compute_batched(
                ComputeRequest::new("u1", Operation::MarketIntelligence, json!({}), BackendKind::SingleModel),
                compute,
                Duration::from_millis(5),
            )
            .await;
        assert!(matches!(lookup, Err(GatewayError::BatchCompute(_))));
    }
}
