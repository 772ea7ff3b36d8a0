//! Fakes and fixtures shared by unit and integration tests.

pub mod mock_model;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use fininfer_common::BackendKind;
use parking_lot::Mutex;

use crate::compute::{BatchCompute, ComputeRequest, ComputeResult};
use crate::error::GatewayError;
use crate::store::{KvStore, StoreError};

pub fn sample_result(confidence: f64) -> ComputeResult {
    ComputeResult {
        data: serde_json::json!({"summary": "ok"}),
        insights: vec![serde_json::json!("spending is stable")],
        recommendations: vec![],
        confidence: Some(confidence),
        endpoint_id: "test-endpoint".to_string(),
        backend: BackendKind::SingleModel,
        processing_ms: 5,
        batch_size: 1,
        agent_trace: vec![],
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mode {
    Ok,
    Fail,
    ShortByOne,
}

/// Compute fake that records every batch it receives.
pub struct CountingCompute {
    mode: Mode,
    batches: Mutex<Vec<Vec<ComputeRequest>>>,
}

impl Default for CountingCompute {
    fn default() -> Self {
        Self::with_mode(Mode::Ok)
    }
}

impl CountingCompute {
    fn with_mode(mode: Mode) -> Self {
        Self {
            mode,
            batches: Mutex::new(Vec::new()),
        }
    }

    /// Every batch fails with `BatchCompute`.
    pub fn failing() -> Self {
        Self::with_mode(Mode::Fail)
    }

    /// Every batch returns one result too few.
    pub fn short_by_one() -> Self {
        Self::with_mode(Mode::ShortByOne)
    }

    pub fn calls(&self) -> usize {
        self.batches.lock().len()
    }

    pub fn batch_sizes(&self) -> Vec<usize> {
        self.batches.lock().iter().map(Vec::len).collect()
    }

    /// User of the first request of each batch.
    pub fn first_users(&self) -> Vec<String> {
        self.batches
            .lock()
            .iter()
            .filter_map(|b| b.first().map(|r| r.user_id.clone()))
            .collect()
    }
}

#[async_trait]
impl BatchCompute for CountingCompute {
    async fn compute_batch(&self, requests: Vec<ComputeRequest>) -> Result<Vec<ComputeResult>, GatewayError> {
        let size = requests.len();
        let results: Vec<ComputeResult> = requests
            .iter()
            .map(|r| ComputeResult {
                data: serde_json::json!({"user_id": r.user_id, "operation": r.operation}),
                backend: r.backend,
                batch_size: size,
                ..sample_result(0.9)
            })
            .collect();
        self.batches.lock().push(requests);
        match self.mode {
            Mode::Ok => Ok(results),
            Mode::Fail => Err(GatewayError::BatchCompute("model unavailable".to_string())),
            Mode::ShortByOne => Ok(results.into_iter().skip(1).collect()),
        }
    }
}

/// Store whose every command fails.
pub struct FailingStore;

#[async_trait]
impl KvStore for FailingStore {
    async fn get(&self, _key: &str) -> Result<Option<String>, StoreError> {
        Err(StoreError::Connection("store offline".into()))
    }
    async fn set_ex(&self, _key: &str, _value: &str, _ttl_secs: u64) -> Result<(), StoreError> {
        Err(StoreError::Connection("store offline".into()))
    }
    async fn mget(&self, _keys: &[String]) -> Result<Vec<Option<String>>, StoreError> {
        Err(StoreError::Connection("store offline".into()))
    }
    async fn del(&self, _keys: &[String]) -> Result<u64, StoreError> {
        Err(StoreError::Connection("store offline".into()))
    }
    async fn exists(&self, _key: &str) -> Result<bool, StoreError> {
        Err(StoreError::Connection("store offline".into()))
    }
    async fn sadd(&self, _key: &str, _member: &str) -> Result<(), StoreError> {
        Err(StoreError::Connection("store offline".into()))
    }
    async fn srem(&self, _key: &str, _member: &str) -> Result<(), StoreError> {
        Err(StoreError::Connection("store offline".into()))
    }
    async fn smembers(&self, _key: &str) -> Result<Vec<String>, StoreError> {
        Err(StoreError::Connection("store offline".into()))
    }
    async fn expire(&self, _key: &str, _ttl_secs: u64) -> Result<bool, StoreError> {
        Err(StoreError::Connection("store offline".into()))
    }
    async fn hincr_by(&self, _key: &str, _field: &str, _delta: i64) -> Result<i64, StoreError> {
        Err(StoreError::Connection("store offline".into()))
    }
    async fn hset(&self, _key: &str, _field: &str, _value: &str) -> Result<(), StoreError> {
        Err(StoreError::Connection("store offline".into()))
    }
    async fn hgetall(&self, _key: &str) -> Result<HashMap<String, String>, StoreError> {
        Err(StoreError::Connection("store offline".into()))
    }
    async fn ping(&self) -> Result<(), StoreError> {
        Err(StoreError::Connection("store offline".into()))
    }
}

/// Shorthand for an `Arc<dyn BatchCompute>` counting fake.
pub fn counting_compute() -> (Arc<CountingCompute>, Arc<dyn BatchCompute>) {
    let compute = Arc::new(CountingCompute::default());
    let dynamic: Arc<dyn BatchCompute> = compute.clone();
    (compute, dynamic)
}
