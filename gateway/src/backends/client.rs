//! Outbound calls to model endpoints.

use std::time::Duration;

use async_trait::async_trait;
use fininfer_common::{InferBatchRequest, InferBatchResponse, InferOutput, Operation};
use rand::Rng;
use reqwest::Client;
use serde_json::json;
use sha2::{Digest, Sha256};

use crate::balancer::BackendEndpoint;
use crate::cache::key::canonical_json;

#[derive(Debug, thiserror::Error)]
pub enum ModelClientError {
    #[error("HTTP request failed: {0}")]
    RequestFailed(String),
    #[error("Invalid response: {0}")]
    InvalidResponse(String),
    #[error("Endpoint error: {0}")]
    Endpoint(String),
    #[error("Expected {expected} outputs, got {got}")]
    CountMismatch { expected: usize, got: usize },
}

/// Sends one batched inference call to one endpoint.
///
/// Implementations return one output per item, in item order.
#[async_trait]
pub trait ModelClient: Send + Sync {
    async fn infer_batch(
        &self,
        endpoint: &BackendEndpoint,
        request: &InferBatchRequest,
    ) -> Result<Vec<InferOutput>, ModelClientError>;
}

/// JSON over HTTP: `POST {address}/v1/infer`.
pub struct HttpModelClient {
    http_client: Client,
}

impl HttpModelClient {
    pub fn new(timeout: Duration) -> Result<Self, reqwest::Error> {
        let http_client = Client::builder().timeout(timeout).build()?;
        Ok(Self { http_client })
    }
}

#[async_trait]
impl ModelClient for HttpModelClient {
    async fn infer_batch(
        &self,
        endpoint: &BackendEndpoint,
        request: &InferBatchRequest,
    ) -> Result<Vec<InferOutput>, ModelClientError> {
        let url = format!("{}/v1/infer", endpoint.address);
        tracing::debug!("Sending {} items to {}", request.items.len(), url);

        let response = self
            .http_client
            .post(&url)
            .json(request)
            .send()
            .await
            .map_err(|e| ModelClientError::RequestFailed(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(ModelClientError::Endpoint(format!("{}: {}", status, body)));
        }

        let body: InferBatchResponse = response
            .json()
            .await
            .map_err(|e| ModelClientError::InvalidResponse(e.to_string()))?;

        if body.outputs.len() != request.items.len() {
            return Err(ModelClientError::CountMismatch {
                expected: request.items.len(),
                got: body.outputs.len(),
            });
        }
        Ok(body.outputs)
    }
}

/// In-process stand-in for a model fleet.
pub struct SimulatedModelClient {
    failure_rate: f64,
    latency_scale: f64,
}

impl SimulatedModelClient {
    pub fn new(failure_rate: f64) -> Self {
        Self {
            failure_rate: failure_rate.clamp(0.0, 1.0),
            latency_scale: 1.0,
        }
    }

    /// Multiply simulated latencies by `scale` (0 disables sleeping).
    pub fn with_latency_scale(mut self, scale: f64) -> Self {
        self.latency_scale = scale.max(0.0);
        self
    }

    /// Base processing time of one call.
    pub fn base_latency(operation: Operation, agent: Option<&str>) -> Duration {
        if agent.is_some() {
            return Duration::from_millis(100);
        }
        let millis = match operation {
            Operation::BudgetOptimization => 150,
            Operation::PortfolioAnalysis => 200,
            Operation::DebtStrategy => 120,
            Operation::MarketIntelligence => 80,
            Operation::GoalPlanning => 180,
            Operation::FinancialAnalysis => 250,
        };
        Duration::from_millis(millis)
    }

    /// Confidence in `[0.85, 0.95)`, stable for a given payload.
    pub fn confidence_for(data: &serde_json::Value) -> f64 {
        let digest = Sha256::digest(canonical_json(data).as_bytes());
        let mut bytes = [0u8; 8];
        bytes.copy_from_slice(&digest[..8]);
        0.85 + (u64::from_be_bytes(bytes) % 100) as f64 / 1000.0
    }

    fn output(operation: Operation, agent: Option<&str>, data: &serde_json::Value) -> InferOutput {
        let confidence = Self::confidence_for(data);
        let source = agent.unwrap_or(operation.as_str());
        InferOutput {
            data: json!({
                "operation": operation,
                "result": format!("{}_analysis_result", source),
            }),
            confidence: Some(confidence),
            insights: vec![json!({
                "id": format!("insight_{}", operation),
                "title": format!("AI Insight for {}", operation),
                "description": format!("Analysis result with {:.2} confidence", confidence),
                "severity": "info",
            })],
            recommendations: vec![json!({
                "id": format!("rec_{}", operation),
                "title": format!("Recommendation for {}", operation),
                "impact_score": confidence * 10.0,
            })],
        }
    }
}

#[async_trait]
impl ModelClient for SimulatedModelClient {
    async fn infer_batch(
        &self,
        endpoint: &BackendEndpoint,
        request: &InferBatchRequest,
    ) -> Result<Vec<InferOutput>, ModelClientError> {
        let (fail, jitter) = {
            let mut rng = rand::thread_rng();
            (rng.gen_bool(self.failure_rate), rng.gen_range(0.9..1.1))
        };

        let base = Self::base_latency(request.operation, request.agent.as_deref());
        let delay = base.mul_f64(self.latency_scale * jitter);
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        if fail {
            return Err(ModelClientError::Endpoint(format!(
                "simulated failure on {}",
                endpoint.id
            )));
        }
        Ok(request
            .items
            .iter()
            .map(|item| Self::output(request.operation, request.agent.as_deref(), &item.data))
            .collect())
    }
}
