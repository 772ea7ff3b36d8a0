//! Supervisor-coordinated specialist agents.

use std::sync::Arc;

use async_trait::async_trait;
use fininfer_common::{
    BackendCapabilities, BackendKind, InferBatchRequest, InferItem, InferOutput, Operation,
    PerformanceMetrics,
};
use futures_util::future::join_all;
use serde_json::{json, Map, Value};
use tokio::time::Instant;

use super::{mean_confidence, pool_available, pool_utilization, InferenceBackend, ModelClient, RollingStats};
use crate::balancer::{BackendEndpoint, LoadBalancer};
use crate::compute::{ComputeRequest, ComputeResult};
use crate::error::GatewayError;

pub const ALL_AGENTS: [&str; 5] = ["budget_agent", "investment_agent", "debt_agent", "market_agent", "goal_agent"];

/// Specialist agents the supervisor consults for an operation.
pub fn agents_for(operation: Operation) -> &'static [&'static str] {
    match operation {
        Operation::BudgetOptimization => &["budget_agent"],
        Operation::PortfolioAnalysis => &["investment_agent"],
        Operation::DebtStrategy => &["debt_agent"],
        Operation::MarketIntelligence => &["market_agent"],
        Operation::GoalPlanning => &["goal_agent"],
        Operation::FinancialAnalysis => &["budget_agent", "investment_agent"],
    }
}

struct AgentOutcome {
    agent: &'static str,
    endpoint_id: String,
    outputs: Vec<InferOutput>,
}

/// Runs each required agent's batched call in parallel, each on the endpoint
/// pool named after the agent, and merges the outputs per item.
///
/// The batch fails only when every agent fails.
pub struct CoordinatedAgentBackend {
    balancer: Arc<LoadBalancer>,
    client: Arc<dyn ModelClient>,
    stats: RollingStats,
}

impl CoordinatedAgentBackend {
    pub fn new(balancer: Arc<LoadBalancer>, client: Arc<dyn ModelClient>) -> Self {
        Self {
            balancer,
            client,
            stats: RollingStats::default(),
        }
    }

    fn agent_endpoints(&self) -> Vec<Arc<BackendEndpoint>> {
        ALL_AGENTS
            .iter()
            .flat_map(|agent| self.balancer.pool(Some(*agent)))
            .collect()
    }

    async fn run_agent(
        &self,
        agent: &'static str,
        operation: Operation,
        items: &[InferItem],
    ) -> Result<AgentOutcome, GatewayError> {
        let mut endpoint = self.balancer.lease(Some(agent), Some(operation))?;
        let call = InferBatchRequest {
            operation,
            agent: Some(agent.to_string()),
            items: items.to_vec(),
        };
        let outcome = self.client.infer_batch(&endpoint, &call).await;
        endpoint.finish(outcome.is_ok());

        match outcome {
            Ok(outputs) => Ok(AgentOutcome {
                agent,
                endpoint_id: endpoint.id.clone(),
                outputs,
            }),
            Err(e) => Err(GatewayError::Backend {
                backend: BackendKind::CoordinatedAgents.to_string(),
                endpoint: endpoint.id.clone(),
                message: format!("{}: {}", agent, e),
            }),
        }
    }

    fn aggregate(outcomes: &[AgentOutcome], index: usize) -> (Value, Option<f64>, Vec<Value>, Vec<Value>) {
        let mut per_agent = Map::new();
        let mut confidences = Vec::new();
        let mut insights = Vec::new();
        let mut recommendations = Vec::new();
        for outcome in outcomes {
            let output = &outcome.outputs[index];
            per_agent.insert(outcome.agent.to_string(), output.data.clone());
            confidences.extend(output.confidence);
            insights.extend(output.insights.iter().cloned());
            recommendations.extend(output.recommendations.iter().cloned());
        }
        let data = json!({
            "aggregated_results": per_agent,
            "coordination_strategy": "parallel_execution",
            "agents_used": outcomes.iter().map(|o| o.agent).collect::<Vec<_>>(),
        });
        let confidence = if confidences.is_empty() {
            None
        } else {
            Some(confidences.iter().sum::<f64>() / confidences.len() as f64)
        };
        (data, confidence, insights, recommendations)
    }
}

#[async_trait]
impl InferenceBackend for CoordinatedAgentBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::CoordinatedAgents
    }

    async fn execute_batch(&self, requests: &[ComputeRequest]) -> Result<Vec<ComputeResult>, GatewayError> {
        let Some(first) = requests.first() else {
            return Ok(vec![]);
        };
        let operation = first.operation;
        let agents = agents_for(operation);
        let items: Vec<InferItem> = requests.iter().map(ComputeRequest::to_item).collect();

        let start = Instant::now();
        let calls = agents.iter().map(|agent| self.run_agent(*agent, operation, &items));
        let mut outcomes = Vec::new();
        let mut first_error = None;
        for result in join_all(calls).await {
            match result {
                Ok(outcome) if outcome.outputs.len() == items.len() => outcomes.push(outcome),
                Ok(outcome) => {
                    tracing::error!(
                        "Agent {} returned {} outputs for {} items",
                        outcome.agent,
                        outcome.outputs.len(),
                        items.len()
                    );
                    first_error.get_or_insert(GatewayError::Backend {
                        backend: BackendKind::CoordinatedAgents.to_string(),
                        endpoint: outcome.endpoint_id,
                        message: format!("{} returned a partial batch", outcome.agent),
                    });
                }
                Err(e) => {
                    tracing::error!("Agent call failed: {}", e);
                    first_error.get_or_insert(e);
                }
            }
        }
        let latency = start.elapsed();

        if outcomes.is_empty() {
            self.stats.record(latency, false, None, requests.len());
            return Err(first_error.unwrap_or_else(|| {
                GatewayError::NoHealthyEndpoint(format!("agents for {}", operation))
            }));
        }

        let mut trace = vec!["supervisor".to_string()];
        trace.extend(outcomes.iter().map(|o| o.agent.to_string()));
        let endpoint_id = outcomes
            .iter()
            .map(|o| o.endpoint_id.as_str())
            .collect::<Vec<_>>()
            .join(",");
        let processing_ms = latency.as_millis() as u64;
        let batch_size = requests.len();

        let results: Vec<ComputeResult> = (0..items.len())
            .map(|i| {
                let (data, confidence, insights, recommendations) = Self::aggregate(&outcomes, i);
                ComputeResult {
                    data,
                    insights,
                    recommendations,
                    confidence,
                    endpoint_id: endpoint_id.clone(),
                    backend: BackendKind::CoordinatedAgents,
                    processing_ms,
                    batch_size,
                    agent_trace: trace.clone(),
                }
            })
            .collect();
        self.stats.record(latency, true, mean_confidence(&results), batch_size);
        tracing::debug!(
            "Coordinated batch of {} for {} used {:?} in {}ms",
            batch_size,
            operation,
            &trace[1..],
            processing_ms
        );
        Ok(results)
    }

    fn capabilities(&self) -> BackendCapabilities {
        let endpoints = self.agent_endpoints();
        let available: Vec<String> = ALL_AGENTS
            .iter()
            .filter(|agent| endpoints.iter().any(|ep| ep.pool == **agent))
            .map(|agent| agent.to_string())
            .collect();
        BackendCapabilities {
            backend: BackendKind::CoordinatedAgents,
            supported_operations: Operation::ALL
                .into_iter()
                .filter(|op| agents_for(*op).iter().any(|a| available.iter().any(|x| x == a)))
                .collect(),
            available_agents: available,
            max_concurrent_requests: endpoints.iter().map(|ep| ep.capacity).sum(),
            avg_response_time_ms: self.stats.avg_latency_ms(),
        }
    }

    fn performance_metrics(&self) -> PerformanceMetrics {
        self.stats.snapshot(pool_utilization(&self.agent_endpoints()))
    }

    /// Healthy when every agent pool can take a call.
    async fn health_check(&self) -> bool {
        ALL_AGENTS
            .iter()
            .all(|agent| pool_available(&self.balancer.pool(Some(*agent))))
    }
}
