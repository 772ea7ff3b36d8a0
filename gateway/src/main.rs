use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use fininfer_gateway::backends::{
    BackendDispatch, CoordinatedAgentBackend, HttpModelClient, ModelClient, SimulatedModelClient, SingleModelBackend,
    ALL_AGENTS,
};
use fininfer_gateway::balancer::{HttpProbe, LoadBalancer};
use fininfer_gateway::config::{EndpointConfig, ModelClientKind};
use fininfer_gateway::{loadtest, logging, routes, store, AppState, Config, GatewayMetrics, Orchestrator};

/// Endpoints used when the simulated client runs without configured endpoints.
fn simulated_endpoints() -> Vec<EndpointConfig> {
    let general = (1..=2).map(|n| ("general".to_string(), format!("model-{}", n)));
    let agents = ALL_AGENTS
        .iter()
        .map(|agent| (agent.to_string(), format!("{}-1", agent)));
    general
        .chain(agents)
        .map(|(pool, id)| EndpointConfig {
            address: format!("sim://{}", id),
            id,
            capacity: 100,
            weight: 1.0,
            pool,
            operations: vec![],
        })
        .collect()
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load configuration
    let mut config = Config::load()?;

    logging::init_tracing(&config.logging.level);
    tracing::info!("Starting fininfer gateway");

    if config.balancer.endpoints.is_empty() && config.model.client == ModelClientKind::Simulated {
        config.balancer.endpoints = simulated_endpoints();
        tracing::info!("No endpoints configured, using {} simulated endpoints", config.balancer.endpoints.len());
    }

    // Initialize components
    let store = store::connect(&config.store).await?;
    let metrics = Arc::new(GatewayMetrics::new()?);

    let mut balancer = LoadBalancer::new(&config.balancer, metrics.clone());
    if config.balancer.active_probe {
        let probe = HttpProbe::new(Duration::from_millis(config.balancer.probe_timeout_ms))?;
        balancer = balancer.with_probe(Arc::new(probe));
    }
    let balancer = Arc::new(balancer);

    let client: Arc<dyn ModelClient> = match config.model.client {
        ModelClientKind::Simulated => Arc::new(SimulatedModelClient::new(config.model.simulated_failure_rate)),
        ModelClientKind::Http => Arc::new(HttpModelClient::new(Duration::from_millis(
            config.model.request_timeout_ms,
        ))?),
    };

    let dispatch = Arc::new(BackendDispatch::new());
    dispatch.register(Arc::new(SingleModelBackend::new(balancer.clone(), client.clone())));
    dispatch.register(Arc::new(CoordinatedAgentBackend::new(balancer.clone(), client)));

    let engine = Arc::new(Orchestrator::new(&config, store, balancer, dispatch, metrics));
    engine.start_services();

    if std::env::args().nth(1).as_deref() == Some("loadtest") {
        let report = loadtest::run(engine.clone(), &config.loadtest).await;
        println!("{}", serde_json::to_string_pretty(&report)?);
        engine.stop_services();
        return Ok(());
    }

    let state = Arc::new(AppState {
        config: config.clone(),
        engine: engine.clone(),
    });

    // Build CORS layer
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = Router::new()
        .merge(routes::router(state))
        .layer(cors)
        .layer(TraceLayer::new_for_http());

    // Start server
    let addr = format!("{}:{}", config.server.host, config.server.port);
    tracing::info!("Listening on {}", addr);

    let listener = TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!("Failed to listen for shutdown signal: {}", e);
            }
        })
        .await?;

    engine.stop_services();
    tracing::info!("Gateway stopped");
    Ok(())
}
