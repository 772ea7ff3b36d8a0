//! Active endpoint health probes.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;

use super::endpoint::BackendEndpoint;

/// Checks whether an endpoint is reachable.
#[async_trait]
pub trait HealthProbe: Send + Sync {
    async fn probe(&self, endpoint: &BackendEndpoint) -> bool;
}

/// Probes `GET {address}/health` and expects a 2xx status.
pub struct HttpProbe {
    client: Client,
}

impl HttpProbe {
    pub fn new(timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl HealthProbe for HttpProbe {
    async fn probe(&self, endpoint: &BackendEndpoint) -> bool {
        let url = format!("{}/health", endpoint.address);
        match self.client.get(&url).send().await {
            Ok(resp) => resp.status().is_success(),
            Err(e) => {
                tracing::debug!("Health probe for {} failed: {}", endpoint.id, e);
                false
            }
        }
    }
}
