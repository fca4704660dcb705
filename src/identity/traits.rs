//! Collaborator interfaces for proxy rotation.

use async_trait::async_trait;
use std::time::Duration;
use tracing::debug;

use crate::error::Result;

use super::types::ProxyEndpoint;

/// Local proxy-controller API (a Clash-style node switcher).
#[async_trait]
pub trait ProxyController: Send + Sync {
    /// Ask the controller to move its active group to another node.
    async fn switch_node(&self) -> Result<()>;

    /// Enumerate egress candidates known to the controller.
    async fn list_candidates(&self) -> Result<Vec<ProxyEndpoint>>;
}

/// OS-level proxy settings.
#[async_trait]
pub trait SystemProxy: Send + Sync {
    async fn disable(&self) -> Result<()>;
    async fn enable(&self, endpoint: &ProxyEndpoint) -> Result<()>;
    async fn current(&self) -> Result<Option<ProxyEndpoint>>;
}

/// Observes the current egress IP. A `None` observation never counts as
/// an IP change.
#[async_trait]
pub trait IpEcho: Send + Sync {
    async fn current_ip(&self) -> Option<String>;
}

/// Default observer against a public echo endpoint.
pub struct HttpIpEcho {
    client: reqwest::Client,
    url: String,
}

impl HttpIpEcho {
    pub const DEFAULT_URL: &'static str = "https://httpbin.org/ip";

    pub fn new(url: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_default();
        Self {
            client,
            url: url.into(),
        }
    }
}

impl Default for HttpIpEcho {
    fn default() -> Self {
        Self::new(Self::DEFAULT_URL)
    }
}

#[async_trait]
impl IpEcho for HttpIpEcho {
    async fn current_ip(&self) -> Option<String> {
        let response = match self.client.get(&self.url).send().await {
            Ok(r) => r,
            Err(e) => {
                debug!(error = %e, "egress IP observation failed");
                return None;
            }
        };
        let body: serde_json::Value = response.json().await.ok()?;
        let origin = body.get("origin")?.as_str()?;
        // Echo services list proxy chains comma-separated
        origin.split(',').next().map(|ip| ip.trim().to_string())
    }
}
