//! HTTP backend for the mesh registry.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use hyper::Uri;
use mesh_primitives::AgentId;
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::http_client::{self, HyperClient, SendError, build_client};
use crate::registry::{MeshRegistry, RegistryError, RegistryResult};
use crate::wire::{
    EndpointUpdateRequest, ErrorResponse, HeartbeatRequest, HeartbeatResponse, RegisterRequest,
    RegisterResponse,
};

/// Configuration for the HTTP registry backend.
#[derive(Clone, Debug)]
pub struct HttpRegistryConfig {
    base_url: String,
    timeout: Duration,
}

impl HttpRegistryConfig {
    /// Creates a configuration pointing at the given registry base URL.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::InvalidConfig`] when the URL does not parse
    /// or omits its scheme or host.
    pub fn new(base_url: impl AsRef<str>) -> RegistryResult<Self> {
        let base_url = http_client::sanitize_base_url(base_url.as_ref())
            .map_err(|_| RegistryError::InvalidConfig("registry base URL is invalid"))?;
        Ok(Self {
            base_url,
            timeout: Duration::from_secs(10),
        })
    }

    /// Sets the per-request timeout.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Returns the registry base URL.
    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

/// Registry backend speaking JSON over HTTP.
pub struct HttpMeshRegistry {
    client: HyperClient,
    config: HttpRegistryConfig,
}

impl fmt::Debug for HttpMeshRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpMeshRegistry")
            .field("base_url", &self.config.base_url)
            .finish_non_exhaustive()
    }
}

impl HttpMeshRegistry {
    /// Constructs a backend with the given configuration.
    #[must_use]
    pub fn new(config: HttpRegistryConfig) -> Self {
        Self {
            client: build_client(),
            config,
        }
    }

    fn endpoint(&self, path: &str) -> RegistryResult<Uri> {
        format!("{}{path}", self.config.base_url)
            .parse::<Uri>()
            .map_err(|_| RegistryError::InvalidConfig("registry base URL is invalid"))
    }

    async fn exchange<Req, Resp>(&self, path: &str, payload: &Req) -> RegistryResult<Resp>
    where
        Req: Serialize,
        Resp: DeserializeOwned,
    {
        let uri = self.endpoint(path)?;
        let body = serde_json::to_vec(payload)
            .map_err(|err| RegistryError::backend(format!("failed to encode request: {err}")))?;

        let (status, bytes) = http_client::post_json(&self.client, uri, &[], body, self.config.timeout)
            .await
            .map_err(|err| match err {
                SendError::TimedOut => {
                    RegistryError::backend(format!("registry {path} timed out"))
                }
                SendError::Failed(reason) => RegistryError::backend(reason),
            })?;

        if !status.is_success() {
            let reason = serde_json::from_slice::<ErrorResponse>(&bytes)
                .map_or_else(|_| String::from_utf8_lossy(&bytes).to_string(), |e| e.error);
            return Err(RegistryError::rejected(format!(
                "{path} returned {status}: {reason}"
            )));
        }

        serde_json::from_slice(&bytes)
            .map_err(|err| RegistryError::backend(format!("failed to decode response: {err}")))
    }
}

#[async_trait]
impl MeshRegistry for HttpMeshRegistry {
    async fn register(&self, request: &RegisterRequest) -> RegistryResult<RegisterResponse> {
        let response: RegisterResponse = self.exchange("/register", request).await?;
        if !response.success {
            return Err(RegistryError::rejected(response.message));
        }
        Ok(response)
    }

    async fn heartbeat(&self, request: &HeartbeatRequest) -> RegistryResult<HeartbeatResponse> {
        self.exchange("/heartbeat", request).await
    }

    async fn update_endpoint(&self, request: &EndpointUpdateRequest) -> RegistryResult<()> {
        let _: serde_json::Value = self.exchange("/endpoint", request).await?;
        Ok(())
    }

    async fn deregister(&self, agent_id: AgentId) -> RegistryResult<()> {
        let payload = serde_json::json!({ "agent_id": agent_id });
        let _: serde_json::Value = self.exchange("/deregister", &payload).await?;
        Ok(())
    }
}
