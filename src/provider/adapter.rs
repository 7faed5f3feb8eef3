//! The shared provider adapter.

use std::sync::Arc;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{header, StatusCode};
use axum::response::Response;
use futures::StreamExt;
use reqwest::{Client, RequestBuilder};
use tokio_stream::wrappers::ReceiverStream;
use tracing::Instrument;

use super::profile::ProviderProfile;
use crate::config::{CacheConfig, ProviderConfig, ProviderKind, RelayConfig};
use crate::error::{Error, Result};
use crate::models::{ModelCache, ModelFetcher};
use crate::relay::{drive, ChannelSink, RelayDriver, Signal};

/// Frames buffered between the relay task and the response body.
const SINK_CAPACITY: usize = 32;

/// One configured upstream provider.
#[derive(Clone)]
pub struct Provider {
    name: String,
    profile: Arc<ProviderProfile>,
    client: Client,
    relay: RelayConfig,
    models: ModelCache,
}

impl Provider {
    pub fn new(
        config: &ProviderConfig,
        client: Client,
        relay: RelayConfig,
        cache: &CacheConfig,
    ) -> Result<Self> {
        let profile = Arc::new(ProviderProfile::from_config(config)?);
        let fetcher = Arc::new(LiveModels {
            provider: config.name.clone(),
            profile: profile.clone(),
            client: client.clone(),
            timeout: relay.request_timeout(),
        });
        let models = ModelCache::new(
            ModelCache::path_for(&cache.dir, &config.name),
            cache.max_age(),
            fetcher,
        );

        Ok(Self {
            name: config.name.clone(),
            profile,
            client,
            relay,
            models,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> ProviderKind {
        self.profile.kind
    }

    pub fn default_model(&self) -> &str {
        &self.profile.default_model
    }

    fn chat_request(&self, prompt: &str, model: &str, stream: bool) -> RequestBuilder {
        self.client
            .post(self.profile.chat_url())
            .headers(self.profile.headers().clone())
            .json(&self.profile.chat_payload(prompt, model, stream))
    }

    /// Send one non-streaming completion request and return the provider's
    /// JSON body unchanged.
    pub async fn prompt_once(&self, prompt: &str, model: &str) -> Result<serde_json::Value> {
        tracing::info!(provider = %self.name, model = %model, "Sending completion request");

        let request = self
            .chat_request(prompt, model, false)
            .timeout(self.relay.request_timeout());
        let response = send_checked(&self.name, request).await?;

        response.json().await.map_err(|e| {
            tracing::error!(error = %e, provider = %self.name, "Failed to parse provider response");
            Error::Upstream(e)
        })
    }

    /// Start a streaming completion and return the client response.
    ///
    /// Failures up to and including the first upstream read are returned as
    /// errors, before any header is committed. After that the relay runs in
    /// its own task and owns the response body until it terminates.
    pub async fn prompt_streaming(&self, prompt: &str, model: &str) -> Result<Response> {
        let relay_id = uuid::Uuid::new_v4();
        let span = tracing::info_span!("relay", %relay_id, provider = %self.name, model = %model);

        async move {
            tracing::info!("Starting streaming relay");
            let upstream = send_checked(&self.name, self.chat_request(prompt, model, true)).await?;
            let mut body = Box::pin(upstream.bytes_stream());

            let idle = self.relay.idle_timeout();
            let first = match tokio::time::timeout(idle, body.next()).await {
                Ok(Some(Ok(chunk))) => Some(chunk),
                Ok(Some(Err(e))) => {
                    tracing::error!(error = %e, "Upstream stream failed before first byte");
                    return Err(Error::Upstream(e));
                }
                Ok(None) => None,
                Err(_) => {
                    tracing::error!(timeout = ?idle, "No upstream data before timeout");
                    return Err(Error::Timeout(format!(
                        "provider '{}' sent no data for {:?}",
                        self.name, idle
                    )));
                }
            };

            let (sink, rx) = ChannelSink::new(SINK_CAPACITY);
            let mut driver = RelayDriver::new(self.profile.decoder(), self.relay.framing, sink);

            tokio::spawn(
                async move {
                    if let Some(chunk) = first {
                        driver.on_signal(Signal::Data(chunk)).await;
                    }
                    let outcome = drive(&mut driver, body, idle).await;
                    tracing::info!(
                        state = ?outcome.state,
                        tokens = outcome.tokens,
                        done_received = outcome.done_received,
                        "Relay finished"
                    );
                }
                .in_current_span(),
            );

            Response::builder()
                .status(StatusCode::OK)
                .header(header::CONTENT_TYPE, "text/event-stream")
                .header(header::CACHE_CONTROL, "no-cache")
                .header(header::CONNECTION, "keep-alive")
                .body(Body::from_stream(ReceiverStream::new(rx)))
                .map_err(|e| Error::Internal(e.to_string()))
        }
        .instrument(span)
        .await
    }

    /// Model list, served through the cache.
    pub async fn list_models(&self) -> Result<serde_json::Value> {
        self.models.list_models().await
    }

    /// Model list with any stale entry refreshed before returning.
    pub async fn list_models_inline(&self) -> Result<serde_json::Value> {
        self.models.list_models_inline().await
    }
}

/// Send a request and turn non-success statuses into [`Error::Provider`].
async fn send_checked(provider: &str, request: RequestBuilder) -> Result<reqwest::Response> {
    let response = request.send().await.map_err(|e| {
        tracing::error!(error = %e, provider = %provider, "Failed to reach provider");
        Error::Upstream(e)
    })?;

    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        tracing::error!(
            status = %status,
            provider = %provider,
            body = %body,
            "Provider returned error"
        );
        return Err(Error::Provider {
            provider: provider.to_string(),
            status: status.as_u16(),
            body,
        });
    }

    Ok(response)
}

/// Live model list fetcher backing a provider's cache.
struct LiveModels {
    provider: String,
    profile: Arc<ProviderProfile>,
    client: Client,
    timeout: std::time::Duration,
}

#[async_trait]
impl ModelFetcher for LiveModels {
    async fn fetch_models(&self) -> Result<serde_json::Value> {
        let mut headers = self.profile.headers().clone();
        headers.remove(header::CONTENT_TYPE);
        let request = self
            .client
            .get(self.profile.models_url())
            .headers(headers)
            .timeout(self.timeout);
        let response = send_checked(&self.provider, request).await?;
        let models = response.json().await?;
        tracing::info!(provider = %self.provider, "Fetched model list");
        Ok(models)
    }
}
