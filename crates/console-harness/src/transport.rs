use std::pin::Pin;

use bytes::Bytes;
use futures::StreamExt as _;
use reqwest::Method;
use tracing::debug;

use crate::config::TransportConfig;
use crate::errors::{ConsoleError, TransportError};

/// Live, cancelable body of a streaming response. Dropping it closes the
/// connection.
pub type ByteStream =
    Pin<Box<dyn futures::Stream<Item = Result<Bytes, TransportError>> + Send + 'static>>;

/// Request capability consumed by the stream consumer and the ingestion loop.
#[async_trait::async_trait]
pub trait Transport: Send + Sync {
    /// Sends a request and returns the fully buffered JSON body.
    async fn send_json(
        &self,
        endpoint: &str,
        method: Method,
        body: Option<serde_json::Value>,
    ) -> Result<serde_json::Value, TransportError>;

    /// Sends a request and returns its body as an open byte stream once a
    /// success status arrived.
    async fn open_stream(
        &self,
        endpoint: &str,
        method: Method,
        body: Option<serde_json::Value>,
    ) -> Result<ByteStream, TransportError>;
}

/// `Transport` backed by a shared `reqwest` client.
#[derive(Clone, Debug)]
pub struct ReqwestTransport {
    client: reqwest::Client,
    config: TransportConfig,
}

impl ReqwestTransport {
    /// Builds a transport from explicit configuration.
    pub fn new(config: TransportConfig) -> Result<Self, ConsoleError> {
        if config.base_url.trim().is_empty() {
            return Err(ConsoleError::Config("base_url must not be empty".into()));
        }
        reqwest::Url::parse(&config.base_url)
            .map_err(|e| ConsoleError::Config(format!("invalid base_url: {e}")))?;
        // No overall timeout on the client: chat streams are long-lived.
        let client = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout)
            .build()
            .map_err(|e| ConsoleError::Config(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { client, config })
    }

    pub fn config(&self) -> &TransportConfig {
        &self.config
    }

    fn request(
        &self,
        endpoint: &str,
        method: Method,
        body: Option<serde_json::Value>,
    ) -> reqwest::RequestBuilder {
        let mut req = self.client.request(method, self.config.url_for(endpoint));
        if let Some(token) = self.config.api_token.as_deref() {
            req = req.bearer_auth(token);
        }
        if let Some(body) = body {
            req = req.json(&body);
        }
        req
    }

    async fn send_checked(
        &self,
        endpoint: &str,
        req: reqwest::RequestBuilder,
    ) -> Result<reqwest::Response, TransportError> {
        let response = req
            .send()
            .await
            .map_err(|e| TransportError::connect(endpoint, e.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<unreadable body>".to_string());
            return Err(TransportError::status(endpoint, status.as_u16(), body));
        }
        Ok(response)
    }
}

#[async_trait::async_trait]
impl Transport for ReqwestTransport {
    async fn send_json(
        &self,
        endpoint: &str,
        method: Method,
        body: Option<serde_json::Value>,
    ) -> Result<serde_json::Value, TransportError> {
        debug!(endpoint, %method, "sending buffered request");
        let req = self
            .request(endpoint, method, body)
            .timeout(self.config.request_timeout);
        let response = self.send_checked(endpoint, req).await?;
        let bytes = response
            .bytes()
            .await
            .map_err(|e| TransportError::read(endpoint, e.to_string()))?;
        serde_json::from_slice(&bytes).map_err(|e| TransportError::decode(endpoint, e.to_string()))
    }

    async fn open_stream(
        &self,
        endpoint: &str,
        method: Method,
        body: Option<serde_json::Value>,
    ) -> Result<ByteStream, TransportError> {
        debug!(endpoint, %method, "opening response stream");
        let req = self.request(endpoint, method, body);
        let response = self.send_checked(endpoint, req).await?;
        let endpoint = endpoint.to_string();
        let stream = response.bytes_stream().map(move |chunk| {
            chunk.map_err(|e| TransportError::read(endpoint.clone(), e.to_string()))
        });
        Ok(Box::pin(stream))
    }
}
