use std::sync::Arc;

use reqwest::Method;
use serde_json::json;

use crate::config::ConsoleConfig;
use crate::consumer::{ChatStream, StreamConsumer};
use crate::errors::{ConsoleError, TransportError};
use crate::ingest::{IngestionLoop, IngestionState, StatsResponse};
use crate::message::Conversation;
use crate::presentation::{Presentation, SilentPresentation};
use crate::transport::{ReqwestTransport, Transport};

/// Entry point wiring a transport and a presentation to both subsystems.
#[derive(Clone)]
pub struct Console {
    transport: Arc<dyn Transport>,
    presentation: Arc<dyn Presentation>,
    config: ConsoleConfig,
}

impl Console {
    /// Creates a console talking HTTP through `ReqwestTransport`.
    pub fn new(config: ConsoleConfig) -> Result<Self, ConsoleError> {
        let transport = ReqwestTransport::new(config.transport.clone())?;
        Ok(Self::with_transport(config, Arc::new(transport)))
    }

    /// Creates a console on top of any transport.
    pub fn with_transport(config: ConsoleConfig, transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            presentation: Arc::new(SilentPresentation),
            config,
        }
    }

    /// Replaces the display sink used by streams and ingestion.
    pub fn presentation(mut self, presentation: Arc<dyn Presentation>) -> Self {
        self.presentation = presentation;
        self
    }

    pub fn config(&self) -> &ConsoleConfig {
        &self.config
    }

    fn consumer(&self) -> StreamConsumer {
        StreamConsumer::new(
            Arc::clone(&self.transport),
            Arc::clone(&self.presentation),
            self.config.stream.clone(),
        )
    }

    /// Records `prompt` in `conversation` and streams the answer.
    ///
    /// The caller hands the finished message back with
    /// `Conversation::commit` once `ChatStream::finish` returns it.
    pub fn stream_chat(
        &self,
        conversation: &mut Conversation,
        prompt: &str,
    ) -> Result<ChatStream, ConsoleError> {
        let prompt = validate_prompt(prompt)?;
        conversation.push_user(prompt);
        Ok(self.consumer().stream(
            self.config.endpoints.stream_chat.clone(),
            json!({ "message": prompt }),
            conversation.begin_assistant(),
        ))
    }

    /// Like `stream_chat` but through the buffered chat endpoint.
    pub fn ask(
        &self,
        conversation: &mut Conversation,
        prompt: &str,
    ) -> Result<ChatStream, ConsoleError> {
        let prompt = validate_prompt(prompt)?;
        conversation.push_user(prompt);
        Ok(self.consumer().buffered(
            self.config.endpoints.buffered_chat.clone(),
            json!({ "message": prompt }),
            conversation.begin_assistant(),
        ))
    }

    /// Fetches the current ingestion counters.
    pub async fn stats(&self) -> Result<IngestionState, ConsoleError> {
        let endpoint = &self.config.endpoints.ingest_stats;
        let value = self.transport.send_json(endpoint, Method::GET, None).await?;
        let stats: StatsResponse = serde_json::from_value(value)
            .map_err(|e| TransportError::decode(endpoint.as_str(), e.to_string()))?;
        Ok(IngestionState::from(&stats))
    }

    /// Builds an ingestion loop seeded from the stats endpoint.
    pub async fn ingestion(&self) -> IngestionLoop {
        IngestionLoop::connect(
            Arc::clone(&self.transport),
            Arc::clone(&self.presentation),
            &self.config.endpoints,
            self.config.ingest.clone(),
        )
        .await
    }
}

fn validate_prompt(prompt: &str) -> Result<&str, ConsoleError> {
    let prompt = prompt.trim();
    if prompt.is_empty() {
        return Err(ConsoleError::Validation("prompt must not be empty".into()));
    }
    Ok(prompt)
}
