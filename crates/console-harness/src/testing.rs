//! Scripted transport for component tests.

use std::collections::VecDeque;
use std::sync::Mutex;

use bytes::Bytes;
use reqwest::Method;
use tokio::sync::mpsc;
use tokio::time::Instant;

use crate::errors::TransportError;
use crate::transport::{ByteStream, Transport};

#[derive(Debug, Clone)]
pub(crate) struct RecordedRequest {
    pub(crate) endpoint: String,
    pub(crate) method: Method,
    pub(crate) body: Option<serde_json::Value>,
    pub(crate) at: Instant,
}

/// Sender feeding a stream handed out by `FakeTransport`. Dropping it ends
/// the stream normally.
pub(crate) type ChunkSender = mpsc::UnboundedSender<Result<Bytes, TransportError>>;

#[derive(Default)]
pub(crate) struct FakeTransport {
    json: Mutex<VecDeque<Result<serde_json::Value, TransportError>>>,
    streams: Mutex<VecDeque<Result<ByteStream, TransportError>>>,
    requests: Mutex<Vec<RecordedRequest>>,
}

impl FakeTransport {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn push_json(&self, response: Result<serde_json::Value, TransportError>) {
        self.json.lock().expect("json lock").push_back(response);
    }

    /// Queues a stream that yields `chunks` immediately and then ends.
    pub(crate) fn push_chunks(&self, chunks: &[&[u8]]) {
        let items: Vec<Result<Bytes, TransportError>> = chunks
            .iter()
            .map(|chunk| Ok(Bytes::copy_from_slice(chunk)))
            .collect();
        self.push_stream(Ok(Box::pin(futures::stream::iter(items))));
    }

    /// Queues a stream driven by the returned sender.
    pub(crate) fn push_channel(&self) -> ChunkSender {
        let (tx, rx) = mpsc::unbounded_channel();
        let stream = futures::stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|item| (item, rx))
        });
        self.push_stream(Ok(Box::pin(stream)));
        tx
    }

    pub(crate) fn push_stream_error(&self, error: TransportError) {
        self.push_stream(Err(error));
    }

    fn push_stream(&self, stream: Result<ByteStream, TransportError>) {
        self.streams.lock().expect("streams lock").push_back(stream);
    }

    pub(crate) fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().expect("requests lock").clone()
    }

    fn record(&self, endpoint: &str, method: Method, body: Option<serde_json::Value>) {
        self.requests
            .lock()
            .expect("requests lock")
            .push(RecordedRequest {
                endpoint: endpoint.to_string(),
                method,
                body,
                at: Instant::now(),
            });
    }
}

#[async_trait::async_trait]
impl Transport for FakeTransport {
    async fn send_json(
        &self,
        endpoint: &str,
        method: Method,
        body: Option<serde_json::Value>,
    ) -> Result<serde_json::Value, TransportError> {
        self.record(endpoint, method, body);
        self.json
            .lock()
            .expect("json lock")
            .pop_front()
            .unwrap_or_else(|| Err(TransportError::connect(endpoint, "no scripted response")))
    }

    async fn open_stream(
        &self,
        endpoint: &str,
        method: Method,
        body: Option<serde_json::Value>,
    ) -> Result<ByteStream, TransportError> {
        self.record(endpoint, method, body);
        self.streams
            .lock()
            .expect("streams lock")
            .pop_front()
            .unwrap_or_else(|| Err(TransportError::connect(endpoint, "no scripted stream")))
    }
}
