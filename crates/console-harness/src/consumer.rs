use std::future::pending;
use std::sync::Arc;

use bytes::Bytes;
use futures::StreamExt as _;
use reqwest::Method;
use serde::Deserialize;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::config::StreamOptions;
use crate::drain::CharDrain;
use crate::errors::{StreamFailure, TransportError};
use crate::message::{Message, MessageId};
use crate::presentation::Presentation;
use crate::scheduler::{AbortHandle, AbortSignal, TimerSlot, abort_pair};
use crate::sentinel::{Segment, SegmentDecoder, classify};
use crate::stream::StreamEvent;
use crate::transport::{ByteStream, Transport};

const TRANSPORT_FALLBACK: &str = "[Error: could not reach the server]";
const NO_PAYLOAD_FALLBACK: &str = "[Error: the server sent no answer]";

/// Starts chat streams and hands back a `ChatStream` per request.
///
/// Each stream runs on its own task which owns the message, the character
/// drain and the payload timer until it terminates.
#[derive(Clone)]
pub struct StreamConsumer {
    transport: Arc<dyn Transport>,
    presentation: Arc<dyn Presentation>,
    options: StreamOptions,
}

impl StreamConsumer {
    pub fn new(
        transport: Arc<dyn Transport>,
        presentation: Arc<dyn Presentation>,
        options: StreamOptions,
    ) -> Self {
        Self {
            transport,
            presentation,
            options,
        }
    }

    /// Opens `endpoint` as a byte stream and fills `message` from it.
    ///
    /// Must be called inside a tokio runtime.
    pub fn stream(
        &self,
        endpoint: impl Into<String>,
        body: serde_json::Value,
        message: Message,
    ) -> ChatStream {
        self.spawn(
            Source::Stream {
                endpoint: endpoint.into(),
                body,
            },
            message,
        )
    }

    /// Sends a buffered chat request and reveals its reply through the same
    /// drain. The reply is not scanned for sentinels.
    pub fn buffered(
        &self,
        endpoint: impl Into<String>,
        body: serde_json::Value,
        message: Message,
    ) -> ChatStream {
        self.spawn(
            Source::Buffered {
                endpoint: endpoint.into(),
                body,
            },
            message,
        )
    }

    fn spawn(&self, source: Source, message: Message) -> ChatStream {
        let (tx, rx) = mpsc::unbounded_channel();
        let (final_tx, final_rx) = oneshot::channel();
        let (abort_handle, signal) = abort_pair();
        let stream_id = uuid::Uuid::new_v4();
        let message_id = message.id();

        let task = StreamTask {
            stream_id,
            transport: Arc::clone(&self.transport),
            presentation: Arc::clone(&self.presentation),
            drain: CharDrain::new(self.options.reveal_interval()),
            decoder: SegmentDecoder::default(),
            payload_timer: TimerSlot::new(),
            options: self.options.clone(),
            message,
            tx,
            signal,
        };
        tokio::spawn(async move {
            let message = task.run(source).await;
            let _ = final_tx.send(message);
        });

        ChatStream {
            stream_id,
            message_id,
            rx,
            final_rx,
            abort_handle,
            saw_terminal: false,
        }
    }
}

/// Handle to one running chat stream.
///
/// Use `next_event()` to follow the stream and `finish()` to get the message
/// back. Dropping the handle cancels the stream.
pub struct ChatStream {
    stream_id: uuid::Uuid,
    message_id: MessageId,
    rx: mpsc::UnboundedReceiver<StreamEvent>,
    final_rx: oneshot::Receiver<Message>,
    abort_handle: AbortHandle,
    saw_terminal: bool,
}

impl ChatStream {
    pub fn stream_id(&self) -> uuid::Uuid {
        self.stream_id
    }

    /// Id of the assistant message this stream fills.
    pub fn message_id(&self) -> MessageId {
        self.message_id
    }

    pub fn abort_handle(&self) -> AbortHandle {
        self.abort_handle.clone()
    }

    /// Waits for the next event. Returns `None` once the stream terminated
    /// and every event was read, or after cancellation.
    pub async fn next_event(&mut self) -> Option<StreamEvent> {
        let event = self.rx.recv().await;
        if event.as_ref().is_some_and(StreamEvent::is_terminal) {
            self.saw_terminal = true;
        }
        event
    }

    /// Drains remaining events and returns the message as the stream left it.
    ///
    /// Returns `None` only if the stream task died without handing the
    /// message back.
    pub async fn finish(mut self) -> Option<Message> {
        while !self.saw_terminal {
            match self.rx.recv().await {
                Some(event) if event.is_terminal() => self.saw_terminal = true,
                Some(_) => {}
                None => break,
            }
        }
        (&mut self.final_rx).await.ok()
    }
}

impl Drop for ChatStream {
    fn drop(&mut self) {
        self.abort_handle.abort();
    }
}

enum Source {
    Stream {
        endpoint: String,
        body: serde_json::Value,
    },
    Buffered {
        endpoint: String,
        body: serde_json::Value,
    },
}

enum Opened {
    Bytes(ByteStream),
    Reply(serde_json::Value),
}

enum Exit {
    Ended,
    Failed(StreamFailure),
    Cancelled,
}

enum Step {
    Abort,
    Timeout,
    Reveal(char),
    Chunk(Option<Result<Bytes, TransportError>>),
}

#[derive(Deserialize)]
struct AskReply {
    status: String,
    reply: Option<String>,
    message: Option<String>,
}

struct StreamTask {
    stream_id: uuid::Uuid,
    transport: Arc<dyn Transport>,
    presentation: Arc<dyn Presentation>,
    options: StreamOptions,
    message: Message,
    drain: CharDrain,
    decoder: SegmentDecoder,
    payload_timer: TimerSlot,
    tx: mpsc::UnboundedSender<StreamEvent>,
    signal: AbortSignal,
}

impl StreamTask {
    async fn run(mut self, source: Source) -> Message {
        if self.signal.is_aborted() {
            return self.message;
        }
        self.presentation.on_message_start();
        if let Some(limit) = self.options.payload_timeout() {
            self.payload_timer.arm(limit);
        }

        let exit = match self.pump(&source).await {
            Ok(()) => Exit::Ended,
            Err(exit) => exit,
        };
        self.finish(exit);
        self.message
    }

    async fn pump(&mut self, source: &Source) -> Result<(), Exit> {
        let mut upstream = self.open(source).await?;

        loop {
            if upstream.is_none() && self.drain.is_idle() {
                return if self.message.is_loading() {
                    Err(Exit::Failed(StreamFailure::NoPayload))
                } else {
                    Ok(())
                };
            }

            let step = tokio::select! {
                biased;
                _ = self.signal.aborted() => Step::Abort,
                _ = self.payload_timer.fired() => Step::Timeout,
                ch = self.drain.next_char() => Step::Reveal(ch),
                chunk = next_chunk(&mut upstream) => Step::Chunk(chunk),
            };

            match step {
                Step::Abort => return Err(Exit::Cancelled),
                Step::Timeout => return Err(self.timed_out()),
                Step::Reveal(ch) => {
                    self.message.push_char(ch);
                    self.presentation.on_append(ch);
                }
                Step::Chunk(Some(Ok(bytes))) => {
                    if let Some(segment) = self.decoder.push_chunk(&bytes) {
                        self.on_segment(segment)?;
                    }
                }
                Step::Chunk(Some(Err(err))) => return Err(Exit::Failed(err.into())),
                Step::Chunk(None) => {
                    debug!(stream_id = %self.stream_id, "upstream closed");
                    upstream = None;
                    if let Some(segment) = self.decoder.finish() {
                        self.on_segment(segment)?;
                    }
                }
            }
        }
    }

    /// Opens the source. A buffered reply is fed to the drain right away and
    /// leaves no upstream behind.
    async fn open(&mut self, source: &Source) -> Result<Option<ByteStream>, Exit> {
        let transport = Arc::clone(&self.transport);
        let opening = async {
            match source {
                Source::Stream { endpoint, body } => transport
                    .open_stream(endpoint, Method::POST, Some(body.clone()))
                    .await
                    .map(Opened::Bytes),
                Source::Buffered { endpoint, body } => transport
                    .send_json(endpoint, Method::POST, Some(body.clone()))
                    .await
                    .map(Opened::Reply),
            }
        };

        let opened = tokio::select! {
            biased;
            _ = self.signal.aborted() => None,
            _ = self.payload_timer.fired() => Some(Err(None)),
            opened = opening => Some(opened.map_err(Some)),
        };

        match opened {
            None => Err(Exit::Cancelled),
            Some(Err(None)) => Err(self.timed_out()),
            Some(Err(Some(err))) => Err(Exit::Failed(err.into())),
            Some(Ok(Opened::Bytes(stream))) => {
                debug!(stream_id = %self.stream_id, "stream opened");
                Ok(Some(stream))
            }
            Some(Ok(Opened::Reply(value))) => {
                let reply = parse_reply(source, value).map_err(Exit::Failed)?;
                self.on_payload(reply)?;
                Ok(None)
            }
        }
    }

    fn on_segment(&mut self, segment: String) -> Result<(), Exit> {
        match classify(segment, self.options.metadata_frames) {
            Segment::Control(sentinels) => {
                for sentinel in sentinels {
                    debug!(stream_id = %self.stream_id, token = sentinel.token(), "status sentinel");
                    self.emit(StreamEvent::StatusChanged(sentinel))?;
                    if let Some(label) = sentinel.label() {
                        self.presentation.on_status(label);
                    }
                }
                Ok(())
            }
            Segment::Metadata(value) => self.emit(StreamEvent::Metadata(value)),
            Segment::Payload(text) => self.on_payload(text),
        }
    }

    fn on_payload(&mut self, text: String) -> Result<(), Exit> {
        if text.is_empty() {
            return Ok(());
        }
        if self.message.clear_loading() {
            self.payload_timer.disarm();
            debug!(stream_id = %self.stream_id, message_id = %self.message.id(), "first payload");
        }
        self.drain.enqueue(&text);
        self.emit(StreamEvent::TextAppended(text))
    }

    /// Queues one event unless the stream was cancelled first. The channel is
    /// unbounded so an unread handle never holds back the drain.
    fn emit(&self, event: StreamEvent) -> Result<(), Exit> {
        if self.signal.is_aborted() || self.tx.send(event).is_err() {
            return Err(Exit::Cancelled);
        }
        Ok(())
    }

    fn timed_out(&self) -> Exit {
        Exit::Failed(StreamFailure::PayloadTimeout {
            waited: self.options.payload_timeout().unwrap_or_default(),
        })
    }

    fn finish(&mut self, exit: Exit) {
        self.payload_timer.disarm();
        match exit {
            Exit::Ended => {
                info!(
                    stream_id = %self.stream_id,
                    message_id = %self.message.id(),
                    chars = self.message.text().chars().count(),
                    "stream ended"
                );
                if self.emit(StreamEvent::StreamEnded).is_ok() {
                    self.presentation.on_stream_end();
                }
            }
            Exit::Failed(failure) => {
                for ch in self.drain.flush().chars() {
                    self.message.push_char(ch);
                    self.presentation.on_append(ch);
                }
                self.message.fail_with(&fallback_text(&failure));
                warn!(stream_id = %self.stream_id, error = %failure, "stream failed");
                let message = failure.to_string();
                if self.emit(StreamEvent::StreamFailed(failure)).is_ok() {
                    self.presentation.on_stream_error(&message);
                }
            }
            Exit::Cancelled => {
                self.drain.flush();
                debug!(stream_id = %self.stream_id, "stream cancelled");
            }
        }
    }
}

async fn next_chunk(upstream: &mut Option<ByteStream>) -> Option<Result<Bytes, TransportError>> {
    match upstream {
        Some(stream) => stream.next().await,
        None => pending().await,
    }
}

fn parse_reply(source: &Source, value: serde_json::Value) -> Result<String, StreamFailure> {
    let endpoint = match source {
        Source::Stream { endpoint, .. } | Source::Buffered { endpoint, .. } => endpoint,
    };
    let reply: AskReply = serde_json::from_value(value)
        .map_err(|e| TransportError::decode(endpoint.as_str(), e.to_string()))?;
    match (reply.status.as_str(), reply.reply) {
        ("success", Some(text)) => Ok(text),
        ("success", None) => Err(StreamFailure::NoPayload),
        (status, _) => Err(StreamFailure::Rejected(
            reply.message.unwrap_or_else(|| format!("status {status}")),
        )),
    }
}

fn fallback_text(failure: &StreamFailure) -> String {
    match failure {
        StreamFailure::Transport(_) => TRANSPORT_FALLBACK.to_string(),
        StreamFailure::NoPayload => NO_PAYLOAD_FALLBACK.to_string(),
        StreamFailure::PayloadTimeout { .. } | StreamFailure::Rejected(_) => {
            format!("[Error: {failure}]")
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use bytes::Bytes;
    use serde_json::json;

    use super::*;
    use crate::presentation::recording::{Call, RecordingPresentation};
    use crate::sentinel::Sentinel;
    use crate::testing::FakeTransport;

    const CHAT: &str = "/admin/ai/ask-admin";

    fn consumer(
        transport: &Arc<FakeTransport>,
        presentation: &Arc<RecordingPresentation>,
        options: StreamOptions,
    ) -> StreamConsumer {
        StreamConsumer::new(transport.clone(), presentation.clone(), options)
    }

    fn assistant() -> Message {
        Message::pending_assistant(MessageId(2))
    }

    async fn collect(stream: &mut ChatStream) -> Vec<StreamEvent> {
        let mut events = Vec::new();
        while let Some(event) = stream.next_event().await {
            events.push(event);
        }
        events
    }

    #[tokio::test(start_paused = true)]
    async fn statuses_then_text_then_end() {
        let transport = Arc::new(FakeTransport::new());
        transport.push_chunks(&[b"[STATUS:QUEUED]", b"[STATUS:PROCESSING]", b"Halo", b" dunia"]);
        let presentation = Arc::new(RecordingPresentation::default());
        let mut stream = consumer(&transport, &presentation, StreamOptions::default()).stream(
            CHAT,
            json!({"message": "hi"}),
            assistant(),
        );

        let events = collect(&mut stream).await;
        assert_eq!(
            events,
            vec![
                StreamEvent::StatusChanged(Sentinel::Queued),
                StreamEvent::StatusChanged(Sentinel::Processing),
                StreamEvent::TextAppended("Halo".into()),
                StreamEvent::TextAppended(" dunia".into()),
                StreamEvent::StreamEnded,
            ]
        );

        let message = stream.finish().await.expect("message");
        assert_eq!(message.text(), "Halo dunia");
        assert!(!message.is_loading());

        let calls = presentation.calls();
        assert_eq!(calls.first(), Some(&Call::MessageStart));
        assert_eq!(calls.last(), Some(&Call::StreamEnd));
        assert_eq!(presentation.appended(), "Halo dunia");
        assert_eq!(
            presentation.count(|c| matches!(c, Call::Status(_))),
            2
        );
        assert!(calls.contains(&Call::Status("all servers busy, queued".into())));

        let requests = transport.requests();
        assert_eq!(requests[0].endpoint, CHAT);
        assert_eq!(requests[0].body, Some(json!({"message": "hi"})));
    }

    #[tokio::test(start_paused = true)]
    async fn heartbeat_has_no_visible_status() {
        let transport = Arc::new(FakeTransport::new());
        transport.push_chunks(&[b"[HEARTBEAT]", b"ok"]);
        let presentation = Arc::new(RecordingPresentation::default());
        let mut stream =
            consumer(&transport, &presentation, StreamOptions::default()).stream(CHAT, json!({}), assistant());

        let events = collect(&mut stream).await;
        assert_eq!(events[0], StreamEvent::StatusChanged(Sentinel::Heartbeat));
        assert_eq!(presentation.count(|c| matches!(c, Call::Status(_))), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn sentinel_split_across_reads_is_not_payload() {
        let transport = Arc::new(FakeTransport::new());
        transport.push_chunks(&[b"Hi [STA", b"TUS:QUEUED]"]);
        let presentation = Arc::new(RecordingPresentation::default());
        let mut stream =
            consumer(&transport, &presentation, StreamOptions::default()).stream(CHAT, json!({}), assistant());

        assert_eq!(
            collect(&mut stream).await,
            vec![
                StreamEvent::TextAppended("Hi ".into()),
                StreamEvent::StatusChanged(Sentinel::Queued),
                StreamEvent::StreamEnded,
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn whitespace_segment_is_payload() {
        let transport = Arc::new(FakeTransport::new());
        transport.push_chunks(&[b"[STATUS:PROCESSING]", b"  \n"]);
        let presentation = Arc::new(RecordingPresentation::default());
        let mut stream =
            consumer(&transport, &presentation, StreamOptions::default()).stream(CHAT, json!({}), assistant());

        let events = collect(&mut stream).await;
        assert!(events.contains(&StreamEvent::TextAppended("  \n".into())));
        assert_eq!(events.last(), Some(&StreamEvent::StreamEnded));
    }

    #[tokio::test(start_paused = true)]
    async fn end_waits_for_every_character() {
        let transport = Arc::new(FakeTransport::new());
        transport.push_chunks(&[b"abcdefghij"]);
        let presentation = Arc::new(RecordingPresentation::default());
        let started = tokio::time::Instant::now();
        let stream =
            consumer(&transport, &presentation, StreamOptions::default()).stream(CHAT, json!({}), assistant());

        let message = stream.finish().await.expect("message");
        assert!(started.elapsed() >= Duration::from_millis(100));
        assert_eq!(message.text(), "abcdefghij");

        let calls = presentation.calls();
        let end = calls.iter().position(|c| *c == Call::StreamEnd).expect("end");
        assert_eq!(end, calls.len() - 1);
        assert_eq!(presentation.count(|c| matches!(c, Call::Append(_))), 10);
    }

    #[tokio::test(start_paused = true)]
    async fn sentinel_only_stream_fails_without_payload() {
        let transport = Arc::new(FakeTransport::new());
        transport.push_chunks(&[b"[STATUS:QUEUED]", b"[HEARTBEAT]"]);
        let presentation = Arc::new(RecordingPresentation::default());
        let mut stream =
            consumer(&transport, &presentation, StreamOptions::default()).stream(CHAT, json!({}), assistant());

        let events = collect(&mut stream).await;
        assert_eq!(
            events.last(),
            Some(&StreamEvent::StreamFailed(StreamFailure::NoPayload))
        );
        assert!(!events.iter().any(|e| matches!(e, StreamEvent::TextAppended(_))));

        let message = stream.finish().await.expect("message");
        assert!(!message.is_loading());
        assert_eq!(message.text(), NO_PAYLOAD_FALLBACK);
        assert_eq!(presentation.count(|c| matches!(c, Call::StreamError(_))), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn payload_timeout_ignores_heartbeats() {
        let transport = Arc::new(FakeTransport::new());
        let tx = transport.push_channel();
        let presentation = Arc::new(RecordingPresentation::default());
        let options = StreamOptions::default().with_payload_timeout_secs(Some(5));
        let mut stream = consumer(&transport, &presentation, options).stream(CHAT, json!({}), assistant());

        let feeder = tokio::spawn(async move {
            for _ in 0..10 {
                if tx.send(Ok(Bytes::from_static(b"[HEARTBEAT]"))).is_err() {
                    break;
                }
                tokio::time::sleep(Duration::from_secs(1)).await;
            }
        });

        let started = tokio::time::Instant::now();
        let events = collect(&mut stream).await;
        assert!(started.elapsed() >= Duration::from_secs(5));
        assert!(started.elapsed() < Duration::from_secs(6));
        assert_eq!(
            events.last(),
            Some(&StreamEvent::StreamFailed(StreamFailure::PayloadTimeout {
                waited: Duration::from_secs(5)
            }))
        );
        let _ = feeder.await;
    }

    #[tokio::test(start_paused = true)]
    async fn payload_disarms_the_timeout() {
        let transport = Arc::new(FakeTransport::new());
        let tx = transport.push_channel();
        let presentation = Arc::new(RecordingPresentation::default());
        let options = StreamOptions::default().with_payload_timeout_secs(Some(5));
        let mut stream = consumer(&transport, &presentation, options).stream(CHAT, json!({}), assistant());

        tx.send(Ok(Bytes::from_static(b"hi"))).expect("send");
        assert_eq!(
            stream.next_event().await,
            Some(StreamEvent::TextAppended("hi".into()))
        );
        tokio::time::sleep(Duration::from_secs(30)).await;
        drop(tx);

        assert_eq!(stream.next_event().await, Some(StreamEvent::StreamEnded));
        assert_eq!(stream.finish().await.expect("message").text(), "hi");
    }

    #[tokio::test(start_paused = true)]
    async fn read_error_flushes_and_appends_fallback() {
        let transport = Arc::new(FakeTransport::new());
        let tx = transport.push_channel();
        let presentation = Arc::new(RecordingPresentation::default());
        let mut stream =
            consumer(&transport, &presentation, StreamOptions::default()).stream(CHAT, json!({}), assistant());

        tx.send(Ok(Bytes::from_static(b"partial answer"))).expect("send");
        assert_eq!(
            stream.next_event().await,
            Some(StreamEvent::TextAppended("partial answer".into()))
        );
        tx.send(Err(TransportError::read(CHAT, "connection reset")))
            .expect("send");

        let failed = stream.next_event().await;
        assert!(matches!(
            failed,
            Some(StreamEvent::StreamFailed(StreamFailure::Transport(TransportError::Read { .. })))
        ));
        let message = stream.finish().await.expect("message");
        assert_eq!(
            message.text(),
            format!("partial answer\n{TRANSPORT_FALLBACK}")
        );
        assert_eq!(presentation.appended(), "partial answer");
        assert_eq!(presentation.count(|c| matches!(c, Call::StreamError(_))), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn status_error_replaces_empty_message() {
        let transport = Arc::new(FakeTransport::new());
        transport.push_stream_error(TransportError::status(CHAT, 503, "busy"));
        let presentation = Arc::new(RecordingPresentation::default());
        let mut stream =
            consumer(&transport, &presentation, StreamOptions::default()).stream(CHAT, json!({}), assistant());

        let events = collect(&mut stream).await;
        assert_eq!(events.len(), 1);
        assert!(events[0].is_terminal());
        let message = stream.finish().await.expect("message");
        assert_eq!(message.text(), TRANSPORT_FALLBACK);
        assert!(!message.is_loading());
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_stops_events_and_drain() {
        let transport = Arc::new(FakeTransport::new());
        let tx = transport.push_channel();
        let presentation = Arc::new(RecordingPresentation::default());
        let mut stream =
            consumer(&transport, &presentation, StreamOptions::default()).stream(CHAT, json!({}), assistant());

        tx.send(Ok(Bytes::from_static(b"abc"))).expect("send");
        assert_eq!(
            stream.next_event().await,
            Some(StreamEvent::TextAppended("abc".into()))
        );
        stream.abort_handle().abort();
        let _ = tx.send(Ok(Bytes::from_static(b"[STATUS:PROCESSING]")));
        let _ = tx.send(Ok(Bytes::from_static(b"more")));
        tokio::time::sleep(Duration::from_secs(1)).await;

        assert_eq!(stream.next_event().await, None);
        assert_eq!(presentation.appended(), "");
        assert_eq!(presentation.count(|c| matches!(c, Call::Status(_))), 0);
        assert_eq!(presentation.count(|c| matches!(c, Call::StreamEnd | Call::StreamError(_))), 0);

        let message = stream.finish().await.expect("message");
        assert_eq!(message.text(), "");
        assert!(!message.is_loading());
    }

    #[tokio::test(start_paused = true)]
    async fn dropping_the_handle_cancels() {
        let transport = Arc::new(FakeTransport::new());
        transport.push_chunks(&[b"never shown"]);
        let presentation = Arc::new(RecordingPresentation::default());
        let stream =
            consumer(&transport, &presentation, StreamOptions::default()).stream(CHAT, json!({}), assistant());
        drop(stream);

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(presentation.appended(), "");
        assert_eq!(presentation.count(|c| matches!(c, Call::StreamEnd)), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn buffered_reply_goes_through_the_drain_verbatim() {
        let transport = Arc::new(FakeTransport::new());
        transport.push_json(Ok(json!({"status": "success", "reply": "[STATUS:QUEUED] ok"})));
        let presentation = Arc::new(RecordingPresentation::default());
        let mut stream = consumer(&transport, &presentation, StreamOptions::default()).buffered(
            "/api/chats/ask-ai-admin",
            json!({"message": "hi"}),
            assistant(),
        );

        assert_eq!(
            collect(&mut stream).await,
            vec![
                StreamEvent::TextAppended("[STATUS:QUEUED] ok".into()),
                StreamEvent::StreamEnded,
            ]
        );
        assert_eq!(presentation.appended(), "[STATUS:QUEUED] ok");
    }

    #[tokio::test(start_paused = true)]
    async fn buffered_refusal_is_rejected() {
        let transport = Arc::new(FakeTransport::new());
        transport.push_json(Ok(json!({"status": "error", "message": "quota exceeded"})));
        let presentation = Arc::new(RecordingPresentation::default());
        let mut stream = consumer(&transport, &presentation, StreamOptions::default()).buffered(
            "/api/chats/ask-ai-admin",
            json!({"message": "hi"}),
            assistant(),
        );

        assert_eq!(
            collect(&mut stream).await,
            vec![StreamEvent::StreamFailed(StreamFailure::Rejected(
                "quota exceeded".into()
            ))]
        );
        let message = stream.finish().await.expect("message");
        assert_eq!(message.text(), "[Error: request rejected: quota exceeded]");
    }

    #[tokio::test(start_paused = true)]
    async fn metadata_frames_are_reported_when_enabled() {
        let transport = Arc::new(FakeTransport::new());
        transport.push_chunks(&[b"{\"session_id\": \"s1\", \"type\": \"meta\"}\n", b"Hi"]);
        let presentation = Arc::new(RecordingPresentation::default());
        let options = StreamOptions::default().with_metadata_frames(true);
        let mut stream = consumer(&transport, &presentation, options).stream(CHAT, json!({}), assistant());

        assert_eq!(
            collect(&mut stream).await,
            vec![
                StreamEvent::Metadata(json!({"session_id": "s1", "type": "meta"})),
                StreamEvent::TextAppended("Hi".into()),
                StreamEvent::StreamEnded,
            ]
        );
        assert_eq!(stream.finish().await.expect("message").text(), "Hi");
    }

    #[tokio::test(start_paused = true)]
    async fn unread_handle_does_not_stall_the_drain() {
        let transport = Arc::new(FakeTransport::new());
        let chunks: Vec<Vec<u8>> = (0..300).map(|_| b"abcd".to_vec()).collect();
        let slices: Vec<&[u8]> = chunks.iter().map(Vec::as_slice).collect();
        transport.push_chunks(&slices);
        let presentation = Arc::new(RecordingPresentation::default());
        let stream =
            consumer(&transport, &presentation, StreamOptions::default()).stream(CHAT, json!({}), assistant());

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(presentation.appended().chars().count(), 1200);
        assert_eq!(presentation.count(|c| matches!(c, Call::StreamEnd)), 1);

        let message = stream.finish().await.expect("message");
        assert_eq!(message.text().chars().count(), 1200);
    }

    #[tokio::test(start_paused = true)]
    async fn loading_survives_status_only_cancel() {
        let transport = Arc::new(FakeTransport::new());
        let tx = transport.push_channel();
        let presentation = Arc::new(RecordingPresentation::default());
        let mut stream =
            consumer(&transport, &presentation, StreamOptions::default()).stream(CHAT, json!({}), assistant());

        tx.send(Ok(Bytes::from_static(b"[STATUS:QUEUED]"))).expect("send");
        assert_eq!(
            stream.next_event().await,
            Some(StreamEvent::StatusChanged(Sentinel::Queued))
        );
        stream.abort_handle().abort();

        let message = stream.finish().await.expect("message");
        assert!(message.is_loading());
        assert_eq!(message.text(), "");
    }

    #[tokio::test(start_paused = true)]
    async fn first_payload_clears_loading_before_any_reveal() {
        let transport = Arc::new(FakeTransport::new());
        let tx = transport.push_channel();
        let presentation = Arc::new(RecordingPresentation::default());
        let mut stream =
            consumer(&transport, &presentation, StreamOptions::default()).stream(CHAT, json!({}), assistant());

        tx.send(Ok(Bytes::from_static(b"xyz"))).expect("send");
        assert_eq!(
            stream.next_event().await,
            Some(StreamEvent::TextAppended("xyz".into()))
        );
        stream.abort_handle().abort();

        let message = stream.finish().await.expect("message");
        assert!(!message.is_loading());
        assert_eq!(message.text(), "");
        assert_eq!(presentation.count(|c| matches!(c, Call::Append(_))), 0);
    }
}
