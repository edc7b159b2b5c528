//! Sentinel vocabulary and chunk reassembly for the chat byte stream.
//!
//! The upstream interleaves bracketed control tokens with free-form answer
//! text in one `text/plain` body. Detection is substring containment: any
//! segment that contains a token is treated as control as a whole. A
//! legitimate answer quoting a token verbatim is misclassified; the upstream
//! offers no framing that would let us do better.

/// Control token embedded in the chat stream.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Sentinel {
    /// Every generation slot is taken; the request is queued.
    Queued,
    /// A slot was acquired; waiting for the processing turn.
    WaitingList,
    /// Generation has started.
    Processing,
    /// Keep-alive without a visible status change.
    Heartbeat,
}

impl Sentinel {
    /// Every token in the vocabulary.
    pub const ALL: [Sentinel; 4] = [
        Sentinel::Queued,
        Sentinel::WaitingList,
        Sentinel::Processing,
        Sentinel::Heartbeat,
    ];

    /// Literal wire text of the token.
    pub fn token(self) -> &'static str {
        match self {
            Sentinel::Queued => "[STATUS:QUEUED]",
            Sentinel::WaitingList => "[STATUS:WAITING_LIST]",
            Sentinel::Processing => "[STATUS:PROCESSING]",
            Sentinel::Heartbeat => "[HEARTBEAT]",
        }
    }

    /// Human-readable status label; `None` for the heartbeat.
    pub fn label(self) -> Option<&'static str> {
        match self {
            Sentinel::Queued => Some("all servers busy, queued"),
            Sentinel::WaitingList => Some("slot acquired, waiting for processing turn"),
            Sentinel::Processing => Some("slot free, generating response"),
            Sentinel::Heartbeat => None,
        }
    }

    /// Returns every token occurrence in `segment`, ordered by position.
    pub fn scan(segment: &str) -> Vec<Sentinel> {
        let mut found: Vec<(usize, Sentinel)> = Vec::new();
        for sentinel in Self::ALL {
            found.extend(
                segment
                    .match_indices(sentinel.token())
                    .map(|(idx, _)| (idx, sentinel)),
            );
        }
        found.sort_by_key(|(idx, _)| *idx);
        found.into_iter().map(|(_, sentinel)| sentinel).collect()
    }
}

fn longest_token_len() -> usize {
    Sentinel::ALL
        .iter()
        .map(|s| s.token().len())
        .max()
        .unwrap_or(0)
}

/// Classification of one reassembled segment.
#[derive(Clone, Debug, PartialEq)]
pub enum Segment {
    /// Control-only segment; carries the tokens it contained.
    Control(Vec<Sentinel>),
    /// JSON metadata line (only produced when metadata frames are enabled).
    Metadata(serde_json::Value),
    /// Answer text, verbatim.
    Payload(String),
}

/// Classifies a non-empty decoded segment.
///
/// Whitespace-only text is payload.
pub fn classify(segment: String, metadata_frames: bool) -> Segment {
    let sentinels = Sentinel::scan(&segment);
    if !sentinels.is_empty() {
        return Segment::Control(sentinels);
    }
    if metadata_frames && let Some(value) = parse_metadata(&segment) {
        return Segment::Metadata(value);
    }
    Segment::Payload(segment)
}

fn parse_metadata(segment: &str) -> Option<serde_json::Value> {
    let trimmed = segment.trim();
    if !trimmed.starts_with('{') {
        return None;
    }
    let value: serde_json::Value = serde_json::from_str(trimmed).ok()?;
    value.get("type")?;
    Some(value)
}

/// Reassembles arbitrarily split chunks into decoded segments.
///
/// Incomplete UTF-8 sequences and text that could still grow into a sentinel
/// are carried over to the next chunk, so a token or a multi-byte character
/// split across reads is seen whole.
#[derive(Debug, Default)]
pub struct SegmentDecoder {
    bytes: Vec<u8>,
    held: String,
}

impl SegmentDecoder {
    /// Feeds one chunk and returns the segment that is safe to classify, if
    /// any.
    pub fn push_chunk(&mut self, chunk: &[u8]) -> Option<String> {
        self.bytes.extend_from_slice(chunk);
        let mut text = std::mem::take(&mut self.held);
        decode_complete(&mut self.bytes, &mut text);

        let split = hold_back_point(&text);
        self.held = text.split_off(split);
        (!text.is_empty()).then_some(text)
    }

    /// Flushes everything still held at end of stream.
    pub fn finish(&mut self) -> Option<String> {
        let mut text = std::mem::take(&mut self.held);
        if !self.bytes.is_empty() {
            text.push_str(&String::from_utf8_lossy(&self.bytes));
            self.bytes.clear();
        }
        (!text.is_empty()).then_some(text)
    }
}

/// Moves every complete UTF-8 sequence from `bytes` into `out`, replacing
/// invalid sequences with U+FFFD and keeping an incomplete tail.
fn decode_complete(bytes: &mut Vec<u8>, out: &mut String) {
    let mut consumed = 0;
    loop {
        match std::str::from_utf8(&bytes[consumed..]) {
            Ok(valid) => {
                out.push_str(valid);
                consumed = bytes.len();
                break;
            }
            Err(err) => {
                let valid_up_to = consumed + err.valid_up_to();
                // Validated just above.
                out.push_str(std::str::from_utf8(&bytes[consumed..valid_up_to]).unwrap_or_default());
                match err.error_len() {
                    Some(len) => {
                        out.push(char::REPLACEMENT_CHARACTER);
                        consumed = valid_up_to + len;
                    }
                    None => {
                        consumed = valid_up_to;
                        break;
                    }
                }
            }
        }
    }
    bytes.drain(..consumed);
}

/// Byte offset from which `text` must be held back because its tail is a
/// strict prefix of some sentinel token.
fn hold_back_point(text: &str) -> usize {
    let window = longest_token_len().saturating_sub(1);
    let start = text.len().saturating_sub(window);
    for (idx, ch) in text.char_indices() {
        if idx < start || ch != '[' {
            continue;
        }
        let tail = &text[idx..];
        if Sentinel::ALL
            .iter()
            .any(|s| s.token().len() > tail.len() && s.token().starts_with(tail))
        {
            return idx;
        }
    }
    text.len()
}
