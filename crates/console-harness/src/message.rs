use std::fmt;

/// Author of a conversation turn.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// The operator typing into the console.
    User,
    /// The model answering through the stream.
    Assistant,
}

/// Creation-order identity of a message within one `Conversation`.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize,
)]
pub struct MessageId(pub u64);

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// One turn of a conversation.
///
/// Assistant messages start in the loading state; the first payload fragment
/// clears it and nothing sets it again. Text only grows while a stream owns
/// the message.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Message {
    id: MessageId,
    role: Role,
    text: String,
    loading: bool,
}

impl Message {
    /// Creates a finished user message.
    pub fn user(id: MessageId, text: impl Into<String>) -> Self {
        Self {
            id,
            role: Role::User,
            text: text.into(),
            loading: false,
        }
    }

    /// Creates an empty assistant message waiting for its first fragment.
    pub fn pending_assistant(id: MessageId) -> Self {
        Self {
            id,
            role: Role::Assistant,
            text: String::new(),
            loading: true,
        }
    }

    pub fn id(&self) -> MessageId {
        self.id
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn is_loading(&self) -> bool {
        self.loading
    }

    /// Leaves the loading state. Returns true only for the call that actually
    /// made the transition.
    pub(crate) fn clear_loading(&mut self) -> bool {
        std::mem::replace(&mut self.loading, false)
    }

    pub(crate) fn push_char(&mut self, ch: char) {
        self.text.push(ch);
    }

    /// Applies the failure fallback: replaces an empty text, otherwise appends
    /// on a new line. Loading is forced off either way.
    pub(crate) fn fail_with(&mut self, fallback: &str) {
        self.loading = false;
        if self.text.is_empty() {
            self.text.push_str(fallback);
        } else {
            self.text.push('\n');
            self.text.push_str(fallback);
        }
    }
}

/// Ordered transcript of one console chat plus its id allocator.
#[derive(Clone, Debug, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Conversation {
    messages: Vec<Message>,
    next_id: u64,
}

impl Conversation {
    pub fn new() -> Self {
        Self::default()
    }

    fn allocate(&mut self) -> MessageId {
        self.next_id += 1;
        MessageId(self.next_id)
    }

    /// Records the operator's prompt.
    pub fn push_user(&mut self, text: impl Into<String>) -> MessageId {
        let id = self.allocate();
        self.messages.push(Message::user(id, text));
        id
    }

    /// Allocates the next assistant turn. The returned message is owned by
    /// whichever stream fills it and comes back through `commit`.
    pub fn begin_assistant(&mut self) -> Message {
        Message::pending_assistant(self.allocate())
    }

    /// Stores a finished assistant message in creation order.
    pub fn commit(&mut self, message: Message) {
        let at = self
            .messages
            .partition_point(|existing| existing.id() < message.id());
        self.messages.insert(at, message);
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn last(&self) -> Option<&Message> {
        self.messages.last()
    }
}
