use crate::models::{Message, Sender};

/// A rendered transcript line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranscriptEntry {
    pub sender: Sender,
    pub content: String,
    /// Inline system line reporting a failed exchange.
    pub error: bool,
}

impl TranscriptEntry {
    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Sender::User, content, false)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Sender::Assistant, content, false)
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Sender::System, content, false)
    }

    pub fn error(content: impl Into<String>) -> Self {
        Self::new(Sender::System, content, true)
    }

    fn new(sender: Sender, content: impl Into<String>, error: bool) -> Self {
        Self {
            sender,
            content: content.into(),
            error,
        }
    }
}

impl From<Message> for TranscriptEntry {
    fn from(message: Message) -> Self {
        Self::new(message.sender, message.content, false)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeLevel {
    Info,
    Warning,
    Error,
}

/// A transient user-visible notice.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    pub level: NoticeLevel,
    pub text: String,
}

/// The rendered conversation. `revision` changes whenever the whole transcript
/// is replaced, so a renderer knows to redraw rather than append.
#[derive(Debug, Default)]
pub struct Transcript {
    entries: Vec<TranscriptEntry>,
    revision: u64,
}

impl Transcript {
    pub fn entries(&self) -> &[TranscriptEntry] {
        &self.entries
    }

    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn push(&mut self, entry: TranscriptEntry) {
        self.entries.push(entry);
    }

    pub fn replace(&mut self, entries: Vec<TranscriptEntry>) {
        self.entries = entries;
        self.revision += 1;
    }

    pub fn clear(&mut self) {
        self.replace(Vec::new());
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
