//! Ordered transcript of rendered entries for one session.
//!
//! The log only grows, with one exception: [`Transcript::replace`], which
//! swaps in a fully built log in one step. Nothing ever splices or removes a
//! single entry.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::message::{Message, MessageTag};

/// Label used for system notices.
pub const SYSTEM_LABEL: &str = "System";
/// Label used when a chat message names no sender.
pub const UNKNOWN_LABEL: &str = "Unknown";

/// Where a message entered the log from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    /// Received from the server.
    Remote,
    /// Composed on this device (sent messages, lifecycle notices).
    Local,
}

/// How an entry is classified as the local participant's own message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OwnershipRule {
    /// Own when the resolved label equals this display name.
    DisplayName(String),
    /// Own when a `user_message` was composed locally.
    LocalOrigin,
    /// Nothing is ever own.
    Nobody,
}

impl OwnershipRule {
    fn is_own(&self, tag: MessageTag, label: &str, origin: Origin) -> bool {
        match self {
            OwnershipRule::DisplayName(name) => !tag.is_system() && label == name,
            OwnershipRule::LocalOrigin => tag == MessageTag::UserMessage && origin == Origin::Local,
            OwnershipRule::Nobody => false,
        }
    }
}

/// One renderable line of the transcript.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TranscriptEntry {
    pub tag: MessageTag,
    pub label: String,
    pub content: String,
    pub own: bool,
    /// Set on entries that came from a `history` replay.
    pub historical: bool,
    pub received_at: DateTime<Utc>,
}

impl TranscriptEntry {
    /// `"<label>: <content>"`.
    pub fn render(&self) -> String {
        format!("{}: {}", self.label, self.content)
    }

    pub fn is_notice(&self) -> bool {
        self.tag.is_system()
    }

    /// Own messages are highlighted, except when replayed from history.
    pub fn highlighted(&self) -> bool {
        self.own && !self.historical
    }
}

/// Upper-case the first character: `"elephant"` -> `"Elephant"`.
pub fn capitalize(name: &str) -> String {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// Resolve the display label of a message: `username`, else the capitalized
/// `animal`, else a generic label.
pub fn resolve_label(message: &Message) -> String {
    let (username, animal) = match message {
        Message::NewMessage { username, .. } => (username.as_deref(), None),
        Message::UserMessage { username, animal, .. } => (username.as_deref(), animal.as_deref()),
        Message::AnimalResponse { animal, .. } => (None, Some(animal.as_str())),
        Message::System { .. } | Message::SystemNotification { .. } => return SYSTEM_LABEL.to_string(),
        Message::History { .. } => return SYSTEM_LABEL.to_string(),
    };
    match (username, animal) {
        (Some(name), _) if !name.is_empty() => name.to_string(),
        (_, Some(animal)) if !animal.is_empty() => capitalize(animal),
        _ => UNKNOWN_LABEL.to_string(),
    }
}

#[derive(Debug, Clone)]
pub struct Transcript {
    entries: Vec<TranscriptEntry>,
    ownership: OwnershipRule,
    /// Bumped on every replace.
    generation: u64,
}

impl Transcript {
    pub fn new(ownership: OwnershipRule) -> Self {
        Self {
            entries: Vec::new(),
            ownership,
            generation: 0,
        }
    }

    pub fn entries(&self) -> &[TranscriptEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn last(&self) -> Option<&TranscriptEntry> {
        self.entries.last()
    }

    /// Changes whenever the log is replaced, so incremental renderers know
    /// to start over instead of printing only the tail.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Every entry rendered as `"<label>: <content>"`, in order.
    pub fn rendered(&self) -> Vec<String> {
        self.entries.iter().map(TranscriptEntry::render).collect()
    }

    /// Append one message at the tail. A nested `history` has no single-line
    /// projection and is ignored; use [`Transcript::replace`] for it.
    pub fn append(&mut self, message: Message, origin: Origin) {
        if let Some(entry) = self.project(message, origin, false) {
            self.entries.push(entry);
        }
    }

    /// Clear the log and repopulate it from `messages`, in order, flagging
    /// every entry as historical. The new log is built before the old one is
    /// dropped, so no caller ever observes a half-replaced log.
    pub fn replace<I>(&mut self, messages: I)
    where
        I: IntoIterator<Item = Message>,
    {
        let fresh: Vec<TranscriptEntry> = messages
            .into_iter()
            .filter_map(|m| self.project(m, Origin::Remote, true))
            .collect();
        self.entries = fresh;
        self.generation += 1;
    }

    /// Empty the log. Used when the addressed subject changes.
    pub fn reset(&mut self) {
        self.replace(std::iter::empty());
    }

    fn project(&self, message: Message, origin: Origin, historical: bool) -> Option<TranscriptEntry> {
        let tag = message.tag();
        let label = resolve_label(&message);
        let content = match message {
            Message::History { .. } => return None,
            Message::NewMessage { message, .. } => message,
            Message::UserMessage { content, .. }
            | Message::AnimalResponse { content, .. }
            | Message::System { content }
            | Message::SystemNotification { content } => content,
        };
        let own = self.ownership.is_own(tag, &label, origin);
        Some(TranscriptEntry {
            tag,
            label,
            content,
            own,
            historical,
            received_at: Utc::now(),
        })
    }
}
