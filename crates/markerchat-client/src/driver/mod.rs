//! Role drivers: fold connection events into the transcript and turn user
//! input into outbound messages.
//!
//! Both roles share [`SessionView`]; what differs between them is expressed
//! as a [`RenderPolicy`] and the lifecycle notices, not as separate state
//! machines.

pub mod display;
pub mod mobile;

use std::time::Duration;

use markerchat_core::message::{Message, MessageTag};
use markerchat_core::transcript::{Origin, OwnershipRule, Transcript};

use crate::connection::{ConnectionEvent, ConnectionHandle, ConnectionState};

/// The sending side a driver talks to. Implemented by [`ConnectionHandle`];
/// tests substitute a recording fake.
pub trait Outbound {
    fn state(&self) -> ConnectionState;
    /// Queue `message`; `false` when it was dropped.
    fn send(&self, message: &Message) -> bool;
}

impl Outbound for ConnectionHandle {
    fn state(&self) -> ConnectionState {
        ConnectionHandle::state(self)
    }

    fn send(&self, message: &Message) -> bool {
        ConnectionHandle::send(self, message)
    }
}

/// Which inbound tags a role renders. System notices are always rendered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderPolicy {
    tags: Vec<MessageTag>,
}

impl RenderPolicy {
    pub fn new(tags: impl IntoIterator<Item = MessageTag>) -> Self {
        Self {
            tags: tags.into_iter().collect(),
        }
    }

    /// Mobile: only counterpart replies. Its own messages are echoed locally.
    pub fn mobile() -> Self {
        Self::new([MessageTag::AnimalResponse])
    }

    /// Display bound to the shared room.
    pub fn shared_room_display() -> Self {
        Self::new([MessageTag::History, MessageTag::NewMessage])
    }

    /// Display bound to one session: also shows the visitor's messages and
    /// the counterpart's replies.
    pub fn session_display() -> Self {
        Self::new([
            MessageTag::History,
            MessageTag::NewMessage,
            MessageTag::UserMessage,
            MessageTag::AnimalResponse,
        ])
    }

    pub fn renders(&self, tag: MessageTag) -> bool {
        tag.is_system() || self.tags.contains(&tag)
    }
}

/// `"3s"` for whole seconds, `"250ms"` otherwise.
pub(crate) fn format_delay(delay: Duration) -> String {
    if delay.subsec_millis() == 0 && delay.as_secs() > 0 {
        format!("{}s", delay.as_secs())
    } else {
        format!("{}ms", delay.as_millis())
    }
}

/// Transcript plus the policy that decides what reaches it.
#[derive(Debug, Clone)]
pub struct SessionView {
    transcript: Transcript,
    policy: RenderPolicy,
    opened_notice: String,
    reconnect_delay: Duration,
}

impl SessionView {
    pub fn new(
        ownership: OwnershipRule,
        policy: RenderPolicy,
        opened_notice: impl Into<String>,
        reconnect_delay: Duration,
    ) -> Self {
        Self {
            transcript: Transcript::new(ownership),
            policy,
            opened_notice: opened_notice.into(),
            reconnect_delay,
        }
    }

    pub fn transcript(&self) -> &Transcript {
        &self.transcript
    }

    pub(crate) fn transcript_mut(&mut self) -> &mut Transcript {
        &mut self.transcript
    }

    pub fn notice(&mut self, content: impl Into<String>) {
        self.transcript
            .append(Message::system_notification(content), Origin::Local);
    }

    /// Fold one connection event into the transcript.
    pub fn apply(&mut self, event: ConnectionEvent) {
        match event {
            ConnectionEvent::Opened => {
                let notice = self.opened_notice.clone();
                self.notice(notice);
            }
            ConnectionEvent::MessageReceived(message) => self.receive(message),
            ConnectionEvent::Closed(reason) => {
                tracing::debug!(%reason, "folding close into transcript");
                let delay = format_delay(self.reconnect_delay);
                self.notice(format!("Connection closed. Reconnecting in {delay}..."));
            }
            // The close that follows carries the notice.
            ConnectionEvent::Error(detail) => {
                tracing::warn!(error = %detail, "connection error");
            }
            ConnectionEvent::Reconnecting { attempt } => {
                self.notice(format!("Reconnecting (attempt {attempt})..."));
            }
        }
    }

    fn receive(&mut self, message: Message) {
        let tag = message.tag();
        if !self.policy.renders(tag) {
            tracing::debug!(%tag, "message not rendered by this role");
            return;
        }
        match message {
            Message::History { data } => {
                tracing::info!(count = data.len(), "chat history loaded");
                self.transcript.replace(data);
            }
            other => self.transcript.append(other, Origin::Remote),
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::cell::{Cell, RefCell};

    use super::*;

    /// Outbound fake that records what was sent.
    #[derive(Debug)]
    pub struct RecordingLink {
        pub state: Cell<ConnectionState>,
        pub sent: RefCell<Vec<Message>>,
    }

    impl RecordingLink {
        pub fn new(state: ConnectionState) -> Self {
            Self {
                state: Cell::new(state),
                sent: RefCell::new(Vec::new()),
            }
        }
    }

    impl Outbound for RecordingLink {
        fn state(&self) -> ConnectionState {
            self.state.get()
        }

        fn send(&self, message: &Message) -> bool {
            if self.state.get() != ConnectionState::Open {
                return false;
            }
            self.sent.borrow_mut().push(message.clone());
            true
        }
    }
}
