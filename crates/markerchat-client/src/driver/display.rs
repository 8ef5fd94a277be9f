//! Display role: the stationary surface showing the live transcript.

use std::time::Duration;

use markerchat_core::endpoint::Endpoint;
use markerchat_core::gate::GateViolation;
use markerchat_core::message::Message;
use markerchat_core::transcript::{OwnershipRule, Transcript};

use super::{Outbound, RenderPolicy, SessionView};
use crate::connection::{ConnectionEvent, ConnectionState};

pub const DISPLAY_OPENED_NOTICE: &str = "Listening for messages...";

pub struct DisplayDriver<O> {
    link: O,
    view: SessionView,
    display_name: String,
}

impl<O: Outbound> DisplayDriver<O> {
    pub fn new(link: O, policy: RenderPolicy, display_name: impl Into<String>, reconnect_delay: Duration) -> Self {
        let display_name = display_name.into();
        Self {
            link,
            view: SessionView::new(
                OwnershipRule::DisplayName(display_name.clone()),
                policy,
                DISPLAY_OPENED_NOTICE,
                reconnect_delay,
            ),
            display_name,
        }
    }

    /// Pick the render policy from the endpoint: shared room or one session.
    pub fn for_endpoint(
        link: O,
        endpoint: &Endpoint,
        display_name: impl Into<String>,
        reconnect_delay: Duration,
    ) -> Self {
        let policy = match endpoint {
            Endpoint::SharedRoom { .. } => RenderPolicy::shared_room_display(),
            Endpoint::Session { .. } => RenderPolicy::session_display(),
        };
        Self::new(link, policy, display_name, reconnect_delay)
    }

    pub fn link(&self) -> &O {
        &self.link
    }

    pub fn transcript(&self) -> &Transcript {
        self.view.transcript()
    }

    pub fn display_name(&self) -> &str {
        &self.display_name
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.link.state()
    }

    pub fn handle_event(&mut self, event: ConnectionEvent) {
        self.view.apply(event);
    }

    /// Send free text under the local display name. Nothing is appended
    /// locally: the server echoes the message back to every participant.
    ///
    /// On rejection the caller keeps its input; a notice explains why.
    pub fn submit_text(&mut self, text: &str) -> Result<(), GateViolation> {
        let content = text.trim();
        if content.is_empty() {
            return Ok(());
        }
        if self.link.state() != ConnectionState::Open {
            return Err(self.reject(GateViolation::NotConnected));
        }
        let message = Message::UserMessage {
            username: Some(self.display_name.clone()),
            animal: None,
            content: content.to_string(),
            content_key: None,
        };
        if !self.link.send(&message) {
            return Err(self.reject(GateViolation::NotConnected));
        }
        tracing::debug!(len = content.len(), "display message sent");
        Ok(())
    }

    fn reject(&mut self, violation: GateViolation) -> GateViolation {
        tracing::warn!(%violation, "display send rejected");
        self.view.notice(violation.to_string());
        violation
    }
}
