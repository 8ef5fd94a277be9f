//! Mobile role: the visitor's device, gated on the AR marker in view.

use std::time::Duration;

use markerchat_core::gate::{GateTransition, GateViolation, MarkerEvent, MarkerGate};
use markerchat_core::message::Message;
use markerchat_core::transcript::{Origin, OwnershipRule, Transcript};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::{Outbound, RenderPolicy, SessionView};
use crate::connection::{ConnectionEvent, ConnectionState};

pub const MOBILE_OPENED_NOTICE: &str = "Connected! Point your camera at an animal.";

/// One scripted button: `key` is sent as `content_key`, `text` as `content`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Prompt {
    pub key: String,
    pub text: String,
}

impl Prompt {
    pub fn new(key: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            text: text.into(),
        }
    }
}

/// The buttons the server has canned replies for.
pub fn default_prompts() -> Vec<Prompt> {
    vec![
        Prompt::new("hello", "Hello!"),
        Prompt::new("food", "What do you eat?"),
        Prompt::new("fun_fact", "Tell me a fun fact!"),
    ]
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ButtonError {
    #[error("no prompt with key {0:?}")]
    UnknownPrompt(String),
    #[error(transparent)]
    Rejected(#[from] GateViolation),
}

pub struct MobileDriver<O> {
    link: O,
    view: SessionView,
    gate: MarkerGate,
    prompts: Vec<Prompt>,
}

impl<O: Outbound> MobileDriver<O> {
    pub fn new<I, S>(link: O, markers: I, prompts: Vec<Prompt>, reconnect_delay: Duration) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            link,
            view: SessionView::new(
                OwnershipRule::LocalOrigin,
                RenderPolicy::mobile(),
                MOBILE_OPENED_NOTICE,
                reconnect_delay,
            ),
            gate: MarkerGate::new(markers),
            prompts,
        }
    }

    pub fn link(&self) -> &O {
        &self.link
    }

    pub fn transcript(&self) -> &Transcript {
        self.view.transcript()
    }

    pub fn gate(&self) -> &MarkerGate {
        &self.gate
    }

    pub fn prompts(&self) -> &[Prompt] {
        &self.prompts
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.link.state()
    }

    pub fn handle_event(&mut self, event: ConnectionEvent) {
        self.view.apply(event);
    }

    /// Feed one detect/lose event from the AR toolkit.
    pub fn handle_marker(&mut self, event: &MarkerEvent) -> GateTransition {
        let transition = self.gate.apply(event);
        self.after_transition(&transition);
        transition
    }

    /// Manual subject selection; `None` drops the current subject.
    pub fn select_subject(&mut self, marker: Option<&str>) -> GateTransition {
        let transition = self.gate.select(marker);
        self.after_transition(&transition);
        transition
    }

    fn after_transition(&mut self, transition: &GateTransition) {
        match transition {
            GateTransition::Entered { subject } => tracing::info!(%subject, "marker detected, messaging shown"),
            GateTransition::Switched { from, to } => tracing::info!(%from, %to, "marker switched"),
            GateTransition::Left { subject } => tracing::info!(%subject, "marker lost, messaging hidden"),
            GateTransition::Unchanged | GateTransition::Ignored => {}
        }
        if transition.clears_transcript() {
            self.view.transcript_mut().reset();
        }
        if let Some(announcement) = transition.announcement() {
            self.view.notice(announcement);
        }
    }

    /// Send a scripted prompt. On rejection the press is dropped; only the
    /// notice remains.
    pub fn press_button(&mut self, key: &str) -> Result<(), ButtonError> {
        let Some(prompt) = self.prompts.iter().find(|p| p.key == key).cloned() else {
            tracing::warn!(key, "unknown prompt key");
            return Err(ButtonError::UnknownPrompt(key.to_string()));
        };
        self.send_to_subject(prompt.text, Some(prompt.key))?;
        Ok(())
    }

    /// Send free text to the current subject. The caller's input is only
    /// borrowed, so it survives a rejection.
    pub fn submit_text(&mut self, text: &str) -> Result<(), GateViolation> {
        let content = text.trim();
        if content.is_empty() {
            return Ok(());
        }
        self.send_to_subject(content.to_string(), None)
    }

    fn send_to_subject(&mut self, content: String, content_key: Option<String>) -> Result<(), GateViolation> {
        let connected = self.link.state() == ConnectionState::Open;
        let subject = match self.gate.check_send(connected) {
            Ok(subject) => subject.to_string(),
            Err(violation) => return Err(self.reject(violation)),
        };
        let message = Message::UserMessage {
            username: None,
            animal: Some(subject),
            content,
            content_key,
        };
        if !self.link.send(&message) {
            return Err(self.reject(GateViolation::NotConnected));
        }
        self.gate.mark_engaged();
        // The server never echoes our own message back to us.
        self.view.transcript_mut().append(message, Origin::Local);
        Ok(())
    }

    fn reject(&mut self, violation: GateViolation) -> GateViolation {
        tracing::warn!(%violation, "mobile send rejected");
        self.view.notice(violation.to_string());
        violation
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::testing::RecordingLink;

    fn driver(state: ConnectionState) -> MobileDriver<RecordingLink> {
        MobileDriver::new(
            RecordingLink::new(state),
            ["elephant", "lizard"],
            default_prompts(),
            Duration::from_secs(3),
        )
    }

    fn detected(m: &str) -> MarkerEvent {
        MarkerEvent::Detected(m.into())
    }

    fn chat_lines(d: &MobileDriver<RecordingLink>) -> Vec<String> {
        d.transcript()
            .entries()
            .iter()
            .filter(|e| !e.is_notice())
            .map(|e| e.render())
            .collect()
    }

    #[test]
    fn animal_response_is_labelled_with_capitalized_subject() {
        let mut d = driver(ConnectionState::Open);
        d.handle_event(ConnectionEvent::Opened);
        d.handle_event(ConnectionEvent::MessageReceived(Message::parse_lenient(
            r#"{"type":"animal_response","animal":"elephant","content":"Hello"}"#,
        )));
        assert_eq!(chat_lines(&d), vec!["Elephant: Hello"]);
    }

    #[test]
    fn detection_clears_transcript_and_announces() {
        let mut d = driver(ConnectionState::Open);
        d.handle_event(ConnectionEvent::Opened);
        d.handle_marker(&detected("elephant"));
        assert_eq!(
            d.transcript().rendered(),
            vec!["System: You are now talking to the elephant!"]
        );
        // Re-detection on the next frame changes nothing.
        d.handle_marker(&detected("elephant"));
        assert_eq!(d.transcript().len(), 1);
    }

    #[test]
    fn switching_subject_starts_a_new_conversation() {
        let mut d = driver(ConnectionState::Open);
        d.handle_marker(&detected("elephant"));
        d.press_button("hello").unwrap();
        d.handle_marker(&detected("lizard"));
        assert_eq!(
            d.transcript().rendered(),
            vec!["System: You are now talking to the lizard!"]
        );
        assert_eq!(d.gate().subject().unwrap().name(), "lizard");
    }

    #[test]
    fn button_sends_scripted_prompt_and_echoes_locally() {
        let mut d = driver(ConnectionState::Open);
        d.handle_marker(&detected("lizard"));
        d.press_button("food").unwrap();

        assert_eq!(
            d.link().sent.borrow().as_slice(),
            &[Message::UserMessage {
                username: None,
                animal: Some("lizard".into()),
                content: "What do you eat?".into(),
                content_key: Some("food".into()),
            }]
        );
        let last = d.transcript().last().unwrap();
        assert!(last.own);
        assert_eq!(last.content, "What do you eat?");
        assert!(!d.gate().subject().unwrap().is_fresh());
    }

    #[test]
    fn send_gating_reports_which_precondition_failed() {
        // (connected, subject) -> expected outcome
        let cases = [
            (false, false, Err(GateViolation::NoSubject)),
            (true, false, Err(GateViolation::NoSubject)),
            (false, true, Err(GateViolation::NotConnected)),
            (true, true, Ok(())),
        ];
        for (connected, subject, expected) in cases {
            let state = if connected { ConnectionState::Open } else { ConnectionState::Closed };
            let mut d = driver(state);
            if subject {
                d.handle_marker(&detected("elephant"));
            }
            let before = d.transcript().len();
            let outcome = d.submit_text("are you awake?");
            assert_eq!(outcome, expected, "connected={connected} subject={subject}");
            match expected {
                Ok(()) => assert_eq!(d.link().sent.borrow().len(), 1),
                Err(v) => {
                    assert!(d.link().sent.borrow().is_empty());
                    assert_eq!(d.transcript().len(), before + 1);
                    assert_eq!(d.transcript().last().unwrap().content, v.to_string());
                }
            }
        }
    }

    #[test]
    fn rejected_button_press_is_dropped() {
        let mut d = driver(ConnectionState::Open);
        assert_eq!(
            d.press_button("hello"),
            Err(ButtonError::Rejected(GateViolation::NoSubject))
        );
        assert!(d.link().sent.borrow().is_empty());
        assert!(d.transcript().entries().iter().all(|e| e.is_notice()));
    }

    #[test]
    fn unknown_button_is_reported() {
        let mut d = driver(ConnectionState::Open);
        d.handle_marker(&detected("elephant"));
        assert_eq!(
            d.press_button("dance"),
            Err(ButtonError::UnknownPrompt("dance".into()))
        );
    }

    #[test]
    fn losing_marker_blocks_sends() {
        let mut d = driver(ConnectionState::Open);
        d.handle_marker(&detected("elephant"));
        d.handle_marker(&MarkerEvent::Lost("lizard".into()));
        assert!(d.gate().messaging_visible());
        d.handle_marker(&MarkerEvent::Lost("elephant".into()));
        assert!(!d.gate().messaging_visible());
        assert_eq!(d.submit_text("hi"), Err(GateViolation::NoSubject));
    }

    #[test]
    fn manual_selection_drives_the_gate() {
        let mut d = driver(ConnectionState::Open);
        d.select_subject(Some("lizard"));
        d.submit_text("hi").unwrap();
        d.select_subject(None);
        assert_eq!(d.submit_text("hi"), Err(GateViolation::NoSubject));
    }

    #[test]
    fn own_messages_from_server_are_not_rendered() {
        let mut d = driver(ConnectionState::Open);
        d.handle_marker(&detected("elephant"));
        d.handle_event(ConnectionEvent::MessageReceived(Message::UserMessage {
            username: None,
            animal: Some("elephant".into()),
            content: "Hello!".into(),
            content_key: Some("hello".into()),
        }));
        assert_eq!(d.transcript().len(), 1);
    }
}
