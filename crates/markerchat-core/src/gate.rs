//! Marker gate: which physical marker (and so which subject) the mobile role
//! is currently talking to, and whether an outbound message may be sent.
//!
//! State machine over `{NoSubject, Addressing(subject)}`:
//!
//! - detect `m` with no subject, or with a different subject: address `m`
//!   (the transcript is cleared and the new subject announced)
//! - detect the active subject again: no-op
//! - lose the active subject: back to `NoSubject`
//! - lose any other marker: ignored
//!
//! A switch from `A` to `B` never passes through `NoSubject`.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Discrete event emitted by the AR toolkit for one polled frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "marker", rename_all = "snake_case")]
pub enum MarkerEvent {
    Detected(String),
    Lost(String),
}

/// The currently addressed conversational counterpart.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MarkerSubject {
    name: String,
    fresh: bool,
}

impl MarkerSubject {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            fresh: true,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// True until the first message is sent to this subject.
    pub fn is_fresh(&self) -> bool {
        self.fresh
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateState {
    NoSubject,
    Addressing(MarkerSubject),
}

/// Outcome of feeding one event to the gate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateTransition {
    /// `NoSubject -> Addressing(subject)`.
    Entered { subject: String },
    /// `Addressing(from) -> Addressing(to)`.
    Switched { from: String, to: String },
    /// Re-detection of the active subject.
    Unchanged,
    /// `Addressing(subject) -> NoSubject`.
    Left { subject: String },
    /// Loss of a non-active marker, or detection of an unknown one.
    Ignored,
}

impl GateTransition {
    /// Whether the transcript must be cleared for the new subject.
    pub fn clears_transcript(&self) -> bool {
        matches!(self, GateTransition::Entered { .. } | GateTransition::Switched { .. })
    }

    /// Notice to append after the transition, if any.
    pub fn announcement(&self) -> Option<String> {
        match self {
            GateTransition::Entered { subject } | GateTransition::Switched { to: subject, .. } => {
                Some(format!("You are now talking to the {subject}!"))
            }
            _ => None,
        }
    }
}

/// Why an outbound message was rejected locally.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum GateViolation {
    #[error("Please point your camera at an animal first.")]
    NoSubject,
    #[error("Connection lost. Please wait...")]
    NotConnected,
}

#[derive(Debug, Clone)]
pub struct MarkerGate {
    /// Markers the toolkit is trained on. Empty accepts any marker.
    known: BTreeSet<String>,
    state: GateState,
}

impl MarkerGate {
    pub fn new<I, S>(known: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            known: known.into_iter().map(Into::into).collect(),
            state: GateState::NoSubject,
        }
    }

    pub fn state(&self) -> &GateState {
        &self.state
    }

    pub fn subject(&self) -> Option<&MarkerSubject> {
        match &self.state {
            GateState::Addressing(s) => Some(s),
            GateState::NoSubject => None,
        }
    }

    /// Whether the messaging affordance should be shown.
    pub fn messaging_visible(&self) -> bool {
        self.subject().is_some()
    }

    pub fn is_known(&self, marker: &str) -> bool {
        self.known.is_empty() || self.known.contains(marker)
    }

    pub fn apply(&mut self, event: &MarkerEvent) -> GateTransition {
        match event {
            MarkerEvent::Detected(m) => self.detect(m),
            MarkerEvent::Lost(m) => self.lose(m),
        }
    }

    pub fn detect(&mut self, marker: &str) -> GateTransition {
        if !self.is_known(marker) {
            return GateTransition::Ignored;
        }
        match &self.state {
            GateState::Addressing(current) if current.name == marker => GateTransition::Unchanged,
            GateState::Addressing(current) => {
                let from = current.name.clone();
                self.state = GateState::Addressing(MarkerSubject::new(marker));
                GateTransition::Switched {
                    from,
                    to: marker.to_string(),
                }
            }
            GateState::NoSubject => {
                self.state = GateState::Addressing(MarkerSubject::new(marker));
                GateTransition::Entered {
                    subject: marker.to_string(),
                }
            }
        }
    }

    pub fn lose(&mut self, marker: &str) -> GateTransition {
        match &self.state {
            GateState::Addressing(current) if current.name == marker => {
                let subject = current.name.clone();
                self.state = GateState::NoSubject;
                GateTransition::Left { subject }
            }
            _ => GateTransition::Ignored,
        }
    }

    /// Manual selection: `Some(m)` behaves like detecting `m`, `None` like
    /// losing whatever is active.
    pub fn select(&mut self, marker: Option<&str>) -> GateTransition {
        match marker {
            Some(m) => self.detect(m),
            None => match self.subject().map(|s| s.name.clone()) {
                Some(active) => self.lose(&active),
                None => GateTransition::Ignored,
            },
        }
    }

    /// Check both send preconditions. With neither met, `NoSubject` wins.
    pub fn check_send(&self, connected: bool) -> Result<&str, GateViolation> {
        let subject = self.subject().ok_or(GateViolation::NoSubject)?;
        if !connected {
            return Err(GateViolation::NotConnected);
        }
        Ok(subject.name())
    }

    /// Record that a message reached the active subject.
    pub fn mark_engaged(&mut self) {
        if let GateState::Addressing(subject) = &mut self.state {
            subject.fresh = false;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn gate() -> MarkerGate {
        MarkerGate::new(["elephant", "lizard"])
    }

    #[test]
    fn detect_from_empty_enters_and_clears() {
        let mut g = gate();
        let t = g.detect("elephant");
        assert_eq!(t, GateTransition::Entered { subject: "elephant".into() });
        assert!(t.clears_transcript());
        assert_eq!(t.announcement().as_deref(), Some("You are now talking to the elephant!"));
        assert!(g.messaging_visible());
        assert!(g.subject().unwrap().is_fresh());
    }

    #[test]
    fn redetect_is_a_noop() {
        let mut g = gate();
        g.detect("elephant");
        g.mark_engaged();
        assert_eq!(g.detect("elephant"), GateTransition::Unchanged);
        assert!(!g.subject().unwrap().is_fresh());
    }

    #[test]
    fn switch_goes_directly_to_new_subject() {
        let mut g = gate();
        g.detect("elephant");
        let t = g.detect("lizard");
        assert_eq!(
            t,
            GateTransition::Switched {
                from: "elephant".into(),
                to: "lizard".into(),
            }
        );
        assert!(t.clears_transcript());
        assert_eq!(g.subject().unwrap().name(), "lizard");
        assert!(g.subject().unwrap().is_fresh());
    }

    #[test]
    fn losing_active_marker_hides_messaging() {
        let mut g = gate();
        g.detect("lizard");
        assert_eq!(g.lose("lizard"), GateTransition::Left { subject: "lizard".into() });
        assert_eq!(g.state(), &GateState::NoSubject);
        assert!(!g.messaging_visible());
    }

    #[test]
    fn stale_loss_is_ignored() {
        let mut g = gate();
        g.detect("lizard");
        assert_eq!(g.lose("elephant"), GateTransition::Ignored);
        assert_eq!(g.subject().unwrap().name(), "lizard");
        assert_eq!(gate().lose("lizard"), GateTransition::Ignored);
    }

    #[test]
    fn unknown_marker_is_ignored() {
        let mut g = gate();
        assert_eq!(g.detect("giraffe"), GateTransition::Ignored);
        assert!(!g.messaging_visible());
    }

    #[test]
    fn empty_known_set_accepts_anything() {
        let mut g = MarkerGate::new(Vec::<String>::new());
        assert!(matches!(g.detect("giraffe"), GateTransition::Entered { .. }));
    }

    #[test]
    fn manual_selection_of_none_drops_subject() {
        let mut g = gate();
        assert!(matches!(g.select(Some("elephant")), GateTransition::Entered { .. }));
        assert_eq!(g.select(None), GateTransition::Left { subject: "elephant".into() });
        assert_eq!(g.select(None), GateTransition::Ignored);
    }

    #[test]
    fn send_gating_over_all_four_combinations() {
        let mut g = gate();
        assert_eq!(g.check_send(false), Err(GateViolation::NoSubject));
        assert_eq!(g.check_send(true), Err(GateViolation::NoSubject));
        g.detect("elephant");
        assert_eq!(g.check_send(false), Err(GateViolation::NotConnected));
        assert_eq!(g.check_send(true), Ok("elephant"));
    }

    #[test]
    fn violation_messages_are_distinct() {
        assert_ne!(GateViolation::NoSubject.to_string(), GateViolation::NotConnected.to_string());
    }

    #[test]
    fn marker_event_json_shape() {
        let json = serde_json::to_string(&MarkerEvent::Detected("elephant".into())).unwrap();
        assert_eq!(json, r#"{"event":"detected","marker":"elephant"}"#);
    }

    fn arb_event() -> impl Strategy<Value = MarkerEvent> {
        let name = prop_oneof![Just("elephant"), Just("lizard"), Just("giraffe")];
        (any::<bool>(), name).prop_map(|(detect, n)| {
            if detect {
                MarkerEvent::Detected(n.to_string())
            } else {
                MarkerEvent::Lost(n.to_string())
            }
        })
    }

    proptest! {
        #[test]
        fn detection_always_lands_on_the_detected_subject(events in prop::collection::vec(arb_event(), 0..60)) {
            let mut g = gate();
            for ev in &events {
                let before = g.subject().map(|s| s.name().to_string());
                let t = g.apply(ev);
                if let MarkerEvent::Detected(m) = ev {
                    if g.is_known(m) {
                        prop_assert_eq!(g.subject().map(|s| s.name()), Some(m.as_str()));
                        if let Some(prev) = before {
                            if &prev != m {
                                let is_switch = matches!(t, GateTransition::Switched { .. });
                                prop_assert!(is_switch);
                            }
                        }
                    }
                }
            }
        }
    }
}
