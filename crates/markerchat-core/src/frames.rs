//! Per-frame marker visibility turned into discrete detect/lose events.
//!
//! The AR toolkit reports, for each processed video frame, which trained
//! markers are visible. Like the toolkit's own callbacks, every visible marker
//! produces a detection on every frame, and a marker that was visible on the
//! previous frame but not this one produces a loss. Detections are emitted
//! before losses so that a frame which swaps marker A for marker B switches
//! the gate straight from A to B.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::gate::MarkerEvent;

/// Markers visible in one processed frame.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Frame {
    #[serde(default)]
    pub visible: Vec<String>,
}

impl Frame {
    pub fn new<I, S>(visible: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            visible: visible.into_iter().map(Into::into).collect(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct FrameTracker {
    previous: BTreeSet<String>,
}

impl FrameTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn observe(&mut self, frame: &Frame) -> Vec<MarkerEvent> {
        let current: BTreeSet<String> = frame.visible.iter().cloned().collect();
        let mut events: Vec<MarkerEvent> = current.iter().cloned().map(MarkerEvent::Detected).collect();
        events.extend(self.previous.difference(&current).cloned().map(MarkerEvent::Lost));
        self.previous = current;
        events
    }
}
