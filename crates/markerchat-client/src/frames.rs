//! Frame polling: feed per-frame marker visibility into the mobile driver.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::time::Duration;

use markerchat_core::frames::{Frame, FrameTracker};
use markerchat_core::gate::MarkerEvent;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

/// Anything that can report which markers are visible right now.
///
/// `None` means the source is exhausted and polling stops.
pub trait FrameSource: Send {
    fn next_frame(&mut self) -> Option<Frame>;
}

#[derive(Debug, Error)]
pub enum FrameFeedError {
    #[error("failed to read frames from {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("line {line}: {source}")]
    Parse {
        line: usize,
        #[source]
        source: serde_json::Error,
    },
}

/// Recorded frames, one `{"visible": [...]}` object per line.
#[derive(Debug, Clone, Default)]
pub struct JsonlFrames {
    frames: VecDeque<Frame>,
}

impl JsonlFrames {
    pub fn parse(text: &str) -> Result<Self, FrameFeedError> {
        let mut frames = VecDeque::new();
        for (idx, line) in text.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let frame: Frame = serde_json::from_str(line).map_err(|source| FrameFeedError::Parse {
                line: idx + 1,
                source,
            })?;
            frames.push_back(frame);
        }
        Ok(Self { frames })
    }

    pub fn load(path: &Path) -> Result<Self, FrameFeedError> {
        let text = std::fs::read_to_string(path).map_err(|source| FrameFeedError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&text)
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }
}

impl FrameSource for JsonlFrames {
    fn next_frame(&mut self) -> Option<Frame> {
        self.frames.pop_front()
    }
}

/// Poll `source` every `period` and forward the resulting detect/lose events.
/// Returns when the source runs dry, the receiver goes away, or `cancel`
/// fires.
pub async fn run_frame_poll<S: FrameSource>(
    mut source: S,
    tx: mpsc::Sender<MarkerEvent>,
    period: Duration,
    cancel: CancellationToken,
) {
    let mut tracker = FrameTracker::new();
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut polled: u64 = 0;

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }
        let Some(frame) = source.next_frame() else {
            tracing::info!(frames = polled, "frame source exhausted");
            break;
        };
        polled += 1;
        for event in tracker.observe(&frame) {
            if tx.send(event).await.is_err() {
                tracing::debug!("marker receiver dropped, stopping frame poll");
                return;
            }
        }
    }
}
