//! Line-oriented mobile client: stdin commands in, transcript lines out.
//!
//! Commands:
//!
//! ```text
//! /see <marker>            marker came into view
//! /lose <marker>           marker left the view
//! /select <marker|none>    pick or drop the subject by hand
//! /btn <key>               press a scripted prompt button
//! /prompts                 list the buttons
//! /quit                    leave
//! anything else            free text to the current subject
//! ```

use std::io;

use futures_util::{Stream, StreamExt};
use markerchat_core::gate::{GateTransition, MarkerEvent};
use markerchat_core::transcript::{Transcript, TranscriptEntry};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::connection::ConnectionEvent;
use crate::driver::Outbound;
use crate::driver::mobile::{ButtonError, MobileDriver};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsoleCommand {
    See(String),
    Lose(String),
    Select(Option<String>),
    Button(String),
    Prompts,
    Quit,
    Say(String),
    Empty,
    Invalid(String),
}

pub fn parse_command(line: &str) -> ConsoleCommand {
    let line = line.trim();
    if line.is_empty() {
        return ConsoleCommand::Empty;
    }
    let Some(rest) = line.strip_prefix('/') else {
        return ConsoleCommand::Say(line.to_string());
    };
    let mut parts = rest.split_whitespace();
    let name = parts.next().unwrap_or_default();
    let arg = parts.next().map(str::to_string);
    match (name, arg) {
        ("see", Some(m)) => ConsoleCommand::See(m),
        ("lose", Some(m)) => ConsoleCommand::Lose(m),
        ("select", Some(m)) if m == "none" => ConsoleCommand::Select(None),
        ("select", Some(m)) => ConsoleCommand::Select(Some(m)),
        ("btn", Some(k)) => ConsoleCommand::Button(k),
        ("prompts", None) => ConsoleCommand::Prompts,
        ("quit", None) => ConsoleCommand::Quit,
        ("see" | "lose" | "select" | "btn", None) => {
            ConsoleCommand::Invalid(format!("usage: /{name} <argument>"))
        }
        _ => ConsoleCommand::Invalid(format!("unknown command: {line}")),
    }
}

/// One transcript entry as a console line.
pub fn render_line(entry: &TranscriptEntry) -> String {
    if entry.is_notice() {
        format!("* {}", entry.content)
    } else if entry.own {
        format!("You: {}", entry.content)
    } else {
        entry.render()
    }
}

/// Tracks how much of a transcript has been printed.
#[derive(Debug, Default)]
pub struct TranscriptPrinter {
    generation: u64,
    printed: usize,
}

/// Entries not yet printed. `restarted` is set when the log was replaced
/// since the last call and the whole log is returned again.
#[derive(Debug)]
pub struct Pending<'a> {
    pub restarted: bool,
    pub entries: &'a [TranscriptEntry],
}

impl TranscriptPrinter {
    pub fn pending<'a>(&mut self, transcript: &'a Transcript) -> Pending<'a> {
        let restarted = transcript.generation() != self.generation;
        if restarted {
            self.generation = transcript.generation();
            self.printed = 0;
        }
        let entries = transcript.entries().get(self.printed..).unwrap_or(&[]);
        self.printed = transcript.len();
        Pending { restarted, entries }
    }
}

struct Console<W> {
    out: W,
    printer: TranscriptPrinter,
}

impl<W: AsyncWrite + Unpin> Console<W> {
    async fn line(&mut self, text: &str) -> io::Result<()> {
        self.out.write_all(text.as_bytes()).await?;
        self.out.write_all(b"\n").await?;
        self.out.flush().await
    }

    async fn flush_transcript(&mut self, transcript: &Transcript) -> io::Result<()> {
        let pending = self.printer.pending(transcript);
        let mut buf = String::new();
        if pending.restarted {
            buf.push_str("----\n");
        }
        for entry in pending.entries {
            buf.push_str(&render_line(entry));
            buf.push('\n');
        }
        if buf.is_empty() {
            return Ok(());
        }
        self.out.write_all(buf.as_bytes()).await?;
        self.out.flush().await
    }

    async fn after_transition<O: Outbound>(
        &mut self,
        driver: &MobileDriver<O>,
        transition: &GateTransition,
    ) -> io::Result<()> {
        self.flush_transcript(driver.transcript()).await?;
        match transition {
            GateTransition::Entered { .. } | GateTransition::Switched { .. } => {
                self.line(&prompt_hint(driver)).await
            }
            GateTransition::Left { .. } => self.line("(messaging hidden)").await,
            GateTransition::Unchanged | GateTransition::Ignored => Ok(()),
        }
    }
}

fn prompt_hint<O: Outbound>(driver: &MobileDriver<O>) -> String {
    let buttons: Vec<String> = driver.prompts().iter().map(|p| format!("/btn {}", p.key)).collect();
    format!("(buttons: {})", buttons.join(" | "))
}

/// Drive a mobile session from line input until `/quit`, the event stream
/// ends, or `cancel` fires. Input reaching EOF does not end the session;
/// frames and connection events keep flowing.
pub async fn run_mobile_console<O, E, R, W>(
    mut driver: MobileDriver<O>,
    mut events: E,
    mut markers: mpsc::Receiver<MarkerEvent>,
    input: R,
    out: W,
    cancel: CancellationToken,
) -> io::Result<MobileDriver<O>>
where
    O: Outbound,
    E: Stream<Item = ConnectionEvent> + Unpin,
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut console = Console {
        out,
        printer: TranscriptPrinter::default(),
    };
    let mut lines = input.lines();
    let mut input_open = true;
    let mut markers_open = true;

    loop {
        console.flush_transcript(driver.transcript()).await?;

        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            event = events.next() => match event {
                Some(event) => driver.handle_event(event),
                None => break,
            },
            marker = markers.recv(), if markers_open => match marker {
                Some(marker) => {
                    let transition = driver.handle_marker(&marker);
                    console.after_transition(&driver, &transition).await?;
                }
                None => markers_open = false,
            },
            line = lines.next_line(), if input_open => match line? {
                Some(line) => {
                    if !apply_command(&mut driver, &mut console, parse_command(&line)).await? {
                        break;
                    }
                }
                None => {
                    tracing::debug!("console input closed");
                    input_open = false;
                }
            },
        }
    }

    console.flush_transcript(driver.transcript()).await?;
    Ok(driver)
}

/// Returns `false` on `/quit`.
async fn apply_command<O, W>(
    driver: &mut MobileDriver<O>,
    console: &mut Console<W>,
    command: ConsoleCommand,
) -> io::Result<bool>
where
    O: Outbound,
    W: AsyncWrite + Unpin,
{
    match command {
        ConsoleCommand::See(m) => {
            let t = driver.handle_marker(&MarkerEvent::Detected(m));
            console.after_transition(driver, &t).await?;
        }
        ConsoleCommand::Lose(m) => {
            let t = driver.handle_marker(&MarkerEvent::Lost(m));
            console.after_transition(driver, &t).await?;
        }
        ConsoleCommand::Select(m) => {
            let t = driver.select_subject(m.as_deref());
            console.after_transition(driver, &t).await?;
        }
        ConsoleCommand::Button(key) => {
            // Gate rejections already left a notice in the transcript.
            if let Err(ButtonError::UnknownPrompt(key)) = driver.press_button(&key) {
                console.line(&format!("(no button {key:?}; try /prompts)")).await?;
            }
        }
        ConsoleCommand::Prompts => {
            for p in driver.prompts() {
                console.line(&format!("  {:<10} {}", p.key, p.text)).await?;
            }
        }
        ConsoleCommand::Say(text) => {
            if driver.submit_text(&text).is_err() {
                console.line(&format!("(not sent: {text})")).await?;
            }
        }
        ConsoleCommand::Quit => return Ok(false),
        ConsoleCommand::Empty => {}
        ConsoleCommand::Invalid(msg) => console.line(&format!("({msg})")).await?,
    }
    Ok(true)
}
