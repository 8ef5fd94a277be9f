use std::io;
use std::time::Duration;

use chrono::Local;
use crossterm::event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers};
use crossterm::execute;
use crossterm::terminal::{EnterAlternateScreen, LeaveAlternateScreen, disable_raw_mode, enable_raw_mode};
use futures_util::{Stream, StreamExt};
use markerchat_core::transcript::TranscriptEntry;
use ratatui::prelude::*;
use ratatui::widgets::*;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tokio_util::sync::CancellationToken;

use crate::connection::{ConnectionEvent, ConnectionState};
use crate::console::TranscriptPrinter;
use crate::driver::Outbound;
use crate::driver::display::DisplayDriver;

// ---------------------------------------------------------------------------
// Terminal cleanup guard
// ---------------------------------------------------------------------------

/// Restores the terminal when dropped, including on panic and early `?`.
struct TerminalGuard;

impl Drop for TerminalGuard {
    fn drop(&mut self) {
        let _ = disable_raw_mode();
        let _ = execute!(io::stdout(), LeaveAlternateScreen);
    }
}

// ---------------------------------------------------------------------------
// App state
// ---------------------------------------------------------------------------

struct App<O> {
    driver: DisplayDriver<O>,
    /// Shown in the title bar for an external QR renderer.
    companion_url: Option<String>,
    /// `Some` while the compose box is open.
    compose: Option<String>,
    should_quit: bool,
}

impl<O: Outbound> App<O> {
    fn new(driver: DisplayDriver<O>, companion_url: Option<String>) -> Self {
        Self {
            driver,
            companion_url,
            compose: None,
            should_quit: false,
        }
    }

    fn on_key(&mut self, key: KeyEvent) {
        if key.code == KeyCode::Char('c') && key.modifiers.contains(KeyModifiers::CONTROL) {
            self.should_quit = true;
            return;
        }
        let Some(buf) = self.compose.as_mut() else {
            match key.code {
                KeyCode::Char('q') | KeyCode::Esc => self.should_quit = true,
                KeyCode::Char('i') => self.compose = Some(String::new()),
                _ => {}
            }
            return;
        };
        match key.code {
            KeyCode::Esc => self.compose = None,
            KeyCode::Backspace => {
                buf.pop();
            }
            KeyCode::Char(c) => buf.push(c),
            KeyCode::Enter => {
                let text = buf.clone();
                // A rejected message stays in the box.
                if self.driver.submit_text(&text).is_ok() {
                    self.compose = None;
                }
            }
            _ => {}
        }
    }
}

// ---------------------------------------------------------------------------
// Entry points
// ---------------------------------------------------------------------------

/// Run the full-screen display until `q`, Ctrl+C, or `cancel`.
pub async fn run_display_tui<O, E>(
    driver: DisplayDriver<O>,
    mut events: E,
    companion_url: Option<String>,
    cancel: CancellationToken,
) -> io::Result<()>
where
    O: Outbound,
    E: Stream<Item = ConnectionEvent> + Unpin,
{
    let mut app = App::new(driver, companion_url);

    enable_raw_mode()?;
    let _guard = TerminalGuard;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen)?;
    let mut terminal = Terminal::new(CrosstermBackend::new(stdout))?;

    loop {
        terminal.draw(|frame| render(frame, &app))?;

        if app.should_quit {
            break;
        }

        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(Duration::from_millis(50)) => {
                while event::poll(Duration::from_millis(0))? {
                    if let Event::Key(key) = event::read()? {
                        if key.kind == KeyEventKind::Press {
                            app.on_key(key);
                        }
                    }
                }
            }
            event = events.next() => match event {
                Some(event) => app.driver.handle_event(event),
                None => break,
            },
        }
    }

    terminal.show_cursor()?;
    Ok(())
}

/// Line-printing display for terminals without a TUI. Input lines are sent
/// as chat messages.
pub async fn run_display_plain<O, E, R, W>(
    mut driver: DisplayDriver<O>,
    mut events: E,
    input: R,
    mut out: W,
    cancel: CancellationToken,
) -> io::Result<()>
where
    O: Outbound,
    E: Stream<Item = ConnectionEvent> + Unpin,
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut printer = TranscriptPrinter::default();
    let mut lines = input.lines();
    let mut input_open = true;

    loop {
        let pending = printer.pending(driver.transcript());
        let mut buf = String::new();
        if pending.restarted {
            buf.push_str("----\n");
        }
        for entry in pending.entries {
            buf.push_str(&plain_line(entry));
            buf.push('\n');
        }
        if !buf.is_empty() {
            out.write_all(buf.as_bytes()).await?;
            out.flush().await?;
        }

        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            event = events.next() => match event {
                Some(event) => driver.handle_event(event),
                None => break,
            },
            line = lines.next_line(), if input_open => match line? {
                // Rejections land in the transcript as a notice.
                Some(line) => { let _ = driver.submit_text(&line); }
                None => input_open = false,
            },
        }
    }
    Ok(())
}

fn plain_line(entry: &TranscriptEntry) -> String {
    if entry.is_notice() {
        format!("* {}", entry.content)
    } else if entry.highlighted() {
        format!("> {}", entry.render())
    } else {
        format!("  {}", entry.render())
    }
}

// ---------------------------------------------------------------------------
// Rendering
// ---------------------------------------------------------------------------

fn state_label(state: ConnectionState) -> (&'static str, Color) {
    match state {
        ConnectionState::Connecting => ("connecting", Color::Yellow),
        ConnectionState::Open => ("live", Color::Green),
        ConnectionState::Closed => ("offline", Color::Red),
    }
}

fn entry_item(entry: &TranscriptEntry) -> ListItem<'static> {
    let time = entry.received_at.with_timezone(&Local).format("%H:%M ").to_string();
    let time = Span::styled(time, Style::default().fg(Color::DarkGray));
    if entry.is_notice() {
        return ListItem::new(Line::from(vec![
            time,
            Span::styled(
                entry.content.clone(),
                Style::default().fg(Color::DarkGray).add_modifier(Modifier::ITALIC),
            ),
        ]));
    }
    let name_style = if entry.highlighted() {
        Style::default().fg(Color::Yellow).add_modifier(Modifier::BOLD)
    } else {
        Style::default().fg(Color::Cyan)
    };
    ListItem::new(Line::from(vec![
        time,
        Span::styled(format!("{}: ", entry.label), name_style),
        Span::raw(entry.content.clone()),
    ]))
}

fn render<O: Outbound>(frame: &mut Frame, app: &App<O>) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(3), // Title bar
            Constraint::Min(3),    // Transcript
            Constraint::Length(3), // Help / compose
        ])
        .split(frame.area());

    // Title
    let (state, color) = state_label(app.driver.connection_state());
    let mut spans = vec![
        Span::styled(format!("[{state}] "), Style::default().fg(color)),
        Span::raw(app.driver.display_name().to_string()),
    ];
    if let Some(url) = &app.companion_url {
        spans.push(Span::raw("  scan: "));
        spans.push(Span::styled(url.clone(), Style::default().add_modifier(Modifier::UNDERLINED)));
    }
    let title = Paragraph::new(Line::from(spans)).block(
        Block::default()
            .title(" MARKERCHAT ")
            .borders(Borders::ALL)
            .border_style(Style::default().fg(Color::Cyan)),
    );
    frame.render_widget(title, chunks[0]);

    // Transcript, pinned to the newest entries.
    let entries = app.driver.transcript().entries();
    let visible = chunks[1].height.saturating_sub(2) as usize;
    let start = entries.len().saturating_sub(visible);
    let items: Vec<ListItem> = entries[start..].iter().map(entry_item).collect();
    let list = List::new(items).block(Block::default().borders(Borders::ALL).title(" Chat "));
    frame.render_widget(list, chunks[1]);

    // Help bar or compose box
    match &app.compose {
        Some(buf) => {
            let input = Paragraph::new(buf.as_str())
                .block(Block::default().borders(Borders::ALL).title(" Message (Enter: send, Esc: cancel) "));
            frame.render_widget(input, chunks[2]);
            let typed = u16::try_from(buf.chars().count()).unwrap_or(u16::MAX);
            let x = chunks[2].x.saturating_add(1).saturating_add(typed);
            frame.set_cursor_position((x.min(chunks[2].right().saturating_sub(2)), chunks[2].y + 1));
        }
        None => {
            let help = Paragraph::new(" i: write | q: quit").block(Block::default().borders(Borders::ALL));
            frame.render_widget(help, chunks[2]);
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::RenderPolicy;
    use crate::driver::testing::RecordingLink;
    use markerchat_core::gate::GateViolation;
    use markerchat_core::message::Message;
    use ratatui::backend::TestBackend;

    fn app(state: ConnectionState) -> App<RecordingLink> {
        let driver = DisplayDriver::new(
            RecordingLink::new(state),
            RenderPolicy::shared_room_display(),
            "Blue Magpie",
            Duration::from_secs(3),
        );
        App::new(driver, Some("http://127.0.0.1:8000/mobile?session_id=abc123".into()))
    }

    fn key(code: KeyCode) -> KeyEvent {
        KeyEvent::new(code, KeyModifiers::NONE)
    }

    fn type_text(app: &mut App<RecordingLink>, text: &str) {
        for c in text.chars() {
            app.on_key(key(KeyCode::Char(c)));
        }
    }

    fn screen(app: &App<RecordingLink>) -> String {
        let mut terminal = Terminal::new(TestBackend::new(80, 12)).unwrap();
        terminal.draw(|f| render(f, app)).unwrap();
        terminal
            .backend()
            .buffer()
            .content()
            .iter()
            .map(|cell| cell.symbol())
            .collect()
    }

    // -----------------------------------------------------------------------
    // Key handling
    // -----------------------------------------------------------------------

    #[test]
    fn q_and_esc_quit_outside_compose() {
        let mut a = app(ConnectionState::Open);
        a.on_key(key(KeyCode::Char('q')));
        assert!(a.should_quit);

        let mut a = app(ConnectionState::Open);
        a.on_key(key(KeyCode::Esc));
        assert!(a.should_quit);
    }

    #[test]
    fn q_is_text_inside_compose() {
        let mut a = app(ConnectionState::Open);
        a.on_key(key(KeyCode::Char('i')));
        type_text(&mut a, "quiet");
        assert!(!a.should_quit);
        assert_eq!(a.compose.as_deref(), Some("quiet"));
        a.on_key(key(KeyCode::Backspace));
        assert_eq!(a.compose.as_deref(), Some("quie"));
        a.on_key(key(KeyCode::Esc));
        assert!(a.compose.is_none());
        assert!(!a.should_quit);
    }

    #[test]
    fn enter_sends_and_closes_compose() {
        let mut a = app(ConnectionState::Open);
        a.on_key(key(KeyCode::Char('i')));
        type_text(&mut a, "hi all");
        a.on_key(key(KeyCode::Enter));
        assert!(a.compose.is_none());
        assert_eq!(a.driver.link().sent.borrow().len(), 1);
    }

    #[test]
    fn rejected_send_keeps_the_draft() {
        let mut a = app(ConnectionState::Closed);
        a.on_key(key(KeyCode::Char('i')));
        type_text(&mut a, "hi all");
        a.on_key(key(KeyCode::Enter));
        assert_eq!(a.compose.as_deref(), Some("hi all"));
        assert_eq!(
            a.driver.transcript().last().unwrap().content,
            GateViolation::NotConnected.to_string()
        );
    }

    #[test]
    fn ctrl_c_quits_even_while_composing() {
        let mut a = app(ConnectionState::Open);
        a.on_key(key(KeyCode::Char('i')));
        a.on_key(KeyEvent::new(KeyCode::Char('c'), KeyModifiers::CONTROL));
        assert!(a.should_quit);
    }

    // -----------------------------------------------------------------------
    // Rendering
    // -----------------------------------------------------------------------

    #[test]
    fn render_shows_url_state_and_transcript() {
        let mut a = app(ConnectionState::Open);
        a.driver.handle_event(ConnectionEvent::Opened);
        a.driver.handle_event(ConnectionEvent::MessageReceived(Message::NewMessage {
            username: Some("A".into()),
            message: "hi".into(),
        }));
        let s = screen(&a);
        assert!(s.contains("[live]"));
        assert!(s.contains("session_id=abc123"));
        assert!(s.contains("Listening for messages..."));
        assert!(s.contains("A: hi"));
        assert!(s.contains("i: write"));
    }

    #[test]
    fn render_keeps_newest_entries_in_view() {
        let mut a = app(ConnectionState::Open);
        for n in 0..30 {
            a.driver.handle_event(ConnectionEvent::MessageReceived(Message::NewMessage {
                username: Some("A".into()),
                message: format!("line {n:02}"),
            }));
        }
        let s = screen(&a);
        assert!(s.contains("line 29"));
        assert!(!s.contains("line 00"));
    }

    #[test]
    fn oversized_draft_keeps_cursor_inside_compose_box() {
        let mut a = app(ConnectionState::Open);
        a.compose = Some("x".repeat(usize::from(u16::MAX) + 10));
        let mut terminal = Terminal::new(TestBackend::new(80, 12)).unwrap();
        terminal.draw(|f| render(f, &a)).unwrap();
        let cursor = terminal.get_cursor_position().unwrap();
        assert_eq!(cursor.x, 78);
        assert_eq!(cursor.y, 10);
    }

    #[test]
    fn plain_lines_mark_notices_and_own_messages() {
        let mut a = app(ConnectionState::Open);
        a.driver.handle_event(ConnectionEvent::Opened);
        a.driver.handle_event(ConnectionEvent::MessageReceived(Message::NewMessage {
            username: Some("Blue Magpie".into()),
            message: "hello".into(),
        }));
        let lines: Vec<String> = a.driver.transcript().entries().iter().map(plain_line).collect();
        assert_eq!(lines, vec!["* Listening for messages...", "> Blue Magpie: hello"]);
    }

    #[tokio::test]
    async fn plain_mode_prints_until_events_end() {
        let driver = DisplayDriver::new(
            RecordingLink::new(ConnectionState::Open),
            RenderPolicy::shared_room_display(),
            "Blue Magpie",
            Duration::from_secs(3),
        );
        let events = futures_util::stream::iter(vec![
            ConnectionEvent::Opened,
            ConnectionEvent::MessageReceived(Message::parse_lenient(
                r#"{"type":"history","data":[{"username":"A","message":"hi"}]}"#,
            )),
        ]);
        let mut out = Vec::new();
        let input: &[u8] = b"";
        run_display_plain(driver, events, input, &mut out, CancellationToken::new())
            .await
            .unwrap();
        let printed = String::from_utf8(out).unwrap();
        assert_eq!(printed, "* Listening for messages...\n----\n  A: hi\n");
    }
}
