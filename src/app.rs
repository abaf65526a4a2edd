//! Interactive client: one remote terminal session in a ratatui frame.

use std::io;
use std::time::{Duration, Instant};

use anyhow::Result;
use crossterm::event::{poll, read, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers};
use ratatui::{
    backend::CrosstermBackend,
    layout::{Constraint, Direction, Layout, Rect},
    Frame, Terminal,
};
use tracing::{debug, info};

use crate::config::ClientConfig;
use crate::endpoint::Endpoint;
use crate::input::key_to_input;
use crate::protocol::SessionId;
use crate::renderer::VtRenderer;
use crate::session::SessionClient;
use crate::transport::Transport;
use crate::ui::{StatusLine, TerminalPane};

/// Upper bound on how long the loop waits for terminal input.
const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Action returned from key handling
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyAction {
    Continue,
    Quit,
}

pub struct App<T: Transport> {
    client: SessionClient<T, VtRenderer>,
    endpoint_label: String,
    /// Size of the terminal pane's inner area (cols, rows)
    viewport: (u16, u16),
    /// Session whose viewport size has been pushed to the server
    synced_session: Option<SessionId>,
}

/// Split the frame into the terminal pane and the status line.
fn split(area: Rect) -> (Rect, Rect) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Min(1), Constraint::Length(1)])
        .split(area);
    (chunks[0], chunks[1])
}

fn viewport_for(area: Rect) -> (u16, u16) {
    let (pane, _) = split(area);
    let inner = TerminalPane::inner_area(pane);
    (inner.width.max(1), inner.height.max(1))
}

impl<T: Transport> App<T> {
    /// Mount the terminal for a frame of `term_size` and start connecting.
    pub fn new(
        transport: T,
        endpoint: Endpoint,
        config: &ClientConfig,
        term_size: (u16, u16),
    ) -> Self {
        let viewport = viewport_for(Rect::new(0, 0, term_size.0, term_size.1));
        let renderer = VtRenderer::new(viewport.0, viewport.1, config.scrollback_lines);
        let endpoint_label = endpoint.to_string();
        let mut client = SessionClient::new(transport, renderer, endpoint, config.settings());
        client.connect();

        Self {
            client,
            endpoint_label,
            viewport,
            synced_session: None,
        }
    }

    pub fn client(&self) -> &SessionClient<T, VtRenderer> {
        &self.client
    }

    pub fn viewport(&self) -> (u16, u16) {
        self.viewport
    }

    /// Drain transport notices, fire the watchdog, and push the viewport
    /// size once per newly bound session.
    pub fn update(&mut self, now: Instant) {
        self.client.pump();
        self.client.tick(now);
        self.sync_viewport();
    }

    fn sync_viewport(&mut self) {
        let Some(session_id) = self.client.session_id() else {
            return;
        };
        if self.synced_session.as_ref() == Some(session_id) {
            return;
        }
        self.synced_session = Some(session_id.clone());
        let (cols, rows) = self.viewport;
        debug!(cols, rows, "syncing viewport for new session");
        self.client.resize(cols, rows);
    }

    /// How long the loop may block waiting for input.
    pub fn poll_timeout(&self, now: Instant) -> Duration {
        match self.client.next_deadline() {
            Some(deadline) => deadline.saturating_duration_since(now).min(POLL_INTERVAL),
            None => POLL_INTERVAL,
        }
    }

    pub fn handle_key(&mut self, key: KeyEvent) -> KeyAction {
        let page = usize::from(self.viewport.1 / 2).max(1);

        match (key.code, key.modifiers) {
            (KeyCode::Char(']'), KeyModifiers::CONTROL) => return KeyAction::Quit,
            (KeyCode::F(5), _) => {
                info!("reconnect requested");
                self.client.connect();
            }
            (KeyCode::PageUp, KeyModifiers::SHIFT) => {
                if let Some(renderer) = self.client.renderer_mut() {
                    renderer.scroll_up(page);
                }
            }
            (KeyCode::PageDown, KeyModifiers::SHIFT) => {
                if let Some(renderer) = self.client.renderer_mut() {
                    renderer.scroll_down(page);
                }
            }
            _ => {
                if let Some(data) = key_to_input(key) {
                    if let Some(renderer) = self.client.renderer_mut() {
                        renderer.scroll_to_bottom();
                    }
                    self.client.input(&data);
                }
            }
        }
        KeyAction::Continue
    }

    pub fn handle_paste(&mut self, text: &str) {
        if !text.is_empty() {
            self.client.input(text);
        }
    }

    /// The local terminal changed size.
    pub fn handle_resize(&mut self, width: u16, height: u16) {
        self.viewport = viewport_for(Rect::new(0, 0, width, height));
        let (cols, rows) = self.viewport;
        self.client.resize(cols, rows);
    }

    pub fn draw(&self, frame: &mut Frame) {
        let (pane_area, status_area) = split(frame.area());
        let screen = self.client.renderer().map(VtRenderer::screen_state);

        frame.render_widget(
            TerminalPane::new(screen.as_ref(), "relayterm", true),
            pane_area,
        );
        frame.render_widget(
            StatusLine::new(
                self.client.lifecycle(),
                self.client.session_id().map(String::as_str),
                &self.endpoint_label,
            ),
            status_area,
        );
    }

    pub fn shutdown(&mut self) {
        self.client.destroy();
    }
}

/// Run the event loop until the user quits.
pub fn run<T: Transport>(
    terminal: &mut Terminal<CrosstermBackend<io::Stdout>>,
    app: &mut App<T>,
) -> Result<()> {
    loop {
        app.update(Instant::now());

        terminal.draw(|f| app.draw(f))?;

        if poll(app.poll_timeout(Instant::now()))? {
            match read()? {
                Event::Key(key) if key.kind == KeyEventKind::Press => {
                    if app.handle_key(key) == KeyAction::Quit {
                        break;
                    }
                }
                Event::Paste(text) => app.handle_paste(&text),
                Event::Resize(width, height) => app.handle_resize(width, height),
                _ => {}
            }
        }
    }

    app.shutdown();
    Ok(())
}
