//! The session client: owns one transport handle and one renderer and
//! applies [`machine::transition`] effects to them.

use std::sync::mpsc::{self, Receiver, Sender};
use std::time::{Duration, Instant};

use tracing::{debug, error, info, trace, warn};

use super::machine::{self, Diagnostic, Effect, Event, Lifecycle, Notice, SessionState};
use super::watchdog::Watchdog;
use crate::endpoint::Endpoint;
use crate::protocol::SessionId;
use crate::renderer::Renderer;
use crate::transport::{
    ConnectOptions, ConnectionId, EventSink, LinkStatus, Transport, TransportEvent,
    TransportHandle, TransportNotice,
};

/// Default handshake watchdog timeout.
pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// Tunables for a [`SessionClient`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClientSettings {
    pub connect: ConnectOptions,
    pub handshake_timeout: Duration,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            connect: ConnectOptions::default(),
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
        }
    }
}

/// Client half of a remote shell session.
///
/// Not thread-safe by design: every method runs on the owner's event loop.
/// Transport threads only enqueue notices, which [`SessionClient::pump`]
/// drains.
pub struct SessionClient<T: Transport, R: Renderer> {
    endpoint: Endpoint,
    settings: ClientSettings,
    transport: T,
    renderer: Option<R>,
    handle: Option<T::Handle>,
    state: SessionState,
    watchdog: Watchdog,
    next_connection: u64,
    events_tx: Sender<TransportNotice>,
    events_rx: Receiver<TransportNotice>,
}

impl<T: Transport, R: Renderer> SessionClient<T, R> {
    /// Mount a client on `renderer`. Nothing is opened until [`connect`].
    ///
    /// [`connect`]: SessionClient::connect
    pub fn new(transport: T, mut renderer: R, endpoint: Endpoint, settings: ClientSettings) -> Self {
        renderer.write(&Notice::Connecting.terminal_text());
        let (events_tx, events_rx) = mpsc::channel();
        Self {
            endpoint,
            settings,
            transport,
            renderer: Some(renderer),
            handle: None,
            state: SessionState::default(),
            watchdog: Watchdog::new(settings.handshake_timeout),
            next_connection: 0,
            events_tx,
            events_rx,
        }
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    pub fn lifecycle(&self) -> Lifecycle {
        self.state.lifecycle
    }

    pub fn session_id(&self) -> Option<&SessionId> {
        self.state.session_id.as_ref()
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    /// Status of the current transport handle, if any.
    pub fn link_status(&self) -> Option<LinkStatus> {
        self.handle.as_ref().map(TransportHandle::status)
    }

    pub fn is_transport_connected(&self) -> bool {
        self.link_status() == Some(LinkStatus::Connected)
    }

    /// The renderer, until the client is destroyed.
    pub fn renderer(&self) -> Option<&R> {
        self.renderer.as_ref()
    }

    pub fn renderer_mut(&mut self) -> Option<&mut R> {
        self.renderer.as_mut()
    }

    /// When the watchdog next needs a [`tick`](SessionClient::tick).
    pub fn next_deadline(&self) -> Option<Instant> {
        self.watchdog.deadline()
    }

    /// Open a connection unless one is already pending or established.
    pub fn connect(&mut self) {
        let link = self.link_status();
        self.apply(Event::Connect { link });
    }

    /// Forward keystroke or paste data from the renderer.
    pub fn input(&mut self, data: &str) {
        let link = self.link_status();
        self.apply(Event::Input {
            data: data.to_string(),
            link,
        });
    }

    pub fn resize(&mut self, cols: u16, rows: u16) {
        let link = self.link_status();
        self.apply(Event::Resize { cols, rows, link });
    }

    /// Close the transport and release the renderer. Idempotent.
    pub fn destroy(&mut self) {
        self.apply(Event::Destroy);
    }

    /// Drain queued transport notices. Returns how many were dispatched.
    pub fn pump(&mut self) -> usize {
        let mut dispatched = 0;
        while let Ok(notice) = self.events_rx.try_recv() {
            if self.dispatch(notice) {
                dispatched += 1;
            }
        }
        dispatched
    }

    /// Fire the watchdog if its deadline has passed.
    pub fn tick(&mut self, now: Instant) {
        if self.watchdog.fire_if_due(now) {
            self.apply(Event::WatchdogFired);
        }
    }

    /// Handle one notice. Notices from superseded connections are ignored.
    pub fn dispatch(&mut self, notice: TransportNotice) -> bool {
        let current = self.handle.as_ref().map(TransportHandle::connection);
        if current != Some(notice.connection) {
            trace!(
                connection = %notice.connection,
                event = ?notice.event,
                "ignoring event from superseded connection"
            );
            return false;
        }

        let event = match notice.event {
            TransportEvent::Connect => Event::TransportConnected,
            TransportEvent::ConnectError(reason) => Event::TransportConnectError(reason),
            TransportEvent::Message(envelope) => Event::Message(envelope),
            TransportEvent::Disconnect(reason) => Event::TransportDisconnected(reason),
        };
        self.apply(event);
        true
    }

    fn apply(&mut self, event: Event) {
        let (next, effects) = machine::transition(&self.state, event);
        if next.lifecycle != self.state.lifecycle {
            debug!(from = %self.state.lifecycle, to = %next.lifecycle, "session lifecycle");
        }
        self.state = next;
        for effect in effects {
            self.perform(effect);
        }
    }

    fn perform(&mut self, effect: Effect) {
        match effect {
            Effect::DetachTransport => self.detach_transport(),
            Effect::OpenTransport => self.open_transport(),
            Effect::ArmWatchdog => self.watchdog.arm(Instant::now()),
            Effect::DisarmWatchdog => self.watchdog.disarm(),
            Effect::Write(data) => {
                if let Some(renderer) = self.renderer.as_mut() {
                    renderer.write(&data);
                }
            }
            Effect::Notify(notice) => {
                match &notice {
                    Notice::ConnectedToServer => {
                        info!(endpoint = %self.endpoint, "connected to terminal server");
                    }
                    Notice::ConnectionError(reason) => {
                        error!(endpoint = %self.endpoint, %reason, "terminal connection error");
                    }
                    Notice::HandshakeTimeout => {
                        warn!(endpoint = %self.endpoint, "terminal session not established in time");
                    }
                    Notice::Connecting => {}
                }
                if let Some(renderer) = self.renderer.as_mut() {
                    renderer.write(&notice.terminal_text());
                }
            }
            Effect::Send(message) => match self.handle.as_mut() {
                Some(handle) => {
                    if let Err(e) = handle.emit(&message) {
                        warn!(event = message.event_name(), error = %e, "failed to send");
                    }
                }
                None => debug!(event = message.event_name(), "no transport to send on"),
            },
            Effect::ResizeViewport { cols, rows } => {
                if let Some(renderer) = self.renderer.as_mut() {
                    renderer.resize_viewport(cols, rows);
                }
            }
            Effect::ReleaseRenderer => {
                if let Some(mut renderer) = self.renderer.take() {
                    renderer.destroy();
                }
            }
            Effect::Log(diagnostic) => log_diagnostic(&diagnostic),
        }
    }

    fn detach_transport(&mut self) {
        if let Some(mut handle) = self.handle.take() {
            debug!(connection = %handle.connection(), "detaching transport");
            handle.remove_all_listeners();
            handle.disconnect();
        }
    }

    fn open_transport(&mut self) {
        self.next_connection += 1;
        let connection = ConnectionId(self.next_connection);
        info!(%connection, endpoint = %self.endpoint, "connecting to terminal server");
        let sink = EventSink::new(connection, self.events_tx.clone());
        let handle = self
            .transport
            .open(connection, &self.endpoint, &self.settings.connect, sink);
        self.handle = Some(handle);
    }
}

impl<T: Transport, R: Renderer> Drop for SessionClient<T, R> {
    fn drop(&mut self) {
        self.destroy();
    }
}

fn log_diagnostic(diagnostic: &Diagnostic) {
    match diagnostic {
        Diagnostic::AlreadyConnecting(lifecycle) => {
            debug!(%lifecycle, "already connected, skipping reconnect");
        }
        Diagnostic::ConnectAfterClose => debug!("connect ignored: client is closed"),
        Diagnostic::SessionBound(session_id) => info!(%session_id, "terminal session connected"),
        Diagnostic::InputDropped(reason) => {
            debug!(reason = reason.describe(), "cannot send input: session not ready");
        }
        Diagnostic::ResizeDropped(reason) => {
            debug!(reason = reason.describe(), "resize not sent");
        }
        Diagnostic::MalformedMessage { event, reason } => {
            debug!(%event, %reason, "dropping malformed server message");
        }
        Diagnostic::ServerError(message) => error!(%message, "terminal server reported an error"),
        Diagnostic::Disconnected(reason) => info!(%reason, "terminal transport disconnected"),
        Diagnostic::IgnoredAfterClose(event) => trace!(%event, "event after close ignored"),
        Diagnostic::WatchdogSatisfied => trace!("handshake watchdog fired after session bound"),
    }
}
