//! Session lifecycle as a pure transition function.
//!
//! `transition` never touches a transport, renderer or clock. Everything it
//! needs to know about the outside world arrives in the [`Event`], and
//! everything it wants done leaves as an [`Effect`]. The driver in
//! [`super::client`] samples the transport, applies the effects and owns the
//! timers, which keeps callback ordering races reproducible in plain tests.

use crate::protocol::{ClientMessage, Envelope, ServerMessage, SessionId};
use crate::transport::LinkStatus;

/// Where the client is in its connection lifecycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Lifecycle {
    /// No transport yet.
    #[default]
    Idle,
    /// Transport opened, waiting for a session id.
    Connecting,
    /// Session id received; input is accepted.
    Ready,
    /// Torn down. Terminal.
    Closed,
}

impl Lifecycle {
    pub fn label(self) -> &'static str {
        match self {
            Lifecycle::Idle => "idle",
            Lifecycle::Connecting => "connecting",
            Lifecycle::Ready => "ready",
            Lifecycle::Closed => "closed",
        }
    }
}

impl std::fmt::Display for Lifecycle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// Lifecycle plus the session binding.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionState {
    pub lifecycle: Lifecycle,
    pub session_id: Option<SessionId>,
}

impl SessionState {
    pub fn is_ready(&self) -> bool {
        self.lifecycle == Lifecycle::Ready && self.session_id.is_some()
    }
}

/// Inputs to the state machine. `link` is the status of the current
/// transport handle, or `None` when there is none.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    Connect { link: Option<LinkStatus> },
    TransportConnected,
    TransportConnectError(String),
    TransportDisconnected(String),
    Message(Envelope),
    Input { data: String, link: Option<LinkStatus> },
    Resize { cols: u16, rows: u16, link: Option<LinkStatus> },
    WatchdogFired,
    Destroy,
}

/// User-visible status lines written into the terminal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notice {
    /// Written once when the view mounts.
    Connecting,
    ConnectedToServer,
    ConnectionError(String),
    HandshakeTimeout,
}

impl Notice {
    /// ANSI-colored text as written to the renderer.
    pub fn terminal_text(&self) -> String {
        match self {
            Notice::Connecting => "Connecting to terminal server...\r\n".to_string(),
            Notice::ConnectedToServer => {
                "\r\n\x1b[32mConnected to terminal server.\x1b[0m\r\n".to_string()
            }
            Notice::ConnectionError(reason) => {
                format!("\r\n\x1b[31mConnection error: {}\x1b[0m\r\n", reason)
            }
            Notice::HandshakeTimeout => {
                "\r\n\x1b[33mConnection timeout. Press F5 to reconnect.\x1b[0m\r\n".to_string()
            }
        }
    }
}

/// Why an input or resize was not forwarded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    Closed,
    NoTransport,
    TransportNotConnected,
    NoSession,
}

impl DropReason {
    pub fn describe(self) -> &'static str {
        match self {
            DropReason::Closed => "client closed",
            DropReason::NoTransport => "no transport",
            DropReason::TransportNotConnected => "transport not connected",
            DropReason::NoSession => "session not established",
        }
    }
}

/// Things worth logging that are never shown to the user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Diagnostic {
    AlreadyConnecting(Lifecycle),
    ConnectAfterClose,
    SessionBound(SessionId),
    InputDropped(DropReason),
    ResizeDropped(DropReason),
    MalformedMessage { event: String, reason: String },
    ServerError(String),
    Disconnected(String),
    IgnoredAfterClose(String),
    WatchdogSatisfied,
}

/// Work the driver performs after a transition, in order.
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    /// Remove all listeners from the current handle, then close it.
    DetachTransport,
    OpenTransport,
    ArmWatchdog,
    DisarmWatchdog,
    /// Shell output, written verbatim.
    Write(String),
    Notify(Notice),
    Send(ClientMessage),
    ResizeViewport { cols: u16, rows: u16 },
    ReleaseRenderer,
    Log(Diagnostic),
}

/// Compute the next state and the effects for one event.
pub fn transition(state: &SessionState, event: Event) -> (SessionState, Vec<Effect>) {
    let mut next = state.clone();
    let mut effects = Vec::new();
    let closed = state.lifecycle == Lifecycle::Closed;

    match event {
        Event::Connect { link } => {
            if closed {
                effects.push(Effect::Log(Diagnostic::ConnectAfterClose));
            } else if matches!(state.lifecycle, Lifecycle::Connecting | Lifecycle::Ready)
                && link.is_some_and(LinkStatus::is_live)
            {
                effects.push(Effect::Log(Diagnostic::AlreadyConnecting(state.lifecycle)));
            } else {
                if link.is_some() {
                    effects.push(Effect::DetachTransport);
                }
                effects.push(Effect::OpenTransport);
                effects.push(Effect::ArmWatchdog);
                next.lifecycle = Lifecycle::Connecting;
                next.session_id = None;
            }
        }

        Event::TransportConnected => {
            if closed {
                effects.push(Effect::Log(Diagnostic::IgnoredAfterClose("connect".into())));
            } else {
                effects.push(Effect::Notify(Notice::ConnectedToServer));
            }
        }

        Event::TransportConnectError(reason) => {
            if closed {
                effects.push(Effect::Log(Diagnostic::IgnoredAfterClose(
                    "connect_error".into(),
                )));
            } else {
                effects.push(Effect::Notify(Notice::ConnectionError(reason)));
            }
        }

        Event::TransportDisconnected(reason) => {
            effects.push(Effect::Log(Diagnostic::Disconnected(reason)));
        }

        Event::Message(envelope) => {
            if closed {
                effects.push(Effect::Log(Diagnostic::IgnoredAfterClose(envelope.event)));
            } else {
                match ServerMessage::from_envelope(&envelope) {
                    Ok(ServerMessage::Connected { session_id }) => {
                        // Accepted even after a reported timeout.
                        effects.push(Effect::Log(Diagnostic::SessionBound(session_id.clone())));
                        next.session_id = Some(session_id);
                        next.lifecycle = Lifecycle::Ready;
                    }
                    Ok(ServerMessage::Output { data }) => effects.push(Effect::Write(data)),
                    Ok(ServerMessage::Error { message }) => {
                        effects.push(Effect::Log(Diagnostic::ServerError(message)));
                    }
                    Err(e) => effects.push(Effect::Log(Diagnostic::MalformedMessage {
                        event: envelope.event,
                        reason: e.to_string(),
                    })),
                }
            }
        }

        Event::Input { data, link } => {
            let reason = if closed {
                Some(DropReason::Closed)
            } else {
                match link {
                    None => Some(DropReason::NoTransport),
                    Some(LinkStatus::Connected) => None,
                    Some(_) => Some(DropReason::TransportNotConnected),
                }
            };
            match (reason, &state.session_id) {
                (None, Some(session_id)) if state.lifecycle == Lifecycle::Ready => {
                    effects.push(Effect::Send(ClientMessage::input(data, session_id.clone())));
                }
                (None, _) => {
                    effects.push(Effect::Log(Diagnostic::InputDropped(DropReason::NoSession)));
                }
                (Some(reason), _) => {
                    effects.push(Effect::Log(Diagnostic::InputDropped(reason)));
                }
            }
        }

        Event::Resize { cols, rows, link } => {
            if closed {
                effects.push(Effect::Log(Diagnostic::ResizeDropped(DropReason::Closed)));
            } else {
                match link {
                    Some(LinkStatus::Connected) => {
                        effects.push(Effect::ResizeViewport { cols, rows });
                        effects.push(Effect::Send(ClientMessage::resize(cols, rows)));
                    }
                    Some(_) => effects.push(Effect::Log(Diagnostic::ResizeDropped(
                        DropReason::TransportNotConnected,
                    ))),
                    None => effects.push(Effect::Log(Diagnostic::ResizeDropped(
                        DropReason::NoTransport,
                    ))),
                }
            }
        }

        Event::WatchdogFired => {
            if closed || state.session_id.is_some() {
                effects.push(Effect::Log(Diagnostic::WatchdogSatisfied));
            } else {
                effects.push(Effect::Notify(Notice::HandshakeTimeout));
            }
        }

        Event::Destroy => {
            if !closed {
                effects.push(Effect::DisarmWatchdog);
                effects.push(Effect::DetachTransport);
                effects.push(Effect::ReleaseRenderer);
                next.lifecycle = Lifecycle::Closed;
                next.session_id = None;
            }
        }
    }

    (next, effects)
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn connected_envelope(id: &str) -> Envelope {
        ServerMessage::Connected {
            session_id: id.to_string(),
        }
        .to_envelope()
    }

    fn ready(id: &str) -> SessionState {
        SessionState {
            lifecycle: Lifecycle::Ready,
            session_id: Some(id.to_string()),
        }
    }

    fn connecting() -> SessionState {
        SessionState {
            lifecycle: Lifecycle::Connecting,
            session_id: None,
        }
    }

    #[test]
    fn first_connect_opens_and_arms() {
        let (next, effects) = transition(&SessionState::default(), Event::Connect { link: None });
        assert_eq!(next, connecting());
        assert_eq!(effects, vec![Effect::OpenTransport, Effect::ArmWatchdog]);
    }

    #[test]
    fn connect_while_live_is_a_noop() {
        for (state, link) in [
            (connecting(), LinkStatus::Pending),
            (connecting(), LinkStatus::Connected),
            (ready("abc"), LinkStatus::Connected),
        ] {
            let (next, effects) = transition(&state, Event::Connect { link: Some(link) });
            assert_eq!(next, state);
            assert!(matches!(
                effects.as_slice(),
                [Effect::Log(Diagnostic::AlreadyConnecting(_))]
            ));
        }
    }

    #[test]
    fn reconnect_over_dead_link_supersedes_and_clears_session() {
        let (next, effects) = transition(
            &ready("old"),
            Event::Connect {
                link: Some(LinkStatus::Closed),
            },
        );
        assert_eq!(next, connecting());
        assert_eq!(
            effects,
            vec![
                Effect::DetachTransport,
                Effect::OpenTransport,
                Effect::ArmWatchdog
            ]
        );
    }

    #[test]
    fn transport_connect_notifies_but_stays_connecting() {
        let (next, effects) = transition(&connecting(), Event::TransportConnected);
        assert_eq!(next, connecting());
        assert_eq!(effects, vec![Effect::Notify(Notice::ConnectedToServer)]);
    }

    #[test]
    fn connect_error_is_surfaced_without_state_change() {
        let (next, effects) = transition(
            &connecting(),
            Event::TransportConnectError("refused".to_string()),
        );
        assert_eq!(next, connecting());
        assert_eq!(
            effects,
            vec![Effect::Notify(Notice::ConnectionError("refused".to_string()))]
        );
    }

    #[test]
    fn connected_message_binds_session() {
        let (next, _) = transition(&connecting(), Event::Message(connected_envelope("abc123")));
        assert_eq!(next, ready("abc123"));
        assert!(next.is_ready());
    }

    #[test]
    fn malformed_connected_is_dropped() {
        let envelope = Envelope::new("connected", json!({ "sid": "x" }));
        let (next, effects) = transition(&connecting(), Event::Message(envelope));
        assert_eq!(next, connecting());
        assert!(matches!(
            effects.as_slice(),
            [Effect::Log(Diagnostic::MalformedMessage { .. })]
        ));
    }

    #[test]
    fn output_is_written_verbatim() {
        let envelope = ServerMessage::Output {
            data: "hello\r\n".to_string(),
        }
        .to_envelope();
        let (_, effects) = transition(&ready("abc"), Event::Message(envelope));
        assert_eq!(effects, vec![Effect::Write("hello\r\n".to_string())]);
    }

    #[test]
    fn server_error_is_only_logged() {
        let envelope = ServerMessage::Error {
            message: "Terminal session has ended".to_string(),
        }
        .to_envelope();
        let (next, effects) = transition(&ready("abc"), Event::Message(envelope));
        assert_eq!(next, ready("abc"));
        assert!(matches!(
            effects.as_slice(),
            [Effect::Log(Diagnostic::ServerError(_))]
        ));
    }

    #[test]
    fn input_requires_ready_session_and_connected_link() {
        let cases = [
            (connecting(), Some(LinkStatus::Connected), DropReason::NoSession),
            (ready("abc"), Some(LinkStatus::Pending), DropReason::TransportNotConnected),
            (ready("abc"), None, DropReason::NoTransport),
            (SessionState::default(), None, DropReason::NoTransport),
        ];
        for (state, link, reason) in cases {
            let (_, effects) = transition(
                &state,
                Event::Input {
                    data: "x".to_string(),
                    link,
                },
            );
            assert_eq!(effects, vec![Effect::Log(Diagnostic::InputDropped(reason))]);
        }
    }

    #[test]
    fn input_is_tagged_with_session() {
        let (_, effects) = transition(
            &ready("abc123"),
            Event::Input {
                data: "a".to_string(),
                link: Some(LinkStatus::Connected),
            },
        );
        assert_eq!(
            effects,
            vec![Effect::Send(ClientMessage::input("a", "abc123"))]
        );
    }

    #[test]
    fn resize_needs_only_a_connected_link() {
        let (_, effects) = transition(
            &connecting(),
            Event::Resize {
                cols: 80,
                rows: 24,
                link: Some(LinkStatus::Connected),
            },
        );
        assert_eq!(
            effects,
            vec![
                Effect::ResizeViewport { cols: 80, rows: 24 },
                Effect::Send(ClientMessage::resize(80, 24)),
            ]
        );

        let (_, effects) = transition(
            &ready("abc"),
            Event::Resize {
                cols: 80,
                rows: 24,
                link: Some(LinkStatus::Pending),
            },
        );
        assert_eq!(
            effects,
            vec![Effect::Log(Diagnostic::ResizeDropped(
                DropReason::TransportNotConnected
            ))]
        );
    }

    #[test]
    fn watchdog_checks_session_at_fire_time() {
        let (_, effects) = transition(&connecting(), Event::WatchdogFired);
        assert_eq!(effects, vec![Effect::Notify(Notice::HandshakeTimeout)]);

        let (_, effects) = transition(&ready("abc"), Event::WatchdogFired);
        assert_eq!(effects, vec![Effect::Log(Diagnostic::WatchdogSatisfied)]);
    }

    #[test]
    fn late_session_after_timeout_still_activates() {
        let (state, _) = transition(&connecting(), Event::WatchdogFired);
        let (state, _) = transition(&state, Event::Message(connected_envelope("late")));
        assert_eq!(state, ready("late"));
    }

    #[test]
    fn destroy_is_terminal_and_idempotent() {
        let (closed, effects) = transition(&ready("abc"), Event::Destroy);
        assert_eq!(closed.lifecycle, Lifecycle::Closed);
        assert_eq!(closed.session_id, None);
        assert_eq!(
            effects,
            vec![
                Effect::DisarmWatchdog,
                Effect::DetachTransport,
                Effect::ReleaseRenderer
            ]
        );

        let (again, effects) = transition(&closed, Event::Destroy);
        assert_eq!(again, closed);
        assert!(effects.is_empty());
    }

    #[test]
    fn nothing_leaves_closed() {
        let closed = SessionState {
            lifecycle: Lifecycle::Closed,
            session_id: None,
        };
        let events = [
            Event::Connect { link: None },
            Event::TransportConnected,
            Event::Message(connected_envelope("abc")),
            Event::Message(
                ServerMessage::Output {
                    data: "late".to_string(),
                }
                .to_envelope(),
            ),
            Event::WatchdogFired,
        ];
        for event in events {
            let (next, effects) = transition(&closed, event);
            assert_eq!(next, closed);
            assert!(effects
                .iter()
                .all(|e| matches!(e, Effect::Log(_))));
        }
    }
}
