//! Per-connection handling: one shell session per client connection.

use std::sync::mpsc::Receiver;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;

use anyhow::{Context, Result};
use tracing::{debug, error, info, info_span, warn};

use super::registry::SessionRegistry;
use crate::endpoint::Stream;
use crate::error::Error;
use crate::protocol::{
    framing, ClientMessage, Envelope, InputPayload, ResizePayload, ServerMessage, SessionId,
};

/// Registry shared by every connection thread.
pub type SharedRegistry = Arc<Mutex<SessionRegistry>>;

pub(crate) fn lock(registry: &SharedRegistry) -> MutexGuard<'_, SessionRegistry> {
    registry.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Decodes a byte stream as UTF-8, carrying partial sequences across chunks.
/// Invalid bytes become U+FFFD.
#[derive(Debug, Default)]
pub struct Utf8Decoder {
    pending: Vec<u8>,
}

impl Utf8Decoder {
    pub fn decode(&mut self, chunk: &[u8]) -> String {
        self.pending.extend_from_slice(chunk);

        let mut out = String::new();
        let mut rest: &[u8] = &self.pending;
        loop {
            match std::str::from_utf8(rest) {
                Ok(valid) => {
                    out.push_str(valid);
                    rest = &[];
                    break;
                }
                Err(e) => {
                    let (valid, tail) = rest.split_at(e.valid_up_to());
                    out.push_str(&String::from_utf8_lossy(valid));
                    match e.error_len() {
                        Some(len) => {
                            out.push(char::REPLACEMENT_CHARACTER);
                            rest = &tail[len..];
                        }
                        // Incomplete sequence at the end; wait for more bytes.
                        None => {
                            rest = tail;
                            break;
                        }
                    }
                }
            }
        }

        let consumed = self.pending.len() - rest.len();
        self.pending.drain(..consumed);
        out
    }

    /// Flush whatever is left at end of stream.
    pub fn finish(&mut self) -> String {
        let out = String::from_utf8_lossy(&self.pending).into_owned();
        self.pending.clear();
        out
    }
}

/// Write half of a connection, shared with the output pump.
struct Outbound {
    stream: Mutex<Stream>,
}

impl Outbound {
    fn send(&self, message: &ServerMessage) -> crate::error::Result<()> {
        let mut stream = self.stream.lock().unwrap_or_else(PoisonError::into_inner);
        framing::write_message(&mut *stream, &message.to_envelope())
    }

    fn send_error(&self, message: impl Into<String>) {
        let message = ServerMessage::Error {
            message: message.into(),
        };
        if let Err(e) = self.send(&message) {
            debug!(error = %e, "failed to send error to client");
        }
    }

    fn shutdown(&self) {
        let stream = self.stream.lock().unwrap_or_else(PoisonError::into_inner);
        let _ = stream.shutdown();
    }
}

/// Serve one client until it disconnects.
///
/// Creates a shell session, announces it with `connected`, relays PTY output
/// as `output`, applies `input` and `resize`, and closes the session when the
/// client goes away.
pub fn serve_connection(conn_id: u64, stream: Stream, registry: &SharedRegistry) -> Result<()> {
    let _span = info_span!("conn", id = conn_id).entered();
    let outbound = Arc::new(Outbound {
        stream: Mutex::new(stream.try_clone().context("Failed to clone client stream")?),
    });
    let mut reader = stream;

    let (own_session, output) = open_session(registry, &outbound);

    if let Some(session_id) = &own_session {
        let connected = ServerMessage::Connected {
            session_id: session_id.clone(),
        };
        if let Err(e) = outbound.send(&connected) {
            lock(registry).close_session(session_id);
            return Err(e).context("Failed to send connected event");
        }
        info!(%session_id, "emitted connected event");
    }

    if let Some(rx) = output {
        let outbound = Arc::clone(&outbound);
        thread::Builder::new()
            .name(format!("output-{}", conn_id))
            .spawn(move || pump_output(rx, &outbound))
            .context("Failed to spawn output thread")?;
    }

    loop {
        let envelope: Envelope = match framing::read_message(&mut reader) {
            Ok(envelope) => envelope,
            Err(Error::Json(e)) => {
                warn!(error = %e, "dropping undecodable frame");
                continue;
            }
            Err(e) if e.is_disconnect() => break,
            Err(e) => {
                warn!(error = %e, "connection read failed");
                break;
            }
        };

        match ClientMessage::from_envelope(envelope) {
            Ok(ClientMessage::Input(payload)) => {
                handle_input(registry, &outbound, own_session.as_deref(), &payload);
            }
            Ok(ClientMessage::Resize(size)) => {
                handle_resize(registry, own_session.as_deref(), size);
            }
            Err(e) => debug!(error = %e, "ignoring client message"),
        }
    }

    if let Some(session_id) = &own_session {
        if lock(registry).close_session(session_id) {
            info!(%session_id, "terminal session disconnected");
        }
    }
    outbound.shutdown();
    Ok(())
}

/// Reap stale sessions and create one for this connection.
fn open_session(
    registry: &SharedRegistry,
    outbound: &Outbound,
) -> (Option<SessionId>, Option<Receiver<Vec<u8>>>) {
    let mut registry = lock(registry);
    for session_id in registry.reap_dead() {
        debug!(%session_id, "cleaned up stale session");
    }

    match registry.create_session() {
        Ok(session_id) => {
            let output = registry
                .get_session_mut(&session_id)
                .and_then(|session| session.take_output());
            (Some(session_id), output)
        }
        Err(e) => {
            error!(error = %format_args!("{:#}", e), "failed to create terminal session");
            outbound.send_error(format!("Failed to create terminal session: {:#}", e));
            (None, None)
        }
    }
}

fn pump_output(rx: Receiver<Vec<u8>>, outbound: &Outbound) {
    let mut decoder = Utf8Decoder::default();
    for chunk in rx {
        let data = decoder.decode(&chunk);
        if data.is_empty() {
            continue;
        }
        if let Err(e) = outbound.send(&ServerMessage::Output { data }) {
            debug!(error = %e, "output relay stopped");
            return;
        }
    }

    let data = decoder.finish();
    if !data.is_empty() {
        let _ = outbound.send(&ServerMessage::Output { data });
    }
    debug!("pty output ended");
}

fn handle_input(
    registry: &SharedRegistry,
    outbound: &Outbound,
    own_session: Option<&str>,
    payload: &InputPayload,
) {
    let writer = {
        let mut registry = lock(registry);

        // Explicit id wins when it names a live session.
        let target = match payload.session_id.as_deref() {
            Some(id) if registry.contains(id) => Some(id.to_string()),
            _ => own_session.map(String::from),
        };

        let Some(session) = target
            .as_deref()
            .and_then(|id| registry.get_session_mut(id))
        else {
            warn!(session_id = ?payload.session_id, "no active terminal session for input");
            return;
        };

        if session.has_exited() {
            warn!(session_id = %session.session_id(), "input for ended terminal session");
            None
        } else {
            Some(session.writer())
        }
    };

    let Some(writer) = writer else {
        outbound.send_error("Terminal session has ended");
        return;
    };

    // A shell that stops reading fills the PTY; only this connection waits on it.
    match writer.write(payload.data.as_bytes()) {
        Ok(()) => debug!(bytes = payload.data.len(), "wrote input"),
        // Not reported to the client.
        Err(e) => error!(error = %e, "error writing to terminal"),
    }
}

fn handle_resize(registry: &SharedRegistry, own_session: Option<&str>, size: ResizePayload) {
    let Some(session_id) = own_session else {
        return;
    };
    let mut registry = lock(registry);
    if let Some(session) = registry.get_session_mut(session_id) {
        if let Err(e) = session.resize(size.cols, size.rows) {
            error!(error = %e, "error resizing terminal");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::os::unix::net::UnixStream;
    use std::sync::mpsc;
    use std::time::Duration;

    use serde_json::json;

    use super::*;
    use crate::config::ServerConfig;
    use crate::protocol::InputKind;
    use crate::server::test_support::{cat_config, read_output_until, read_server_message};

    fn start(config: ServerConfig) -> (UnixStream, SharedRegistry, thread::JoinHandle<()>) {
        let (client, server) = UnixStream::pair().unwrap();
        client
            .set_read_timeout(Some(Duration::from_secs(5)))
            .unwrap();
        let registry: SharedRegistry = Arc::new(Mutex::new(SessionRegistry::new(config)));
        let shared = Arc::clone(&registry);
        let handle = thread::spawn(move || {
            serve_connection(1, Stream::Unix(server), &shared).unwrap();
        });
        (client, registry, handle)
    }

    fn expect_connected(client: &mut UnixStream) -> SessionId {
        match read_server_message(client) {
            ServerMessage::Connected { session_id } => session_id,
            other => panic!("expected connected, got {:?}", other),
        }
    }

    #[test]
    fn decoder_carries_split_sequences() {
        let mut decoder = Utf8Decoder::default();
        let bytes = "héllo".as_bytes();
        assert_eq!(decoder.decode(&bytes[..2]), "h");
        assert_eq!(decoder.decode(&bytes[2..]), "éllo");
    }

    #[test]
    fn decoder_replaces_invalid_bytes() {
        let mut decoder = Utf8Decoder::default();
        assert_eq!(decoder.decode(b"a\xffb"), "a\u{FFFD}b");
        assert_eq!(decoder.decode(b"\xe2\x82"), "");
        assert_eq!(decoder.finish(), "\u{FFFD}");
        assert_eq!(decoder.finish(), "");
    }

    #[test]
    fn announces_session_and_echoes_input() {
        let (mut client, _registry, _handle) = start(cat_config());
        let session_id = expect_connected(&mut client);

        let input = ClientMessage::input("hello\r", session_id.as_str());
        framing::write_message(&mut client, &input.to_envelope().unwrap()).unwrap();

        assert!(read_output_until(&mut client, "hello").contains("hello"));
    }

    #[test]
    fn input_without_session_falls_back_to_own() {
        let (mut client, _registry, _handle) = start(cat_config());
        expect_connected(&mut client);

        let envelope = Envelope::new("input", json!({ "data": "fallback\r" }));
        framing::write_message(&mut client, &envelope).unwrap();

        assert!(read_output_until(&mut client, "fallback").contains("fallback"));
    }

    #[test]
    fn unknown_events_are_ignored() {
        let (mut client, _registry, _handle) = start(cat_config());
        let session_id = expect_connected(&mut client);

        framing::write_message(&mut client, &Envelope::new("bogus", json!({}))).unwrap();
        framing::write_message(&mut client, &Envelope::new("resize", json!(null))).unwrap();
        let input = ClientMessage::input("still-here\r", session_id.as_str());
        framing::write_message(&mut client, &input.to_envelope().unwrap()).unwrap();

        assert!(read_output_until(&mut client, "still-here").contains("still-here"));
    }

    #[test]
    fn disconnect_closes_the_session() {
        let (mut client, registry, handle) = start(cat_config());
        expect_connected(&mut client);
        assert_eq!(lock(&registry).len(), 1);

        drop(client);
        handle.join().unwrap();
        assert!(lock(&registry).is_empty());
    }

    #[test]
    fn spawn_failure_is_reported_as_error() {
        let config = ServerConfig {
            shell: "/nonexistent/shell".to_string(),
            ..Default::default()
        };
        let (mut client, registry, _handle) = start(config);

        match read_server_message(&mut client) {
            ServerMessage::Error { message } => {
                assert!(message.starts_with("Failed to create terminal session: "));
            }
            other => panic!("expected error, got {:?}", other),
        }
        assert!(lock(&registry).is_empty());
    }

    #[test]
    fn input_to_ended_shell_reports_error() {
        let (mut client, registry, _handle) = start(cat_config());
        let session_id = expect_connected(&mut client);

        if let Some(session) = lock(&registry).get_session_mut(&session_id) {
            session.terminate();
        }

        let input = ClientMessage::input("x", session_id.as_str());
        framing::write_message(&mut client, &input.to_envelope().unwrap()).unwrap();

        loop {
            match read_server_message(&mut client) {
                ServerMessage::Error { message } => {
                    assert_eq!(message, "Terminal session has ended");
                    break;
                }
                ServerMessage::Output { .. } => continue,
                other => panic!("unexpected {:?}", other),
            }
        }
    }

    #[test]
    fn stalled_shell_input_leaves_registry_usable() {
        // `sleep` never reads its terminal, so the PTY input buffer fills up.
        let config = ServerConfig {
            shell: "/bin/sleep".to_string(),
            shell_args: vec!["30".to_string()],
            ..Default::default()
        };
        let registry: SharedRegistry = Arc::new(Mutex::new(SessionRegistry::new(config)));
        let session_id = lock(&registry).create_session().unwrap();
        let (_client, server) = UnixStream::pair().unwrap();
        let outbound = Outbound {
            stream: Mutex::new(Stream::Unix(server)),
        };

        let writer_registry = Arc::clone(&registry);
        thread::spawn(move || {
            let payload = InputPayload {
                kind: InputKind::default(),
                data: "x".repeat(1 << 20),
                session_id: Some(session_id),
            };
            handle_input(&writer_registry, &outbound, None, &payload);
        });
        thread::sleep(Duration::from_millis(200));

        let (tx, rx) = mpsc::channel();
        let other = Arc::clone(&registry);
        thread::spawn(move || {
            let _ = tx.send(lock(&other).len());
        });
        assert_eq!(rx.recv_timeout(Duration::from_secs(5)), Ok(1));
    }
}
