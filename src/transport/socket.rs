//! Socket transport: framed JSON envelopes over a Unix or TCP stream.
//!
//! `open` returns immediately. A per-connection thread performs the connect,
//! reports the outcome, then reads frames until the stream ends. Sending
//! happens on the caller's thread through a cloned write half with a write
//! timeout; a send that fails or times out tears the connection down.

use std::io::BufReader;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;

use tracing::{debug, trace, warn};

use super::{
    ConnectOptions, ConnectionId, EventSink, LinkStatus, Transport, TransportEvent,
    TransportHandle,
};
use crate::endpoint::{Endpoint, Stream};
use crate::error::{Error, Result};
use crate::protocol::{framing, ClientMessage, Envelope};

const PENDING: u8 = 0;
const CONNECTED: u8 = 1;
const CLOSED: u8 = 2;

/// State shared between a handle and its reader thread.
#[derive(Debug)]
struct Shared {
    status: AtomicU8,
    /// Write half, present only while connected.
    writer: Mutex<Option<Stream>>,
    /// Listener registration; `None` once detached.
    sink: Mutex<Option<EventSink>>,
    /// Why a send broke the connection, reported with the disconnect.
    send_failure: Mutex<Option<String>>,
}

impl Shared {
    fn new(sink: EventSink) -> Self {
        Self {
            status: AtomicU8::new(PENDING),
            writer: Mutex::new(None),
            sink: Mutex::new(Some(sink)),
            send_failure: Mutex::new(None),
        }
    }

    fn status(&self) -> LinkStatus {
        match self.status.load(Ordering::SeqCst) {
            PENDING => LinkStatus::Pending,
            CONNECTED => LinkStatus::Connected,
            _ => LinkStatus::Closed,
        }
    }

    fn notify(&self, event: TransportEvent) {
        let sink = self.sink.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(sink) = sink.as_ref() {
            sink.send(event);
        } else {
            trace!(?event, "dropping event for detached listener");
        }
    }

    fn detach(&self) {
        self.sink
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
    }

    /// Mark closed and shut the stream down. Returns the previous status.
    fn close(&self) -> LinkStatus {
        let mut writer = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        let previous = self.status();
        self.status.store(CLOSED, Ordering::SeqCst);
        if let Some(stream) = writer.take() {
            let _ = stream.shutdown();
        }
        previous
    }

    /// A partial frame may have been written, so the stream is unusable.
    /// Shut it down and let the reader thread report the disconnect.
    fn abandon_writer(&self, writer: &mut Option<Stream>, reason: String) {
        if let Some(stream) = writer.take() {
            let _ = stream.shutdown();
        }
        *self
            .send_failure
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(reason);
    }

    fn take_send_failure(&self) -> Option<String> {
        self.send_failure
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }
}

/// Opens [`SocketHandle`]s.
#[derive(Debug, Default, Clone, Copy)]
pub struct SocketTransport;

impl SocketTransport {
    pub fn new() -> Self {
        Self
    }
}

impl Transport for SocketTransport {
    type Handle = SocketHandle;

    fn open(
        &mut self,
        connection: ConnectionId,
        endpoint: &Endpoint,
        options: &ConnectOptions,
        sink: EventSink,
    ) -> SocketHandle {
        let shared = Arc::new(Shared::new(sink));
        let thread_shared = Arc::clone(&shared);
        let endpoint = endpoint.clone();
        let options = *options;

        debug!(%connection, %endpoint, "opening transport");
        let spawned = thread::Builder::new()
            .name(format!("relayterm-{}", connection))
            .spawn(move || run_connection(&thread_shared, &endpoint, &options));

        if let Err(e) = spawned {
            shared.close();
            shared.notify(TransportEvent::ConnectError(format!(
                "failed to start connection thread: {}",
                e
            )));
        }

        SocketHandle { connection, shared }
    }
}

/// Connect, then pump incoming frames into the sink until the stream ends.
fn run_connection(shared: &Shared, endpoint: &Endpoint, options: &ConnectOptions) {
    let connected = Stream::connect(endpoint, options.connect_timeout).and_then(|stream| {
        stream.set_write_timeout(Some(options.write_timeout))?;
        let writer = stream.try_clone()?;
        Ok((stream, writer))
    });
    let (stream, writer) = match connected {
        Ok(pair) => pair,
        Err(e) => {
            debug!(%endpoint, error = %e, "connect failed");
            shared.close();
            shared.notify(TransportEvent::ConnectError(e.to_string()));
            return;
        }
    };

    {
        let mut slot = shared.writer.lock().unwrap_or_else(PoisonError::into_inner);
        if shared.status() == LinkStatus::Closed {
            // Disconnected while the connect was in flight.
            let _ = stream.shutdown();
            return;
        }
        *slot = Some(writer);
        shared.status.store(CONNECTED, Ordering::SeqCst);
    }
    shared.notify(TransportEvent::Connect);

    let mut reader = BufReader::new(stream);
    let reason = loop {
        match framing::read_message::<_, Envelope>(&mut reader) {
            Ok(envelope) => shared.notify(TransportEvent::Message(envelope)),
            // The whole frame was consumed, so the stream is still aligned.
            Err(Error::Json(e)) => debug!(error = %e, "skipping undecodable frame"),
            Err(e) if e.is_disconnect() => break "server closed the connection".to_string(),
            Err(e) => break e.to_string(),
        }
    };

    let reason = match (shared.close(), shared.take_send_failure()) {
        (LinkStatus::Closed, _) => "client disconnect".to_string(),
        (_, Some(failure)) => failure,
        (_, None) => reason,
    };
    shared.notify(TransportEvent::Disconnect(reason));
}

/// Handle to one socket connection attempt.
#[derive(Debug)]
pub struct SocketHandle {
    connection: ConnectionId,
    shared: Arc<Shared>,
}

impl TransportHandle for SocketHandle {
    fn connection(&self) -> ConnectionId {
        self.connection
    }

    fn status(&self) -> LinkStatus {
        self.shared.status()
    }

    fn emit(&mut self, message: &ClientMessage) -> Result<()> {
        let envelope = message.to_envelope()?;
        let mut writer = self
            .shared
            .writer
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let stream = writer.as_mut().ok_or(Error::NotConnected)?;
        framing::write_message(stream, &envelope).inspect_err(|e| {
            warn!(connection = %self.connection, error = %e, "failed to send message");
            self.shared
                .abandon_writer(&mut writer, format!("send failed: {}", e));
        })
    }

    fn disconnect(&mut self) {
        if self.shared.close() != LinkStatus::Closed {
            debug!(connection = %self.connection, "transport disconnected");
        }
    }

    fn remove_all_listeners(&mut self) {
        self.shared.detach();
    }
}

impl Drop for SocketHandle {
    fn drop(&mut self) {
        self.shared.close();
    }
}
