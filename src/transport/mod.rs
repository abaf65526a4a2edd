//! Message transport abstraction used by the session client.
//!
//! A [`Transport`] opens connection attempts; each attempt is a
//! [`TransportHandle`] owned by exactly one client. Handles never call back
//! into the client directly: they push [`TransportNotice`]s, tagged with the
//! [`ConnectionId`] they were opened under, into an [`EventSink`]. The client
//! drains those notices on its own thread, so all state changes happen in one
//! place and notices from a superseded handle can be recognised and discarded.

pub mod socket;
#[cfg(test)]
pub mod testing;

use std::sync::mpsc::Sender;
use std::time::Duration;

use crate::endpoint::Endpoint;
use crate::error::Result;
use crate::protocol::{ClientMessage, Envelope};

pub use socket::{SocketHandle, SocketTransport};

/// Identifies one connection attempt within a client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(pub u64);

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "conn#{}", self.0)
    }
}

/// Lifecycle of a single transport handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkStatus {
    /// Opened, connection not yet established.
    Pending,
    /// Connected and able to send.
    Connected,
    /// Failed, disconnected or closed. Never leaves this state.
    Closed,
}

impl LinkStatus {
    /// Pending or connected: the handle may still deliver a session.
    pub fn is_live(self) -> bool {
        matches!(self, LinkStatus::Pending | LinkStatus::Connected)
    }
}

/// Transport-level events, plus application messages in raw form.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    Connect,
    ConnectError(String),
    Message(Envelope),
    Disconnect(String),
}

/// An event together with the connection that produced it.
#[derive(Debug, Clone, PartialEq)]
pub struct TransportNotice {
    pub connection: ConnectionId,
    pub event: TransportEvent,
}

/// The listener registration a handle delivers events through.
#[derive(Debug, Clone)]
pub struct EventSink {
    connection: ConnectionId,
    tx: Sender<TransportNotice>,
}

impl EventSink {
    pub fn new(connection: ConnectionId, tx: Sender<TransportNotice>) -> Self {
        Self { connection, tx }
    }

    pub fn connection(&self) -> ConnectionId {
        self.connection
    }

    /// Deliver an event. Returns false once the receiving side is gone.
    pub fn send(&self, event: TransportEvent) -> bool {
        self.tx
            .send(TransportNotice {
                connection: self.connection,
                event,
            })
            .is_ok()
    }
}

/// Options applied when opening a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectOptions {
    /// Upper bound on establishing the underlying connection.
    pub connect_timeout: Duration,
    /// Upper bound on a single outbound message. A send that times out
    /// closes the connection.
    pub write_timeout: Duration,
}

impl Default for ConnectOptions {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            write_timeout: Duration::from_secs(5),
        }
    }
}

/// One live connection attempt.
pub trait TransportHandle {
    fn connection(&self) -> ConnectionId;

    fn status(&self) -> LinkStatus;

    fn is_connected(&self) -> bool {
        self.status() == LinkStatus::Connected
    }

    /// Send one message. Fails if the handle is not connected.
    fn emit(&mut self, message: &ClientMessage) -> Result<()>;

    /// Close the connection. Safe to call repeatedly.
    fn disconnect(&mut self);

    /// Detach the event sink so no further events are delivered.
    fn remove_all_listeners(&mut self);
}

/// Factory for transport handles.
pub trait Transport {
    type Handle: TransportHandle;

    /// Begin connecting to `endpoint`. Must not block on the network; the
    /// outcome arrives through `sink` as `Connect` or `ConnectError`.
    fn open(
        &mut self,
        connection: ConnectionId,
        endpoint: &Endpoint,
        options: &ConnectOptions,
        sink: EventSink,
    ) -> Self::Handle;
}
