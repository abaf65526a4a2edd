//! In-memory transport for exercising the session client without sockets.

use std::cell::RefCell;
use std::rc::Rc;

use super::{
    ConnectOptions, ConnectionId, EventSink, LinkStatus, Transport, TransportEvent,
    TransportHandle,
};
use crate::endpoint::Endpoint;
use crate::error::{Error, Result};
use crate::protocol::{ClientMessage, Envelope, ServerMessage};

/// Recorded state of one opened link.
#[derive(Debug)]
pub struct MockLink {
    pub connection: ConnectionId,
    pub endpoint: Endpoint,
    pub status: LinkStatus,
    pub emitted: Vec<ClientMessage>,
    pub sink: Option<EventSink>,
    pub disconnect_calls: usize,
}

impl MockLink {
    fn deliver(&self, event: TransportEvent) -> bool {
        self.sink.as_ref().is_some_and(|sink| sink.send(event))
    }
}

/// Shared view of a link, kept by tests after the client owns the handle.
#[derive(Debug, Clone)]
pub struct LinkProbe(Rc<RefCell<MockLink>>);

impl LinkProbe {
    pub fn connection(&self) -> ConnectionId {
        self.0.borrow().connection
    }

    pub fn status(&self) -> LinkStatus {
        self.0.borrow().status
    }

    pub fn emitted(&self) -> Vec<ClientMessage> {
        self.0.borrow().emitted.clone()
    }

    pub fn has_listeners(&self) -> bool {
        self.0.borrow().sink.is_some()
    }

    pub fn disconnect_calls(&self) -> usize {
        self.0.borrow().disconnect_calls
    }

    /// Transport-level connect success.
    pub fn establish(&self) -> bool {
        self.0.borrow_mut().status = LinkStatus::Connected;
        self.0.borrow().deliver(TransportEvent::Connect)
    }

    /// Transport-level connect failure.
    pub fn fail(&self, reason: &str) -> bool {
        self.0.borrow_mut().status = LinkStatus::Closed;
        self.0
            .borrow()
            .deliver(TransportEvent::ConnectError(reason.to_string()))
    }

    /// Peer hung up.
    pub fn drop_connection(&self, reason: &str) -> bool {
        self.0.borrow_mut().status = LinkStatus::Closed;
        self.0
            .borrow()
            .deliver(TransportEvent::Disconnect(reason.to_string()))
    }

    pub fn send_raw(&self, envelope: Envelope) -> bool {
        self.0.borrow().deliver(TransportEvent::Message(envelope))
    }

    pub fn send(&self, message: &ServerMessage) -> bool {
        self.send_raw(message.to_envelope())
    }

    pub fn send_connected(&self, session_id: &str) -> bool {
        self.send(&ServerMessage::Connected {
            session_id: session_id.to_string(),
        })
    }

    pub fn send_output(&self, data: &str) -> bool {
        self.send(&ServerMessage::Output {
            data: data.to_string(),
        })
    }
}

/// Transport that records every link it opens.
#[derive(Debug, Clone, Default)]
pub struct MockTransport {
    links: Rc<RefCell<Vec<LinkProbe>>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn open_count(&self) -> usize {
        self.links.borrow().len()
    }

    pub fn live_count(&self) -> usize {
        self.links
            .borrow()
            .iter()
            .filter(|link| link.status().is_live())
            .count()
    }

    pub fn last(&self) -> LinkProbe {
        self.links
            .borrow()
            .last()
            .cloned()
            .expect("no link has been opened")
    }
}

impl Transport for MockTransport {
    type Handle = MockHandle;

    fn open(
        &mut self,
        connection: ConnectionId,
        endpoint: &Endpoint,
        _options: &ConnectOptions,
        sink: EventSink,
    ) -> MockHandle {
        let link = Rc::new(RefCell::new(MockLink {
            connection,
            endpoint: endpoint.clone(),
            status: LinkStatus::Pending,
            emitted: Vec::new(),
            sink: Some(sink),
            disconnect_calls: 0,
        }));
        self.links.borrow_mut().push(LinkProbe(Rc::clone(&link)));
        MockHandle { link }
    }
}

#[derive(Debug)]
pub struct MockHandle {
    link: Rc<RefCell<MockLink>>,
}

impl TransportHandle for MockHandle {
    fn connection(&self) -> ConnectionId {
        self.link.borrow().connection
    }

    fn status(&self) -> LinkStatus {
        self.link.borrow().status
    }

    fn emit(&mut self, message: &ClientMessage) -> Result<()> {
        let mut link = self.link.borrow_mut();
        if link.status != LinkStatus::Connected {
            return Err(Error::NotConnected);
        }
        link.emitted.push(message.clone());
        Ok(())
    }

    fn disconnect(&mut self) {
        let mut link = self.link.borrow_mut();
        link.status = LinkStatus::Closed;
        link.disconnect_calls += 1;
    }

    fn remove_all_listeners(&mut self) {
        self.link.borrow_mut().sink = None;
    }
}
