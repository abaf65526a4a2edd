//! Wire protocol between the terminal client and the session server.
//!
//! Every message is a named event with a JSON payload, carried in an
//! [`Envelope`]. Server messages are decoded leniently: a frame that parses
//! but lacks an expected field is reported as a protocol error so the caller
//! can drop it without tearing down the connection.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, Result};

/// Opaque identifier of a remote shell session, issued by the server.
pub type SessionId = String;

pub const EVENT_INPUT: &str = "input";
pub const EVENT_RESIZE: &str = "resize";
pub const EVENT_CONNECTED: &str = "connected";
pub const EVENT_OUTPUT: &str = "output";
pub const EVENT_ERROR: &str = "error";

/// Viewport size the server assumes when a resize omits a dimension.
pub const DEFAULT_COLS: u16 = 80;
pub const DEFAULT_ROWS: u16 = 24;

/// A named event with its raw payload, as it appears on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub event: String,
    #[serde(default)]
    pub payload: Value,
}

impl Envelope {
    pub fn new(event: impl Into<String>, payload: Value) -> Self {
        Self {
            event: event.into(),
            payload,
        }
    }
}

/// Marker carried in the `type` field of input payloads.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InputKind {
    #[default]
    Input,
}

/// Keystroke or paste data for a bound shell.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputPayload {
    #[serde(rename = "type", default)]
    pub kind: InputKind,
    #[serde(default)]
    pub data: String,
    /// Always set by the client; optional on decode for older peers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<SessionId>,
}

impl InputPayload {
    pub fn new(data: impl Into<String>, session_id: impl Into<SessionId>) -> Self {
        Self {
            kind: InputKind::Input,
            data: data.into(),
            session_id: Some(session_id.into()),
        }
    }
}

/// New viewport dimensions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResizePayload {
    #[serde(default = "default_cols")]
    pub cols: u16,
    #[serde(default = "default_rows")]
    pub rows: u16,
}

fn default_cols() -> u16 {
    DEFAULT_COLS
}

fn default_rows() -> u16 {
    DEFAULT_ROWS
}

/// Messages sent from the client to the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientMessage {
    Input(InputPayload),
    Resize(ResizePayload),
}

impl ClientMessage {
    pub fn input(data: impl Into<String>, session_id: impl Into<SessionId>) -> Self {
        ClientMessage::Input(InputPayload::new(data, session_id))
    }

    pub fn resize(cols: u16, rows: u16) -> Self {
        ClientMessage::Resize(ResizePayload { cols, rows })
    }

    /// Event name this message travels under.
    pub fn event_name(&self) -> &'static str {
        match self {
            ClientMessage::Input(_) => EVENT_INPUT,
            ClientMessage::Resize(_) => EVENT_RESIZE,
        }
    }

    pub fn to_envelope(&self) -> Result<Envelope> {
        let payload = match self {
            ClientMessage::Input(p) => serde_json::to_value(p)?,
            ClientMessage::Resize(p) => serde_json::to_value(p)?,
        };
        Ok(Envelope::new(self.event_name(), payload))
    }

    pub fn from_envelope(envelope: Envelope) -> Result<Self> {
        match envelope.event.as_str() {
            EVENT_INPUT => Ok(ClientMessage::Input(serde_json::from_value(
                envelope.payload,
            )?)),
            EVENT_RESIZE => {
                // A resize with no payload at all still means "use defaults".
                let payload = if envelope.payload.is_null() {
                    Value::Object(Default::default())
                } else {
                    envelope.payload
                };
                Ok(ClientMessage::Resize(serde_json::from_value(payload)?))
            }
            other => Err(Error::protocol(format!("unknown client event: {}", other))),
        }
    }
}

/// Messages sent from the server to the client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerMessage {
    /// Handshake completed; input must now carry this session id.
    Connected { session_id: SessionId },
    /// Shell output to render.
    Output { data: String },
    /// Session-level error report.
    Error { message: String },
}

impl ServerMessage {
    pub fn event_name(&self) -> &'static str {
        match self {
            ServerMessage::Connected { .. } => EVENT_CONNECTED,
            ServerMessage::Output { .. } => EVENT_OUTPUT,
            ServerMessage::Error { .. } => EVENT_ERROR,
        }
    }

    pub fn to_envelope(&self) -> Envelope {
        let payload = match self {
            ServerMessage::Connected { session_id } => {
                serde_json::json!({ "session_id": session_id })
            }
            ServerMessage::Output { data } => {
                serde_json::json!({ "type": EVENT_OUTPUT, "data": data })
            }
            ServerMessage::Error { message } => serde_json::json!({ "message": message }),
        };
        Envelope::new(self.event_name(), payload)
    }

    /// Decode a server envelope, rejecting payloads missing their key field.
    pub fn from_envelope(envelope: &Envelope) -> Result<Self> {
        match envelope.event.as_str() {
            EVENT_CONNECTED => {
                let session_id = string_field(&envelope.payload, "session_id")
                    .ok_or_else(|| Error::protocol("connected without session_id"))?;
                Ok(ServerMessage::Connected { session_id })
            }
            EVENT_OUTPUT => {
                let data = string_field(&envelope.payload, "data")
                    .ok_or_else(|| Error::protocol("output without data"))?;
                Ok(ServerMessage::Output { data })
            }
            EVENT_ERROR => {
                let message = string_field(&envelope.payload, "message")
                    .or_else(|| envelope.payload.as_str().map(str::to_string))
                    .unwrap_or_else(|| envelope.payload.to_string());
                Ok(ServerMessage::Error { message })
            }
            other => Err(Error::protocol(format!("unknown server event: {}", other))),
        }
    }
}

/// Non-empty string field of a JSON object payload.
fn string_field(payload: &Value, key: &str) -> Option<String> {
    payload
        .get(key)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/// Length-prefixed message framing.
pub mod framing {
    use std::io::{Read, Write};

    use serde::de::DeserializeOwned;
    use serde::Serialize;

    use crate::error::{Error, Result};

    /// Largest frame either side will accept.
    pub const MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

    /// Write a message with a little-endian `u32` length prefix.
    pub fn write_message<W: Write, T: Serialize>(writer: &mut W, msg: &T) -> Result<()> {
        let data = serde_json::to_vec(msg)?;
        if data.len() > MAX_FRAME_LEN {
            return Err(Error::FrameTooLarge { len: data.len() });
        }
        let len = data.len() as u32;
        writer.write_all(&len.to_le_bytes())?;
        writer.write_all(&data)?;
        writer.flush()?;
        Ok(())
    }

    /// Read one length-prefixed message.
    pub fn read_message<R: Read, T: DeserializeOwned>(reader: &mut R) -> Result<T> {
        let mut len_buf = [0u8; 4];
        reader.read_exact(&mut len_buf)?;
        let len = u32::from_le_bytes(len_buf) as usize;

        if len > MAX_FRAME_LEN {
            return Err(Error::FrameTooLarge { len });
        }

        let mut data = vec![0u8; len];
        reader.read_exact(&mut data)?;

        Ok(serde_json::from_slice(&data)?)
    }
}
