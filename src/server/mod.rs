//! Terminal session server.
//!
//! Each accepted connection gets its own shell on a PTY. The server speaks
//! the same framed envelopes as the client: it sends `connected`, `output`
//! and `error`, and accepts `input` and `resize`.

pub mod connection;
pub mod listener;
pub mod registry;
pub mod shell;

pub use connection::{serve_connection, SharedRegistry, Utf8Decoder};
pub use listener::Listener;
pub use registry::SessionRegistry;
pub use shell::{PtyWriter, SessionInfo, ShellSession};
