//! relayterm library crate.
//!
//! This library provides a remote terminal client and server, including:
//! - The client session lifecycle (`session`) and its transport seam (`transport`)
//! - The framed JSON wire protocol (`protocol`, `endpoint`)
//! - Terminal emulation and UI components (`renderer`, `ui`, `app`)
//! - The PTY-backed session server (`server`)

pub mod app;
pub mod config;
pub mod endpoint;
pub mod error;
pub mod input;
pub mod logging;
pub mod protocol;
pub mod renderer;
pub mod server;
pub mod session;
pub mod transport;
pub mod ui;

pub use error::{Error, Result};
