//! Client-side terminal session.
//!
//! This module provides:
//! - `machine` - the pure lifecycle transition function
//! - `SessionClient` - drives one transport handle and one renderer
//! - `Watchdog` - the handshake timeout reporter

pub mod client;
pub mod machine;
pub mod watchdog;

pub use client::{ClientSettings, SessionClient, DEFAULT_HANDSHAKE_TIMEOUT};
pub use machine::{transition, Effect, Event, Lifecycle, Notice, SessionState};
pub use watchdog::Watchdog;
