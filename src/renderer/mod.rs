//! Terminal renderer abstraction.
//!
//! The session client only needs three things from a terminal emulator:
//! somewhere to write output, a viewport it can resize, and a way to release
//! it. Keystroke capture stays with the host, which forwards input to
//! [`crate::session::SessionClient::input`].

pub mod vt;

pub use vt::{
    CellAttrs, ColorKind, ScreenCell, ScreenRow, ScreenState, TermColor, VtRenderer,
    SCROLLBACK_LINES,
};

/// Local terminal emulator driven by the session client.
pub trait Renderer {
    /// Feed output (shell bytes or local notices) to the emulator.
    fn write(&mut self, data: &str);

    /// Resize the emulator's viewport model.
    fn resize_viewport(&mut self, cols: u16, rows: u16);

    /// Release the emulator. Must tolerate repeated calls.
    fn destroy(&mut self);
}
