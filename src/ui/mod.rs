//! Terminal UI components: the terminal pane and the status line.

pub mod status_line;
pub mod terminal_pane;

pub use status_line::StatusLine;
pub use terminal_pane::TerminalPane;
