//! `vt100`-backed renderer and the screen snapshot types drawn by the UI.

use serde::{Deserialize, Serialize};

use super::Renderer;

/// Number of scrollback lines retained by default.
pub const SCROLLBACK_LINES: usize = 10000;

/// Terminal screen state for rendering.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScreenState {
    /// Visible rows of the screen.
    pub rows: Vec<ScreenRow>,
    /// Cursor position (row, col).
    pub cursor: (u16, u16),
    /// Whether cursor is visible.
    pub cursor_visible: bool,
    /// Current scroll offset (0 = live/bottom).
    pub scroll_offset: usize,
}

/// A row of cells on the screen.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScreenRow {
    pub cells: Vec<ScreenCell>,
}

/// A single cell on the terminal screen.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScreenCell {
    /// The character(s) in this cell.
    pub contents: String,
    pub fg: TermColor,
    pub bg: TermColor,
    pub attrs: CellAttrs,
}

/// Terminal color representation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct TermColor {
    pub kind: ColorKind,
}

/// Color kinds supported.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum ColorKind {
    /// Default terminal color.
    #[default]
    Default,
    /// 256-color palette index.
    Indexed(u8),
    /// 24-bit RGB color.
    Rgb(u8, u8, u8),
}

/// Cell text attributes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct CellAttrs {
    pub bold: bool,
    pub italic: bool,
    pub underline: bool,
    pub inverse: bool,
}

impl TermColor {
    pub fn from_vt100(color: vt100::Color) -> Self {
        let kind = match color {
            vt100::Color::Default => ColorKind::Default,
            vt100::Color::Idx(idx) => ColorKind::Indexed(idx),
            vt100::Color::Rgb(r, g, b) => ColorKind::Rgb(r, g, b),
        };
        Self { kind }
    }

    pub fn to_ratatui(self) -> ratatui::style::Color {
        match self.kind {
            ColorKind::Default => ratatui::style::Color::Reset,
            ColorKind::Indexed(idx) => ratatui::style::Color::Indexed(idx),
            ColorKind::Rgb(r, g, b) => ratatui::style::Color::Rgb(r, g, b),
        }
    }
}

impl CellAttrs {
    pub fn from_vt100_cell(cell: &vt100::Cell) -> Self {
        Self {
            bold: cell.bold(),
            italic: cell.italic(),
            underline: cell.underline(),
            inverse: cell.inverse(),
        }
    }
}

/// Renderer that feeds output through a `vt100` parser.
pub struct VtRenderer {
    parser: vt100::Parser,
    scrollback_lines: usize,
    /// Current scroll offset (0 = live/bottom).
    scroll_offset: usize,
    /// Set while the user has scrolled away from the live view.
    scroll_locked: bool,
    destroyed: bool,
}

impl VtRenderer {
    pub fn new(cols: u16, rows: u16, scrollback_lines: usize) -> Self {
        Self {
            parser: vt100::Parser::new(rows.max(1), cols.max(1), scrollback_lines),
            scrollback_lines,
            scroll_offset: 0,
            scroll_locked: false,
            destroyed: false,
        }
    }

    /// Viewport size as (cols, rows).
    pub fn size(&self) -> (u16, u16) {
        let (rows, cols) = self.parser.screen().size();
        (cols, rows)
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed
    }

    pub fn scroll_offset(&self) -> usize {
        self.scroll_offset
    }

    pub fn scroll_up(&mut self, lines: usize) {
        let desired = self.scroll_offset.saturating_add(lines);
        self.parser.set_scrollback(desired);
        self.scroll_offset = self.parser.screen().scrollback();
        if self.scroll_offset > 0 {
            self.scroll_locked = true;
        }
    }

    pub fn scroll_down(&mut self, lines: usize) {
        self.scroll_offset = self.scroll_offset.saturating_sub(lines);
        self.parser.set_scrollback(self.scroll_offset);
        if self.scroll_offset == 0 {
            self.scroll_locked = false;
        }
    }

    pub fn scroll_to_bottom(&mut self) {
        self.scroll_offset = 0;
        self.scroll_locked = false;
        self.parser.set_scrollback(0);
    }

    /// Snapshot the visible screen.
    pub fn screen_state(&self) -> ScreenState {
        let screen = self.parser.screen();
        let (rows, cols) = screen.size();

        let mut screen_rows = Vec::with_capacity(rows as usize);
        for row_idx in 0..rows {
            let mut cells = Vec::with_capacity(cols as usize);
            for col_idx in 0..cols {
                let Some(cell) = screen.cell(row_idx, col_idx) else {
                    continue;
                };
                cells.push(ScreenCell {
                    contents: cell.contents().to_string(),
                    fg: TermColor::from_vt100(cell.fgcolor()),
                    bg: TermColor::from_vt100(cell.bgcolor()),
                    attrs: CellAttrs::from_vt100_cell(cell),
                });
            }
            screen_rows.push(ScreenRow { cells });
        }

        ScreenState {
            rows: screen_rows,
            cursor: screen.cursor_position(),
            cursor_visible: !screen.hide_cursor(),
            scroll_offset: self.scroll_offset,
        }
    }

    /// Plain text of the visible screen, rows joined by newlines.
    pub fn contents(&self) -> String {
        self.parser.screen().contents()
    }
}

impl Renderer for VtRenderer {
    fn write(&mut self, data: &str) {
        if self.destroyed {
            return;
        }
        self.parser.process(data.as_bytes());

        if !self.scroll_locked {
            self.scroll_offset = 0;
        }
        // process() resets the parser's scrollback, so re-apply ours.
        self.parser.set_scrollback(self.scroll_offset);
    }

    fn resize_viewport(&mut self, cols: u16, rows: u16) {
        if self.destroyed || (cols, rows) == self.size() {
            return;
        }
        self.parser.set_size(rows.max(1), cols.max(1));
    }

    fn destroy(&mut self) {
        if self.destroyed {
            return;
        }
        self.destroyed = true;
        self.parser = vt100::Parser::new(1, 1, 0);
        self.scroll_offset = 0;
        self.scroll_locked = false;
    }
}

impl Default for VtRenderer {
    fn default() -> Self {
        Self::new(80, 24, SCROLLBACK_LINES)
    }
}

impl std::fmt::Debug for VtRenderer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VtRenderer")
            .field("size", &self.size())
            .field("scrollback_lines", &self.scrollback_lines)
            .field("scroll_offset", &self.scroll_offset)
            .field("destroyed", &self.destroyed)
            .finish()
    }
}
