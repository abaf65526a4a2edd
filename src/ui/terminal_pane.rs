use ratatui::{
    buffer::Buffer,
    layout::Rect,
    style::{Color, Modifier, Style},
    widgets::{Block, Borders, Widget},
};

use crate::renderer::{CellAttrs, ScreenState, TermColor};

/// Terminal pane widget for displaying the remote shell's screen.
pub struct TerminalPane<'a> {
    screen: Option<&'a ScreenState>,
    title: &'a str,
    focused: bool,
}

impl<'a> TerminalPane<'a> {
    pub fn new(screen: Option<&'a ScreenState>, title: &'a str, focused: bool) -> Self {
        Self {
            screen,
            title,
            focused,
        }
    }

    fn block(&self, scroll_offset: usize) -> Block<'static> {
        let border_style = if self.focused {
            Style::default().fg(Color::Cyan)
        } else {
            Style::default().fg(Color::DarkGray)
        };

        let title = if scroll_offset > 0 {
            format!(" {} [SCROLLED: -{}] ", self.title, scroll_offset)
        } else {
            format!(" {} ", self.title)
        };

        Block::default()
            .title(title)
            .borders(Borders::ALL)
            .border_style(border_style)
    }

    /// Area left for the screen once the border is drawn.
    pub fn inner_area(area: Rect) -> Rect {
        Block::default().borders(Borders::ALL).inner(area)
    }
}

impl<'a> Widget for TerminalPane<'a> {
    fn render(self, area: Rect, buf: &mut Buffer) {
        let scroll_offset = self.screen.map(|s| s.scroll_offset).unwrap_or(0);
        let block = self.block(scroll_offset);

        let inner_area = block.inner(area);
        block.render(area, buf);

        match self.screen {
            Some(screen) => render_screen_state(screen, inner_area, buf),
            None => {
                let placeholder = "Session closed";
                let x =
                    inner_area.x + (inner_area.width.saturating_sub(placeholder.len() as u16)) / 2;
                let y = inner_area.y + inner_area.height / 2;
                if y < inner_area.y + inner_area.height && x < inner_area.x + inner_area.width {
                    buf.set_string(x, y, placeholder, Style::default().fg(Color::DarkGray));
                }
            }
        }
    }
}

fn render_screen_state(screen: &ScreenState, area: Rect, buf: &mut Buffer) {
    for (row_idx, screen_row) in screen.rows.iter().enumerate() {
        if row_idx as u16 >= area.height {
            break;
        }
        let y = area.y + row_idx as u16;

        for (col_idx, cell) in screen_row.cells.iter().enumerate() {
            if col_idx as u16 >= area.width {
                break;
            }
            if cell.contents.is_empty() {
                continue;
            }
            let x = area.x + col_idx as u16;
            buf.set_string(
                x,
                y,
                &cell.contents,
                convert_cell_style(&cell.fg, &cell.bg, &cell.attrs),
            );
        }
    }

    // Cursor only at live view
    if screen.scroll_offset == 0 && screen.cursor_visible {
        let (cursor_row, cursor_col) = screen.cursor;
        let cursor_x = area.x + cursor_col;
        let cursor_y = area.y + cursor_row;

        if cursor_y < area.y + area.height && cursor_x < area.x + area.width {
            if let Some(cell) = buf.cell_mut((cursor_x, cursor_y)) {
                cell.set_style(Style::default().bg(Color::White).fg(Color::Black));
            }
        }
    }
}

fn convert_cell_style(fg: &TermColor, bg: &TermColor, attrs: &CellAttrs) -> Style {
    let mut style = Style::default().fg(fg.to_ratatui()).bg(bg.to_ratatui());

    if attrs.bold {
        style = style.add_modifier(Modifier::BOLD);
    }
    if attrs.italic {
        style = style.add_modifier(Modifier::ITALIC);
    }
    if attrs.underline {
        style = style.add_modifier(Modifier::UNDERLINED);
    }
    if attrs.inverse {
        style = style.add_modifier(Modifier::REVERSED);
    }

    style
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::renderer::{Renderer, VtRenderer};

    fn symbol_at(buf: &Buffer, x: u16, y: u16) -> String {
        buf.cell((x, y)).map(|c| c.symbol().to_string()).unwrap_or_default()
    }

    #[test]
    fn draws_screen_inside_border() {
        let mut renderer = VtRenderer::new(8, 2, 0);
        renderer.write("hi");
        let screen = renderer.screen_state();

        let area = Rect::new(0, 0, 10, 4);
        let mut buf = Buffer::empty(area);
        TerminalPane::new(Some(&screen), "shell", true).render(area, &mut buf);

        assert_eq!(symbol_at(&buf, 1, 1), "h");
        assert_eq!(symbol_at(&buf, 2, 1), "i");
        // Cursor cell after the text is highlighted
        let cursor = buf.cell((3, 1)).unwrap();
        assert_eq!(cursor.bg, Color::White);
    }

    #[test]
    fn inner_area_excludes_border() {
        let inner = TerminalPane::inner_area(Rect::new(0, 0, 82, 26));
        assert_eq!((inner.width, inner.height), (80, 24));
    }

    #[test]
    fn closed_session_shows_placeholder() {
        let area = Rect::new(0, 0, 30, 5);
        let mut buf = Buffer::empty(area);
        TerminalPane::new(None, "shell", false).render(area, &mut buf);

        let row: String = (0..30).map(|x| symbol_at(&buf, x, 2)).collect();
        assert!(row.contains("Session closed"));
    }

    #[test]
    fn bold_cells_keep_their_style() {
        let mut renderer = VtRenderer::new(4, 1, 0);
        renderer.write("\x1b[1mB");
        let screen = renderer.screen_state();

        let area = Rect::new(0, 0, 6, 3);
        let mut buf = Buffer::empty(area);
        TerminalPane::new(Some(&screen), "t", true).render(area, &mut buf);

        let cell = buf.cell((1, 1)).unwrap();
        assert!(cell.modifier.contains(Modifier::BOLD));
    }
}
