use ratatui::{
    buffer::Buffer,
    layout::Rect,
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Paragraph, Widget},
};

use crate::session::Lifecycle;

const KEY_HINTS: &str = "F5 reconnect  S-PgUp/PgDn scroll  C-] quit";

/// One-line summary of the connection under the terminal pane.
pub struct StatusLine<'a> {
    lifecycle: Lifecycle,
    session_id: Option<&'a str>,
    endpoint: &'a str,
}

impl<'a> StatusLine<'a> {
    pub fn new(lifecycle: Lifecycle, session_id: Option<&'a str>, endpoint: &'a str) -> Self {
        Self {
            lifecycle,
            session_id,
            endpoint,
        }
    }

    fn indicator(&self) -> Span<'static> {
        let (glyph, color) = match self.lifecycle {
            Lifecycle::Ready => ("● ", Color::Green),
            Lifecycle::Connecting => ("◐ ", Color::Yellow),
            Lifecycle::Idle | Lifecycle::Closed => ("○ ", Color::DarkGray),
        };
        Span::styled(glyph, Style::default().fg(color))
    }
}

/// First 8 characters of a session id.
fn short_id(id: &str) -> &str {
    id.char_indices().nth(8).map_or(id, |(idx, _)| &id[..idx])
}

impl<'a> Widget for StatusLine<'a> {
    fn render(self, area: Rect, buf: &mut Buffer) {
        let mut spans = vec![
            self.indicator(),
            Span::styled(
                self.lifecycle.label(),
                Style::default().add_modifier(Modifier::BOLD),
            ),
            Span::raw("  "),
            Span::styled(self.endpoint.to_string(), Style::default().fg(Color::Cyan)),
        ];
        if let Some(id) = self.session_id {
            spans.push(Span::raw("  session "));
            spans.push(Span::styled(
                short_id(id).to_string(),
                Style::default().fg(Color::Magenta),
            ));
        }
        spans.push(Span::raw("  "));
        spans.push(Span::styled(KEY_HINTS, Style::default().fg(Color::DarkGray)));

        Paragraph::new(Line::from(spans))
            .style(Style::default().bg(Color::Black))
            .render(area, buf);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn render_line(widget: StatusLine<'_>, width: u16) -> String {
        let area = Rect::new(0, 0, width, 1);
        let mut buf = Buffer::empty(area);
        widget.render(area, &mut buf);
        (0..width)
            .filter_map(|x| buf.cell((x, 0)).map(|c| c.symbol().to_string()))
            .collect()
    }

    #[test]
    fn shows_lifecycle_endpoint_and_short_session() {
        let line = render_line(
            StatusLine::new(
                Lifecycle::Ready,
                Some("3f2a9c1e-0000-4000-8000-000000000000"),
                "unix:/tmp/r.sock",
            ),
            100,
        );
        assert!(line.contains(Lifecycle::Ready.label()));
        assert!(line.contains("unix:/tmp/r.sock"));
        assert!(line.contains("session 3f2a9c1e"));
        assert!(!line.contains("3f2a9c1e-"));
    }

    #[test]
    fn omits_session_until_bound() {
        let line = render_line(StatusLine::new(Lifecycle::Connecting, None, "h:1"), 80);
        assert!(!line.contains("session"));
    }

    #[test]
    fn short_id_handles_short_ids() {
        assert_eq!(short_id("abc"), "abc");
        assert_eq!(short_id("abcdefghij"), "abcdefgh");
    }
}
