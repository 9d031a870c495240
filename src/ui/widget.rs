use std::borrow::Cow;

use ratatui::{
    layout::Rect,
    style::{Color, Modifier, Style},
    text::Span,
    widgets::{Block, Paragraph, Wrap},
    Frame,
};

pub(crate) fn bordered(title: &str) -> Block<'static> {
    Block::bordered()
        .border_style(Style::default().fg(Color::DarkGray))
        .title(Span::styled(
            title.to_owned(),
            Style::default().fg(Color::Magenta).add_modifier(Modifier::BOLD),
        ))
}

/// Bordered panel of plain text lines.
pub(crate) struct Panel {
    title: Cow<'static, str>,
    pub(crate) text: String,
}

impl Panel {
    pub(crate) fn new<T>(title: T) -> Self
    where
        T: Into<Cow<'static, str>>,
    {
        Self {
            title: title.into(),
            text: String::new(),
        }
    }

    pub(crate) fn draw(&self, frame: &mut Frame, area: Rect) {
        let widget = Paragraph::new(self.text.as_str())
            .wrap(Wrap { trim: true })
            .block(bordered(self.title.as_ref()));

        frame.render_widget(widget, area);
    }
}

/// Load limits panel.
///
/// A caller-registered hook receives it before each render and may rewrite
/// both the title and the text.
#[derive(Debug, Default)]
pub struct LoadLimitsWidget {
    pub title: String,
    pub text: String,
}

impl LoadLimitsWidget {
    pub(crate) fn draw(&self, frame: &mut Frame, area: Rect) {
        let widget = Paragraph::new(self.text.as_str())
            .wrap(Wrap { trim: true })
            .block(bordered(&self.title));

        frame.render_widget(widget, area);
    }
}
