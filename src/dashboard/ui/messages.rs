//! Protocol feed

use ratatui::{
    Frame,
    layout::Rect,
    style::{Color, Style},
    text::Line,
    widgets::{Block, Borders, List, ListItem},
};

use crate::dashboard::state::DashboardState;

pub fn render(frame: &mut Frame, area: Rect, state: &DashboardState) {
    let title = format!("OSC messages ({} received)", state.messages_total);

    let items: Vec<ListItem> = if state.messages.is_empty() {
        let hint = match state.osc_addr {
            Some(addr) => format!("Waiting for messages on {addr}"),
            None => "OSC monitor is off".to_string(),
        };
        vec![ListItem::new(Line::styled(hint, Style::default().fg(Color::Gray)))]
    } else {
        state
            .messages
            .iter()
            .map(|message| ListItem::new(message.to_string()))
            .collect()
    };

    let list = List::new(items).block(Block::default().borders(Borders::ALL).title(title));

    frame.render_widget(list, area);
}
