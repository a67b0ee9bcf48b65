//! Services table

use ratatui::{
    Frame,
    layout::{Constraint, Rect},
    style::{Color, Modifier, Style},
    widgets::{Block, Borders, Paragraph, Row, Table},
};

use crate::dashboard::state::DashboardState;

use super::layout::lifecycle_color;

pub fn render(frame: &mut Frame, area: Rect, state: &DashboardState) {
    if state.services.is_empty() {
        let message = Paragraph::new("No services configured")
            .block(Block::default().borders(Borders::ALL).title("Services"))
            .style(Style::default().fg(Color::Gray));

        frame.render_widget(message, area);
        return;
    }

    let header = Row::new(vec!["Service", "State", "PID", "Port", "URL"])
        .style(
            Style::default()
                .fg(Color::Yellow)
                .add_modifier(Modifier::BOLD),
        )
        .bottom_margin(1);

    let rows: Vec<Row> = state
        .services
        .iter()
        .map(|service| {
            Row::new(vec![
                service.name.clone(),
                format!("● {}", service.state),
                service
                    .pid
                    .map_or_else(|| "-".to_string(), |pid| pid.to_string()),
                service.port.to_string(),
                service.url.clone(),
            ])
            .style(Style::default().fg(lifecycle_color(service.state)))
        })
        .collect();

    let table = Table::new(
        rows,
        [
            Constraint::Length(14),
            Constraint::Length(22),
            Constraint::Length(8),
            Constraint::Length(6),
            Constraint::Min(20),
        ],
    )
    .header(header)
    .block(
        Block::default()
            .borders(Borders::ALL)
            .title(format!("Services ({})", state.services.len())),
    );

    frame.render_widget(table, area);
}
