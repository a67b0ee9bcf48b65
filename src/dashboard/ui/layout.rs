//! Main dashboard layout

use chrono::Local;
use ratatui::{
    Frame,
    layout::{Alignment, Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Paragraph},
};

use crate::dashboard::state::{DashboardState, VISIBLE_MESSAGES};
use crate::lifecycle::LifecycleState;

use super::{messages, services, system};

/// Render the whole dashboard
pub fn render(frame: &mut Frame, state: &DashboardState) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(3), // Header
            Constraint::Min(0),    // Content
            Constraint::Length(3), // Footer
        ])
        .split(frame.area());

    render_header(frame, chunks[0], state);
    render_content(frame, chunks[1], state);
    render_footer(frame, chunks[2], state);
}

fn render_header(frame: &mut Frame, area: Rect, state: &DashboardState) {
    let header = Line::from(vec![
        Span::styled(
            "Stagehand",
            Style::default()
                .fg(Color::Cyan)
                .add_modifier(Modifier::BOLD),
        ),
        Span::raw("  "),
        Span::styled(
            state.lifecycle.to_string(),
            Style::default().fg(lifecycle_color(state.lifecycle)),
        ),
        Span::raw("  "),
        Span::styled(
            Local::now().format("%H:%M:%S").to_string(),
            Style::default().fg(Color::Gray),
        ),
    ]);

    let paragraph = Paragraph::new(header)
        .alignment(Alignment::Center)
        .block(Block::default().borders(Borders::ALL));

    frame.render_widget(paragraph, area);
}

fn render_content(frame: &mut Frame, area: Rect, state: &DashboardState) {
    let service_rows = state.services.len().max(1) as u16;

    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(service_rows + 4),            // Services table
            Constraint::Min(7),                              // System + log tail
            Constraint::Length(VISIBLE_MESSAGES as u16 + 2), // Protocol feed
        ])
        .split(area);

    services::render(frame, chunks[0], state);
    system::render(frame, chunks[1], state);
    messages::render(frame, chunks[2], state);
}

/// Render footer with keybindings, monitor status and recent events
fn render_footer(frame: &mut Frame, area: Rect, state: &DashboardState) {
    let mut footer_text = vec![
        Span::raw("Back to menu: "),
        Span::styled("Q", Style::default().fg(Color::Yellow)),
        Span::raw(" / "),
        Span::styled("Esc", Style::default().fg(Color::Yellow)),
        Span::raw(" / "),
        Span::styled("Ctrl+C", Style::default().fg(Color::Yellow)),
        Span::raw(" | "),
    ];

    match state.osc_addr {
        Some(addr) => footer_text.push(Span::styled(
            format!("● OSC {addr}"),
            Style::default().fg(Color::Green),
        )),
        None => footer_text.push(Span::styled("○ OSC off", Style::default().fg(Color::Gray))),
    }

    if state.metrics.is_none() {
        footer_text.push(Span::raw(" | "));
        footer_text.push(Span::styled(
            "○ metrics off",
            Style::default().fg(Color::Gray),
        ));
    }

    if let Some(notice) = state.notices.back() {
        footer_text.push(Span::raw(" | "));
        footer_text.push(Span::styled(
            format!("{} {}", notice.at.format("%H:%M:%S"), notice.text),
            Style::default().fg(if notice.is_error {
                Color::Red
            } else {
                Color::White
            }),
        ));
    }

    let footer =
        Paragraph::new(Line::from(footer_text)).block(Block::default().borders(Borders::ALL));

    frame.render_widget(footer, area);
}

pub(super) fn lifecycle_color(state: LifecycleState) -> Color {
    match state {
        LifecycleState::Running => Color::Green,
        LifecycleState::Failed => Color::Red,
        LifecycleState::Idle => Color::Gray,
        _ => Color::Yellow,
    }
}
