//! System metrics panel and service log tail

use ratatui::{
    Frame,
    layout::{Constraint, Direction, Layout, Rect},
    style::{Color, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Gauge, Paragraph, Sparkline},
};

use crate::dashboard::state::DashboardState;

pub fn render(frame: &mut Frame, area: Rect, state: &DashboardState) {
    let chunks = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([
            Constraint::Percentage(40), // Metrics
            Constraint::Percentage(60), // Log tail
        ])
        .split(area);

    render_metrics(frame, chunks[0], state);
    render_log_tail(frame, chunks[1], state);
}

fn render_metrics(frame: &mut Frame, area: Rect, state: &DashboardState) {
    let block = Block::default().borders(Borders::ALL).title("System");

    let Some(metrics) = &state.metrics else {
        let message = Paragraph::new("Metrics are not being collected")
            .block(block)
            .style(Style::default().fg(Color::Gray));
        frame.render_widget(message, area);
        return;
    };

    let inner = block.inner(area);
    frame.render_widget(block, area);

    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(1), // Clock
            Constraint::Length(1), // CPU gauge
            Constraint::Length(1), // Memory gauge
            Constraint::Min(0),    // CPU history
        ])
        .split(inner);

    let clock = Line::from(vec![
        Span::styled("Sampled ", Style::default().fg(Color::Cyan)),
        Span::raw(metrics.taken_at.format("%H:%M:%S").to_string()),
    ]);
    frame.render_widget(Paragraph::new(clock), chunks[0]);

    frame.render_widget(
        usage_gauge("CPU", metrics.cpu_percent, Color::Cyan),
        chunks[1],
    );

    let memory_label = format!(
        "MEM {:.1}% ({} / {} MiB)",
        metrics.memory_percent,
        metrics.memory_used / (1024 * 1024),
        metrics.memory_total / (1024 * 1024)
    );
    frame.render_widget(
        Gauge::default()
            .gauge_style(Style::default().fg(Color::Magenta))
            .ratio(ratio(metrics.memory_percent))
            .label(memory_label),
        chunks[2],
    );

    let history: Vec<u64> = state.cpu_history.iter().copied().collect();
    let sparkline = Sparkline::default()
        .data(&history)
        .max(100)
        .style(Style::default().fg(Color::Cyan));
    frame.render_widget(sparkline, chunks[3]);
}

fn usage_gauge(label: &str, percent: f32, color: Color) -> Gauge<'static> {
    Gauge::default()
        .gauge_style(Style::default().fg(color))
        .ratio(ratio(percent))
        .label(format!("{label} {percent:.1}%"))
}

fn ratio(percent: f32) -> f64 {
    (percent as f64 / 100.0).clamp(0.0, 1.0)
}

fn render_log_tail(frame: &mut Frame, area: Rect, state: &DashboardState) {
    let lines: Vec<Line> = match &state.metrics {
        Some(metrics) if !metrics.log_lines.is_empty() => metrics
            .log_lines
            .iter()
            .map(|line| Line::from(line.as_str()))
            .collect(),
        _ => vec![Line::styled(
            "No log output yet",
            Style::default().fg(Color::Gray),
        )],
    };

    let paragraph =
        Paragraph::new(lines).block(Block::default().borders(Borders::ALL).title("Recent log"));

    frame.render_widget(paragraph, area);
}
