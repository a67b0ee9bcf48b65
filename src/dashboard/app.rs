//! Dashboard event loop

use std::io;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use crossterm::{
    event::{Event, EventStream, KeyCode, KeyEvent, KeyEventKind, KeyModifiers},
    execute,
    terminal::{EnterAlternateScreen, LeaveAlternateScreen, disable_raw_mode, enable_raw_mode},
};
use futures::StreamExt;
use ratatui::{Terminal, backend::CrosstermBackend};
use tokio::time::{MissedTickBehavior, interval};
use tracing::{debug, instrument, warn};

use super::{state::DashboardState, ui};
use crate::lifecycle::ServiceOrchestrator;
use crate::monitors::{MetricsHandle, ProtocolMonitor};

/// Time between frames (2 Hz)
pub const FRAME_INTERVAL: Duration = Duration::from_millis(500);

/// Live view over the console's orchestrator and monitors.
///
/// Leaving the dashboard never stops a service.
pub struct Dashboard<'a> {
    orchestrator: &'a mut ServiceOrchestrator,
    metrics: Option<&'a MetricsHandle>,
    monitor: &'a ProtocolMonitor,
    state: DashboardState,
    /// Log the metrics aggregator was last pointed at
    tailed: Option<PathBuf>,
    /// A due watchdog restart has already been announced
    restart_announced: bool,
}

impl<'a> Dashboard<'a> {
    pub fn new(
        orchestrator: &'a mut ServiceOrchestrator,
        metrics: Option<&'a MetricsHandle>,
        monitor: &'a ProtocolMonitor,
    ) -> Self {
        let tailed = orchestrator.primary_log();
        Self {
            orchestrator,
            metrics,
            monitor,
            state: DashboardState::new(),
            tailed,
            restart_announced: false,
        }
    }

    /// Take over the terminal until the operator leaves
    pub async fn run(&mut self) -> Result<()> {
        enable_raw_mode()?;
        let mut stdout = io::stdout();
        if let Err(e) = execute!(stdout, EnterAlternateScreen) {
            let _ = disable_raw_mode();
            return Err(e.into());
        }

        let mut terminal = match Terminal::new(CrosstermBackend::new(stdout)) {
            Ok(terminal) => terminal,
            Err(e) => {
                let _ = disable_raw_mode();
                let _ = execute!(io::stdout(), LeaveAlternateScreen);
                return Err(e.into());
            }
        };

        self.run_event_loop(&mut terminal).await;

        // Restore terminal
        disable_raw_mode()?;
        execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
        terminal.show_cursor()?;

        Ok(())
    }

    #[instrument(skip_all)]
    async fn run_event_loop(&mut self, terminal: &mut Terminal<CrosstermBackend<io::Stdout>>) {
        let mut events = EventStream::new();
        let mut frames = interval(FRAME_INTERVAL);
        frames.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = frames.tick() => {
                    self.tick().await;
                    self.draw(terminal);
                }
                maybe_event = events.next() => match input_action(maybe_event) {
                    InputAction::Leave => {
                        debug!("leaving dashboard");
                        break;
                    }
                    InputAction::Redraw => self.draw(terminal),
                    InputAction::Ignore => {}
                },
            }
        }
    }

    fn draw(&mut self, terminal: &mut Terminal<CrosstermBackend<io::Stdout>>) {
        if let Err(e) = terminal.draw(|f| ui::render(f, &self.state)) {
            self.state.draw_failures += 1;
            warn!("failed to draw dashboard: {e}");
        }
    }

    /// Detect crashed services, follow log changes and refresh the view.
    ///
    /// Watchdog restarts wait for readiness, so they run from the menu rather
    /// than inside a frame.
    async fn tick(&mut self) {
        for report in self.orchestrator.detect_exits() {
            self.state.record_exit(&report);
        }

        let restart_due = self.orchestrator.has_due_restart();
        if restart_due && !self.restart_announced {
            self.state.notify(
                "watchdog restart pending; it runs once you return to the menu".to_string(),
                false,
            );
        }
        self.restart_announced = restart_due;

        let primary = self.orchestrator.primary_log();
        if primary != self.tailed {
            if let Some(metrics) = self.metrics
                && !metrics.set_log_path(primary.clone()).await
            {
                warn!("metrics aggregator is gone");
            }
            self.tailed = primary;
        }

        self.state
            .refresh(self.orchestrator, self.metrics, self.monitor);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum InputAction {
    Leave,
    Redraw,
    Ignore,
}

/// What one item of the terminal event stream means for the dashboard.
/// A closed stream leaves, since no quit key can arrive any more.
fn input_action(event: Option<io::Result<Event>>) -> InputAction {
    match event {
        Some(Ok(Event::Key(key))) if key.kind == KeyEventKind::Press && is_quit(&key) => {
            InputAction::Leave
        }
        Some(Ok(Event::Resize(..))) => InputAction::Redraw,
        Some(Ok(_)) => InputAction::Ignore,
        Some(Err(e)) => {
            warn!("failed to read input: {e}");
            InputAction::Ignore
        }
        None => {
            warn!("terminal input closed");
            InputAction::Leave
        }
    }
}

/// q, Esc and Ctrl+C return to the menu
pub fn is_quit(key: &KeyEvent) -> bool {
    match key.code {
        KeyCode::Char('q') | KeyCode::Char('Q') | KeyCode::Esc => true,
        KeyCode::Char('c') => key.modifiers.contains(KeyModifiers::CONTROL),
        _ => false,
    }
}
