//! Interactive single-key menu

use std::io::{self, BufRead, Write};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use crossterm::{
    cursor::MoveTo,
    event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers},
    execute,
    style::Stylize,
    terminal::{Clear, ClearType, disable_raw_mode, enable_raw_mode},
};
use tracing::{debug, info, warn};

use crate::console::{Console, OperationReport};
use crate::lifecycle::{LaunchOptions, LifecycleState};

/// How long one key read waits before the console is polled again
const KEY_WAIT: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Choice {
    Launch,
    RebuildLaunch,
    Dashboard,
    ToggleOsc,
    Stop,
    Status,
    Quit,
}

impl Choice {
    const ALL: [Choice; 7] = [
        Choice::Launch,
        Choice::RebuildLaunch,
        Choice::Dashboard,
        Choice::ToggleOsc,
        Choice::Stop,
        Choice::Status,
        Choice::Quit,
    ];

    pub fn key(self) -> char {
        match self {
            Choice::Launch => '1',
            Choice::RebuildLaunch => '2',
            Choice::Dashboard => '3',
            Choice::ToggleOsc => '4',
            Choice::Stop => '5',
            Choice::Status => '6',
            Choice::Quit => 'q',
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Choice::Launch => "Launch services",
            Choice::RebuildLaunch => "Rebuild and launch",
            Choice::Dashboard => "Open dashboard",
            Choice::ToggleOsc => "Toggle OSC monitor",
            Choice::Stop => "Stop services",
            Choice::Status => "Status",
            Choice::Quit => "Quit",
        }
    }

    pub fn from_key(key: char) -> Option<Choice> {
        let key = key.to_ascii_lowercase();
        Choice::ALL.into_iter().find(|choice| choice.key() == key)
    }
}

/// Run the menu until the operator quits or the console is interrupted.
/// The console is shut down before this returns.
pub async fn run(console: &mut Console) -> Result<()> {
    let mut drawn: Option<LifecycleState> = None;

    loop {
        for report in console.poll().await {
            warn!("{} exited with {:?}", report.service, report.code);
        }

        let state = console.orchestrator().state();
        if drawn != Some(state) {
            draw_menu(console)?;
            drawn = Some(state);
        }

        let choice = tokio::select! {
            choice = read_choice() => choice?,
            _ = interrupted() => Some(Choice::Quit),
        };
        let Some(choice) = choice else {
            continue;
        };
        debug!("menu choice: {choice:?}");
        drawn = None;

        if choice == Choice::Quit {
            break;
        }

        let report = tokio::select! {
            report = perform(console, choice) => report,
            _ = interrupted() => {
                info!("interrupted during {choice:?}");
                break;
            }
        };

        if choice != Choice::Dashboard || !report.success {
            show_report(&report);
            wait_for_enter().await?;
        }
    }

    println!("{}", "Shutting down...".yellow());
    let report = console.shutdown().await;
    show_report(&report);
    Ok(())
}

async fn perform(console: &mut Console, choice: Choice) -> OperationReport {
    match choice {
        Choice::Launch => {
            println!("{}", "Launching, this can take a while...".yellow());
            console.launch(LaunchOptions::default()).await
        }
        Choice::RebuildLaunch => {
            println!("{}", "Rebuilding and launching...".yellow());
            console.launch(LaunchOptions { rebuild: true }).await
        }
        Choice::Dashboard => console.dashboard().await,
        Choice::ToggleOsc => console.toggle_osc().await,
        Choice::Stop => console.stop().await,
        Choice::Status => console.status(),
        Choice::Quit => OperationReport::ok(""),
    }
}

fn draw_menu(console: &Console) -> Result<()> {
    let mut stdout = io::stdout();
    execute!(stdout, Clear(ClearType::All), MoveTo(0, 0))?;

    let state = console.orchestrator().state();
    let state_text = match state {
        LifecycleState::Running => state.to_string().green(),
        LifecycleState::Failed => state.to_string().red(),
        _ => state.to_string().dark_grey(),
    };

    writeln!(stdout, "{}  {}", "Stagehand".cyan().bold(), state_text)?;
    writeln!(stdout)?;
    for choice in Choice::ALL {
        writeln!(stdout, "  [{}] {}", choice.key().to_string().yellow(), choice.label())?;
    }
    writeln!(stdout)?;
    write!(stdout, "Select an option: ")?;
    stdout.flush()?;
    Ok(())
}

fn show_report(report: &OperationReport) {
    if report.message.is_empty() {
        return;
    }
    println!();
    if report.success {
        println!("{}", report.message.as_str().green());
    } else {
        println!("{}", "Operation failed".red().bold());
        println!("{}", report.message.as_str().red());
    }
}

/// Resolves on Ctrl+C, or on SIGTERM where it exists
pub async fn interrupted() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(_) => {
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}

/// A menu choice, or `None` when no valid key arrived within [`KEY_WAIT`]
async fn read_choice() -> Result<Option<Choice>> {
    tokio::task::spawn_blocking(read_key)
        .await
        .context("input task failed")?
}

/// One key press, or one line when stdin is not a terminal
fn read_key() -> Result<Option<Choice>> {
    if enable_raw_mode().is_err() {
        let mut line = String::new();
        if io::stdin().lock().read_line(&mut line)? == 0 {
            // stdin closed
            return Ok(Some(Choice::Quit));
        }
        return Ok(line.trim().chars().next().and_then(Choice::from_key));
    }

    let key = next_key_press(KEY_WAIT);
    disable_raw_mode()?;

    match key? {
        Some(key) => {
            println!();
            Ok(choice_for(&key))
        }
        None => Ok(None),
    }
}

fn next_key_press(wait: Duration) -> io::Result<Option<KeyEvent>> {
    let deadline = Instant::now() + wait;
    loop {
        let left = deadline.saturating_duration_since(Instant::now());
        if !event::poll(left)? {
            return Ok(None);
        }
        if let Event::Key(key) = event::read()?
            && key.kind == KeyEventKind::Press
        {
            return Ok(Some(key));
        }
    }
}

fn choice_for(key: &KeyEvent) -> Option<Choice> {
    match key.code {
        KeyCode::Char('c') if key.modifiers.contains(KeyModifiers::CONTROL) => Some(Choice::Quit),
        KeyCode::Char(c) => Choice::from_key(c),
        KeyCode::Esc => Some(Choice::Quit),
        _ => None,
    }
}

async fn wait_for_enter() -> Result<()> {
    print!("\n{}", "Press Enter to continue".dark_grey());
    io::stdout().flush()?;

    tokio::select! {
        read = tokio::task::spawn_blocking(|| {
            let mut line = String::new();
            io::stdin().lock().read_line(&mut line).map(|_| ())
        }) => read.context("input task failed")??,
        _ = interrupted() => {}
    }
    Ok(())
}
