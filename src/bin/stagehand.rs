//! Stagehand operator console
//!
//! Supervises the local application stack from a single-key menu and shows a
//! live dashboard. Logs go to a file because the terminal belongs to the UI.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{ArgAction, Parser};
use crossterm::terminal::disable_raw_mode;
use stagehand::{config::ConsoleConfig, console::Console, menu, util::get_log_filter};
use tracing::{error, info, trace};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "stagehand")]
#[command(about = "Operator console for the local show-control stack", long_about = None)]
struct Args {
    /// Configuration file path
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Directory the stack lives in (default: current directory)
    #[arg(short = 'C', long, value_name = "DIR")]
    workdir: Option<PathBuf>,

    /// More log output (-v debug, -vv trace)
    #[arg(short, long, action = ArgAction::Count)]
    verbose: u8,

    /// Leave processes from an earlier run alone
    #[arg(long)]
    no_recover: bool,
}

fn init_tracing(log_path: &Path, verbose: u8) {
    let filter = get_log_filter().unwrap_or_else(|| {
        match verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
        .to_string()
    });
    let filter = EnvFilter::try_new(&filter).unwrap_or_else(|_| EnvFilter::new("info"));

    // Create directory if it doesn't exist
    if let Some(parent) = log_path.parent() {
        std::fs::create_dir_all(parent).ok();
    }

    let log_file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_path);

    match log_file {
        Ok(file) => {
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_target(false)
                .with_level(true)
                .with_ansi(false)
                .with_writer(file)
                .init();
        }
        Err(_) => {
            // No log file: keep the terminal clean apart from errors
            tracing_subscriber::fmt()
                .with_target(false)
                .with_level(true)
                .with_max_level(tracing::Level::ERROR)
                .with_writer(std::io::stderr)
                .init();
        }
    }
}

async fn run(args: Args) -> Result<()> {
    // resolve before changing directory
    let config_path = args
        .config
        .as_deref()
        .map(std::path::absolute)
        .transpose()
        .context("invalid config path")?;

    if let Some(dir) = &args.workdir {
        std::env::set_current_dir(dir)
            .with_context(|| format!("cannot enter {}", dir.display()))?;
    }

    // children inherit whatever .env adds
    dotenv::dotenv().ok();

    let config = ConsoleConfig::load(config_path.as_deref())?;
    init_tracing(&config.console_log(), args.verbose);
    info!("stagehand starting in {:?}", std::env::current_dir().ok());
    trace!("started with args: {args:?}");

    let mut console = Console::new(config)?;

    if !args.no_recover {
        let report = console.recover().await;
        info!("{report}");
    }

    let result = menu::run(&mut console).await;
    if !console.is_shut_down() {
        console.shutdown().await;
    }
    result
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    let code = match run(args).await {
        Ok(()) => 0,
        Err(e) => {
            let _ = disable_raw_mode();
            error!("{e:#}");
            eprintln!("Error: {e:#}");
            1
        }
    };

    let _ = disable_raw_mode();
    // a pending stdin read would otherwise keep the runtime alive
    std::process::exit(code);
}
