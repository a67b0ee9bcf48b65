//! Terminal dashboard
//!
//! A read-only view over the orchestrator and the background monitors,
//! redrawn twice a second.

mod app;
mod state;
mod ui;

pub use app::{Dashboard, FRAME_INTERVAL, is_quit};
pub use state::{DashboardState, Notice, VISIBLE_MESSAGES};
