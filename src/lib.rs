//! Stagehand - operator console for a local application stack
//!
//! - [`lifecycle`]: port reclamation, process supervision, readiness and the orchestrator
//! - [`monitors`]: background metrics and OSC protocol workers
//! - [`dashboard`]: the terminal dashboard
//! - [`console`] and [`menu`]: the operations the operator triggers

pub mod config;
pub mod console;
pub mod dashboard;
pub mod lifecycle;
pub mod menu;
pub mod monitors;
pub mod osc;
pub mod stage_config;
pub mod util;
