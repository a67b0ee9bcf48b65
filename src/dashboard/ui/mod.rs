//! UI rendering module

mod layout;
mod messages;
mod services;
mod system;

pub use layout::render;
