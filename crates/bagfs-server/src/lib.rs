//! bagfs process entry point support.
//!
//! - [`Bagfs`]: the registry, pipeline and watcher built once per process
//! - [`Admin`]: list, add, remove and sync commands for operators
//! - [`ConsoleHost`]: a line-oriented drive host serving the driver over stdio

pub mod admin;
pub mod app;
pub mod console;

pub use admin::{Admin, AdminError, AdminResult};
pub use app::Bagfs;
pub use console::ConsoleHost;
