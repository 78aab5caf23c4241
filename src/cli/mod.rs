//! CLI module
//!
//! Command-line arguments and the runtime configuration derived from them.

pub mod args;
pub mod config;

pub use args::{CliArgs, Command};
pub use config::Config;
