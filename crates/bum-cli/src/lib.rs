//! The `bum` binary: command line, configuration file and the launcher that
//! wires the coordinator and the front together.

pub mod cli;
pub mod commands;
pub mod config;
pub mod error;
pub mod launcher;

pub use cli::Cli;
pub use config::BumConfig;
pub use error::{CliError, CliResult};
