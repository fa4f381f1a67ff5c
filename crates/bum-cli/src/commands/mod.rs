//! Subcommand implementations.

pub mod config;
pub mod front;
pub mod serve;
