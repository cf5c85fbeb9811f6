//! CLI module for revgen - command-line interface and subcommands.
//!
//! Provides the host runner, one-off generation dispatch, and store
//! maintenance commands.

pub mod commands;

pub use commands::Cli;
