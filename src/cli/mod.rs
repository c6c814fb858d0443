//! CLI module for recipebox - command-line interface and subcommands.

pub mod commands;

pub use commands::Cli;
