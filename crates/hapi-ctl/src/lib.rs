//! Library half of `hapictl`: configuration, logging and subcommands.

pub mod commands;
pub mod config;
pub mod logging;
