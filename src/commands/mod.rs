//! CLI command implementations for dockpanel.
//!
//! This module provides implementations for all CLI subcommands:
//! - `check`: Docker daemon reachability
//! - `config`: Configuration file generation
//! - `test`: Stats collection testing
//! - `check-updates`: One-shot image update check

pub mod check;
pub mod config;
pub mod updates;

// Re-export command functions
pub use check::command_check;
pub use config::command_config;
pub use test::command_test;
pub use updates::command_check_updates;
