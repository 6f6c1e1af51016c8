//! CLI command implementations
//!
//! This module contains the implementation of all CLI subcommands.

pub mod check_config;
pub mod networks;
pub mod stop;
pub mod watch;
