//! Command implementations.
//!
//! Each subcommand is implemented in its own module for clean separation.

pub(crate) mod completions;
pub(crate) mod download;
pub(crate) mod ports;
pub(crate) mod purge;
