//! Compute worker binary executable.
//!
//! Parses the command line, installs logging and hands the loaded
//! configuration to a node launcher.

pub mod args;
pub mod cli;
pub mod config;
pub mod node;
