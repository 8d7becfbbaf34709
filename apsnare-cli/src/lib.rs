//! CLI interface for apsnare
//!
//! This crate provides the command-line interface for apsnare,
//! including argument parsing and run-configuration resolution.

pub mod args;

pub use args::{BandArg, Cli, Commands, ThemeArg};
