//! LeafScan command line interface
//!
//! Argument parsing and subcommand implementations for the `leafscan`
//! binary.

pub mod cli;
pub mod commands;
