//! Command-line tooling

pub mod cli;

pub use cli::{Cli, CliContext, Commands};
