//! Storetree CLI Binary
//!
//! Command-line interface for permission-aware resource trees.

use clap::Parser;
use storetree::config::ConfigLoader;
use storetree::logging::init_logging;
use storetree::tooling::cli::{Cli, CliContext};
use std::process;

fn main() {
    let cli = Cli::parse();

    let config = match ConfigLoader::load(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error loading configuration: {}", e);
            process::exit(1);
        }
    };

    let logging = match cli.logging_config(&config.logging) {
        Ok(logging) => logging,
        Err(e) => {
            eprintln!("Error: {}", e);
            process::exit(1);
        }
    };
    if let Err(e) = init_logging(&logging) {
        eprintln!("Warning: failed to initialize logging: {}", e);
    }

    let context = match CliContext::new(config, cli.db.clone()) {
        Ok(ctx) => ctx,
        Err(e) => {
            eprintln!("Error opening store database: {}", e);
            process::exit(1);
        }
    };

    match context.execute(&cli.command) {
        Ok(output) => {
            println!("{}", output);
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            process::exit(1);
        }
    }
}
