//! `lingo` binary entrypoint.
//!
//! Loads configuration from environment variables and runs the requested
//! subcommand.

#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]

use anyhow::Result;
use clap::Parser;

use lingo_api::cli::{Cli, execute};
use lingo_api::config::Config;
use lingo_core::observability::{LogFormat, init_logging};

fn choose_log_format(config: &Config) -> LogFormat {
    if config.debug {
        LogFormat::Pretty
    } else {
        LogFormat::Json
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = Config::from_env()?;
    init_logging(choose_log_format(&config));
    execute(cli.command, config).await
}
