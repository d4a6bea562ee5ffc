//! atomic-runner entry point.
//!
//! Parses the command line and hands off to [`atomic_runner::cli::run`],
//! which owns config loading, logging setup and Ctrl-C handling.

use std::process::ExitCode;

use clap::Parser;

use atomic_runner::cli::{self, Cli};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    let code = cli::run(cli).await;
    ExitCode::from(u8::try_from(code).unwrap_or(1))
}
