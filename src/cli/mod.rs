//! Command line interface for kodegen_bundler_inject.

mod args;
pub mod commands;
mod output;

pub use args::{Args, RuntimeConfig, written};
pub use commands::execute_command;
pub use output::OutputManager;

use crate::error::Result;

/// Main CLI entry point
pub async fn run() -> Result<i32> {
    let args = Args::parse_args();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(args.log_filter()))
        .format_timestamp(None)
        .init();
    execute_command(args).await
}
