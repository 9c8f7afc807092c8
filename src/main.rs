//! macflix - search, pick and stream torrents while they download
//!
//! # Usage
//!
//! ```bash
//! macflix "big buck bunny" --vlc
//! macflix browse --source yts
//! macflix sintel --all --quiet
//! ```

use anyhow::Result;
use clap::Parser;
use macflix::cli::Cli;

#[tokio::main]
async fn main() -> Result<std::process::ExitCode> {
    let cli = Cli::parse();
    let code = macflix::commands::run(cli).await;
    Ok(code.into())
}
