mod auth;
mod cli;
mod config;
mod error;
mod http;
mod model;
mod output;
mod providers;
mod retry;
#[cfg(test)]
mod testing;
mod workflow;

use anyhow::Result;
use clap::Parser;
use cli::Cli;
use log::info;

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();

    output::print_banner();

    let cli = Cli::parse();
    info!("Starting promoctl - delivery workflow harness");
    cli.execute().await?;

    Ok(())
}
