//! kbsync command-line entry point.

use clap::Parser;
use exn::ResultExt;
use kbsync_config::Config;
use kbsync_engine::Session;
use tracing_subscriber::EnvFilter;

mod cli;
mod commands;
mod error;
mod render;

use crate::cli::Cli;
use crate::error::{ErrorKind, Result};

#[tokio::main]
async fn main() -> miette::Result<()> {
    let cli = Cli::parse();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(cli.default_filter())))
        .with_writer(std::io::stderr)
        .init();

    let output = run(&cli).await.map_err(|err| miette::miette!("{err:?}"))?;
    print!("{output}");
    Ok(())
}

async fn run(cli: &Cli) -> Result<String> {
    let config = Config::load(cli.config.as_deref()).or_raise(|| ErrorKind::Config)?;
    let remote = commands::open_remote(cli, &config)?;
    let session = Session::open(remote, commands::job(cli, &config), &config);
    let output = commands::execute(&session, &cli.command).await;
    session.close().await;
    output
}
