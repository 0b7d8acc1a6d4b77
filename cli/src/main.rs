use anyhow::Result;
use clap::Parser;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

mod commands;
mod output;

use commands::{Cli, Commands};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Init(args) => commands::init::run(&cli.global, args),
        Commands::Roots(args) => commands::roots::run(&cli.global, args).await,
        Commands::Validate(args) => commands::validate::run(&cli.global, args),
        Commands::Ls(args) => commands::files::ls(&cli.global, args).await,
        Commands::Cat(args) => commands::files::cat(&cli.global, args).await,
        Commands::Put(args) => commands::files::put(&cli.global, args).await,
        Commands::Rm(args) => commands::files::rm(&cli.global, args).await
    }
}
