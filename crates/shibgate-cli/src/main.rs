mod cli;
mod commands;
mod config;
mod observability;
mod output;

use anyhow::Result;
use clap::Parser;

use cli::{Cli, Commands};
use output::print_error;

#[tokio::main]
async fn main() {
    if let Err(e) = dotenvy::dotenv()
        && !e.not_found()
    {
        print_error(&format!("Failed to read .env: {e}"));
    }

    if let Err(e) = run().await {
        print_error(&format!("{e:#}"));
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    let cli = Cli::parse();
    let cfg = config::load_config(cli.config.as_deref())?;
    observability::init_tracing(&cfg.logging.level);

    match &cli.command {
        Commands::Visit(args) => commands::visit::run(&cfg, args).await?,
        Commands::Status(args) => commands::status::run(&cfg, args).await?,
        Commands::NextUid => commands::next_uid::run(&cfg).await?,
        Commands::CheckConfig => commands::check_config::run(&cfg)?,
    }

    Ok(())
}
