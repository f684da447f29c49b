mod api;
mod cli;
mod commands;
mod config;
mod credentials;
mod hosting;
mod models;
mod ui;

use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use cli::{Cli, Commands};
use config::Config;
use tracing_subscriber::{EnvFilter, fmt};
use ui::{TerminalUi, Ui};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let ui: Arc<dyn Ui> = Arc::new(TerminalUi);
    if let Err(e) = run(cli, ui).await {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}

async fn run(cli: Cli, ui: Arc<dyn Ui>) -> Result<()> {
    let config = Config::from_cli(&cli)?;

    match cli.command {
        Commands::Login {
            username,
            api_key,
            password,
        } => {
            commands::auth::login(
                &config,
                &username,
                api_key.as_deref(),
                password.as_deref(),
                ui.as_ref(),
            )
            .await
        }
        Commands::Logout => commands::auth::logout(&config, ui.as_ref()).await,
        Commands::Whoami => commands::auth::whoami(&config, ui.as_ref()),
        Commands::Hosting(command) => commands::hosting::run(&config, command, ui).await,
        Commands::Secrets(command) => {
            commands::secrets::run(&config, command, ui.as_ref()).await
        }
    }
}

/// Logs go to stderr; `RUST_LOG` overrides the level picked by `--verbose`.
fn init_logging(verbose: bool) {
    let level = if verbose { "info" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let _ = fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}
