//! Eventide CLI binary entry point.

use clap::Parser;
use eventide::cli::handlers;
use eventide::cli::{Cli, Commands};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_env("EVENTIDE_LOG")
                .unwrap_or_else(|_| "warn".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();

    let result = match handlers::load_config(&cli) {
        Ok(config) => match cli.command {
            Commands::Agents => handlers::handle_agents(&config).await,
            Commands::Chat(args) => handlers::handle_chat(config, cli.remote, args).await,
            Commands::Sessions(args) => {
                handlers::handle_sessions(&config, cli.remote, args.command).await
            }
        },
        Err(e) => Err(e),
    };

    if let Err(e) = result {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}
