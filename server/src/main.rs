use std::{io, process::ExitCode};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tollgate_common::{
    cli::{run_config_command, ConfigCommand, ConnectionArgs},
    ConfigMerger, ReturnCode, Role,
};
use tollgate_server::TlsServer;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "tollgate-server")]
#[command(about = "Tollgate mutual TLS server", version)]
struct Args {
    #[arg(short, long, global = true, default_value = "info")]
    log_level: String,

    #[command(flatten)]
    connection: ConnectionArgs,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Listen for clients and log what they send
    Start,
    /// Inspect or save the resolved configuration
    #[command(subcommand)]
    Config(ConfigCommand),
}

fn main() -> ExitCode {
    let args = Args::parse();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level)),
        )
        .with_writer(io::stderr)
        .init();

    match run(args) {
        Ok(()) => ReturnCode::Ok.into(),
        Err(e) => {
            tracing::error!("{:#}", e);
            ReturnCode::for_chain(&*e).into()
        }
    }
}

fn run(args: Args) -> Result<()> {
    let merger = ConfigMerger::from_current_dir()?;
    let outcome = args
        .connection
        .merge(&merger)
        .context("Failed to resolve configuration")?;

    match args.command {
        Commands::Start => {
            info!("Starting Tollgate server...");
            let server = TlsServer::from_store(&outcome.store).context("Failed to create server")?;
            server.run().context("Server error")?;
        }

        Commands::Config(command) => {
            run_config_command(
                &command,
                Role::Server,
                &merger,
                &outcome.store,
                &mut io::stdout().lock(),
            )?;
        }
    }

    Ok(())
}
