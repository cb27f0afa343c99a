use std::{io, process::ExitCode};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tollgate_client::TlsClient;
use tollgate_common::{
    cli::{run_config_command, ConfigCommand, ConnectionArgs},
    ConfigMerger, ReturnCode, Role,
};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "tollgate-client")]
#[command(about = "Tollgate mutual TLS client", version)]
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
    /// Connect to the server, send a message and disconnect
    Send {
        /// Text to send
        text: String,
    },
    /// Inspect or save the resolved configuration
    #[command(subcommand)]
    Config(ConfigCommand),
}

fn main() -> ExitCode {
    let args = Args::parse();

    // Logs go to stderr so `config show --json` stays machine-readable
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
        Commands::Send { text } => {
            info!("Starting Tollgate client...");
            let mut client =
                TlsClient::from_store(&outcome.store).context("Failed to prepare client")?;
            client.connect().context("Failed to connect to server")?;
            client
                .send(text.as_bytes())
                .context("Failed to send message")?;
            client.disconnect().context("Failed to close connection")?;
            info!("Sent {} bytes to {}", client.bytes_sent(), client.endpoint());
        }

        Commands::Config(command) => {
            run_config_command(
                &command,
                Role::Client,
                &merger,
                &outcome.store,
                &mut io::stdout().lock(),
            )?;
        }
    }

    Ok(())
}
