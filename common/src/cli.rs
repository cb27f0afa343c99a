//! Command-line surface shared by both binaries.

use std::io::Write;

use clap::{Args, Subcommand};
use serde::Serialize;

use crate::{
    config_file::ConfigFile,
    error::ConfigError,
    identity::Role,
    merge::{ConfigMerger, MergeOutcome},
    options::{
        self, ConfigOption, ConfigStore, CLIENT_TLS_CERT, CLIENT_TLS_KEY, HOST, PORT, ROOT_CERT,
        ROOT_NAME, SERVER_TLS_CERT, SERVER_TLS_KEY,
    },
};

/// Connection flags. Anything given here overrides the config file.
#[derive(Debug, Clone, Default, Args)]
pub struct ConnectionArgs {
    /// Config file to use instead of searching upward for `.config`
    #[arg(long, global = true, value_name = "FILE")]
    pub config: Option<String>,

    /// What is the domain name or ip address of the server?
    #[arg(long, global = true)]
    pub host: Option<String>,

    /// What port should the server be listening on?
    #[arg(long, global = true)]
    pub port: Option<String>,

    /// What is the path to the root CA certificate for TLS?
    #[arg(long, global = true, value_name = "FILE")]
    pub root_cert: Option<String>,

    /// What is the name on the CA cert?
    #[arg(long, global = true, value_name = "NAME")]
    pub root_name: Option<String>,

    /// What is the path to the server's TLS certificate?
    #[arg(long, global = true, value_name = "FILE")]
    pub server_tls_cert: Option<String>,

    /// What is the path to the server's TLS key?
    #[arg(long, global = true, value_name = "FILE")]
    pub server_tls_key: Option<String>,

    /// What is the path to the TLS client certificate?
    #[arg(long, global = true, value_name = "FILE")]
    pub client_tls_cert: Option<String>,

    /// What is the path to the TLS client key?
    #[arg(long, global = true, value_name = "FILE")]
    pub client_tls_key: Option<String>,
}

impl ConnectionArgs {
    /// Flags that were actually given, as (option name, raw value)
    pub fn overrides(&self) -> Vec<(&'static str, &str)> {
        [
            (HOST, &self.host),
            (PORT, &self.port),
            (ROOT_CERT, &self.root_cert),
            (ROOT_NAME, &self.root_name),
            (SERVER_TLS_CERT, &self.server_tls_cert),
            (SERVER_TLS_KEY, &self.server_tls_key),
            (CLIENT_TLS_CERT, &self.client_tls_cert),
            (CLIENT_TLS_KEY, &self.client_tls_key),
        ]
        .into_iter()
        .filter_map(|(name, value)| value.as_deref().map(|value| (name, value)))
        .collect()
    }

    /// Runs the merge for these flags
    pub fn merge(&self, merger: &ConfigMerger) -> Result<MergeOutcome, ConfigError> {
        merger.merge(self.overrides(), self.config.as_deref())
    }
}

/// `config` subcommands
#[derive(Debug, Clone, Subcommand)]
pub enum ConfigCommand {
    /// Print every option with its value and where it came from
    Show {
        /// Emit JSON instead of a table
        #[arg(long)]
        json: bool,
    },
    /// Save this role's non-default options to `<DIR>/.config`
    Init {
        /// Existing directory to write the config file into
        dir: String,
    },
}

#[derive(Serialize)]
struct ConfigReport<'a> {
    role:        String,
    config_file: Option<String>,
    options:     Vec<&'a ConfigOption>,
}

fn role_options(store: &ConfigStore, role: Role) -> impl Iterator<Item = &ConfigOption> + '_ {
    store
        .iter()
        .filter(move |option| options::spec(option.name).is_some_and(|spec| spec.used_by(role)))
}

/// Runs a `config` subcommand for `role`, writing its report to `out`
pub fn run_config_command(
    command: &ConfigCommand,
    role: Role,
    merger: &ConfigMerger,
    store: &ConfigStore,
    out: &mut impl Write,
) -> crate::Result<()> {
    match command {
        ConfigCommand::Show { json: true } => {
            let report = ConfigReport {
                role:        role.to_string(),
                config_file: store.config_file().map(|p| p.display().to_string()),
                options:     role_options(store, role).collect(),
            };
            serde_json::to_writer_pretty(&mut *out, &report).map_err(std::io::Error::from)?;
            writeln!(out)?;
        }
        ConfigCommand::Show { json: false } => {
            match store.config_file() {
                Some(path) => writeln!(out, "config file: {}", path.display())?,
                None => writeln!(out, "config file: (none)")?,
            }
            for option in role_options(store, role) {
                let value = if option.is_set() { option.value.as_str() } else { "(unset)" };
                writeln!(out, "{:<16} = {:<40} [{}]", option.name, value, option.source)?;
            }
        }
        ConfigCommand::Init { dir } => {
            let dir = merger.resolve_dir(dir)?;
            let mut file = ConfigFile::create_or_open(&dir)?;
            let written = file.update_from(store, role)?;
            file.save()?;
            writeln!(
                out,
                "wrote {} option(s) to {}",
                written.len(),
                file.path().display()
            )?;
        }
    }
    Ok(())
}
