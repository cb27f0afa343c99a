//! Tollgate Common Library
//!
//! Shared by the Tollgate client and server. It provides:
//!
//! - Layered configuration: built-in defaults, an optional `.config` file found
//!   by climbing the directory tree, and command-line overrides
//! - Path resolution that anchors relative paths at an explicit base instead of
//!   the process working directory
//! - Loading of certificate, key and CA material per role
//! - Mutual TLS session policies and a blocking TLS stream over TCP
//!
//! # Example
//!
//! ```no_run
//! use tollgate_common::{identity, session, ConfigMerger, Role};
//!
//! # fn main() -> tollgate_common::Result<()> {
//! let merger = ConfigMerger::from_current_dir()?;
//! let outcome = merger.merge([("port", "9443")], None)?;
//! let store = outcome.store;
//!
//! let paths = store.identity_paths(Role::Client)?;
//! let bundle = identity::load(&paths, &session::crypto_provider())?;
//! let policy = session::build_client_policy(&bundle, store.server_name_override())?;
//! let stream = session::dial(&store.endpoint(Role::Client)?, &policy)?;
//! # drop(stream);
//! # Ok(())
//! # }
//! ```

/// Shared clap flags and the `config` subcommands
pub mod cli;
pub mod config_file;
pub mod error;
pub mod identity;
pub mod locator;
pub mod merge;
pub mod options;
pub mod paths;
/// TLS policies, dialing and listening
pub mod session;
/// Process exit statuses
pub mod status;
/// Blocking TLS stream over a TCP socket
pub mod tls_stream;

// Re-export commonly used types for convenience
pub use config_file::ConfigFile;
pub use error::{
    ConfigError, Error, IdentityLoadError, NetworkError, PathResolutionError, Result,
    TlsHandshakeError,
};
pub use identity::{CredentialBundle, IdentityPaths, Role};
pub use merge::{ConfigMerger, MergeOutcome, MergeWarning};
pub use options::{ConfigStore, Endpoint, ValueSource};
pub use paths::PathResolver;
pub use session::{ClientPolicy, ConnectionState, ServerPolicy};
pub use status::ReturnCode;
pub use tls_stream::TlsStream;
