//! Registered options and the immutable store produced by a merge.

use std::{
    collections::BTreeMap,
    fmt,
    path::{Path, PathBuf},
};

use serde::Serialize;

use crate::{
    error::ConfigError,
    identity::{IdentityPaths, Role},
};

/// Whether an option's value names a file that must be resolved
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OptionKind {
    Scalar,
    Path,
}

/// Where an option's value came from, ordered by precedence
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ValueSource {
    Default,
    File,
    Flag,
}

impl fmt::Display for ValueSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValueSource::Default => write!(f, "default"),
            ValueSource::File => write!(f, "file"),
            ValueSource::Flag => write!(f, "flag"),
        }
    }
}

/// Static description of a registered option
#[derive(Debug)]
pub struct OptionSpec {
    pub name:    &'static str,
    pub kind:    OptionKind,
    pub default: &'static str,
    pub usage:   &'static str,
    pub client:  bool,
    pub server:  bool,
}

impl OptionSpec {
    /// Whether the given role reads this option
    pub fn used_by(&self, role: Role) -> bool {
        match role {
            Role::Client => self.client,
            Role::Server => self.server,
        }
    }
}

pub const HOST: &str = "host";
pub const PORT: &str = "port";
pub const ROOT_CERT: &str = "root-cert";
pub const ROOT_NAME: &str = "root-name";
pub const SERVER_TLS_CERT: &str = "server-tls-cert";
pub const SERVER_TLS_KEY: &str = "server-tls-key";
pub const CLIENT_TLS_CERT: &str = "client-tls-cert";
pub const CLIENT_TLS_KEY: &str = "client-tls-key";

/// Every option known to Tollgate, in display order
pub static OPTIONS: &[OptionSpec] = &[
    OptionSpec {
        name:    HOST,
        kind:    OptionKind::Scalar,
        default: "localhost",
        usage:   "What is the domain name or ip address of the server?",
        client:  true,
        server:  true,
    },
    OptionSpec {
        name:    PORT,
        kind:    OptionKind::Scalar,
        default: "4443",
        usage:   "What port should the server be listening on?",
        client:  true,
        server:  true,
    },
    OptionSpec {
        name:    ROOT_CERT,
        kind:    OptionKind::Path,
        default: "",
        usage:   "What is the path to the root CA certificate for TLS?",
        client:  true,
        server:  true,
    },
    OptionSpec {
        name:    ROOT_NAME,
        kind:    OptionKind::Scalar,
        default: "",
        usage:   "What is the name on the CA cert?",
        client:  true,
        server:  false,
    },
    OptionSpec {
        name:    SERVER_TLS_CERT,
        kind:    OptionKind::Path,
        default: "",
        usage:   "What is the path to the server's TLS certificate?",
        client:  false,
        server:  true,
    },
    OptionSpec {
        name:    SERVER_TLS_KEY,
        kind:    OptionKind::Path,
        default: "",
        usage:   "What is the path to the server's TLS key?",
        client:  false,
        server:  true,
    },
    OptionSpec {
        name:    CLIENT_TLS_CERT,
        kind:    OptionKind::Path,
        default: "",
        usage:   "What is the path to the TLS client certificate?",
        client:  true,
        server:  false,
    },
    OptionSpec {
        name:    CLIENT_TLS_KEY,
        kind:    OptionKind::Path,
        default: "",
        usage:   "What is the path to the TLS client key?",
        client:  true,
        server:  false,
    },
];

/// Looks up a registered option by name
pub fn spec(name: &str) -> Option<&'static OptionSpec> {
    OPTIONS.iter().find(|spec| spec.name == name)
}

/// Current value of one option together with its provenance
#[derive(Debug, Clone, Serialize)]
pub struct ConfigOption {
    pub name:   &'static str,
    pub kind:   OptionKind,
    pub value:  String,
    pub source: ValueSource,
    #[serde(skip)]
    pub usage:  &'static str,
}

impl ConfigOption {
    fn from_spec(spec: &'static OptionSpec) -> Self {
        Self {
            name:   spec.name,
            kind:   spec.kind,
            value:  spec.default.to_string(),
            source: ValueSource::Default,
            usage:  spec.usage,
        }
    }

    pub fn is_set(&self) -> bool {
        !self.value.is_empty()
    }
}

/// Host and port the client dials and the server listens on
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
}

impl Endpoint {
    /// Host name without IPv6 brackets, as used for certificate verification
    pub fn server_name(&self) -> &str {
        self.host.trim_start_matches('[').trim_end_matches(']')
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let host = self.server_name();
        if host.contains(':') {
            write!(f, "[{}]:{}", host, self.port)
        } else {
            write!(f, "{}:{}", host, self.port)
        }
    }
}

/// Resolved configuration. Built once by the merger, read-only afterwards.
#[derive(Debug, Clone)]
pub struct ConfigStore {
    options:     BTreeMap<&'static str, ConfigOption>,
    config_file: Option<PathBuf>,
}

impl Default for ConfigStore {
    fn default() -> Self {
        Self::with_defaults()
    }
}

impl ConfigStore {
    /// A store holding every registered option at its default value
    pub fn with_defaults() -> Self {
        let options = OPTIONS
            .iter()
            .map(|spec| (spec.name, ConfigOption::from_spec(spec)))
            .collect();
        Self {
            options,
            config_file: None,
        }
    }

    /// Offers a value from `source`; it replaces the current value only when
    /// `source` outranks the current one.
    pub(crate) fn offer(&mut self, name: &str, value: String, source: ValueSource) -> bool {
        let Some(option) = self.options.get_mut(name) else {
            return false;
        };
        if option.source != ValueSource::Default && source <= option.source {
            return false;
        }
        option.value = value;
        option.source = source;
        true
    }

    pub(crate) fn set_config_file(&mut self, path: Option<PathBuf>) {
        self.config_file = path;
    }

    /// The authoritative configuration file, if one was loaded
    pub fn config_file(&self) -> Option<&Path> {
        self.config_file.as_deref()
    }

    pub fn get(&self, name: &str) -> Option<&ConfigOption> {
        self.options.get(name)
    }

    /// Options in registration order
    pub fn iter(&self) -> impl Iterator<Item = &ConfigOption> + '_ {
        OPTIONS.iter().filter_map(|spec| self.options.get(spec.name))
    }

    /// Value of a registered option; empty when unset
    pub fn value(&self, name: &str) -> &str {
        self.options.get(name).map_or("", |o| o.value.as_str())
    }

    pub fn source(&self, name: &str) -> Option<ValueSource> {
        self.options.get(name).map(|o| o.source)
    }

    fn required(&self, name: &'static str, role: Role) -> Result<&str, ConfigError> {
        match self.value(name) {
            "" => Err(ConfigError::MissingOption { name, role }),
            value => Ok(value),
        }
    }

    /// Validated `host:port` endpoint
    pub fn endpoint(&self, role: Role) -> Result<Endpoint, ConfigError> {
        let host = self.required(HOST, role)?.to_string();
        let port_str = self.required(PORT, role)?;
        let port = port_str
            .parse::<u16>()
            .map_err(|e| ConfigError::InvalidValue {
                name:   PORT,
                value:  port_str.to_string(),
                reason: e.to_string(),
            })?;
        Ok(Endpoint { host, port })
    }

    /// The `host:port` string, without validation
    pub fn host_and_port(&self) -> String {
        format!("{}:{}", self.value(HOST), self.value(PORT))
    }

    /// Expected name on the server certificate when it differs from the host
    pub fn server_name_override(&self) -> Option<&str> {
        match self.value(ROOT_NAME) {
            "" => None,
            name => Some(name),
        }
    }

    /// Certificate, key and CA paths for `role`
    pub fn identity_paths(&self, role: Role) -> Result<IdentityPaths, ConfigError> {
        let (cert, key) = match role {
            Role::Client => (CLIENT_TLS_CERT, CLIENT_TLS_KEY),
            Role::Server => (SERVER_TLS_CERT, SERVER_TLS_KEY),
        };
        Ok(IdentityPaths {
            role,
            cert_path: PathBuf::from(self.required(cert, role)?),
            key_path: PathBuf::from(self.required(key, role)?),
            ca_path: PathBuf::from(self.required(ROOT_CERT, role)?),
        })
    }
}
