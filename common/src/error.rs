//! Error taxonomy shared by the client and server.

use std::{io, path::PathBuf};

use thiserror::Error;

use crate::identity::Role;

/// Result alias for operations that can fail with any Tollgate error
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// A path could not be turned into an absolute path
#[derive(Debug, Error)]
pub enum PathResolutionError {
    /// The base directory does not exist or is not a directory
    #[error("cannot resolve {path:?}: base {base:?} is not an existing directory")]
    InvalidBase { path: String, base: PathBuf },

    /// An empty string was offered as a path
    #[error("cannot resolve an empty path")]
    EmptyPath,

    /// The path starts with `~` but no home directory is known
    #[error("cannot expand {path:?}: home directory is unknown")]
    HomeUnavailable { path: String },
}

/// Configuration could not be read, merged, validated or written
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error(transparent)]
    Path(#[from] PathResolutionError),

    /// The configuration file exists but could not be read
    #[error("failed to read config file {path:?}: {source}")]
    Read {
        path:   PathBuf,
        #[source]
        source: io::Error,
    },

    /// The configuration file could not be written
    #[error("failed to write config file {path:?}: {source}")]
    Write {
        path:   PathBuf,
        #[source]
        source: io::Error,
    },

    /// A line of the configuration file is not a valid `key = value` entry
    #[error("{path:?} line {line}: {reason}")]
    Malformed {
        path:   PathBuf,
        line:   usize,
        reason: String,
    },

    /// A flag was given without a value
    #[error("flag --{name} was given an empty value")]
    EmptyFlag { name: String },

    /// A flag names an option that is not registered
    #[error("unknown option --{name}")]
    UnknownOption { name: String },

    /// An option holds a value that cannot be used
    #[error("invalid value {value:?} for {name}: {reason}")]
    InvalidValue {
        name:   &'static str,
        value:  String,
        reason: String,
    },

    /// An option required by a role has no value from any source
    #[error("{role} requires `{name}`; pass --{name} or set it in a config file")]
    MissingOption { name: &'static str, role: Role },

    #[error("cannot determine the working directory: {0}")]
    WorkingDirectory(#[source] io::Error),

    /// The target directory for a new config file does not exist
    #[error("directory {dir:?} does not exist; path directories must already exist")]
    MissingDirectory { dir: PathBuf },
}

/// Certificate, key or CA material is missing, unreadable or inconsistent
#[derive(Debug, Error)]
pub enum IdentityLoadError {
    #[error("cannot read {role} {what} {path:?}: {source}")]
    Read {
        role:   Role,
        what:   &'static str,
        path:   PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("cannot parse {role} {what} {path:?}: {source}")]
    Parse {
        role:   Role,
        what:   &'static str,
        path:   PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("no certificate found in {role} certificate file {path:?}")]
    NoCertificate { role: Role, path: PathBuf },

    #[error("no private key found in {role} key file {path:?}")]
    NoPrivateKey { role: Role, path: PathBuf },

    #[error("{role} private key {path:?} is not usable: {source}")]
    UnsupportedKey {
        role:   Role,
        path:   PathBuf,
        #[source]
        source: rustls::Error,
    },

    #[error("{role} private key {key_path:?} does not match certificate {cert_path:?}")]
    KeyMismatch {
        role:      Role,
        cert_path: PathBuf,
        key_path:  PathBuf,
    },

    /// The CA bundle yielded no usable trust anchor
    #[error("no valid CA certificates for {role} in {path}")]
    EmptyCaPool { role: Role, path: String },

    /// A bundle loaded for one role was offered to the other role's builder
    #[error("credentials were loaded for the {actual} role but the {expected} role needs its own")]
    WrongRole { expected: Role, actual: Role },

    /// rustls refused to assemble a configuration from the material
    #[error("cannot build {role} TLS policy: {reason}")]
    Policy { role: Role, reason: String },
}

/// Socket-level failure while dialing, listening or accepting
#[derive(Debug, Error)]
pub enum NetworkError {
    #[error("failed to dial {endpoint}: {source}")]
    Dial {
        endpoint: String,
        #[source]
        source:   io::Error,
    },

    #[error("failed to listen on {endpoint}: {source}")]
    Listen {
        endpoint: String,
        #[source]
        source:   io::Error,
    },

    #[error("failed to accept connection: {0}")]
    Accept(#[source] io::Error),
}

/// Broad cause of a failed handshake
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeFailure {
    /// A certificate was rejected by this side or by the peer
    CertificateRejected,
    /// Version, cipher or other protocol-level disagreement
    Protocol,
    /// The transport failed or closed mid-handshake
    Io,
}

/// The TLS handshake did not complete
#[derive(Debug, Error)]
#[error("TLS handshake with {peer} failed: {source}")]
pub struct TlsHandshakeError {
    pub peer:   String,
    pub kind:   HandshakeFailure,
    #[source]
    pub source: io::Error,
}

impl TlsHandshakeError {
    /// Classifies an I/O error raised while driving a handshake
    pub fn new(peer: impl Into<String>, source: io::Error) -> Self {
        let kind = match source
            .get_ref()
            .and_then(|inner| inner.downcast_ref::<rustls::Error>())
        {
            Some(tls) => classify(tls),
            None => HandshakeFailure::Io,
        };
        Self {
            peer: peer.into(),
            kind,
            source,
        }
    }

    /// Builds an error from a rustls failure raised before any I/O happened
    pub fn from_tls(peer: impl Into<String>, err: rustls::Error) -> Self {
        Self::new(peer, io::Error::new(io::ErrorKind::InvalidData, err))
    }

    /// Whether `err` was raised by the TLS layer rather than the socket
    pub fn is_tls_failure(err: &io::Error) -> bool {
        err.get_ref().is_some_and(|inner| inner.is::<rustls::Error>())
    }

    pub fn is_certificate_rejection(&self) -> bool {
        self.kind == HandshakeFailure::CertificateRejected
    }
}

fn classify(err: &rustls::Error) -> HandshakeFailure {
    use rustls::AlertDescription as Alert;

    match err {
        rustls::Error::InvalidCertificate(_) | rustls::Error::NoCertificatesPresented => {
            HandshakeFailure::CertificateRejected
        }
        rustls::Error::AlertReceived(
            Alert::BadCertificate
            | Alert::UnsupportedCertificate
            | Alert::CertificateRevoked
            | Alert::CertificateExpired
            | Alert::CertificateUnknown
            | Alert::CertificateRequired
            | Alert::UnknownCA,
        ) => HandshakeFailure::CertificateRejected,
        _ => HandshakeFailure::Protocol,
    }
}

/// Any failure surfaced by the Tollgate libraries
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Identity(#[from] IdentityLoadError),

    #[error(transparent)]
    Network(#[from] NetworkError),

    #[error(transparent)]
    Handshake(#[from] TlsHandshakeError),

    #[error("connection I/O failed: {0}")]
    Io(#[from] io::Error),
}

impl From<PathResolutionError> for Error {
    fn from(err: PathResolutionError) -> Self {
        Error::Config(err.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handshake_errors_are_classified_from_rustls_errors() {
        let err = TlsHandshakeError::from_tls(
            "127.0.0.1:1",
            rustls::Error::AlertReceived(rustls::AlertDescription::UnknownCA),
        );
        assert!(err.is_certificate_rejection());

        let err = TlsHandshakeError::from_tls(
            "127.0.0.1:1",
            rustls::Error::PeerIncompatible(rustls::PeerIncompatible::NoCipherSuitesInCommon),
        );
        assert_eq!(err.kind, HandshakeFailure::Protocol);

        let err = TlsHandshakeError::new(
            "127.0.0.1:1",
            io::Error::new(io::ErrorKind::UnexpectedEof, "closed"),
        );
        assert_eq!(err.kind, HandshakeFailure::Io);
    }

    #[test]
    fn tls_failures_are_told_apart_from_socket_failures() {
        let alert = io::Error::new(
            io::ErrorKind::InvalidData,
            rustls::Error::AlertReceived(rustls::AlertDescription::CertificateRequired),
        );
        assert!(TlsHandshakeError::is_tls_failure(&alert));
        assert!(!TlsHandshakeError::is_tls_failure(&io::Error::from(io::ErrorKind::BrokenPipe)));
        assert!(TlsHandshakeError::new("127.0.0.1:1", alert).is_certificate_rejection());
    }
}
