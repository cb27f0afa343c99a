//! Mutual TLS session policies and the dial/listen entry points.
//!
//! Both roles share one restricted crypto provider: TLS 1.2 is the floor, only
//! the AEAD suites in [`ALLOWED_CIPHER_SUITES`] are offered, and resumption is
//! off so every connection performs a full handshake. The server always
//! requires a client certificate chaining to its CA pool; the client trusts
//! only its own CA pool, never the system store.

use std::{
    net::{SocketAddr, TcpListener, TcpStream},
    sync::Arc,
};

use rustls::{
    client::Resumption,
    crypto::{aws_lc_rs, CryptoProvider},
    pki_types::ServerName,
    server::{NoServerSessionStorage, WebPkiClientVerifier},
    version::{TLS12, TLS13},
    CipherSuite, ClientConfig, ClientConnection, ProtocolVersion, ServerConfig, ServerConnection,
    SupportedCipherSuite, SupportedProtocolVersion,
};

use crate::{
    error::{IdentityLoadError, NetworkError, TlsHandshakeError},
    identity::{CredentialBundle, Role},
    options::Endpoint,
    tls_stream::TlsStream,
};

/// Cipher suites a Tollgate peer will negotiate
pub static ALLOWED_CIPHER_SUITES: &[SupportedCipherSuite] = &[
    aws_lc_rs::cipher_suite::TLS13_AES_256_GCM_SHA384,
    aws_lc_rs::cipher_suite::TLS13_AES_128_GCM_SHA256,
    aws_lc_rs::cipher_suite::TLS_ECDHE_ECDSA_WITH_AES_256_GCM_SHA384,
    aws_lc_rs::cipher_suite::TLS_ECDHE_ECDSA_WITH_AES_128_GCM_SHA256,
    aws_lc_rs::cipher_suite::TLS_ECDHE_RSA_WITH_AES_256_GCM_SHA384,
    aws_lc_rs::cipher_suite::TLS_ECDHE_RSA_WITH_AES_128_GCM_SHA256,
];

/// Protocol versions a Tollgate peer will negotiate; nothing below TLS 1.2
pub static PROTOCOL_VERSIONS: &[&SupportedProtocolVersion] = &[&TLS13, &TLS12];

/// The aws-lc-rs provider restricted to [`ALLOWED_CIPHER_SUITES`]
pub fn crypto_provider() -> Arc<CryptoProvider> {
    Arc::new(CryptoProvider {
        cipher_suites: ALLOWED_CIPHER_SUITES.to_vec(),
        ..aws_lc_rs::default_provider()
    })
}

/// Observable summary of the decisions baked into a policy
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PolicySummary {
    pub role:                        Role,
    pub minimum_protocol_version:    ProtocolVersion,
    pub cipher_suites:               Vec<CipherSuite>,
    pub require_client_certificate:  bool,
    pub session_resumption_disabled: bool,
    pub server_name_override:        Option<String>,
}

impl PolicySummary {
    fn new(role: Role, server_name_override: Option<String>) -> Self {
        Self {
            role,
            minimum_protocol_version: ProtocolVersion::TLSv1_2,
            cipher_suites: ALLOWED_CIPHER_SUITES.iter().map(|s| s.suite()).collect(),
            require_client_certificate: role == Role::Server,
            session_resumption_disabled: true,
            server_name_override,
        }
    }
}

/// Client-side session policy
#[derive(Debug, Clone)]
pub struct ClientPolicy {
    config:  Arc<ClientConfig>,
    summary: PolicySummary,
}

impl ClientPolicy {
    pub fn summary(&self) -> &PolicySummary {
        &self.summary
    }

    pub fn tls_config(&self) -> Arc<ClientConfig> {
        Arc::clone(&self.config)
    }

    /// Name checked against the server certificate when dialing `endpoint`
    pub fn server_name_for(&self, endpoint: &Endpoint) -> String {
        self.summary
            .server_name_override
            .clone()
            .unwrap_or_else(|| endpoint.server_name().to_string())
    }
}

/// Server-side session policy
#[derive(Debug, Clone)]
pub struct ServerPolicy {
    config:  Arc<ServerConfig>,
    summary: PolicySummary,
}

impl ServerPolicy {
    pub fn summary(&self) -> &PolicySummary {
        &self.summary
    }

    pub fn tls_config(&self) -> Arc<ServerConfig> {
        Arc::clone(&self.config)
    }
}

fn check_bundle(bundle: &CredentialBundle, expected: Role) -> Result<(), IdentityLoadError> {
    if bundle.role() != expected {
        return Err(IdentityLoadError::WrongRole {
            expected,
            actual: bundle.role(),
        });
    }
    if bundle.ca_pool().is_empty() {
        return Err(IdentityLoadError::EmptyCaPool {
            role: expected,
            path: bundle.ca_source().to_string(),
        });
    }
    Ok(())
}

fn policy_error(role: Role, err: impl std::fmt::Display) -> IdentityLoadError {
    IdentityLoadError::Policy {
        role,
        reason: err.to_string(),
    }
}

/// Builds the client policy: trust only the bundle's CA pool, present the
/// bundle's certificate, never resume.
pub fn build_client_policy(
    bundle: &CredentialBundle,
    server_name_override: Option<&str>,
) -> Result<ClientPolicy, IdentityLoadError> {
    check_bundle(bundle, Role::Client)?;

    if let Some(name) = server_name_override {
        ServerName::try_from(name.to_string()).map_err(|e| policy_error(Role::Client, e))?;
    }

    let mut config = ClientConfig::builder_with_provider(crypto_provider())
        .with_protocol_versions(PROTOCOL_VERSIONS)
        .map_err(|e| policy_error(Role::Client, e))?
        .with_root_certificates(bundle.ca_pool())
        .with_client_auth_cert(bundle.cert_chain().to_vec(), bundle.private_key().clone_key())
        .map_err(|e| policy_error(Role::Client, e))?;
    config.resumption = Resumption::disabled();

    tracing::debug!("Built client TLS policy");
    Ok(ClientPolicy {
        config:  Arc::new(config),
        summary: PolicySummary::new(Role::Client, server_name_override.map(str::to_string)),
    })
}

/// Builds the server policy: require and verify a client certificate against
/// the bundle's CA pool, never resume.
pub fn build_server_policy(bundle: &CredentialBundle) -> Result<ServerPolicy, IdentityLoadError> {
    check_bundle(bundle, Role::Server)?;

    let provider = crypto_provider();
    let client_verifier = WebPkiClientVerifier::builder_with_provider(bundle.ca_pool(), provider.clone())
        .build()
        .map_err(|e| policy_error(Role::Server, e))?;

    let mut config = ServerConfig::builder_with_provider(provider)
        .with_protocol_versions(PROTOCOL_VERSIONS)
        .map_err(|e| policy_error(Role::Server, e))?
        .with_client_cert_verifier(client_verifier)
        .with_single_cert(bundle.cert_chain().to_vec(), bundle.private_key().clone_key())
        .map_err(|e| policy_error(Role::Server, e))?;
    config.session_storage = Arc::new(NoServerSessionStorage {});
    config.send_tls13_tickets = 0;

    tracing::debug!("Built server TLS policy");
    Ok(ServerPolicy {
        config:  Arc::new(config),
        summary: PolicySummary::new(Role::Server, None),
    })
}

/// Lifecycle states for both roles.
///
/// A client goes `Idle → Dialing → Handshaking → Established → Closed`. A
/// server goes `Idle → Listening`, then each accepted connection goes
/// `Handshaking → Established → Closed`. An error in any transitional state
/// ends in `Closed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Idle,
    Dialing,
    Listening,
    Handshaking,
    Established,
    Closed,
}

fn trace_state(target: &str, from: ConnectionState, to: ConnectionState) {
    tracing::debug!("{}: {:?} -> {:?}", target, from, to);
}

/// Opens a TCP connection to `endpoint` and completes the mutual TLS handshake.
///
/// The returned stream is [`ConnectionState::Established`]. Socket failures are
/// [`NetworkError`]s; everything after the socket is up is a
/// [`TlsHandshakeError`].
pub fn dial(endpoint: &Endpoint, policy: &ClientPolicy) -> crate::Result<TlsStream> {
    let target = endpoint.to_string();

    trace_state(&target, ConnectionState::Idle, ConnectionState::Dialing);
    let socket = TcpStream::connect(&target).map_err(|source| {
        trace_state(&target, ConnectionState::Dialing, ConnectionState::Closed);
        NetworkError::Dial {
            endpoint: target.clone(),
            source,
        }
    })?;

    trace_state(&target, ConnectionState::Dialing, ConnectionState::Handshaking);
    let server_name = ServerName::try_from(policy.server_name_for(endpoint)).map_err(|e| {
        TlsHandshakeError::from_tls(&target, rustls::Error::General(e.to_string()))
    })?;
    let tls = ClientConnection::new(policy.tls_config(), server_name)
        .map_err(|e| TlsHandshakeError::from_tls(&target, e))?;

    let stream = TlsStream::from_client(socket, tls).map_err(|e| {
        trace_state(&target, ConnectionState::Handshaking, ConnectionState::Closed);
        TlsHandshakeError::new(&target, e)
    })?;
    trace_state(&target, ConnectionState::Handshaking, stream.state());
    Ok(stream)
}

/// A bound TCP listener that hands out server-side TLS handshakes
#[derive(Debug)]
pub struct TlsListener {
    listener: TcpListener,
    policy:   Arc<ServerPolicy>,
}

/// An accepted socket whose handshake has not run yet
#[derive(Debug)]
pub struct PendingConnection {
    socket: TcpStream,
    peer:   String,
    policy: Arc<ServerPolicy>,
}

/// Binds `endpoint`; the listener is [`ConnectionState::Listening`] on success
pub fn listen(endpoint: &Endpoint, policy: Arc<ServerPolicy>) -> Result<TlsListener, NetworkError> {
    let target = endpoint.to_string();
    let listener = TcpListener::bind(&target).map_err(|source| NetworkError::Listen {
        endpoint: target.clone(),
        source,
    })?;
    trace_state(&target, ConnectionState::Idle, ConnectionState::Listening);
    Ok(TlsListener { listener, policy })
}

impl TlsListener {
    pub fn local_addr(&self) -> Result<SocketAddr, NetworkError> {
        self.listener.local_addr().map_err(NetworkError::Accept)
    }

    /// Waits for the next TCP connection; the handshake is left to the caller
    /// so it can run off the accept thread.
    pub fn accept(&self) -> Result<PendingConnection, NetworkError> {
        let (socket, addr) = self.listener.accept().map_err(NetworkError::Accept)?;
        Ok(PendingConnection {
            socket,
            peer: addr.to_string(),
            policy: Arc::clone(&self.policy),
        })
    }

    /// Endless iterator over [`accept`](Self::accept)
    pub fn incoming(&self) -> impl Iterator<Item = Result<PendingConnection, NetworkError>> + '_ {
        std::iter::repeat_with(move || self.accept())
    }
}

impl PendingConnection {
    pub fn peer(&self) -> &str {
        &self.peer
    }

    /// Runs the server side of the handshake, verifying the client certificate
    pub fn handshake(self) -> Result<TlsStream, TlsHandshakeError> {
        trace_state(&self.peer, ConnectionState::Idle, ConnectionState::Handshaking);
        let tls = ServerConnection::new(self.policy.tls_config())
            .map_err(|e| TlsHandshakeError::from_tls(&self.peer, e))?;
        let stream = TlsStream::from_server(self.socket, tls).map_err(|e| {
            trace_state(&self.peer, ConnectionState::Handshaking, ConnectionState::Closed);
            TlsHandshakeError::new(&self.peer, e)
        })?;
        trace_state(&self.peer, ConnectionState::Handshaking, stream.state());
        Ok(stream)
    }
}
