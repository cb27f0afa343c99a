use std::io::{self, Write};

use tollgate_common::{
    identity,
    session::{self, crypto_provider, ClientPolicy},
    ConfigStore, ConnectionState, Endpoint, Error, Result, Role, TlsHandshakeError, TlsStream,
};

/// A mutual TLS client bound to one server endpoint
#[derive(Debug)]
pub struct TlsClient {
    endpoint:   Endpoint,
    policy:     ClientPolicy,
    connection: Option<TlsStream>,
    failed:     bool,
    bytes_sent: usize,
}

impl TlsClient {
    /// Creates a client for an endpoint with an already-built policy
    pub fn new(endpoint: Endpoint, policy: ClientPolicy) -> Self {
        Self {
            endpoint,
            policy,
            connection: None,
            failed: false,
            bytes_sent: 0,
        }
    }

    /// Loads the client credentials named in `store` and builds the policy.
    ///
    /// Fails before any socket is opened if an option is missing or the
    /// certificate material is unusable.
    pub fn from_store(store: &ConfigStore) -> Result<Self> {
        let endpoint = store.endpoint(Role::Client)?;
        let paths = store.identity_paths(Role::Client)?;
        let bundle = identity::load(&paths, &crypto_provider())?;
        let policy = session::build_client_policy(&bundle, store.server_name_override())?;
        Ok(Self::new(endpoint, policy))
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    pub fn policy(&self) -> &ClientPolicy {
        &self.policy
    }

    /// `Idle` until the first connect, `Closed` after disconnecting or after
    /// a failed connect
    pub fn state(&self) -> ConnectionState {
        match &self.connection {
            Some(stream) => stream.state(),
            None if self.failed => ConnectionState::Closed,
            None => ConnectionState::Idle,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Established
    }

    /// Dials the server and completes the handshake
    pub fn connect(&mut self) -> Result<()> {
        tracing::info!("Connecting to {}", self.endpoint);
        self.connection = None;
        let stream = match session::dial(&self.endpoint, &self.policy) {
            Ok(stream) => stream,
            Err(e) => {
                self.failed = true;
                return Err(e);
            }
        };
        self.failed = false;

        tracing::info!("✓ Mutual TLS established with {}", self.endpoint);
        if let (Some(version), Some(suite)) = (stream.protocol_version(), stream.cipher_suite()) {
            tracing::debug!("  - Protocol: {:?}, cipher suite: {:?}", version, suite);
        }
        if let Some(fingerprint) = stream.peer_fingerprint() {
            tracing::info!("  - Server certificate SHA-256: {}", fingerprint);
        }

        self.connection = Some(stream);
        Ok(())
    }

    /// Writes `data` to the server and flushes it.
    ///
    /// A write that fails because the server already refused this client's
    /// certificate reports that refusal rather than the broken pipe.
    pub fn send(&mut self, data: &[u8]) -> Result<()> {
        let stream = self.connection.as_mut().ok_or_else(not_connected)?;
        if let Err(e) = stream.write_all(data).and_then(|()| stream.flush()) {
            let cause = match stream.close() {
                Err(alert) if TlsHandshakeError::is_tls_failure(&alert) => alert,
                _ => e,
            };
            return Err(stream_error(&self.endpoint, cause));
        }
        self.bytes_sent += data.len();
        tracing::debug!("Sent {} bytes", data.len());
        Ok(())
    }

    /// Total bytes written over the lifetime of this client
    pub fn bytes_sent(&self) -> usize {
        self.bytes_sent
    }

    /// Sends `close_notify` and waits for the server to close its side.
    ///
    /// With TLS 1.3 this is where a server's refusal of the client
    /// certificate is first seen; it is reported as a handshake error.
    pub fn disconnect(&mut self) -> Result<()> {
        if let Some(stream) = self.connection.as_mut() {
            if stream.state() != ConnectionState::Closed {
                tracing::debug!("Disconnecting from {}", self.endpoint);
                stream
                    .close()
                    .map_err(|e| stream_error(&self.endpoint, e))?;
            }
        }
        Ok(())
    }
}

impl Drop for TlsClient {
    fn drop(&mut self) {
        if self.is_connected() {
            let _ = self.disconnect();
        }
    }
}

/// TLS alerts after the handshake become handshake errors; anything else is
/// plain I/O
fn stream_error(endpoint: &Endpoint, err: io::Error) -> Error {
    if TlsHandshakeError::is_tls_failure(&err) {
        TlsHandshakeError::new(endpoint.to_string(), err).into()
    } else {
        Error::Io(err)
    }
}

fn not_connected() -> Error {
    Error::Io(io::Error::new(
        io::ErrorKind::NotConnected,
        "not connected to the server",
    ))
}
