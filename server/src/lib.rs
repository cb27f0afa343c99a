//! Tollgate Server Library
//!
//! Accepts TCP connections, requires every client to present a certificate
//! signed by the configured CA, and hands each authenticated stream to a
//! handler on its own thread. A failed handshake or handler error ends only
//! that connection; the listener keeps accepting.

use std::{
    io::{self, Read},
    sync::Arc,
    thread,
    time::Duration,
};

use tollgate_common::{
    identity,
    session::{self, crypto_provider, PendingConnection, ServerPolicy, TlsListener},
    ConfigStore, Endpoint, NetworkError, Result, Role, TlsStream,
};
use uuid::Uuid;

/// Size of the buffer used by [`log_received`]
pub const READ_BUFFER_SIZE: usize = 512;

/// First pause after a failed accept
const MIN_ACCEPT_BACKOFF: Duration = Duration::from_millis(10);
/// Longest pause between accept attempts while accept keeps failing
const MAX_ACCEPT_BACKOFF: Duration = Duration::from_secs(1);

/// A mutual TLS server for one endpoint
#[derive(Debug, Clone)]
pub struct TlsServer {
    endpoint: Endpoint,
    policy:   Arc<ServerPolicy>,
}

impl TlsServer {
    pub fn new(endpoint: Endpoint, policy: ServerPolicy) -> Self {
        Self {
            endpoint,
            policy: Arc::new(policy),
        }
    }

    /// Loads the server credentials named in `store` and builds the policy
    pub fn from_store(store: &ConfigStore) -> Result<Self> {
        let endpoint = store.endpoint(Role::Server)?;
        let paths = store.identity_paths(Role::Server)?;
        let bundle = identity::load(&paths, &crypto_provider())?;
        let policy = session::build_server_policy(&bundle)?;
        Ok(Self::new(endpoint, policy))
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    pub fn policy(&self) -> &ServerPolicy {
        &self.policy
    }

    /// Binds the configured endpoint
    pub fn bind(&self) -> std::result::Result<TlsListener, NetworkError> {
        let listener = session::listen(&self.endpoint, Arc::clone(&self.policy))?;
        match listener.local_addr() {
            Ok(addr) => tracing::info!("✓ Tollgate server listening on {}", addr),
            Err(_) => tracing::info!("✓ Tollgate server listening on {}", self.endpoint),
        }
        Ok(listener)
    }

    /// Binds and serves forever, logging whatever clients send
    pub fn run(&self) -> Result<()> {
        let listener = self.bind()?;
        self.serve(listener, log_received)
    }

    /// Accepts connections from `listener` and runs `handler` on each
    /// authenticated stream, one thread per connection.
    pub fn serve<H>(&self, listener: TlsListener, handler: H) -> Result<()>
    where
        H: Fn(&mut TlsStream) -> io::Result<()> + Send + Sync + 'static,
    {
        let handler = Arc::new(handler);
        let mut backoff = AcceptBackoff::default();
        tracing::debug!("Serving {} with one thread per connection", self.endpoint);

        for connection in listener.incoming() {
            match connection {
                Ok(pending) => {
                    backoff.succeeded();
                    let handler = Arc::clone(&handler);
                    thread::spawn(move || handle_client(pending, &*handler));
                }
                Err(e) => {
                    let pause = backoff.failed();
                    tracing::error!("Connection error: {} (retrying in {:?})", e, pause);
                    thread::sleep(pause);
                }
            }
        }

        Ok(())
    }
}

/// Delay between accept attempts, doubling while accept keeps failing
#[derive(Debug, Default)]
struct AcceptBackoff {
    delay: Option<Duration>,
}

impl AcceptBackoff {
    fn failed(&mut self) -> Duration {
        let next = self
            .delay
            .map_or(MIN_ACCEPT_BACKOFF, |d| (d * 2).min(MAX_ACCEPT_BACKOFF));
        self.delay = Some(next);
        next
    }

    fn succeeded(&mut self) {
        self.delay = None;
    }
}

/// Handshake, then the handler, for one accepted socket
fn handle_client<H>(pending: PendingConnection, handler: &H)
where
    H: Fn(&mut TlsStream) -> io::Result<()>,
{
    let id = Uuid::new_v4();
    let span = tracing::info_span!("connection", %id, peer = %pending.peer());
    let _guard = span.enter();

    tracing::info!("New connection received");
    let mut stream = match pending.handshake() {
        Ok(stream) => stream,
        Err(e) if e.is_certificate_rejection() => {
            tracing::warn!("✗ Client rejected: {}", e);
            return;
        }
        Err(e) => {
            tracing::error!("Handshake failed: {}", e);
            return;
        }
    };

    tracing::info!("✓ TLS connection established with client certificate verification");
    if let Some(fingerprint) = stream.peer_fingerprint() {
        tracing::info!("  - Client certificate SHA-256: {}", fingerprint);
    }

    if let Err(e) = handler(&mut stream) {
        tracing::error!("Client error: {}", e);
    }
    if let Err(e) = stream.close() {
        tracing::debug!("Close failed: {}", e);
    }
    tracing::info!("Connection closed");
}

/// Reads until the client disconnects, logging every chunk received
pub fn log_received(stream: &mut TlsStream) -> io::Result<()> {
    let mut buf = [0u8; READ_BUFFER_SIZE];
    loop {
        match stream.read(&mut buf) {
            Ok(0) => {
                tracing::info!("Client disconnected");
                return Ok(());
            }
            Ok(n) => {
                tracing::info!("Received {} bytes: {}", n, String::from_utf8_lossy(&buf[..n]));
            }
            Err(e)
                if matches!(
                    e.kind(),
                    io::ErrorKind::UnexpectedEof
                        | io::ErrorKind::ConnectionReset
                        | io::ErrorKind::ConnectionAborted
                        | io::ErrorKind::BrokenPipe
                ) =>
            {
                tracing::info!("Client disconnected without close_notify");
                return Ok(());
            }
            Err(e) => return Err(e),
        }
    }
}
