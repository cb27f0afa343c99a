use std::{
    io::{self, Read, Write},
    net::{Shutdown, TcpStream},
    time::Duration,
};

use rustls::{ClientConnection, Connection, ServerConnection};
use sha2::{Digest, Sha256};

use crate::session::ConnectionState;

/// How long [`TlsStream::close`] waits for the peer to finish its side
pub const CLOSE_TIMEOUT: Duration = Duration::from_secs(5);

/// Synchronous TLS wrapper over a TCP socket
#[derive(Debug)]
pub struct TlsStream {
    socket: TcpStream,
    tls:    Connection,
    state:  ConnectionState,
}

impl TlsStream {
    /// Create a new TLS stream from a server connection and complete the
    /// handshake
    pub fn from_server(socket: TcpStream, tls: ServerConnection) -> io::Result<Self> {
        let mut stream = Self {
            socket,
            tls: Connection::Server(tls),
            state: ConnectionState::Handshaking,
        };
        stream.complete_handshake()?;
        Ok(stream)
    }

    /// Create a new TLS stream from a client connection and complete the
    /// handshake
    pub fn from_client(socket: TcpStream, tls: ClientConnection) -> io::Result<Self> {
        let mut stream = Self {
            socket,
            tls: Connection::Client(tls),
            state: ConnectionState::Handshaking,
        };
        stream.complete_handshake()?;
        Ok(stream)
    }

    /// Complete the TLS handshake
    fn complete_handshake(&mut self) -> io::Result<()> {
        while self.tls.is_handshaking() {
            if self.tls.wants_write() {
                self.tls.write_tls(&mut self.socket)?;
                continue;
            }
            if self.tls.read_tls(&mut self.socket)? == 0 {
                self.state = ConnectionState::Closed;
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "peer closed the connection during the handshake",
                ));
            }
            if let Err(e) = self.tls.process_new_packets() {
                // Deliver the alert so the peer learns why
                let _ = self.tls.write_tls(&mut self.socket);
                let _ = self.socket.shutdown(Shutdown::Write);
                self.state = ConnectionState::Closed;
                return Err(io::Error::new(io::ErrorKind::InvalidData, e));
            }
        }

        // Our final flight (e.g. the client's certificate and Finished)
        while self.tls.wants_write() {
            self.tls.write_tls(&mut self.socket)?;
        }
        self.state = ConnectionState::Established;
        Ok(())
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Address of the remote end
    pub fn peer_addr(&self) -> io::Result<std::net::SocketAddr> {
        self.socket.peer_addr()
    }

    /// Negotiated protocol version, e.g. `TLSv1_3`
    pub fn protocol_version(&self) -> Option<rustls::ProtocolVersion> {
        self.tls.protocol_version()
    }

    pub fn cipher_suite(&self) -> Option<rustls::CipherSuite> {
        self.tls.negotiated_cipher_suite().map(|suite| suite.suite())
    }

    /// Hex SHA-256 of the peer's leaf certificate
    pub fn peer_fingerprint(&self) -> Option<String> {
        let leaf = self.tls.peer_certificates()?.first()?;
        Some(hex::encode(Sha256::digest(leaf.as_ref())))
    }

    /// Sends `close_notify`, then reads until the peer closes its side.
    ///
    /// Under TLS 1.3 a server rejects the client certificate only after the
    /// client considers the handshake complete, so the rejection arrives here
    /// as a fatal alert. It is returned as an `InvalidData` error carrying the
    /// `rustls::Error`, and takes precedence over a failed write.
    pub fn close(&mut self) -> io::Result<()> {
        if self.state == ConnectionState::Closed {
            return Ok(());
        }
        self.tls.send_close_notify();
        let flushed = self.flush();
        self.state = ConnectionState::Closed;
        let _ = self.socket.shutdown(Shutdown::Write);

        let drained = self.drain();
        let _ = self.socket.shutdown(Shutdown::Both);
        drained.and(flushed)
    }

    /// Discards incoming data until EOF, `close_notify` or [`CLOSE_TIMEOUT`]
    fn drain(&mut self) -> io::Result<()> {
        let _ = self.socket.set_read_timeout(Some(CLOSE_TIMEOUT));
        let mut scratch = [0u8; 512];
        loop {
            match self.tls.read_tls(&mut self.socket) {
                Ok(0) => return Ok(()),
                Ok(_) => {}
                Err(e) if matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut) => {
                    tracing::debug!("Peer did not close within {:?}", CLOSE_TIMEOUT);
                    return Ok(());
                }
                // Reset or aborted: nothing more will arrive
                Err(_) => return Ok(()),
            }
            if let Err(e) = self.tls.process_new_packets() {
                return Err(io::Error::new(io::ErrorKind::InvalidData, e));
            }
            while matches!(self.tls.reader().read(&mut scratch), Ok(n) if n > 0) {}
        }
    }
}

impl Read for TlsStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        loop {
            // Try to read buffered plaintext first
            match self.tls.reader().read(buf) {
                Ok(0) if !buf.is_empty() => {
                    self.state = ConnectionState::Closed;
                    return Ok(0);
                }
                Ok(n) => return Ok(n),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {}
                Err(e) => {
                    self.state = ConnectionState::Closed;
                    return Err(e);
                }
            }

            // Need more TLS data. After EOF the reader reports either a clean
            // close or `UnexpectedEof` on the next pass.
            self.tls.read_tls(&mut self.socket)?;
            if let Err(e) = self.tls.process_new_packets() {
                let _ = self.tls.write_tls(&mut self.socket);
                self.state = ConnectionState::Closed;
                return Err(io::Error::new(io::ErrorKind::InvalidData, e));
            }
        }
    }
}

impl Write for TlsStream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let written = self.tls.writer().write(buf)?;

        // Flush TLS data to socket (ignore WouldBlock in blocking mode)
        while self.tls.wants_write() {
            if let Err(e) = self.tls.write_tls(&mut self.socket) {
                if e.kind() != io::ErrorKind::WouldBlock {
                    return Err(e);
                }
                break;
            }
        }
        Ok(written)
    }

    fn flush(&mut self) -> io::Result<()> {
        // Ensure any buffered plaintext is passed to the TLS session
        self.tls.writer().flush()?;

        // Try to send all pending buffered TLS data to the socket
        while self.tls.wants_write() {
            match self.tls.write_tls(&mut self.socket) {
                Ok(_) => {}
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) => return Err(e),
            }
        }
        // Finally, flush the underlying socket
        self.socket.flush()
    }
}
