//! Tollgate Client Library
//!
//! A blocking mutual TLS client. Connection parameters come from a merged
//! [`ConfigStore`](tollgate_common::ConfigStore): the endpoint, the client
//! certificate and key, the CA bundle that must have signed the server, and an
//! optional name to expect on the server certificate.
//!
//! # Example
//!
//! ```no_run
//! use tollgate_client::TlsClient;
//! use tollgate_common::ConfigMerger;
//!
//! # fn main() -> tollgate_common::Result<()> {
//! let merger = ConfigMerger::from_current_dir()?;
//! let store = merger.merge([("host", "tls.example.com")], None)?.store;
//!
//! let mut client = TlsClient::from_store(&store)?;
//! client.connect()?;
//! client.send(b"hello")?;
//! client.disconnect()?;
//! # Ok(())
//! # }
//! ```

mod client;

pub use client::*;
