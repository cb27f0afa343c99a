//! Loading certificate, key and CA material for one role.

use std::{
    fmt, fs,
    io::BufReader,
    path::{Path, PathBuf},
    sync::Arc,
};

use rustls::{
    crypto::CryptoProvider,
    pki_types::{CertificateDer, PrivateKeyDer},
    sign::CertifiedKey,
    InconsistentKeys, RootCertStore,
};
use rustls_pemfile::{certs, private_key};

use crate::error::IdentityLoadError;

/// Which end of the channel a set of credentials belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    Client,
    Server,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Client => write!(f, "client"),
            Role::Server => write!(f, "server"),
        }
    }
}

/// Certificate, key and CA paths for one role
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentityPaths {
    pub role:      Role,
    /// Path to the leaf certificate file
    pub cert_path: PathBuf,
    /// Path to the private key file
    pub key_path:  PathBuf,
    /// Path to the certificate authority bundle
    pub ca_path:   PathBuf,
}

/// Leaf certificate chain, private key and trust pool for one role
#[derive(Debug)]
pub struct CredentialBundle {
    role:       Role,
    cert_chain: Vec<CertificateDer<'static>>,
    key:        PrivateKeyDer<'static>,
    ca_pool:    Arc<RootCertStore>,
    ca_source:  String,
}

impl CredentialBundle {
    /// Assembles a bundle from already-parsed material without validation.
    ///
    /// The policy builders still refuse an empty CA pool.
    pub fn from_parts(
        role: Role,
        cert_chain: Vec<CertificateDer<'static>>,
        key: PrivateKeyDer<'static>,
        ca_pool: RootCertStore,
    ) -> Self {
        Self {
            role,
            cert_chain,
            key,
            ca_pool: Arc::new(ca_pool),
            ca_source: "<in-memory>".to_string(),
        }
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn cert_chain(&self) -> &[CertificateDer<'static>] {
        &self.cert_chain
    }

    pub fn private_key(&self) -> &PrivateKeyDer<'static> {
        &self.key
    }

    pub fn ca_pool(&self) -> Arc<RootCertStore> {
        Arc::clone(&self.ca_pool)
    }

    /// Where the CA pool was loaded from, for diagnostics
    pub fn ca_source(&self) -> &str {
        &self.ca_source
    }
}

/// Reads and validates the credentials named by `paths`
pub fn load(paths: &IdentityPaths, provider: &CryptoProvider) -> Result<CredentialBundle, IdentityLoadError> {
    let role = paths.role;
    tracing::info!("Loading {} credentials:", role);
    tracing::info!("  - Certificate: {:?}", paths.cert_path);
    tracing::info!("  - Key: {:?}", paths.key_path);
    tracing::info!("  - CA bundle: {:?}", paths.ca_path);

    let cert_pem = read(role, "certificate", &paths.cert_path)?;
    let key_pem = read(role, "private key", &paths.key_path)?;
    let ca_pem = read(role, "CA bundle", &paths.ca_path)?;

    let cert_chain = certs(&mut BufReader::new(&*cert_pem))
        .collect::<Result<Vec<_>, _>>()
        .map_err(|source| IdentityLoadError::Parse {
            role,
            what: "certificate",
            path: paths.cert_path.clone(),
            source,
        })?;
    if cert_chain.is_empty() {
        return Err(IdentityLoadError::NoCertificate {
            role,
            path: paths.cert_path.clone(),
        });
    }

    let key = private_key(&mut BufReader::new(&*key_pem))
        .map_err(|source| IdentityLoadError::Parse {
            role,
            what: "private key",
            path: paths.key_path.clone(),
            source,
        })?
        .ok_or_else(|| IdentityLoadError::NoPrivateKey {
            role,
            path: paths.key_path.clone(),
        })?;

    check_key_matches(paths, &cert_chain, &key, provider)?;

    let ca_pool = load_ca_pool(role, &paths.ca_path, &ca_pem)?;
    tracing::debug!("{} CA pool holds {} trust anchor(s)", role, ca_pool.len());

    Ok(CredentialBundle {
        role,
        cert_chain,
        key,
        ca_pool: Arc::new(ca_pool),
        ca_source: paths.ca_path.display().to_string(),
    })
}

fn read(role: Role, what: &'static str, path: &Path) -> Result<Vec<u8>, IdentityLoadError> {
    fs::read(path).map_err(|source| IdentityLoadError::Read {
        role,
        what,
        path: path.to_path_buf(),
        source,
    })
}

fn check_key_matches(
    paths: &IdentityPaths,
    cert_chain: &[CertificateDer<'static>],
    key: &PrivateKeyDer<'static>,
    provider: &CryptoProvider,
) -> Result<(), IdentityLoadError> {
    let signing_key = provider
        .key_provider
        .load_private_key(key.clone_key())
        .map_err(|source| IdentityLoadError::UnsupportedKey {
            role: paths.role,
            path: paths.key_path.clone(),
            source,
        })?;

    match CertifiedKey::new(cert_chain.to_vec(), signing_key).keys_match() {
        Ok(()) => Ok(()),
        // the provider cannot expose this key's public half; rustls checks again at handshake
        Err(rustls::Error::InconsistentKeys(InconsistentKeys::Unknown)) => Ok(()),
        Err(_) => Err(IdentityLoadError::KeyMismatch {
            role:      paths.role,
            cert_path: paths.cert_path.clone(),
            key_path:  paths.key_path.clone(),
        }),
    }
}

/// Parses every PEM certificate in `pem` into a trust pool
pub fn load_ca_pool(role: Role, path: &Path, pem: &[u8]) -> Result<RootCertStore, IdentityLoadError> {
    let ca_certs = certs(&mut BufReader::new(pem))
        .collect::<Result<Vec<_>, _>>()
        .map_err(|source| IdentityLoadError::Parse {
            role,
            what: "CA bundle",
            path: path.to_path_buf(),
            source,
        })?;

    let mut root_store = RootCertStore::empty();
    let (added, ignored) = root_store.add_parsable_certificates(ca_certs);
    if ignored > 0 {
        tracing::warn!("Ignored {} unparsable certificate(s) in {:?}", ignored, path);
    }

    if added == 0 {
        return Err(IdentityLoadError::EmptyCaPool {
            role,
            path: path.display().to_string(),
        });
    }
    Ok(root_store)
}
