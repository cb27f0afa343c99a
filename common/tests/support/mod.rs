//! Throwaway PKI for tests: a CA, leaves it signs, and PEM files on disk.
#![allow(dead_code)]

use std::{
    fs,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use rcgen::{
    BasicConstraints, Certificate, CertificateParams, DnType, ExtendedKeyUsagePurpose, IsCa, KeyPair,
    KeyUsagePurpose,
};
use rustls::{
    pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer},
    RootCertStore,
};
use tollgate_common::{CredentialBundle, IdentityPaths, Role};

/// A self-signed certificate authority
pub struct Authority {
    cert: Certificate,
    key:  KeyPair,
}

/// A leaf certificate and its private key
pub struct Leaf {
    cert: Certificate,
    key:  KeyPair,
}

impl Authority {
    pub fn new(name: &str) -> Result<Self> {
        let key = KeyPair::generate().context("generate CA key")?;
        let mut params = CertificateParams::new(Vec::<String>::new())?;
        params.distinguished_name.push(DnType::CommonName, name);
        params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
        params.key_usages = vec![
            KeyUsagePurpose::KeyCertSign,
            KeyUsagePurpose::CrlSign,
            KeyUsagePurpose::DigitalSignature,
        ];
        let cert = params.self_signed(&key).context("self-sign CA")?;
        Ok(Self { cert, key })
    }

    /// Issues a leaf usable for both server and client auth
    pub fn issue(&self, dns_name: &str) -> Result<Leaf> {
        let key = KeyPair::generate().context("generate leaf key")?;
        let mut params = CertificateParams::new(vec![dns_name.to_string()])?;
        params.distinguished_name.push(DnType::CommonName, dns_name);
        params.extended_key_usages = vec![
            ExtendedKeyUsagePurpose::ServerAuth,
            ExtendedKeyUsagePurpose::ClientAuth,
        ];
        let cert = params
            .signed_by(&key, &self.cert, &self.key)
            .context("sign leaf")?;
        Ok(Leaf { cert, key })
    }

    pub fn pem(&self) -> String {
        self.cert.pem()
    }

    pub fn der(&self) -> CertificateDer<'static> {
        self.cert.der().clone()
    }

    pub fn root_store(&self) -> Result<RootCertStore> {
        let mut store = RootCertStore::empty();
        store.add(self.der())?;
        Ok(store)
    }
}

impl Leaf {
    pub fn cert_pem(&self) -> String {
        self.cert.pem()
    }

    pub fn key_pem(&self) -> String {
        self.key.serialize_pem()
    }

    pub fn cert_der(&self) -> CertificateDer<'static> {
        self.cert.der().clone()
    }

    pub fn key_der(&self) -> PrivateKeyDer<'static> {
        PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(self.key.serialize_der()))
    }

    /// In-memory bundle that trusts `ca`
    pub fn bundle(&self, role: Role, ca: &Authority) -> Result<CredentialBundle> {
        Ok(CredentialBundle::from_parts(
            role,
            vec![self.cert_der()],
            self.key_der(),
            ca.root_store()?,
        ))
    }
}

pub fn write(dir: &Path, name: &str, contents: &str) -> Result<PathBuf> {
    let path = dir.join(name);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(&path, contents).with_context(|| format!("write {path:?}"))?;
    Ok(path)
}

/// Writes `leaf` and `ca` as `<prefix>.pem`, `<prefix>.key` and `ca.pem`
pub fn write_identity(dir: &Path, role: Role, prefix: &str, leaf: &Leaf, ca: &Authority) -> Result<IdentityPaths> {
    Ok(IdentityPaths {
        role,
        cert_path: write(dir, &format!("{prefix}.pem"), &leaf.cert_pem())?,
        key_path: write(dir, &format!("{prefix}.key"), &leaf.key_pem())?,
        ca_path: write(dir, "ca.pem", &ca.pem())?,
    })
}
