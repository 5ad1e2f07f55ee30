//! Loaded TLS material: certificate/key pairs and CA bundles.
//!
//! Values in this module are immutable once built. A rotation produces a new
//! value that replaces the old one; the old one is released when its last
//! reader drops it.

use rustls::pki_types::CertificateDer;
use rustls::sign::CertifiedKey;
use rustls::RootCertStore;
use std::sync::Arc;
use time::OffsetDateTime;
use zeroize::Zeroize;

pub mod error;
pub mod loader;
pub(crate) mod parsing;

/// Metadata of the leaf (end-entity) certificate of a chain.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct LeafMetadata {
    pub(crate) serial_number: String,
    pub(crate) subject: String,
    pub(crate) not_before: OffsetDateTime,
    pub(crate) not_after: OffsetDateTime,
}

impl LeafMetadata {
    /// Returns the serial number in decimal notation.
    pub fn serial_number(&self) -> &str {
        &self.serial_number
    }

    /// Returns the subject distinguished name (RFC 4514 notation).
    pub fn subject(&self) -> &str {
        &self.subject
    }

    /// Returns the start of the validity period.
    pub fn not_before(&self) -> OffsetDateTime {
        self.not_before
    }

    /// Returns the end of the validity period.
    pub fn not_after(&self) -> OffsetDateTime {
        self.not_after
    }
}

/// A DER-encoded private key.
///
/// This type is zeroized on drop.
#[derive(Clone, Eq, PartialEq, Zeroize)]
#[zeroize(drop)]
pub struct PrivateKey(Vec<u8>);

impl PrivateKey {
    pub(crate) fn new(der: &[u8]) -> Self {
        Self(der.to_vec())
    }

    /// Returns the private key bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl AsRef<[u8]> for PrivateKey {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl std::fmt::Debug for PrivateKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PrivateKey")
            .field("len", &self.0.len())
            .finish()
    }
}

/// A certificate chain, its private key and the parsed leaf metadata.
///
/// Created only by [`KeyPairLoader`](loader::KeyPairLoader).
pub struct LoadedCertificate {
    chain: Vec<CertificateDer<'static>>,
    leaf: LeafMetadata,
    private_key: PrivateKey,
    certified_key: Arc<CertifiedKey>,
}

impl LoadedCertificate {
    pub(crate) fn new(
        chain: Vec<CertificateDer<'static>>,
        leaf: LeafMetadata,
        private_key: PrivateKey,
        certified_key: Arc<CertifiedKey>,
    ) -> Self {
        Self {
            chain,
            leaf,
            private_key,
            certified_key,
        }
    }

    /// Returns the certificate chain, leaf first.
    pub fn cert_chain(&self) -> &[CertificateDer<'static>] {
        &self.chain
    }

    /// Returns the leaf certificate.
    pub fn leaf(&self) -> &CertificateDer<'static> {
        // The loader rejects empty chains.
        &self.chain[0]
    }

    /// Returns the parsed leaf metadata.
    pub fn leaf_metadata(&self) -> &LeafMetadata {
        &self.leaf
    }

    /// Returns the private key.
    pub fn private_key(&self) -> &PrivateKey {
        &self.private_key
    }

    /// Returns the chain and signing key in the form rustls consumes.
    pub fn certified_key(&self) -> Arc<CertifiedKey> {
        Arc::clone(&self.certified_key)
    }
}

impl std::fmt::Debug for LoadedCertificate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoadedCertificate")
            .field("chain_len", &self.chain.len())
            .field("leaf", &self.leaf)
            .field("private_key", &self.private_key)
            .finish_non_exhaustive()
    }
}

/// A set of trusted CA certificates.
///
/// Created only by [`CaBundleLoader`](loader::CaBundleLoader).
#[derive(Debug)]
pub struct LoadedCaBundle {
    authorities: Vec<CertificateDer<'static>>,
    roots: Arc<RootCertStore>,
}

impl LoadedCaBundle {
    pub(crate) fn new(authorities: Vec<CertificateDer<'static>>, roots: RootCertStore) -> Self {
        Self {
            authorities,
            roots: Arc::new(roots),
        }
    }

    /// Returns the CA certificates as found in the bundle file.
    pub fn authorities(&self) -> &[CertificateDer<'static>] {
        &self.authorities
    }

    /// Returns the trust anchors accepted from the bundle.
    pub fn root_store(&self) -> Arc<RootCertStore> {
        Arc::clone(&self.roots)
    }
}

/// Material whose leaf certificate can be reported to a metrics collector.
pub trait Material: Send + Sync + 'static {
    /// Returns the leaf metadata, if this material has a leaf.
    fn leaf_metadata(&self) -> Option<&LeafMetadata>;
}

impl Material for LoadedCertificate {
    fn leaf_metadata(&self) -> Option<&LeafMetadata> {
        Some(&self.leaf)
    }
}

impl Material for LoadedCaBundle {
    fn leaf_metadata(&self) -> Option<&LeafMetadata> {
        None
    }
}
