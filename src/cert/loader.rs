//! Loaders turning files on disk into [`LoadedCertificate`] and
//! [`LoadedCaBundle`] values.

use crate::cert::error::LoadError;
use crate::cert::parsing::{
    certificates_from_pem, leaf_metadata, private_key_from_pem, read_file,
};
use crate::cert::{LoadedCaBundle, LoadedCertificate, Material, PrivateKey};
use rustls::sign::CertifiedKey;
use rustls::{InconsistentKeys, RootCertStore};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Reads and validates TLS material.
///
/// Implementations must be free of shared mutable state: a loader may be
/// invoked repeatedly, and concurrently by independent sentinels.
pub trait MaterialLoader: Send + Sync + 'static {
    /// The value produced by a successful load.
    type Material: Material;

    /// Loads the material from its backing files.
    ///
    /// # Errors
    ///
    /// Returns a [`LoadError`] if a file cannot be read or its contents are
    /// unusable.
    fn load(&self) -> Result<Self::Material, LoadError>;

    /// The file whose changes should trigger a reload.
    fn watch_path(&self) -> &Path;
}

/// Loads a PEM certificate chain and its PEM private key.
#[derive(Debug, Clone)]
pub struct KeyPairLoader {
    cert_path: PathBuf,
    key_path: PathBuf,
}

impl KeyPairLoader {
    /// Creates a loader for the given certificate and key files.
    pub fn new(cert_path: impl Into<PathBuf>, key_path: impl Into<PathBuf>) -> Self {
        Self {
            cert_path: cert_path.into(),
            key_path: key_path.into(),
        }
    }

    /// Returns the certificate file path.
    pub fn cert_path(&self) -> &Path {
        &self.cert_path
    }

    /// Returns the private key file path.
    pub fn key_path(&self) -> &Path {
        &self.key_path
    }
}

impl MaterialLoader for KeyPairLoader {
    type Material = LoadedCertificate;

    fn load(&self) -> Result<LoadedCertificate, LoadError> {
        let cert_pem = read_file(&self.cert_path)?;
        let key_pem = read_file(&self.key_path)?;

        let chain = certificates_from_pem(&self.cert_path, &cert_pem)?;
        let key_der = private_key_from_pem(&self.key_path, &key_pem)?;
        let leaf = leaf_metadata(&self.cert_path, &chain[0])?;

        let provider = crate::crypto::default_provider()?;

        let private_key = PrivateKey::new(key_der.secret_der());
        let signing_key = provider
            .key_provider
            .load_private_key(key_der)
            .map_err(|source| LoadError::PrivateKey {
                path: self.key_path.clone(),
                source,
            })?;

        let certified_key = CertifiedKey::new(chain.clone(), signing_key);
        match certified_key.keys_match() {
            // Some key types cannot expose their public half; accept them as rustls does.
            Ok(()) | Err(rustls::Error::InconsistentKeys(InconsistentKeys::Unknown)) => {}
            Err(rustls::Error::InconsistentKeys(_)) => {
                return Err(LoadError::KeyMismatch {
                    cert_path: self.cert_path.clone(),
                    key_path: self.key_path.clone(),
                });
            }
            Err(source) => {
                return Err(LoadError::Rejected {
                    path: self.cert_path.clone(),
                    source,
                });
            }
        }

        Ok(LoadedCertificate::new(
            chain,
            leaf,
            private_key,
            Arc::new(certified_key),
        ))
    }

    fn watch_path(&self) -> &Path {
        &self.cert_path
    }
}

/// Loads a PEM bundle of trusted CA certificates.
#[derive(Debug, Clone)]
pub struct CaBundleLoader {
    ca_path: PathBuf,
}

impl CaBundleLoader {
    /// Creates a loader for the given CA bundle file.
    pub fn new(ca_path: impl Into<PathBuf>) -> Self {
        Self {
            ca_path: ca_path.into(),
        }
    }

    /// Returns the CA bundle file path.
    pub fn ca_path(&self) -> &Path {
        &self.ca_path
    }
}

impl MaterialLoader for CaBundleLoader {
    type Material = LoadedCaBundle;

    fn load(&self) -> Result<LoadedCaBundle, LoadError> {
        let pem = read_file(&self.ca_path)?;
        let authorities = certificates_from_pem(&self.ca_path, &pem)?;

        let mut roots = RootCertStore::empty();
        roots.add_parsable_certificates(authorities.iter().cloned());
        if roots.is_empty() {
            return Err(LoadError::NoTrustAnchors {
                path: self.ca_path.clone(),
            });
        }

        Ok(LoadedCaBundle::new(authorities, roots))
    }

    fn watch_path(&self) -> &Path {
        &self.ca_path
    }
}
