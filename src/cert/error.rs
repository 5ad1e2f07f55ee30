//! Error types for loading certificate material from disk.

use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use x509_parser::error::X509Error;

/// The stage of a load attempt that failed.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash)]
pub enum LoadStage {
    /// The file could not be opened or read.
    Read,
    /// The file was read but its contents are unusable.
    Parse,
}

impl LoadStage {
    /// Returns a stable string representation of the stage.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Read => "read",
            Self::Parse => "parse",
        }
    }
}

impl fmt::Display for LoadStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An error that may arise loading a certificate/key pair or a CA bundle.
///
/// Load errors are recoverable: a running sentinel reports them and keeps
/// serving the previously loaded material.
#[derive(Debug, Clone, thiserror::Error)]
#[non_exhaustive]
pub enum LoadError {
    /// The file could not be read.
    #[error("unable to read {}", path.display())]
    Read {
        /// The file that could not be read.
        path: PathBuf,
        /// The underlying I/O error.
        #[source]
        source: Arc<io::Error>,
    },

    /// The PEM structure of the file is malformed.
    #[error("malformed PEM data in {}", path.display())]
    Pem {
        /// The file containing malformed PEM.
        path: PathBuf,
        /// The error reported by the PEM decoder.
        #[source]
        source: Arc<io::Error>,
    },

    /// The certificate file does not contain any certificate.
    #[error("no certificate data found in {}", path.display())]
    NoCertificate {
        /// The certificate (or CA bundle) file.
        path: PathBuf,
    },

    /// The key file does not contain any private key.
    #[error("no private key data found in {}", path.display())]
    NoPrivateKey {
        /// The private key file.
        path: PathBuf,
    },

    /// The leaf certificate could not be decoded as X.509.
    #[error("failed parsing X.509 certificate in {}", path.display())]
    Certificate {
        /// The certificate file.
        path: PathBuf,
        /// The error reported by the X.509 parser.
        #[source]
        source: X509Error,
    },

    /// The private key could not be loaded by the crypto provider.
    #[error("unsupported private key in {}", path.display())]
    PrivateKey {
        /// The private key file.
        path: PathBuf,
        /// The error reported by rustls.
        #[source]
        source: rustls::Error,
    },

    /// The certificate chain was rejected by rustls.
    #[error("certificate in {} rejected by rustls", path.display())]
    Rejected {
        /// The certificate file.
        path: PathBuf,
        /// The error reported by rustls.
        #[source]
        source: rustls::Error,
    },

    /// The private key does not match the leaf certificate's public key.
    #[error(
        "private key in {} does not match certificate in {}",
        key_path.display(),
        cert_path.display()
    )]
    KeyMismatch {
        /// The certificate file.
        cert_path: PathBuf,
        /// The private key file.
        key_path: PathBuf,
    },

    /// None of the certificates of a CA bundle were accepted as trust anchors.
    #[error("no usable CA certificates in {}", path.display())]
    NoTrustAnchors {
        /// The CA bundle file.
        path: PathBuf,
    },

    /// No rustls crypto provider is available to load the private key.
    #[error("rustls crypto provider is not installed")]
    NoCryptoProvider,
}

impl LoadError {
    /// Returns the stage at which the load failed.
    pub fn stage(&self) -> LoadStage {
        match self {
            Self::Read { .. } => LoadStage::Read,
            _ => LoadStage::Parse,
        }
    }

    /// Returns the path the error refers to, if any.
    pub fn path(&self) -> Option<&Path> {
        match self {
            Self::Read { path, .. }
            | Self::Pem { path, .. }
            | Self::NoCertificate { path }
            | Self::NoPrivateKey { path }
            | Self::Certificate { path, .. }
            | Self::PrivateKey { path, .. }
            | Self::Rejected { path, .. }
            | Self::NoTrustAnchors { path } => Some(path),
            Self::KeyMismatch { cert_path, .. } => Some(cert_path),
            Self::NoCryptoProvider => None,
        }
    }

    pub(crate) fn read(path: &Path, source: io::Error) -> Self {
        Self::Read {
            path: path.to_path_buf(),
            source: Arc::new(source),
        }
    }

    pub(crate) fn pem(path: &Path, source: io::Error) -> Self {
        Self::Pem {
            path: path.to_path_buf(),
            source: Arc::new(source),
        }
    }
}
