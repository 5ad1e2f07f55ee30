//! rustls integration: certificate resolvers backed by a [`Sentinel`].
//!
//! The resolvers read the sentinel's current value on every handshake, so a
//! rotation takes effect on the next handshake without rebuilding the
//! `ServerConfig` or `ClientConfig`.
//!
//! ```no_run
//! use certinel::CertificateSentinel;
//! use rustls::ServerConfig;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let sentinel = CertificateSentinel::new("/d/my.crt", "/d/my.key")?;
//! sentinel.wait_for_first_load().await?;
//!
//! let config = ServerConfig::builder()
//!     .with_no_client_auth()
//!     .with_cert_resolver(sentinel.server_resolver());
//! # Ok(())
//! # }
//! ```

use crate::cert::loader::MaterialLoader;
use crate::cert::LoadedCertificate;
use crate::sentinel::Sentinel;
use rustls::client::ResolvesClientCert;
use rustls::server::{ClientHello, ResolvesServerCert};
use rustls::sign::CertifiedKey;
use rustls::SignatureScheme;
use std::fmt;
use std::sync::Arc;

/// The certificate a client offers when the server requests one.
///
/// `Empty` means "no certificate offered", which TLS allows; it is not a
/// lookup failure.
#[derive(Debug, Clone)]
pub enum ClientCertificate {
    /// The currently loaded certificate.
    Certificate(Arc<LoadedCertificate>),
    /// Nothing has been loaded yet.
    Empty,
}

impl ClientCertificate {
    /// Returns `true` for [`ClientCertificate::Empty`].
    pub fn is_empty(&self) -> bool {
        matches!(self, Self::Empty)
    }

    /// Returns the chain and signing key, or `None` when empty.
    pub fn certified_key(&self) -> Option<Arc<CertifiedKey>> {
        match self {
            Self::Certificate(cert) => Some(cert.certified_key()),
            Self::Empty => None,
        }
    }
}

/// A [`ResolvesServerCert`] serving a sentinel's current certificate.
///
/// Before the first successful load it resolves nothing, which makes rustls
/// abort the handshake.
pub struct ServerCertResolver<L: MaterialLoader<Material = LoadedCertificate>> {
    sentinel: Sentinel<L>,
}

impl<L: MaterialLoader<Material = LoadedCertificate>> ServerCertResolver<L> {
    /// Creates a resolver reading from `sentinel`.
    pub fn new(sentinel: Sentinel<L>) -> Self {
        Self { sentinel }
    }
}

impl<L: MaterialLoader<Material = LoadedCertificate>> fmt::Debug for ServerCertResolver<L> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerCertResolver")
            .field("watch_path", &self.sentinel.loader().watch_path())
            .finish()
    }
}

impl<L: MaterialLoader<Material = LoadedCertificate>> ResolvesServerCert for ServerCertResolver<L> {
    fn resolve(&self, _client_hello: ClientHello<'_>) -> Option<Arc<CertifiedKey>> {
        self.sentinel.server_certificate()
    }
}

/// A [`ResolvesClientCert`] offering a sentinel's current certificate.
///
/// Before the first successful load it offers an empty certificate list.
pub struct ClientCertResolver<L: MaterialLoader<Material = LoadedCertificate>> {
    sentinel: Sentinel<L>,
}

impl<L: MaterialLoader<Material = LoadedCertificate>> ClientCertResolver<L> {
    /// Creates a resolver reading from `sentinel`.
    pub fn new(sentinel: Sentinel<L>) -> Self {
        Self { sentinel }
    }
}

impl<L: MaterialLoader<Material = LoadedCertificate>> fmt::Debug for ClientCertResolver<L> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientCertResolver")
            .field("watch_path", &self.sentinel.loader().watch_path())
            .finish()
    }
}

impl<L: MaterialLoader<Material = LoadedCertificate>> ResolvesClientCert for ClientCertResolver<L> {
    fn resolve(
        &self,
        _root_hint_subjects: &[&[u8]],
        _sigschemes: &[SignatureScheme],
    ) -> Option<Arc<CertifiedKey>> {
        self.sentinel.client_certificate().certified_key()
    }

    fn has_certs(&self) -> bool {
        true
    }
}
