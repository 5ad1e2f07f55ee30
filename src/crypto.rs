//! Selection of the process-wide rustls crypto provider.

use crate::cert::error::LoadError;
use rustls::crypto::CryptoProvider;
use std::sync::{Arc, OnceLock};

/// Returns the process default provider, installing the one selected by the
/// crate features first if the application has not installed one.
pub(crate) fn default_provider() -> Result<Arc<CryptoProvider>, LoadError> {
    static INSTALLED: OnceLock<()> = OnceLock::new();
    INSTALLED.get_or_init(|| {
        // Fails only if a provider is already installed; that one wins.
        let _ = feature_provider().install_default();
    });

    CryptoProvider::get_default()
        .cloned()
        .ok_or(LoadError::NoCryptoProvider)
}

#[cfg(feature = "ring")]
fn feature_provider() -> CryptoProvider {
    rustls::crypto::ring::default_provider()
}

#[cfg(feature = "aws-lc-rs")]
fn feature_provider() -> CryptoProvider {
    rustls::crypto::aws_lc_rs::default_provider()
}
