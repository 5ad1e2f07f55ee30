#![deny(missing_docs)]
#![deny(unsafe_code)]
#![warn(missing_debug_implementations)]
#![warn(clippy::all)]

//! # certinel
//!
//! `certinel` keeps a [`rustls`] server or client supplied with the current
//! certificate/key pair (or CA bundle) while that material is rotated on disk,
//! without blocking or failing in-flight handshakes.
//!
//! A [`Sentinel`] loads the material once it starts and again whenever its
//! [watch source](source) signals a change. Readers always get the last
//! successfully loaded value through a lock-free [cell](cell::CertificateCell);
//! a half-written or invalid file never replaces it. Rotations are detected
//! both when files are rewritten in place and when they are replaced through
//! an atomic symlink swap, as done by orchestrators mounting secrets as
//! directories.
//!
//! ## Feature flags
//!
//! Exactly **one** `rustls` crypto provider must be enabled:
//!
//! * `ring` (default)
//! * `aws-lc-rs`
//!
//! Logging goes through `log` (`logging`, default) or `tracing` (`tracing`).
//!
//! # Example
//!
//! ```no_run
//! use certinel::CertificateSentinel;
//! use std::time::Duration;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let sentinel = CertificateSentinel::new("/etc/tls/my.crt", "/etc/tls/my.key")?;
//! sentinel.start()?;
//! sentinel
//!     .wait_for_first_load_timeout(Duration::from_secs(5))
//!     .await?;
//!
//! // Plug into rustls: every handshake sees the current certificate.
//! let config = rustls::ServerConfig::builder()
//!     .with_no_client_auth()
//!     .with_cert_resolver(sentinel.server_resolver());
//!
//! // Export expiry for monitoring.
//! if let Some(obs) = sentinel.observation() {
//!     println!("{} expires at {}", obs.path().display(), obs.not_after());
//! }
//!
//! sentinel.stop().await?;
//! # Ok(())
//! # }
//! ```

#[cfg(all(feature = "ring", feature = "aws-lc-rs"))]
compile_error!("Enable only one crypto provider feature: `ring` or `aws-lc-rs`.");

#[cfg(not(any(feature = "ring", feature = "aws-lc-rs")))]
compile_error!("Enable one crypto provider feature: `ring` (default) or `aws-lc-rs`.");

pub mod cell;
pub mod cert;
pub mod error;
pub mod sentinel;
pub mod source;
pub mod tls;

mod crypto;
mod observability;
mod prelude;

// Public re-exports
pub use cell::CertificateCell;
pub use cert::error::{LoadError, LoadStage};
pub use cert::loader::{CaBundleLoader, KeyPairLoader, MaterialLoader};
pub use cert::{LeafMetadata, LoadedCaBundle, LoadedCertificate, PrivateKey};
pub use error::{SentinelError, SetupError, ShutdownError, SourceError};
pub use sentinel::{
    CaSentinel, CertificateObservation, CertificateSentinel, LifecycleState, Sentinel,
    SentinelBuilder, SentinelUpdates,
};
pub use source::{FsWatchSource, ManualSource, ManualTrigger, PollSource, WatchSource};
pub use tls::{ClientCertResolver, ClientCertificate, ServerCertResolver};
