//! Sentinel: lifecycle coordinator keeping TLS material current.
//!
//! A [`Sentinel`] combines a [`MaterialLoader`](crate::cert::loader::MaterialLoader),
//! a [`WatchSource`](crate::source::WatchSource) and a
//! [`CertificateCell`](crate::cell::CertificateCell). It is built idle, started
//! with [`Sentinel::start`], and stopped with [`Sentinel::stop`], which returns
//! only after all background work has finished.
//!
//! Errors never reach the read path. Load failures are recoverable: they are
//! reported to the error callback and the previous material keeps being
//! served. A failing watch source ends the control loop (state
//! [`LifecycleState::Stopped`]); the failure is reported to the callback, to a
//! pending [`Sentinel::wait_for_first_load`], and from [`Sentinel::run`].
//!
//! Primary types are re-exported at the crate root. For advanced configuration
//! types (e.g., `MetricsErrorKind`, `MetricsRecorder`), import from this module.
//!
//! # Example
//!
//! ```no_run
//! use certinel::CertificateSentinel;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let sentinel = CertificateSentinel::builder(
//!     certinel::cert::loader::KeyPairLoader::new("/d/my.crt", "/d/my.key"),
//! )
//! .on_error(|e| eprintln!("rotation failed: {e}"))
//! .build()?;
//!
//! sentinel.start()?;
//! sentinel.wait_for_first_load().await?;
//!
//! let serial = sentinel
//!     .current()
//!     .map(|c| c.leaf_metadata().serial_number().to_string());
//! println!("serving serial {serial:?}");
//!
//! sentinel.stop().await?;
//! # Ok(())
//! # }
//! ```

mod builder;
mod lifecycle;
mod metrics;
mod supervisor;
mod types;

pub use builder::SentinelBuilder;
pub use lifecycle::{CaSentinel, CertificateSentinel, Sentinel};
pub use metrics::{MetricsErrorKind, MetricsRecorder};
pub use types::{CertificateObservation, ErrorCallback, LifecycleState, SentinelUpdates};
