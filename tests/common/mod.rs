//! Shared fixtures for the integration tests.

#![allow(dead_code)]

use certinel::sentinel::{MetricsErrorKind, MetricsRecorder};
use certinel::{CertificateSentinel, SentinelError};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub const CERT: &str = "my.crt";
pub const KEY: &str = "my.key";

/// A self-signed certificate with the given serial, and its key, both PEM.
pub fn key_pair_pem(serial: u64) -> (String, String) {
    let key = rcgen::KeyPair::generate().unwrap();
    let mut params = rcgen::CertificateParams::new(vec!["localhost".to_string()]).unwrap();
    params.serial_number = Some(rcgen::SerialNumber::from(serial));
    let cert = params.self_signed(&key).unwrap();
    (cert.pem(), key.serialize_pem())
}

/// Writes `my.key` then `my.crt` into `dir`, in place.
pub fn write_pair(dir: &Path, serial: u64) -> (PathBuf, PathBuf) {
    let (cert_pem, key_pem) = key_pair_pem(serial);
    let cert = dir.join(CERT);
    let key = dir.join(KEY);
    std::fs::write(&key, key_pem).unwrap();
    std::fs::write(&cert, cert_pem).unwrap();
    (cert, key)
}

pub fn serial(sentinel: &CertificateSentinel) -> Option<String> {
    sentinel
        .current()
        .map(|c| c.leaf_metadata().serial_number().to_string())
}

/// Polls `f` until it returns `true` or `within` elapses.
pub async fn eventually(within: Duration, mut f: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + within;
    loop {
        if f() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Collects every error passed to the error callback.
#[derive(Clone, Default)]
pub struct ErrorLog {
    errors: Arc<Mutex<Vec<SentinelError>>>,
}

impl ErrorLog {
    pub fn callback(&self) -> impl Fn(&SentinelError) + Send + Sync + 'static {
        let errors = Arc::clone(&self.errors);
        move |e| errors.lock().unwrap().push(e.clone())
    }

    pub fn len(&self) -> usize {
        self.errors.lock().unwrap().len()
    }

    pub fn snapshot(&self) -> Vec<SentinelError> {
        self.errors.lock().unwrap().clone()
    }
}

/// Metrics recorder counting reloads and errors by kind.
#[derive(Default)]
pub struct TestMetrics {
    pub reloads: AtomicU64,
    errors: Mutex<HashMap<MetricsErrorKind, u64>>,
}

impl TestMetrics {
    pub fn errors(&self, kind: MetricsErrorKind) -> u64 {
        self.errors.lock().unwrap().get(&kind).copied().unwrap_or(0)
    }
}

impl MetricsRecorder for TestMetrics {
    fn record_reload(&self) {
        self.reloads.fetch_add(1, Ordering::SeqCst);
    }

    fn record_error(&self, kind: MetricsErrorKind) {
        *self.errors.lock().unwrap().entry(kind).or_insert(0) += 1;
    }
}
