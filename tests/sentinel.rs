//! Lifecycle tests driven by a `ManualSource`, independent of file notifications.

mod common;

use certinel::cert::loader::{CaBundleLoader, KeyPairLoader, MaterialLoader};
use certinel::sentinel::MetricsErrorKind;
use certinel::{
    CaSentinel, CertificateSentinel, LifecycleState, LoadError, LoadedCertificate, ManualSource,
    ManualTrigger, SentinelError, SetupError, ShutdownError, SourceError, WatchSource,
};
use certinel::source::{EventSender, SourceFuture};
use common::{eventually, serial, write_pair, ErrorLog, TestMetrics, CERT, KEY};
use std::path::Path;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

const WITHIN: Duration = Duration::from_secs(10);

fn manual_sentinel(dir: &Path, errors: &ErrorLog) -> (CertificateSentinel, ManualTrigger) {
    let (source, trigger) = ManualSource::new();
    let sentinel = CertificateSentinel::builder(KeyPairLoader::new(dir.join(CERT), dir.join(KEY)))
        .source(source)
        .on_error(errors.callback())
        .build()
        .unwrap();
    (sentinel, trigger)
}

#[tokio::test]
async fn test_nth_successful_load_is_visible() {
    let dir = tempfile::tempdir().unwrap();
    write_pair(dir.path(), 1);
    let errors = ErrorLog::default();
    let (sentinel, trigger) = manual_sentinel(dir.path(), &errors);

    sentinel.start().unwrap();
    sentinel.wait_for_first_load().await.unwrap();
    assert_eq!(serial(&sentinel).as_deref(), Some("1"));
    assert_eq!(sentinel.state(), LifecycleState::Running);

    let mut updates = sentinel.updated();
    for n in 2..=4u64 {
        write_pair(dir.path(), n);
        assert!(trigger.reload());
        updates.wait_for(|v| *v >= n).await.unwrap();
        assert_eq!(serial(&sentinel), Some(n.to_string()));
    }

    assert_eq!(sentinel.version(), 4);
    assert_eq!(errors.len(), 0);
    sentinel.stop().await.unwrap();
}

#[tokio::test]
async fn test_failed_reload_keeps_previous_value() {
    let dir = tempfile::tempdir().unwrap();
    write_pair(dir.path(), 1);
    let errors = ErrorLog::default();
    let (sentinel, trigger) = manual_sentinel(dir.path(), &errors);

    sentinel.wait_for_first_load().await.unwrap();
    let before = sentinel.current().unwrap();

    std::fs::write(dir.path().join(CERT), "").unwrap();
    assert!(trigger.reload());
    assert!(eventually(WITHIN, || errors.len() == 1).await);

    let after = sentinel.current().unwrap();
    assert!(Arc::ptr_eq(&before, &after));
    assert_eq!(sentinel.version(), 1);
    assert!(matches!(errors.snapshot()[0], SentinelError::Load(_)));

    // Watching continues after a failed reload.
    write_pair(dir.path(), 2);
    assert!(trigger.reload());
    assert!(eventually(WITHIN, || serial(&sentinel).as_deref() == Some("2")).await);

    sentinel.stop().await.unwrap();
}

#[tokio::test]
async fn test_stop_before_start() {
    let dir = tempfile::tempdir().unwrap();
    write_pair(dir.path(), 1);
    let (sentinel, trigger) = manual_sentinel(dir.path(), &ErrorLog::default());

    sentinel.stop().await.unwrap();
    assert_eq!(sentinel.state(), LifecycleState::Closed);
    assert!(sentinel.current().is_none());
    assert!(trigger.is_closed());

    assert!(matches!(sentinel.start(), Err(SentinelError::Closed)));
    assert!(matches!(
        sentinel.wait_for_first_load().await,
        Err(SentinelError::Closed)
    ));
    sentinel.stop().await.unwrap();
}

#[tokio::test]
async fn test_stop_before_any_successful_load() {
    let dir = tempfile::tempdir().unwrap();
    write_pair(dir.path(), 1);
    std::fs::write(dir.path().join(CERT), "").unwrap();
    let errors = ErrorLog::default();
    let (sentinel, _trigger) = manual_sentinel(dir.path(), &errors);

    let err = sentinel.wait_for_first_load().await.unwrap_err();
    assert!(err.to_string().contains("no certificate data found"), "{err}");

    sentinel.stop().await.unwrap();
    assert!(sentinel.current().is_none());
    assert_eq!(sentinel.state(), LifecycleState::Closed);
    assert_eq!(errors.len(), 1);
}

/// A source that panics while being released, so every teardown is visible
/// as one `ShutdownFailed` metric.
struct PanicOnRelease;

impl WatchSource for PanicOnRelease {
    fn attach(self: Box<Self>, events: EventSender) -> Result<SourceFuture, SetupError> {
        Ok(Box::pin(async move {
            events.cancelled().await;
            panic!("failed to release watch");
        }))
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_stops_share_one_teardown() {
    let dir = tempfile::tempdir().unwrap();
    write_pair(dir.path(), 1);
    let metrics = Arc::new(TestMetrics::default());
    let sentinel = CertificateSentinel::builder(KeyPairLoader::new(
        dir.path().join(CERT),
        dir.path().join(KEY),
    ))
    .source(PanicOnRelease)
    .metrics(metrics.clone())
    .build()
    .unwrap();
    sentinel.wait_for_first_load().await.unwrap();

    let stops: Vec<_> = (0..8)
        .map(|_| {
            let sentinel = sentinel.clone();
            tokio::spawn(async move { sentinel.stop().await })
        })
        .collect();

    for stop in stops {
        let err = stop.await.unwrap().unwrap_err();
        assert!(
            matches!(
                err,
                SentinelError::Shutdown(ShutdownError::Join { task: "source", .. })
            ),
            "{err:?}"
        );
    }
    assert!(matches!(sentinel.stop().await, Err(SentinelError::Shutdown(_))));

    assert_eq!(metrics.errors(MetricsErrorKind::ShutdownFailed), 1);
    assert_eq!(sentinel.state(), LifecycleState::Closed);
}

#[tokio::test]
async fn test_no_mutation_after_stop() {
    let dir = tempfile::tempdir().unwrap();
    write_pair(dir.path(), 1);
    let (sentinel, trigger) = manual_sentinel(dir.path(), &ErrorLog::default());
    sentinel.wait_for_first_load().await.unwrap();

    sentinel.stop().await.unwrap();

    write_pair(dir.path(), 2);
    assert!(!trigger.reload());
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert_eq!(sentinel.version(), 1);
    assert_eq!(serial(&sentinel).as_deref(), Some("1"));
    assert!(matches!(
        sentinel.updated().changed().await,
        Err(SentinelError::Closed)
    ));
}

#[tokio::test]
async fn test_source_error_ends_loop() {
    let dir = tempfile::tempdir().unwrap();
    write_pair(dir.path(), 1);
    let errors = ErrorLog::default();
    let (sentinel, trigger) = manual_sentinel(dir.path(), &errors);
    sentinel.wait_for_first_load().await.unwrap();

    let cause = std::io::Error::new(std::io::ErrorKind::Other, "backend gone");
    assert!(trigger.fail(SourceError::custom(cause)));

    let err = sentinel.run().await.unwrap_err();
    assert!(matches!(err, SentinelError::Source(SourceError::Custom(_))));
    assert_eq!(sentinel.state(), LifecycleState::Stopped);
    assert!(matches!(
        errors.snapshot().last(),
        Some(SentinelError::Source(_))
    ));

    // Last good value is still served.
    assert_eq!(serial(&sentinel).as_deref(), Some("1"));

    sentinel.stop().await.unwrap();
    assert_eq!(sentinel.state(), LifecycleState::Closed);
}

#[tokio::test]
async fn test_source_closed_ends_run() {
    let dir = tempfile::tempdir().unwrap();
    write_pair(dir.path(), 1);
    let (sentinel, trigger) = manual_sentinel(dir.path(), &ErrorLog::default());

    let run = tokio::spawn({
        let sentinel = sentinel.clone();
        async move { sentinel.run().await }
    });
    sentinel.wait_for_first_load().await.unwrap();
    assert!(trigger.close());

    assert!(run.await.unwrap().is_ok());
    assert_eq!(sentinel.state(), LifecycleState::Stopped);
    sentinel.stop().await.unwrap();
}

#[tokio::test]
async fn test_run_returns_when_stopped() {
    let dir = tempfile::tempdir().unwrap();
    write_pair(dir.path(), 1);
    let (sentinel, _trigger) = manual_sentinel(dir.path(), &ErrorLog::default());

    let run = tokio::spawn({
        let sentinel = sentinel.clone();
        async move { sentinel.run().await }
    });
    sentinel.wait_for_first_load().await.unwrap();
    sentinel.stop().await.unwrap();

    assert!(run.await.unwrap().is_ok());
}

#[tokio::test]
async fn test_stop_spawned_from_error_callback() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join(CERT), "").unwrap();
    std::fs::write(dir.path().join(KEY), "").unwrap();

    let (source, _trigger) = ManualSource::new();
    let slot: Arc<std::sync::OnceLock<CertificateSentinel>> = Arc::default();
    let sentinel = CertificateSentinel::builder(KeyPairLoader::new(
        dir.path().join(CERT),
        dir.path().join(KEY),
    ))
    .source(source)
    .on_error({
        let slot = Arc::clone(&slot);
        move |_| {
            if let Some(sentinel) = slot.get() {
                let sentinel = sentinel.clone();
                tokio::spawn(async move { sentinel.stop().await });
            }
        }
    })
    .build()
    .unwrap();
    let _ = slot.set(sentinel.clone());

    sentinel.start().unwrap();
    assert!(eventually(WITHIN, || sentinel.state() == LifecycleState::Closed).await);
    sentinel.stop().await.unwrap();
}

#[tokio::test]
async fn test_panicking_callback_is_contained() {
    let dir = tempfile::tempdir().unwrap();
    write_pair(dir.path(), 1);
    std::fs::write(dir.path().join(CERT), "").unwrap();

    let (source, trigger) = ManualSource::new();
    let metrics = Arc::new(TestMetrics::default());
    let sentinel = CertificateSentinel::builder(KeyPairLoader::new(
        dir.path().join(CERT),
        dir.path().join(KEY),
    ))
    .source(source)
    .metrics(metrics.clone())
    .on_error(|e| panic!("callback failure on {e}"))
    .build()
    .unwrap();

    assert!(matches!(
        sentinel.wait_for_first_load().await,
        Err(SentinelError::Load(_))
    ));
    assert_eq!(metrics.errors(MetricsErrorKind::CallbackPanicked), 1);
    assert_eq!(metrics.errors(MetricsErrorKind::LoadParse), 1);

    write_pair(dir.path(), 2);
    assert!(trigger.reload());
    assert!(eventually(WITHIN, || serial(&sentinel).as_deref() == Some("2")).await);
    assert_eq!(metrics.reloads.load(Ordering::SeqCst), 1);

    // A later success resolves the first-load wait.
    sentinel.wait_for_first_load().await.unwrap();
    sentinel.stop().await.unwrap();
}

#[test]
fn test_start_outside_runtime() {
    let dir = tempfile::tempdir().unwrap();
    write_pair(dir.path(), 1);
    let (sentinel, _trigger) = manual_sentinel(dir.path(), &ErrorLog::default());

    assert!(matches!(
        sentinel.start(),
        Err(SentinelError::Setup(SetupError::NoRuntime))
    ));
    assert_eq!(sentinel.state(), LifecycleState::Idle);
}

struct SlowLoader {
    inner: KeyPairLoader,
    delay: Duration,
}

impl MaterialLoader for SlowLoader {
    type Material = LoadedCertificate;

    fn load(&self) -> Result<LoadedCertificate, LoadError> {
        std::thread::sleep(self.delay);
        self.inner.load()
    }

    fn watch_path(&self) -> &Path {
        self.inner.watch_path()
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_first_load_timeout() {
    let dir = tempfile::tempdir().unwrap();
    let (cert, key) = write_pair(dir.path(), 1);
    let (source, _trigger) = ManualSource::new();

    let sentinel = certinel::Sentinel::builder(SlowLoader {
        inner: KeyPairLoader::new(cert, key),
        delay: Duration::from_millis(300),
    })
    .source(source)
    .build()
    .unwrap();

    let err = sentinel
        .wait_for_first_load_timeout(Duration::from_millis(10))
        .await
        .unwrap_err();
    assert!(matches!(err, SentinelError::FirstLoadTimeout(_)));

    sentinel
        .wait_for_first_load_timeout(WITHIN)
        .await
        .unwrap();
    sentinel.stop().await.unwrap();
}

#[tokio::test]
async fn test_observation_reports_leaf_validity() {
    let dir = tempfile::tempdir().unwrap();
    let (cert, _) = write_pair(dir.path(), 7);
    let (sentinel, _trigger) = manual_sentinel(dir.path(), &ErrorLog::default());
    assert!(sentinel.observation().is_none());

    sentinel.wait_for_first_load().await.unwrap();
    let obs = sentinel.observation().unwrap();

    assert_eq!(obs.path(), cert.as_path());
    assert_eq!(obs.serial_number(), "7");
    assert!(obs.not_before() < obs.not_after());
    assert!(sentinel.server_certificate().is_some());
    assert!(!sentinel.client_certificate().is_empty());

    sentinel.stop().await.unwrap();
}

#[tokio::test]
async fn test_ca_sentinel_serves_root_store() {
    let dir = tempfile::tempdir().unwrap();
    let (first, _) = common::key_pair_pem(1);
    let (second, _) = common::key_pair_pem(2);
    let ca = dir.path().join("ca.pem");
    std::fs::write(&ca, first).unwrap();

    let (source, trigger) = ManualSource::new();
    let sentinel = CaSentinel::builder(CaBundleLoader::new(&ca))
        .source(source)
        .build()
        .unwrap();
    assert!(sentinel.root_store().is_none());

    sentinel.wait_for_first_load().await.unwrap();
    assert_eq!(sentinel.root_store().unwrap().len(), 1);
    assert!(sentinel.observation().is_none());

    let bundle = format!("{}{}", std::fs::read_to_string(&ca).unwrap(), second);
    std::fs::write(&ca, bundle).unwrap();
    assert!(trigger.reload());
    assert!(eventually(WITHIN, || sentinel.root_store().map(|r| r.len()) == Some(2)).await);

    sentinel.stop().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_abandoned_stop_is_completed_by_next_stop() {
    let dir = tempfile::tempdir().unwrap();
    let (cert, key) = write_pair(dir.path(), 1);
    let (source, _trigger) = ManualSource::new();

    let sentinel = certinel::Sentinel::builder(SlowLoader {
        inner: KeyPairLoader::new(cert, key),
        delay: Duration::from_millis(400),
    })
    .source(source)
    .build()
    .unwrap();
    sentinel.start().unwrap();

    // The control loop is busy loading; give up on the first stop.
    let first = tokio::time::timeout(Duration::from_millis(20), sentinel.stop()).await;
    assert!(first.is_err());

    sentinel.stop().await.unwrap();
    assert_eq!(sentinel.state(), LifecycleState::Closed);

    // Nothing is left running to mutate the cell.
    let version = sentinel.version();
    tokio::time::sleep(Duration::from_millis(800)).await;
    assert_eq!(sentinel.version(), version);
}
