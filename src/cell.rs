//! Single-slot, lock-free holder of the current TLS material.

use arc_swap::ArcSwapOption;
use std::fmt::Debug;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Holds the most recently published value, or nothing before the first one.
///
/// Reads are wait-free and never observe a partially published value: a store
/// swaps a single pointer. Any number of readers may run concurrently with
/// stores. The version counts successful stores, starting at 0 for the empty
/// cell.
pub struct CertificateCell<T> {
    slot: ArcSwapOption<T>,
    version: AtomicU64,
}

impl<T> CertificateCell<T> {
    /// Creates an empty cell.
    pub fn new() -> Self {
        Self {
            slot: ArcSwapOption::empty(),
            version: AtomicU64::new(0),
        }
    }

    /// Returns the current value, or `None` if nothing was stored yet.
    pub fn load(&self) -> Option<Arc<T>> {
        self.slot.load_full()
    }

    /// Replaces the current value and returns the new version.
    pub fn store(&self, value: Arc<T>) -> u64 {
        self.slot.store(Some(value));
        self.version.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Returns the number of stores performed so far.
    pub fn version(&self) -> u64 {
        self.version.load(Ordering::Acquire)
    }

    /// Returns `true` if nothing was stored yet.
    pub fn is_empty(&self) -> bool {
        self.slot.load().is_none()
    }
}

impl<T> Default for CertificateCell<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Debug for CertificateCell<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CertificateCell")
            .field("empty", &self.is_empty())
            .field("version", &self.version())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_empty_until_first_store() {
        let cell: CertificateCell<u64> = CertificateCell::new();
        assert!(cell.is_empty());
        assert!(cell.load().is_none());
        assert_eq!(cell.version(), 0);

        assert_eq!(cell.store(Arc::new(7)), 1);
        assert!(!cell.is_empty());
        assert_eq!(*cell.load().unwrap(), 7);
    }

    #[test]
    fn test_load_returns_latest_store() {
        let cell = CertificateCell::new();
        for n in 1..=5u64 {
            cell.store(Arc::new(n));
            assert_eq!(*cell.load().unwrap(), n);
            assert_eq!(cell.version(), n);
        }
    }

    #[test]
    fn test_reader_keeps_superseded_value_alive() {
        let cell = CertificateCell::new();
        cell.store(Arc::new(String::from("first")));
        let held = cell.load().unwrap();

        cell.store(Arc::new(String::from("second")));

        assert_eq!(held.as_str(), "first");
        assert_eq!(cell.load().unwrap().as_str(), "second");
    }

    #[test]
    fn test_concurrent_readers_and_writers() {
        let cell = Arc::new(CertificateCell::new());
        cell.store(Arc::new((0u64, 0u64)));

        let writers: Vec<_> = (0..2)
            .map(|_| {
                let cell = Arc::clone(&cell);
                thread::spawn(move || {
                    for n in 1..=1_000u64 {
                        cell.store(Arc::new((n, n * 2)));
                    }
                })
            })
            .collect();

        let readers: Vec<_> = (0..4)
            .map(|_| {
                let cell = Arc::clone(&cell);
                thread::spawn(move || {
                    for _ in 0..1_000 {
                        let value = cell.load().unwrap();
                        // Never torn: both halves come from the same store.
                        assert_eq!(value.1, value.0 * 2);
                    }
                })
            })
            .collect();

        for handle in writers.into_iter().chain(readers) {
            handle.join().unwrap();
        }
        assert_eq!(cell.version(), 2_001);
    }
}
