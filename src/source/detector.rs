//! Decides which directory events amount to a change of the watched file.
//!
//! Two update patterns are recognized:
//!
//! 1. In-place: the watched file itself is written or (re)created.
//! 2. Atomic symlink swap: the watched path is a symlink (directly, or via a
//!    symlinked directory) whose target is replaced by renaming a new symlink
//!    over the old one. The watched name may not appear in any event at all,
//!    so the fully resolved path is compared with the one seen last time.

use crate::error::{SetupError, SourceError};
use notify::event::{AccessKind, AccessMode, ModifyKind, RenameMode};
use notify::EventKind;
use std::ffi::{OsStr, OsString};
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

/// Normalized kind of a directory event.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum FsEventKind {
    /// A name appeared in the directory (including as a rename destination).
    Created,
    /// File contents were written.
    Written,
    /// A name was removed from the directory.
    Removed,
    /// A name was renamed away.
    Renamed,
    /// Anything else (metadata changes, reads).
    Other,
}

/// A directory event affecting a single path.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct FsEvent {
    /// The affected path.
    pub path: PathBuf,
    /// What happened to it.
    pub kind: FsEventKind,
}

impl FsEvent {
    /// Creates an event.
    pub fn new(path: impl Into<PathBuf>, kind: FsEventKind) -> Self {
        Self {
            path: path.into(),
            kind,
        }
    }

    /// Splits a notification into one event per affected path.
    pub(crate) fn from_notify(event: &notify::Event) -> Vec<FsEvent> {
        let uniform = |kind| {
            event
                .paths
                .iter()
                .map(|p| FsEvent::new(p.clone(), kind))
                .collect()
        };

        match event.kind {
            EventKind::Create(_) => uniform(FsEventKind::Created),
            EventKind::Remove(_) => uniform(FsEventKind::Removed),
            EventKind::Modify(ModifyKind::Name(RenameMode::To)) => uniform(FsEventKind::Created),
            EventKind::Modify(ModifyKind::Name(RenameMode::Both)) => event
                .paths
                .iter()
                .enumerate()
                .map(|(i, p)| {
                    let kind = if i == 0 {
                        FsEventKind::Renamed
                    } else {
                        FsEventKind::Created
                    };
                    FsEvent::new(p.clone(), kind)
                })
                .collect(),
            EventKind::Modify(ModifyKind::Name(_)) => uniform(FsEventKind::Renamed),
            EventKind::Modify(ModifyKind::Metadata(_)) => uniform(FsEventKind::Other),
            EventKind::Modify(_) => uniform(FsEventKind::Written),
            EventKind::Access(AccessKind::Close(AccessMode::Write)) => {
                uniform(FsEventKind::Written)
            }
            _ => uniform(FsEventKind::Other),
        }
    }
}

/// The watched certificate path and the symlink resolution seen last.
#[derive(Debug, Clone)]
pub struct WatchTarget {
    path: PathBuf,
    file_name: OsString,
    dir: PathBuf,
    last_resolved: Option<PathBuf>,
}

impl WatchTarget {
    /// Creates a target for `path`.
    ///
    /// # Errors
    ///
    /// Returns [`SetupError::InvalidPath`] if the path has no file name.
    pub fn new(path: impl Into<PathBuf>) -> Result<Self, SetupError> {
        let path = clean(&path.into());
        let invalid = || SetupError::InvalidPath { path: path.clone() };

        let file_name = path.file_name().ok_or_else(invalid)?.to_os_string();
        let dir = match path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            Some(_) => PathBuf::from("."),
            None => return Err(invalid()),
        };

        Ok(Self {
            path,
            file_name,
            dir,
            last_resolved: None,
        })
    }

    /// Returns the watched path, lexically normalized.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns the directory to watch.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Returns the final component of the watched path.
    pub fn file_name(&self) -> &OsStr {
        &self.file_name
    }

    /// Returns the resolution recorded by the last processed event.
    pub fn last_resolved(&self) -> Option<&Path> {
        self.last_resolved.as_deref()
    }

    /// Resolves the full symlink chain of the watched path.
    ///
    /// # Errors
    ///
    /// Returns [`SourceError::Resolve`] if the path or any link target is missing.
    pub fn resolve(&self) -> Result<PathBuf, SourceError> {
        std::fs::canonicalize(&self.path).map_err(|e| SourceError::Resolve {
            path: self.path.clone(),
            source: Arc::new(e),
        })
    }

    /// Records the current resolution before any event is processed.
    ///
    /// A path that cannot be resolved yet is recorded as unresolved, so the
    /// first successful resolution counts as a change.
    pub fn prime(&mut self) {
        self.last_resolved = self.resolve().ok();
    }

    /// Returns `true` if the event names the watched file and created or
    /// wrote it.
    pub fn creates_or_writes(&self, event: &FsEvent) -> bool {
        matches!(event.kind, FsEventKind::Created | FsEventKind::Written)
            && event.path.file_name() == Some(self.file_name.as_os_str())
    }

    /// Processes one notification given the current resolution of the
    /// watched path, and returns whether a reload is due.
    ///
    /// The recorded resolution is updated whether or not a reload is due.
    pub fn observe(&mut self, events: &[FsEvent], current: &Path) -> bool {
        let written = events.iter().any(|e| self.creates_or_writes(e));
        let swapped = !current.as_os_str().is_empty()
            && self.last_resolved.as_deref() != Some(current);

        self.last_resolved = Some(current.to_path_buf());
        written || swapped
    }
}

// Lexical normalization: drops `.` components and redundant separators.
fn clean(path: &Path) -> PathBuf {
    path.components()
        .filter(|c| !matches!(c, Component::CurDir))
        .collect()
}
