//! Boundaries to the external identification module
//!
//! The binary-format parser, the bulk metadata index and the directory
//! watch mechanism live outside this crate; they are consumed through
//! the traits below so the reconciliation core never grows a
//! compile-time dependency on them.

use crate::store::ComponentKind;
use serde::{Deserialize, Serialize};
use std::ops::Deref;
use std::path::Path;
use std::sync::{Arc, Mutex};

/// Best-effort file metadata from the parser; `None` fields fall back
/// to direct filesystem inspection.
#[derive(Debug, Clone, Default)]
pub struct FileInfo {
    pub folder: Option<String>,
    pub filename: Option<String>,
    pub extension: Option<String>,
    pub size: Option<i64>,
}

/// One content record found inside a package file
#[derive(Debug, Clone)]
pub struct ContentInfo {
    pub title_id: String,
    pub component_id: String,
    pub version: String,
    pub kind: ComponentKind,
}

/// Outcome of parsing a package file
#[derive(Debug, Clone)]
pub struct Identification {
    /// Parser-reported format tag, e.g. "cnmt"
    pub tag: String,
    pub success: bool,
    pub contents: Vec<ContentInfo>,
    pub error: Option<String>,
}

/// The external binary-format parser
pub trait PackageIdentifier {
    /// Best-effort metadata; `None` means "catalog the file as unidentified"
    fn file_info(&self, path: &Path) -> Option<FileInfo>;

    /// Inspect a file and extract its content records
    fn identify(&self, path: &Path) -> Identification;
}

/// Per-title metadata from the external index
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GameInfo {
    pub name: Option<String>,
    pub publisher: Option<String>,
    pub region: Option<String>,
    pub description: Option<String>,
    pub content_type: Option<String>,
    pub icon_url: Option<String>,
    pub banner_url: Option<String>,
    pub release_date: Option<String>,
}

/// A published version of a title known to the external index
#[derive(Debug, Clone)]
pub struct VersionInfo {
    pub version: i64,
    pub release_date: Option<String>,
}

/// The external bulk metadata index. `load`/`unload` are the physical
/// resource lifecycle; call sites go through [`TitleIndexHandle`] so
/// concurrent runs share one load.
pub trait TitleIndex {
    fn load(&self);
    fn unload(&self);

    /// Whether the index knows this title id
    fn has_title(&self, title_id: &str) -> bool;

    /// Display metadata for a component id
    fn game_info(&self, component_id: &str) -> Option<GameInfo>;

    /// All published update versions of a title
    fn title_versions(&self, title_id: &str) -> Vec<VersionInfo>;

    /// All DLC component ids published for a title
    fn title_dlc_ids(&self, title_id: &str) -> Vec<String>;

    /// All published versions of a single component
    fn component_versions(&self, component_id: &str) -> Vec<i64>;
}

/// Reference-counted access to the bulk metadata index: the physical
/// load happens when the count goes 0→1 and the unload when it returns
/// to zero, so re-entrant and concurrent runs share one load.
pub struct TitleIndexHandle {
    index: Arc<dyn TitleIndex + Send + Sync>,
    refs: Mutex<u32>,
}

impl TitleIndexHandle {
    pub fn new(index: Arc<dyn TitleIndex + Send + Sync>) -> Self {
        Self {
            index,
            refs: Mutex::new(0),
        }
    }

    /// Acquire a lease on the loaded index; dropped leases release it
    pub fn acquire(&self) -> TitleIndexLease<'_> {
        let mut refs = self.refs.lock().unwrap();
        if *refs == 0 {
            self.index.load();
        }
        *refs += 1;
        TitleIndexLease { handle: self }
    }

    #[cfg(test)]
    fn ref_count(&self) -> u32 {
        *self.refs.lock().unwrap()
    }
}

/// RAII lease over the loaded index
pub struct TitleIndexLease<'a> {
    handle: &'a TitleIndexHandle,
}

impl Deref for TitleIndexLease<'_> {
    type Target = dyn TitleIndex + Send + Sync;

    fn deref(&self) -> &Self::Target {
        &*self.handle.index
    }
}

impl Drop for TitleIndexLease<'_> {
    fn drop(&mut self) {
        let mut refs = self.handle.refs.lock().unwrap();
        *refs -= 1;
        if *refs == 0 {
            self.handle.index.unload();
        }
    }
}

/// External directory watch registration
pub trait Watcher {
    fn watch(&self, path: &Path);
    fn unwatch(&self, path: &Path);
}

/// Watcher for callers without a watch mechanism
pub struct NullWatcher;

impl Watcher for NullWatcher {
    fn watch(&self, _path: &Path) {}
    fn unwatch(&self, _path: &Path) {}
}
