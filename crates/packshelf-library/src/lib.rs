//! Package library management for Packshelf
//!
//! Catalogs package files discovered in content directories, identifies
//! what each file contains (title, component, version), reconciles
//! per-title ownership and renders a cached snapshot of the library.
//! SQLite storage; the binary-format parser and the bulk metadata index
//! are consumed through traits.

mod catalog;
mod identify;
mod ownership;
mod overrides;
mod scanner;
mod snapshot;
mod source;
mod store;

pub use catalog::{CatalogService, LibraryRef, ScanReport};
pub use identify::IdentifyReport;
pub use overrides::{DisplayInfo, OverrideQuery, apply_override, find_override, merge_with_override};
pub use ownership::{LibraryStatus, TitleFlags, VersionStatus, derive_flags};
pub use scanner::{PackageScanner, ScanConfig};
pub use snapshot::{SnapshotDocument, SnapshotEntry, compute_catalog_hash};
pub use source::{
    ContentInfo, FileInfo, GameInfo, Identification, NullWatcher, PackageIdentifier, TitleIndex,
    TitleIndexHandle, TitleIndexLease, VersionInfo, Watcher,
};
pub use store::{
    CatalogEntry, CatalogStore, Component, ComponentKind, EntryUpsert, Library, OverrideRow, Title,
};

use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;

/// Rows written between transaction checkpoints
pub const COMMIT_INTERVAL: usize = 100;

#[derive(Debug, Error)]
pub enum LibraryError {
    #[error("Library not found: {0}")]
    LibraryNotFound(PathBuf),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Current time as unix seconds
pub(crate) fn now_secs() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

/// Versions are stored as strings but ordered numerically.
/// Non-numeric versions sort first rather than aborting anything.
pub(crate) fn version_num(version: &str) -> i64 {
    version.trim().parse().unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_num() {
        assert_eq!(version_num("65536"), 65536);
        assert_eq!(version_num(" 3 "), 3);
        assert_eq!(version_num("not-a-number"), 0);
        assert_eq!(version_num(""), 0);
    }

    #[test]
    fn test_now_secs_monotonic_enough() {
        assert!(now_secs() > 1_500_000_000);
    }
}
