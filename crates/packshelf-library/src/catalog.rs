//! Library registration and catalog upsert

use crate::scanner::PackageScanner;
use crate::source::{PackageIdentifier, TitleIndexHandle, Watcher};
use crate::store::{CatalogStore, EntryUpsert, Library};
use crate::{COMMIT_INTERVAL, LibraryError, now_secs};
use packshelf_config::Config;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// A library named either by database id or by root path
#[derive(Debug, Clone, Copy)]
pub enum LibraryRef<'a> {
    Id(i64),
    Path(&'a Path),
}

impl From<i64> for LibraryRef<'_> {
    fn from(id: i64) -> Self {
        LibraryRef::Id(id)
    }
}

impl<'a> From<&'a Path> for LibraryRef<'a> {
    fn from(path: &'a Path) -> Self {
        LibraryRef::Path(path)
    }
}

/// Result of scanning a library directory
#[derive(Debug, Default)]
pub struct ScanReport {
    pub files_found: usize,
    pub files_added: usize,
}

/// Coordinates the catalog store with the external parser, metadata
/// index and scanner. One service instance per worker; concurrent
/// workers share the metadata index through its handle.
pub struct CatalogService {
    pub(crate) store: CatalogStore,
    pub(crate) identifier: Arc<dyn PackageIdentifier + Send + Sync>,
    pub(crate) titledb: Arc<TitleIndexHandle>,
    pub(crate) scanner: PackageScanner,
    pub(crate) rescan_stale: Duration,
    pub(crate) cache_file: PathBuf,
}

impl CatalogService {
    /// Create a service with default scanner and cache settings
    pub fn new(
        store: CatalogStore,
        identifier: Arc<dyn PackageIdentifier + Send + Sync>,
        titledb: Arc<TitleIndexHandle>,
    ) -> Self {
        Self::with_config(store, identifier, titledb, &Config::default())
    }

    /// Create a service configured from a [`Config`]
    pub fn with_config(
        store: CatalogStore,
        identifier: Arc<dyn PackageIdentifier + Send + Sync>,
        titledb: Arc<TitleIndexHandle>,
        config: &Config,
    ) -> Self {
        Self {
            store,
            identifier,
            titledb,
            scanner: PackageScanner::new(),
            rescan_stale: config.rescan_stale(),
            cache_file: config.cache.file.clone(),
        }
    }

    pub fn store(&self) -> &CatalogStore {
        &self.store
    }

    pub(crate) fn resolve(&self, library: LibraryRef<'_>) -> Result<Library, LibraryError> {
        let found = match library {
            LibraryRef::Id(id) => self.store.library_by_id(id)?,
            LibraryRef::Path(path) => self.store.library_by_path(&path.to_string_lossy())?,
        };
        found.ok_or_else(|| match library {
            LibraryRef::Id(id) => LibraryError::LibraryNotFound(PathBuf::from(format!("#{id}"))),
            LibraryRef::Path(path) => LibraryError::LibraryNotFound(path.to_path_buf()),
        })
    }

    /// Register a library and start watching it
    pub fn add_library(&self, watcher: &dyn Watcher, path: &Path) -> Result<i64, LibraryError> {
        let id = self.store.add_library(&path.to_string_lossy())?;
        watcher.watch(path);
        info!("Added library: {}", path.display());
        Ok(id)
    }

    /// Remove a library with full cleanup: stop watching first so the
    /// deletions below do not feed back in as filesystem events, then
    /// detach its entries from the components they back, drop titles
    /// left without owned components, and finally delete the library
    /// row (its entries cascade).
    pub fn remove_library(
        &self,
        watcher: &dyn Watcher,
        library: LibraryRef<'_>,
    ) -> Result<(), LibraryError> {
        let lib = match self.resolve(library) {
            Ok(lib) => lib,
            Err(LibraryError::LibraryNotFound(path)) => {
                warn!("Library {} not registered, nothing to remove", path.display());
                return Ok(());
            }
            Err(e) => return Err(e),
        };

        watcher.unwatch(Path::new(&lib.path));

        self.store.begin()?;
        let mut disowned = 0;
        for file_id in self.store.library_file_ids(lib.id)? {
            disowned += self.store.detach_entry(file_id)?;
        }
        let titles_removed = self.store.delete_unowned_titles()?;
        self.store.delete_library(lib.id)?;
        self.store.commit()?;

        info!("Removed library: {}", lib.path);
        if disowned > 0 {
            info!("Released ownership of {disowned} components backed by this library");
        }
        if titles_removed > 0 {
            info!("Removed {titles_removed} titles with no owned components");
        }
        Ok(())
    }

    /// Reconcile the registered libraries with the configured paths:
    /// drop libraries whose directory vanished, register the rest and
    /// make sure each is being watched.
    pub fn init_libraries(
        &self,
        watcher: &dyn Watcher,
        paths: &[PathBuf],
    ) -> Result<(), LibraryError> {
        for library in self.store.libraries()? {
            if !Path::new(&library.path).exists() {
                warn!(
                    "Library {} no longer exists, deleting from database",
                    library.path
                );
                self.remove_library(watcher, LibraryRef::Id(library.id))?;
            }
        }

        for path in paths {
            if self.store.library_by_path(&path.to_string_lossy())?.is_none() {
                self.add_library(watcher, path)?;
            } else {
                watcher.watch(path);
            }
        }
        Ok(())
    }

    /// Walk a library directory and catalog any file not yet known,
    /// stamping the library's scan time.
    pub fn scan_library(&self, library: LibraryRef<'_>) -> Result<ScanReport, LibraryError> {
        let lib = self.resolve(library)?;
        info!("Scanning library path {} ...", lib.path);
        if !Path::new(&lib.path).is_dir() {
            warn!("Library path {} does not exist", lib.path);
            return Ok(ScanReport::default());
        }

        let found = self.scanner.scan(Path::new(&lib.path))?;
        let known = self.store.library_file_paths(lib.id)?;
        let fresh: Vec<PathBuf> = found
            .iter()
            .filter(|p| !known.contains(p.to_string_lossy().as_ref()))
            .cloned()
            .collect();

        self.upsert_files(LibraryRef::Id(lib.id), &fresh)?;
        self.store.set_library_scan_time(lib.id, now_secs())?;

        Ok(ScanReport {
            files_found: found.len(),
            files_added: fresh.len(),
        })
    }

    /// Create or refresh one catalog entry per path. A file the parser
    /// cannot introspect is still recorded, marked unidentified, so no
    /// file silently disappears from the catalog.
    pub fn upsert_files(
        &self,
        library: LibraryRef<'_>,
        paths: &[PathBuf],
    ) -> Result<usize, LibraryError> {
        let lib = self.resolve(library)?;
        let total = paths.len();

        self.store.begin()?;
        for (n, filepath) in paths.iter().enumerate() {
            let path_str = filepath.to_string_lossy().into_owned();
            let file_rel = path_str
                .strip_prefix(lib.path.as_str())
                .unwrap_or(&path_str);
            info!("Collecting file info ({}/{}): {}", n + 1, total, file_rel);

            // Direct filesystem fallbacks, used when the parser has nothing
            let filename = filepath
                .file_name()
                .map(|f| f.to_string_lossy().into_owned());
            let folder = filepath
                .parent()
                .map(|p| p.to_string_lossy().into_owned());
            let extension = filepath
                .extension()
                .map(|e| e.to_string_lossy().to_lowercase());
            let size = fs::metadata(filepath).ok().map(|m| m.len() as i64);

            let file_info = self.identifier.file_info(filepath);

            let (identified, identification_type, identification_error) = match &file_info {
                Some(_) => (Some(true), Some("file_info".to_string()), None),
                None => (
                    Some(false),
                    Some("unidentified".to_string()),
                    Some("Failed to parse file info".to_string()),
                ),
            };
            let info = file_info.unwrap_or_default();
            let folder = info.folder.or(folder);
            let filename = info.filename.or(filename);
            let extension = info.extension.or(extension);
            let size = info.size.or(size);

            match self.store.entry_by_path(&path_str)? {
                Some(mut existing) => {
                    existing.folder = folder;
                    existing.filename = filename;
                    existing.extension = extension;
                    existing.size = size;
                    existing.identified = identified;
                    existing.identification_type = identification_type;
                    existing.identification_error = identification_error;
                    existing.identification_attempts += 1;
                    existing.last_attempt = Some(now_secs());
                    self.store.update_entry(&existing)?;
                }
                None => {
                    self.store.insert_entry(
                        &EntryUpsert {
                            filepath: path_str,
                            library_id: lib.id,
                            folder,
                            filename,
                            extension,
                            size,
                            identified,
                            identification_type,
                            identification_error,
                        },
                        now_secs(),
                    )?;
                }
            }

            // Commit every 100 files to keep transactions bounded
            if (n + 1) % COMMIT_INTERVAL == 0 {
                self.store.checkpoint()?;
            }
        }
        self.store.commit()?;

        Ok(total)
    }
}
