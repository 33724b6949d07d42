//! Package file scanning

use crate::LibraryError;
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::warn;

/// Package scanner configuration
#[derive(Debug, Clone)]
pub struct ScanConfig {
    /// File extensions to pick up
    pub extensions: HashSet<String>,

    /// Scan subdirectories
    pub recursive: bool,

    /// Skip hidden files/directories
    pub skip_hidden: bool,
}

impl Default for ScanConfig {
    fn default() -> Self {
        let mut extensions = HashSet::new();
        // Common package extensions
        for ext in &["nsp", "nsz", "xci", "xcz"] {
            extensions.insert(ext.to_string());
        }

        Self {
            extensions,
            recursive: true,
            skip_hidden: true,
        }
    }
}

/// Package scanner
pub struct PackageScanner {
    config: ScanConfig,
}

impl Default for PackageScanner {
    fn default() -> Self {
        Self::new()
    }
}

impl PackageScanner {
    /// Create a new scanner with default config
    pub fn new() -> Self {
        Self {
            config: ScanConfig::default(),
        }
    }

    /// Create with custom config
    pub fn with_config(config: ScanConfig) -> Self {
        Self { config }
    }

    /// Scan a directory for package files
    pub fn scan(&self, path: &Path) -> Result<Vec<PathBuf>, LibraryError> {
        let mut files = Vec::new();
        self.scan_dir(path, &mut files)?;
        files.sort();
        Ok(files)
    }

    /// Recursively scan a directory. Symlinks are never followed.
    fn scan_dir(&self, path: &Path, files: &mut Vec<PathBuf>) -> Result<(), LibraryError> {
        if !path.exists() || !path.is_dir() {
            return Ok(());
        }

        for entry in fs::read_dir(path)? {
            let entry = entry?;
            let entry_path = entry.path();
            let name = entry.file_name().to_string_lossy().to_string();

            // Skip hidden files/directories
            if self.config.skip_hidden && name.starts_with('.') {
                continue;
            }

            if entry_path.is_symlink() {
                continue;
            }

            if entry_path.is_dir() {
                if self.config.recursive {
                    self.scan_dir(&entry_path, files)?;
                }
            } else if entry_path.is_file() {
                let matches = entry_path
                    .extension()
                    .and_then(|e| e.to_str())
                    .is_some_and(|e| self.config.extensions.contains(&e.to_lowercase()));
                if !matches {
                    continue;
                }
                // unreadable files are skipped, not fatal
                if fs::metadata(&entry_path).is_err() {
                    warn!("Unable to read file: {}", entry_path.display());
                    continue;
                }
                files.push(entry_path);
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;
    use tempfile::TempDir;

    fn touch(dir: &Path, name: &str) -> PathBuf {
        let path = dir.join(name);
        File::create(&path).unwrap();
        path
    }

    #[test]
    fn test_scan_config_default() {
        let config = ScanConfig::default();
        assert!(config.extensions.contains("nsp"));
        assert!(config.extensions.contains("xci"));
        assert!(config.recursive);
        assert!(config.skip_hidden);
    }

    #[test]
    fn test_scan_filters_extensions() {
        let dir = TempDir::new().unwrap();
        let keep = touch(dir.path(), "game.nsp");
        touch(dir.path(), "notes.txt");
        touch(dir.path(), "image.jpg");

        let found = PackageScanner::new().scan(dir.path()).unwrap();
        assert_eq!(found, vec![keep]);
    }

    #[test]
    fn test_scan_recurses_and_skips_hidden() {
        let dir = TempDir::new().unwrap();
        fs::create_dir(dir.path().join("sub")).unwrap();
        fs::create_dir(dir.path().join(".hidden")).unwrap();
        let nested = touch(&dir.path().join("sub"), "update.nsz");
        touch(&dir.path().join(".hidden"), "secret.nsp");
        touch(dir.path(), ".dotfile.nsp");

        let found = PackageScanner::new().scan(dir.path()).unwrap();
        assert_eq!(found, vec![nested]);
    }

    #[test]
    fn test_scan_missing_dir_is_empty() {
        let dir = TempDir::new().unwrap();
        let found = PackageScanner::new()
            .scan(&dir.path().join("nope"))
            .unwrap();
        assert!(found.is_empty());
    }

    #[test]
    fn test_scan_extension_case_insensitive() {
        let dir = TempDir::new().unwrap();
        let upper = touch(dir.path(), "GAME.NSP");

        let found = PackageScanner::new().scan(dir.path()).unwrap();
        assert_eq!(found, vec![upper]);
    }
}
