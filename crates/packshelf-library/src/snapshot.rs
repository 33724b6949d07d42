//! Library snapshot generation and change cache
//!
//! The externally served listing is derived from the component table.
//! A content hash of that table decides whether a previously persisted
//! snapshot can be served as-is; anything wrong with the cache file is
//! a cache miss, never an error.

use crate::catalog::CatalogService;
use crate::overrides::{DisplayInfo, OverrideQuery, merge_with_override};
use crate::ownership::VersionStatus;
use crate::store::{CatalogStore, ComponentKind};
use crate::{LibraryError, version_num};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::Path;
use tracing::{debug, info, warn};

/// One externally visible listing entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotEntry {
    pub title_id: String,
    pub component_id: String,
    pub kind: ComponentKind,
    pub version: String,
    #[serde(flatten)]
    pub info: DisplayInfo,
    /// Name of the owning title; DLC may resolve it separately
    pub title_name: Option<String>,
    pub release_date: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub has_base: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub has_latest_version: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub has_all_dlcs: Option<bool>,
    pub versions: Vec<VersionStatus>,
}

/// The persisted cache artifact: listing plus the hash it was built from
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotDocument {
    pub hash: String,
    pub library: Vec<SnapshotEntry>,
}

/// Stable hash over the whole component table. Any ownership change,
/// added component or kind change produces a different value.
pub fn compute_catalog_hash(store: &CatalogStore) -> Result<String, LibraryError> {
    let mut components = store.components()?;
    components.sort_by(|a, b| {
        a.component_id
            .cmp(&b.component_id)
            .then(a.version.cmp(&b.version))
    });

    let mut hasher = Sha256::new();
    for c in &components {
        hasher.update(c.component_id.as_bytes());
        hasher.update(c.version.as_bytes());
        hasher.update(c.kind.as_str().as_bytes());
        hasher.update(if c.owned { b"true" as &[u8] } else { b"false" });
        hasher.update(c.title_id.as_bytes());
    }
    Ok(hex::encode(hasher.finalize()))
}

fn load_cache(path: &Path) -> Option<SnapshotDocument> {
    let bytes = fs::read(path).ok()?;
    serde_json::from_slice(&bytes).ok()
}

/// Atomic write: temp file in the same directory, then rename
fn save_cache(path: &Path, document: &SnapshotDocument) -> Result<(), LibraryError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, serde_json::to_vec_pretty(document)?)?;
    fs::rename(&tmp, path)?;
    Ok(())
}

impl CatalogService {
    /// Serve the cached snapshot when the component table is unchanged,
    /// otherwise rebuild it.
    pub fn snapshot_current(&self) -> Result<SnapshotDocument, LibraryError> {
        if let Some(cached) = load_cache(&self.cache_file) {
            if !cached.hash.is_empty() && cached.hash == compute_catalog_hash(&self.store)? {
                debug!("Catalog unchanged, serving cached snapshot");
                return Ok(cached);
            }
        }
        self.build_snapshot()
    }

    /// Build the full listing from the component table and persist it
    /// with the catalog hash. One entry per owned component; updates
    /// are folded into their base title's version list; DLC is
    /// de-duplicated per component id.
    pub fn build_snapshot(&self) -> Result<SnapshotDocument, LibraryError> {
        info!("Generating library snapshot ...");
        let lease = self.titledb.acquire();

        let components = self.store.components()?;
        let mut entries: Vec<SnapshotEntry> = Vec::new();
        let mut processed_dlc: HashSet<String> = HashSet::new();

        for component in &components {
            if component.component_id.is_empty()
                || component.version.is_empty()
                || component.title_id.is_empty()
            {
                warn!(
                    "Component with missing fields will be skipped: {:?}",
                    component
                );
                continue;
            }
            if component.kind == ComponentKind::Update {
                continue;
            }
            if !component.owned {
                continue;
            }

            let Some(game_info) = lease.game_info(&component.component_id) else {
                warn!("Info not found for component: {}", component.component_id);
                continue;
            };

            let basename = self.store.component_file_basename(component.id)?;
            let query = OverrideQuery {
                title_id: Some(&component.title_id),
                component_id: Some(&component.component_id),
                version: Some(&component.version),
                file_basename: basename.as_deref(),
            };
            let info = merge_with_override(&self.store, &DisplayInfo::from(&game_info), &query)?;

            let title_components = self.store.title_components(&component.title_id)?;

            match component.kind {
                ComponentKind::Base => {
                    let flags = self.store.title_by_id(&component.title_id)?;
                    let (has_base, has_latest_version, has_all_dlcs) = flags
                        .map(|t| (t.have_base, t.up_to_date, t.complete))
                        .unwrap_or((false, false, false));

                    let release_dates: HashMap<i64, String> = lease
                        .title_versions(&component.title_id)
                        .into_iter()
                        .map(|v| {
                            (
                                v.version,
                                v.release_date.unwrap_or_else(|| "Unknown".to_string()),
                            )
                        })
                        .collect();

                    let mut versions: Vec<VersionStatus> = title_components
                        .iter()
                        .filter(|c| c.kind == ComponentKind::Update)
                        .map(|c| {
                            let version = version_num(&c.version);
                            VersionStatus {
                                version,
                                owned: c.owned,
                                release_date: release_dates
                                    .get(&version)
                                    .cloned()
                                    .unwrap_or_else(|| "Unknown".to_string()),
                            }
                        })
                        .collect();
                    versions.sort_by_key(|v| v.version);

                    let title_name = info.name.clone();
                    entries.push(SnapshotEntry {
                        title_id: component.title_id.clone(),
                        component_id: component.component_id.clone(),
                        kind: component.kind,
                        version: component.version.clone(),
                        release_date: game_info.release_date.clone(),
                        info,
                        title_name,
                        has_base: Some(has_base),
                        has_latest_version: Some(has_latest_version),
                        has_all_dlcs: Some(has_all_dlcs),
                        versions,
                    });
                }
                ComponentKind::Dlc => {
                    if !processed_dlc.insert(component.component_id.clone()) {
                        continue;
                    }

                    let line: Vec<_> = title_components
                        .iter()
                        .filter(|c| {
                            c.kind == ComponentKind::Dlc
                                && c.component_id == component.component_id
                        })
                        .collect();

                    let mut versions: Vec<VersionStatus> = line
                        .iter()
                        .map(|c| VersionStatus {
                            version: version_num(&c.version),
                            owned: c.owned,
                            release_date: "Unknown".to_string(),
                        })
                        .collect();
                    versions.sort_by_key(|v| v.version);

                    // Per-DLC-line freshness, independent of the
                    // title-level complete flag
                    let highest = line.iter().map(|c| version_num(&c.version)).max();
                    let highest_owned = line
                        .iter()
                        .filter(|c| c.owned)
                        .map(|c| version_num(&c.version))
                        .max()
                        .unwrap_or(0);
                    let has_latest_version =
                        highest.map(|h| highest_owned >= h).unwrap_or(true);

                    let title_name = lease
                        .game_info(&component.title_id)
                        .and_then(|i| i.name)
                        .or_else(|| Some("Unrecognized".to_string()));

                    entries.push(SnapshotEntry {
                        title_id: component.title_id.clone(),
                        component_id: component.component_id.clone(),
                        kind: component.kind,
                        version: component.version.clone(),
                        release_date: game_info.release_date.clone(),
                        info,
                        title_name,
                        has_base: None,
                        has_latest_version: Some(has_latest_version),
                        has_all_dlcs: None,
                        versions,
                    });
                }
                ComponentKind::Update => unreachable!("updates are folded into base entries"),
            }
        }

        // Named entries first, alphabetical, then by component id
        entries.sort_by(|a, b| {
            let a_key = (a.title_name.is_none(), a.title_name.as_deref().unwrap_or(""));
            let b_key = (b.title_name.is_none(), b.title_name.as_deref().unwrap_or(""));
            a_key
                .cmp(&b_key)
                .then_with(|| a.component_id.cmp(&b.component_id))
        });

        let document = SnapshotDocument {
            hash: compute_catalog_hash(&self.store)?,
            library: entries,
        };
        save_cache(&self.cache_file, &document)?;

        info!("Generating library snapshot done: {} entries", document.library.len());
        Ok(document)
    }
}
