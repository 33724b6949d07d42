//! Derived per-title ownership flags

use crate::catalog::CatalogService;
use crate::store::{Component, ComponentKind};
use crate::{COMMIT_INTERVAL, LibraryError, version_num};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::info;

/// The three derived booleans of a title
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TitleFlags {
    pub have_base: bool,
    pub up_to_date: bool,
    pub complete: bool,
}

/// Derive a title's flags from its current component set.
///
/// `up_to_date` is vacuously true with no updates published, false with
/// none owned, and otherwise compares the highest owned update version
/// against the highest available one. `complete` requires the highest
/// version of every distinct DLC line to be owned.
pub fn derive_flags(components: &[Component]) -> TitleFlags {
    let have_base = components
        .iter()
        .any(|c| c.kind == ComponentKind::Base && c.owned);

    let updates: Vec<&Component> = components
        .iter()
        .filter(|c| c.kind == ComponentKind::Update)
        .collect();
    let owned_updates: Vec<&&Component> = updates.iter().filter(|c| c.owned).collect();

    let up_to_date = if updates.is_empty() {
        true
    } else if owned_updates.is_empty() {
        false
    } else {
        let highest_available = updates.iter().map(|c| version_num(&c.version)).max();
        let highest_owned = owned_updates.iter().map(|c| version_num(&c.version)).max();
        highest_owned >= highest_available
    };

    let dlc: Vec<&Component> = components
        .iter()
        .filter(|c| c.kind == ComponentKind::Dlc)
        .collect();

    let complete = if dlc.is_empty() {
        true
    } else {
        // highest version per DLC line, each of which must be owned
        let mut latest_by_id: HashMap<&str, (i64, bool)> = HashMap::new();
        for c in &dlc {
            let version = version_num(&c.version);
            let current = latest_by_id.get(c.component_id.as_str()).copied();
            match current {
                Some((latest, _)) if latest >= version => {}
                _ => {
                    latest_by_id.insert(&c.component_id, (version, c.owned));
                }
            }
        }
        latest_by_id.values().all(|(_, owned)| *owned)
    };

    TitleFlags {
        have_base,
        up_to_date,
        complete,
    }
}

/// Per-title ownership summary with the external version list
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LibraryStatus {
    pub has_base: bool,
    pub has_latest_version: bool,
    pub has_all_dlcs: bool,
    pub versions: Vec<VersionStatus>,
}

/// One published version annotated with ownership
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VersionStatus {
    pub version: i64,
    pub owned: bool,
    pub release_date: String,
}

impl CatalogService {
    /// Recompute every title's derived flags from the current component
    /// set, after garbage-collecting titles with no owned component.
    /// Runs in bulk rather than incrementally so partial updates can
    /// never leave the flags drifting from the data.
    pub fn refresh_titles(&self) -> Result<(), LibraryError> {
        let removed = self.store.delete_unowned_titles()?;
        if removed > 0 {
            info!("Removed {removed} titles with no owned components");
        }

        let titles = self.store.titles()?;
        self.store.begin()?;
        for (n, title) in titles.iter().enumerate() {
            let components = self.store.title_components(&title.title_id)?;
            let flags = derive_flags(&components);
            self.store
                .set_title_flags(title.id, flags.have_base, flags.up_to_date, flags.complete)?;

            // Commit every 100 titles to keep transactions bounded
            if (n + 1) % COMMIT_INTERVAL == 0 {
                self.store.checkpoint()?;
            }
        }
        self.store.commit()?;
        Ok(())
    }

    /// Ownership summary for one title: the stored flags plus the
    /// externally published version list annotated with what is owned.
    pub fn library_status(&self, title_id: &str) -> Result<Option<LibraryStatus>, LibraryError> {
        let Some(title) = self.store.title_by_id(title_id)? else {
            return Ok(None);
        };
        let components = self.store.title_components(title_id)?;

        let lease = self.titledb.acquire();
        let versions = lease
            .title_versions(title_id)
            .into_iter()
            .map(|v| {
                let owned = components.iter().any(|c| {
                    c.kind == ComponentKind::Update && c.owned && version_num(&c.version) == v.version
                });
                VersionStatus {
                    version: v.version,
                    owned,
                    release_date: v.release_date.unwrap_or_else(|| "Unknown".to_string()),
                }
            })
            .collect();

        Ok(Some(LibraryStatus {
            has_base: title.have_base,
            has_latest_version: title.up_to_date,
            has_all_dlcs: title.complete,
            versions,
        }))
    }
}
