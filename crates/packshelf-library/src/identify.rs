//! Per-file content identification

use crate::catalog::{CatalogService, LibraryRef};
use crate::store::{CatalogEntry, ComponentKind};
use crate::{COMMIT_INTERVAL, LibraryError, now_secs};
use std::path::Path;
use tracing::{debug, info, warn};

/// Result of an identification run
#[derive(Debug, Default)]
pub struct IdentifyReport {
    pub processed: usize,
    pub identified: usize,
    pub unidentified: usize,
    pub deleted: usize,
}

impl CatalogService {
    /// Run identification over a library's catalog entries: all of them
    /// when `force` is set, otherwise those never attempted or whose
    /// last attempt is older than the staleness threshold.
    ///
    /// Every entry is processed in isolation; a failure is recorded on
    /// the entry and never aborts the batch. Attempt counter and
    /// timestamp move on every branch so interrupted runs resume where
    /// they left off.
    pub fn identify_library(
        &self,
        library: LibraryRef<'_>,
        force: bool,
    ) -> Result<IdentifyReport, LibraryError> {
        let lib = self.resolve(library)?;
        let stale_before = now_secs() - self.rescan_stale.as_secs() as i64;
        let entries = self
            .store
            .entries_to_identify(lib.id, force, stale_before)?;
        let total = entries.len();
        let mut report = IdentifyReport::default();

        // Shared index load for the whole run, released on every exit path
        let lease = self.titledb.acquire();

        self.store.begin()?;
        for (n, mut entry) in entries.into_iter().enumerate() {
            let filename = entry.filename.clone().unwrap_or_else(|| "<unknown>".into());

            if !Path::new(&entry.filepath).exists() {
                warn!(
                    "Identifying file ({}/{}): {} no longer exists, deleting from database",
                    n + 1,
                    total,
                    filename
                );
                self.store.delete_entry(entry.id)?;
                report.deleted += 1;
                continue;
            }

            info!("Identifying file ({}/{}): {}", n + 1, total, filename);
            if let Err(e) = self.identify_entry(&mut entry, &*lease) {
                // per-entry fault barrier: record and move on
                warn!("Error identifying file {}: {}", filename, e);
                entry.identification_error = Some(e.to_string());
                entry.identified = Some(false);
                if entry.identification_type.is_none() {
                    entry.identification_type = Some("exception".to_string());
                }
            }

            entry.identification_attempts += 1;
            entry.last_attempt = Some(now_secs());
            self.store.update_entry(&entry)?;

            report.processed += 1;
            if entry.identified == Some(true) {
                report.identified += 1;
            } else {
                report.unidentified += 1;
            }

            // Commit every 100 entries to keep transactions bounded
            if (n + 1) % COMMIT_INTERVAL == 0 {
                self.store.checkpoint()?;
            }
        }
        self.store.commit()?;

        Ok(report)
    }

    /// Identify one entry and upsert the components it contains.
    /// Mutates the entry's identification fields; the caller persists.
    fn identify_entry(
        &self,
        entry: &mut CatalogEntry,
        index: &(dyn crate::source::TitleIndex + Send + Sync),
    ) -> Result<(), LibraryError> {
        let outcome = self.identifier.identify(Path::new(&entry.filepath));

        if !(outcome.success && !outcome.contents.is_empty() && outcome.error.is_none()) {
            warn!(
                "Error identifying file {}: {}",
                entry.filename.as_deref().unwrap_or("<unknown>"),
                outcome.error.as_deref().unwrap_or("no content found")
            );
            entry.identification_error = outcome.error;
            entry.identified = Some(false);
            if entry.identification_type.is_none() {
                entry.identification_type = Some("exception".to_string());
            }
            return Ok(());
        }

        // Unique title ids in first-appearance order
        let mut title_ids: Vec<&str> = Vec::new();
        for content in &outcome.contents {
            if !title_ids.contains(&content.title_id.as_str()) {
                title_ids.push(&content.title_id);
            }
        }
        for title_id in &title_ids {
            self.store.ensure_title(title_id)?;
        }

        let mut nb_content = 0;
        for content in &outcome.contents {
            debug!(
                "Found content title {} component {} kind {} version {}",
                content.title_id,
                content.component_id,
                content.kind.as_str(),
                content.version
            );
            let title_ref = self.store.ensure_title(&content.title_id)?;

            match self
                .store
                .component_by_id_version(&content.component_id, &content.version)?
            {
                Some(existing) => {
                    self.store.link_entry(existing.id, entry.id)?;
                }
                None => {
                    let component_ref = self.store.insert_component(
                        &content.component_id,
                        &content.version,
                        content.kind,
                        true,
                        title_ref,
                    )?;
                    self.store.link_entry(component_ref, entry.id)?;
                }
            }
            nb_content += 1;
        }

        if nb_content > 1 {
            entry.multicontent = true;
        }
        entry.nb_content = nb_content;

        // A single unknown title id marks the whole file as unrecognized
        let unknown = title_ids.iter().any(|t| !index.has_title(t));
        if unknown {
            info!(
                "Marking file as NOT identified (unknown title ids): {:?}",
                title_ids
            );
            entry.identified = Some(false);
            entry.identification_type = Some("not_in_titledb".to_string());
            entry.identification_error =
                Some("Title id not present in the metadata index".to_string());
        } else {
            entry.identified = Some(true);
            entry.identification_type = Some(outcome.tag);
            entry.identification_error = None;
        }

        Ok(())
    }

    /// Seed the catalog with components known to the external index but
    /// not yet owned: the base of every title, every published update
    /// version, every published DLC version. Lets the ownership pass
    /// see what is missing, not just what is present.
    pub fn seed_missing_components(&self) -> Result<usize, LibraryError> {
        info!("Seeding missing components...");
        let lease = self.titledb.acquire();
        let titles = self.store.titles()?;
        let mut added = 0;

        self.store.begin()?;
        for (n, title) in titles.iter().enumerate() {
            let title_id = title.title_id.as_str();

            if self.store.component_by_id_version(title_id, "0")?.is_none() {
                self.store
                    .insert_component(title_id, "0", ComponentKind::Base, false, title.id)?;
                added += 1;
                debug!("Added missing base component: {title_id}");
            }

            let update_id = update_component_id(title_id);
            for version_info in lease.title_versions(title_id) {
                let version = version_info.version.to_string();
                if self
                    .store
                    .component_by_id_version(&update_id, &version)?
                    .is_none()
                {
                    self.store.insert_component(
                        &update_id,
                        &version,
                        ComponentKind::Update,
                        false,
                        title.id,
                    )?;
                    added += 1;
                    debug!("Added missing update component: {update_id} v{version}");
                }
            }

            for dlc_id in lease.title_dlc_ids(title_id) {
                for dlc_version in lease.component_versions(&dlc_id) {
                    let version = dlc_version.to_string();
                    if self
                        .store
                        .component_by_id_version(&dlc_id, &version)?
                        .is_none()
                    {
                        self.store.insert_component(
                            &dlc_id,
                            &version,
                            ComponentKind::Dlc,
                            false,
                            title.id,
                        )?;
                        added += 1;
                        debug!("Added missing DLC component: {dlc_id} v{version}");
                    }
                }
            }

            // Commit every 100 titles to keep transactions bounded
            if (n + 1) % COMMIT_INTERVAL == 0 {
                self.store.checkpoint()?;
                info!("Processed {}/{} titles, added {added} components so far", n + 1, titles.len());
            }
        }
        self.store.commit()?;

        info!("Finished seeding missing components. Total added: {added}");
        Ok(added)
    }
}

/// Update packages carry the base title id with its last three
/// characters replaced by "800".
fn update_component_id(title_id: &str) -> String {
    if title_id.len() < 3 {
        return title_id.to_string();
    }
    format!("{}800", &title_id[..title_id.len() - 3])
}
