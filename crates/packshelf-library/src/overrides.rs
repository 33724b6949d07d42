//! Curated metadata overrides
//!
//! Users can pin corrected names, artwork or descriptions to a title,
//! a component at a specific version, or a file basename. The resolver
//! picks the best enabled match and overlays it on machine-derived
//! metadata without mutating the input.

use crate::source::GameInfo;
use crate::store::{CatalogStore, OverrideRow};
use crate::LibraryError;
use serde::{Deserialize, Serialize};

/// Selector keys for an override lookup; any subset may be present
#[derive(Debug, Clone, Copy, Default)]
pub struct OverrideQuery<'a> {
    pub title_id: Option<&'a str>,
    pub component_id: Option<&'a str>,
    pub version: Option<&'a str>,
    pub file_basename: Option<&'a str>,
}

/// Display metadata for one listing entry, machine-derived then
/// optionally corrected by an override
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DisplayInfo {
    pub name: Option<String>,
    pub publisher: Option<String>,
    pub region: Option<String>,
    pub description: Option<String>,
    pub content_type: Option<String>,
    pub version_label: Option<String>,
    pub icon_url: Option<String>,
    pub banner_url: Option<String>,
    /// Set when any override was applied
    #[serde(default)]
    pub overridden: bool,
}

impl From<&GameInfo> for DisplayInfo {
    fn from(info: &GameInfo) -> Self {
        Self {
            name: info.name.clone(),
            publisher: info.publisher.clone(),
            region: info.region.clone(),
            description: info.description.clone(),
            content_type: info.content_type.clone(),
            version_label: None,
            icon_url: info.icon_url.clone(),
            banner_url: info.banner_url.clone(),
            overridden: false,
        }
    }
}

/// A title-level curation always outranks a component- or file-level
/// one; a version-pinned component fix outranks a coincidental
/// same-file match.
fn score(row: &OverrideRow, query: &OverrideQuery<'_>) -> u32 {
    let mut s = 0;
    if let (Some(want), Some(have)) = (query.title_id, row.title_id.as_deref()) {
        if want == have {
            s += 100;
        }
    }
    if let (Some(want_id), Some(want_version)) = (query.component_id, query.version) {
        if row.component_id.as_deref() == Some(want_id)
            && row.component_version.as_deref() == Some(want_version)
        {
            s += 10;
        }
    }
    if let (Some(want), Some(have)) = (query.file_basename, row.file_basename.as_deref()) {
        if want == have {
            s += 1;
        }
    }
    s
}

/// Fetch the most relevant enabled override for the given selectors
pub fn find_override(
    store: &CatalogStore,
    query: &OverrideQuery<'_>,
) -> Result<Option<OverrideRow>, LibraryError> {
    let candidates = store.matching_overrides(
        query.title_id,
        query.component_id,
        query.version,
        query.file_basename,
    )?;
    Ok(candidates.into_iter().max_by_key(|row| score(row, query)))
}

/// Overlay an override's non-empty fields onto a base record,
/// returning a new record. Artwork paths become display URLs.
pub fn apply_override(base: &DisplayInfo, row: &OverrideRow) -> DisplayInfo {
    let mut merged = base.clone();

    let overlay = |target: &mut Option<String>, value: &Option<String>| {
        if let Some(v) = value {
            if !v.is_empty() {
                *target = Some(v.clone());
            }
        }
    };
    overlay(&mut merged.name, &row.name);
    overlay(&mut merged.publisher, &row.publisher);
    overlay(&mut merged.region, &row.region);
    overlay(&mut merged.description, &row.description);
    overlay(&mut merged.content_type, &row.content_type);
    overlay(&mut merged.version_label, &row.version_label);

    if let Some(icon) = &row.icon_path {
        merged.icon_url = Some(format!("/static/{}", icon.trim_start_matches('/')));
    }
    if let Some(banner) = &row.banner_path {
        merged.banner_url = Some(format!("/static/{}", banner.trim_start_matches('/')));
    }

    merged.overridden = true;
    merged
}

/// Find and apply in one call; without a match the base record comes
/// back unmodified.
pub fn merge_with_override(
    store: &CatalogStore,
    base: &DisplayInfo,
    query: &OverrideQuery<'_>,
) -> Result<DisplayInfo, LibraryError> {
    match find_override(store, query)? {
        Some(row) => Ok(apply_override(base, &row)),
        None => Ok(base.clone()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> DisplayInfo {
        DisplayInfo {
            name: Some("Machine Name".to_string()),
            publisher: Some("Machine Pub".to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn test_title_override_outranks_basename() {
        let store = CatalogStore::in_memory().unwrap();
        store
            .insert_override(&OverrideRow {
                file_basename: Some("demo.nsp".to_string()),
                name: Some("From Basename".to_string()),
                enabled: true,
                ..Default::default()
            })
            .unwrap();
        store
            .insert_override(&OverrideRow {
                title_id: Some("0100000000001000".to_string()),
                name: Some("From Title".to_string()),
                enabled: true,
                ..Default::default()
            })
            .unwrap();

        let query = OverrideQuery {
            title_id: Some("0100000000001000"),
            file_basename: Some("demo.nsp"),
            ..Default::default()
        };
        let merged = merge_with_override(&store, &base(), &query).unwrap();
        assert_eq!(merged.name.as_deref(), Some("From Title"));
        assert!(merged.overridden);
    }

    #[test]
    fn test_component_version_override_outranks_basename() {
        let store = CatalogStore::in_memory().unwrap();
        store
            .insert_override(&OverrideRow {
                file_basename: Some("demo.nsp".to_string()),
                name: Some("From Basename".to_string()),
                enabled: true,
                ..Default::default()
            })
            .unwrap();
        store
            .insert_override(&OverrideRow {
                component_id: Some("0100000000001000".to_string()),
                component_version: Some("0".to_string()),
                name: Some("From Component".to_string()),
                enabled: true,
                ..Default::default()
            })
            .unwrap();

        let query = OverrideQuery {
            component_id: Some("0100000000001000"),
            version: Some("0"),
            file_basename: Some("demo.nsp"),
            ..Default::default()
        };
        let found = find_override(&store, &query).unwrap().unwrap();
        assert_eq!(found.name.as_deref(), Some("From Component"));
    }

    #[test]
    fn test_disabled_overrides_are_ignored() {
        let store = CatalogStore::in_memory().unwrap();
        store
            .insert_override(&OverrideRow {
                title_id: Some("0100000000001000".to_string()),
                name: Some("Disabled".to_string()),
                enabled: false,
                ..Default::default()
            })
            .unwrap();

        let query = OverrideQuery {
            title_id: Some("0100000000001000"),
            ..Default::default()
        };
        assert!(find_override(&store, &query).unwrap().is_none());
        let merged = merge_with_override(&store, &base(), &query).unwrap();
        assert_eq!(merged.name.as_deref(), Some("Machine Name"));
        assert!(!merged.overridden);
    }

    #[test]
    fn test_apply_keeps_base_fields_for_empty_override_values() {
        let row = OverrideRow {
            name: Some(String::new()),
            publisher: Some("Curated Pub".to_string()),
            ..Default::default()
        };
        let merged = apply_override(&base(), &row);
        assert_eq!(merged.name.as_deref(), Some("Machine Name"));
        assert_eq!(merged.publisher.as_deref(), Some("Curated Pub"));
        assert!(merged.overridden);
    }

    #[test]
    fn test_artwork_paths_become_static_urls() {
        let row = OverrideRow {
            icon_path: Some("/icons/demo.png".to_string()),
            banner_path: Some("banners/demo.jpg".to_string()),
            ..Default::default()
        };
        let merged = apply_override(&DisplayInfo::default(), &row);
        assert_eq!(merged.icon_url.as_deref(), Some("/static/icons/demo.png"));
        assert_eq!(
            merged.banner_url.as_deref(),
            Some("/static/banners/demo.jpg")
        );
    }
}
