//! Catalog store using SQLite

use crate::LibraryError;
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use rusqlite::{Connection, OptionalExtension, params};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;

/// A registered content root directory
#[derive(Debug, Clone)]
pub struct Library {
    pub id: i64,
    pub path: String,
    /// Unix seconds of the last completed scan
    pub last_scan: Option<i64>,
}

/// One discovered filesystem object, identified or not
#[derive(Debug, Clone)]
pub struct CatalogEntry {
    pub id: i64,
    pub filepath: String,
    pub library_id: i64,
    pub folder: Option<String>,
    pub filename: Option<String>,
    pub extension: Option<String>,
    pub size: Option<i64>,
    /// Tri-state: never attempted / recognized / not recognized
    pub identified: Option<bool>,
    pub identification_type: Option<String>,
    pub identification_error: Option<String>,
    pub identification_attempts: i64,
    pub last_attempt: Option<i64>,
    /// File yielded more than one content record
    pub multicontent: bool,
    pub nb_content: i64,
}

/// A logical product, with derived ownership flags
#[derive(Debug, Clone)]
pub struct Title {
    pub id: i64,
    pub title_id: String,
    pub have_base: bool,
    pub up_to_date: bool,
    pub complete: bool,
}

/// Kind of installable unit a component represents
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ComponentKind {
    Base,
    Update,
    Dlc,
}

impl ComponentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ComponentKind::Base => "base",
            ComponentKind::Update => "update",
            ComponentKind::Dlc => "dlc",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "base" => Some(ComponentKind::Base),
            "update" => Some(ComponentKind::Update),
            "dlc" => Some(ComponentKind::Dlc),
            _ => None,
        }
    }
}

impl ToSql for ComponentKind {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.as_str()))
    }
}

impl FromSql for ComponentKind {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        value
            .as_str()
            .and_then(|s| ComponentKind::parse(s).ok_or(FromSqlError::InvalidType))
    }
}

/// One installable unit of a title at a specific version
#[derive(Debug, Clone)]
pub struct Component {
    pub id: i64,
    pub component_id: String,
    pub version: String,
    pub kind: ComponentKind,
    /// Backed by at least one catalog entry
    pub owned: bool,
    /// Textual id of the owning title
    pub title_id: String,
}

/// Curated metadata correction; any subset of selectors may be set
#[derive(Debug, Clone, Default)]
pub struct OverrideRow {
    pub id: i64,
    pub title_id: Option<String>,
    pub component_id: Option<String>,
    pub component_version: Option<String>,
    pub file_basename: Option<String>,
    pub name: Option<String>,
    pub publisher: Option<String>,
    pub region: Option<String>,
    pub description: Option<String>,
    pub content_type: Option<String>,
    pub version_label: Option<String>,
    pub icon_path: Option<String>,
    pub banner_path: Option<String>,
    pub enabled: bool,
    pub created_at: i64,
    pub updated_at: i64,
}

/// Field set for creating or refreshing a catalog entry
#[derive(Debug, Clone, Default)]
pub struct EntryUpsert {
    pub filepath: String,
    pub library_id: i64,
    pub folder: Option<String>,
    pub filename: Option<String>,
    pub extension: Option<String>,
    pub size: Option<i64>,
    pub identified: Option<bool>,
    pub identification_type: Option<String>,
    pub identification_error: Option<String>,
}

/// Catalog store backed by SQLite
pub struct CatalogStore {
    conn: Connection,
}

impl CatalogStore {
    /// Open or create a store
    pub fn open(path: impl AsRef<Path>) -> Result<Self, LibraryError> {
        let conn = Connection::open(path)?;

        let store = Self { conn };
        store.init_schema()?;

        Ok(store)
    }

    /// Create an in-memory store (for testing)
    pub fn in_memory() -> Result<Self, LibraryError> {
        let conn = Connection::open_in_memory()?;

        let store = Self { conn };
        store.init_schema()?;

        Ok(store)
    }

    /// Initialize database schema
    fn init_schema(&self) -> Result<(), LibraryError> {
        self.conn.execute_batch(
            r#"
            PRAGMA foreign_keys = ON;

            CREATE TABLE IF NOT EXISTS libraries (
                id INTEGER PRIMARY KEY,
                path TEXT NOT NULL UNIQUE,
                last_scan INTEGER
            );

            CREATE TABLE IF NOT EXISTS files (
                id INTEGER PRIMARY KEY,
                filepath TEXT NOT NULL UNIQUE,
                library_id INTEGER NOT NULL REFERENCES libraries(id) ON DELETE CASCADE,
                folder TEXT,
                filename TEXT,
                extension TEXT,
                size INTEGER,
                identified INTEGER,
                identification_type TEXT,
                identification_error TEXT,
                identification_attempts INTEGER NOT NULL DEFAULT 0,
                last_attempt INTEGER,
                multicontent INTEGER NOT NULL DEFAULT 0,
                nb_content INTEGER NOT NULL DEFAULT 0
            );

            CREATE TABLE IF NOT EXISTS titles (
                id INTEGER PRIMARY KEY,
                title_id TEXT NOT NULL UNIQUE,
                have_base INTEGER NOT NULL DEFAULT 0,
                up_to_date INTEGER NOT NULL DEFAULT 0,
                complete INTEGER NOT NULL DEFAULT 0
            );

            CREATE TABLE IF NOT EXISTS components (
                id INTEGER PRIMARY KEY,
                component_id TEXT NOT NULL,
                version TEXT NOT NULL,
                kind TEXT NOT NULL,
                owned INTEGER NOT NULL DEFAULT 0,
                title_ref INTEGER NOT NULL REFERENCES titles(id) ON DELETE CASCADE,
                UNIQUE (component_id, version)
            );

            CREATE TABLE IF NOT EXISTS component_files (
                component_ref INTEGER NOT NULL REFERENCES components(id) ON DELETE CASCADE,
                file_ref INTEGER NOT NULL REFERENCES files(id) ON DELETE CASCADE,
                PRIMARY KEY (component_ref, file_ref)
            );

            CREATE TABLE IF NOT EXISTS overrides (
                id INTEGER PRIMARY KEY,
                title_id TEXT,
                component_id TEXT,
                component_version TEXT,
                file_basename TEXT,
                name TEXT,
                publisher TEXT,
                region TEXT,
                description TEXT,
                content_type TEXT,
                version_label TEXT,
                icon_path TEXT,
                banner_path TEXT,
                enabled INTEGER NOT NULL DEFAULT 1,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_files_library ON files(library_id);
            CREATE INDEX IF NOT EXISTS idx_components_title ON components(title_ref);
            CREATE INDEX IF NOT EXISTS idx_overrides_title_id ON overrides(title_id);
            CREATE INDEX IF NOT EXISTS idx_overrides_component_id ON overrides(component_id);
            CREATE INDEX IF NOT EXISTS idx_overrides_file_basename ON overrides(file_basename);
        "#,
        )?;

        Ok(())
    }

    // --- batching ------------------------------------------------------

    /// Open an explicit write batch
    pub fn begin(&self) -> Result<(), LibraryError> {
        self.conn.execute_batch("BEGIN")?;
        Ok(())
    }

    /// Commit the current batch and immediately open the next one
    pub fn checkpoint(&self) -> Result<(), LibraryError> {
        self.conn.execute_batch("COMMIT; BEGIN")?;
        Ok(())
    }

    /// Commit the current batch
    pub fn commit(&self) -> Result<(), LibraryError> {
        self.conn.execute_batch("COMMIT")?;
        Ok(())
    }

    // --- libraries -----------------------------------------------------

    /// Register a library path, returning its id (existing or new)
    pub fn add_library(&self, path: &str) -> Result<i64, LibraryError> {
        self.conn.execute(
            "INSERT OR IGNORE INTO libraries (path) VALUES (?1)",
            params![path],
        )?;
        let id: i64 = self.conn.query_row(
            "SELECT id FROM libraries WHERE path = ?1",
            params![path],
            |row| row.get(0),
        )?;
        Ok(id)
    }

    pub fn library_by_path(&self, path: &str) -> Result<Option<Library>, LibraryError> {
        let library = self
            .conn
            .query_row(
                "SELECT id, path, last_scan FROM libraries WHERE path = ?1",
                params![path],
                Self::row_to_library,
            )
            .optional()?;
        Ok(library)
    }

    pub fn library_by_id(&self, id: i64) -> Result<Option<Library>, LibraryError> {
        let library = self
            .conn
            .query_row(
                "SELECT id, path, last_scan FROM libraries WHERE id = ?1",
                params![id],
                Self::row_to_library,
            )
            .optional()?;
        Ok(library)
    }

    /// All registered libraries
    pub fn libraries(&self) -> Result<Vec<Library>, LibraryError> {
        let mut stmt = self
            .conn
            .prepare("SELECT id, path, last_scan FROM libraries ORDER BY path")?;
        let libraries = stmt
            .query_map([], Self::row_to_library)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(libraries)
    }

    pub fn set_library_scan_time(&self, id: i64, when: i64) -> Result<(), LibraryError> {
        self.conn.execute(
            "UPDATE libraries SET last_scan = ?1 WHERE id = ?2",
            params![when, id],
        )?;
        Ok(())
    }

    /// Delete a library row; its catalog entries go with it
    pub fn delete_library(&self, id: i64) -> Result<(), LibraryError> {
        self.conn
            .execute("DELETE FROM libraries WHERE id = ?1", params![id])?;
        Ok(())
    }

    pub fn library_file_ids(&self, library_id: i64) -> Result<Vec<i64>, LibraryError> {
        let mut stmt = self
            .conn
            .prepare("SELECT id FROM files WHERE library_id = ?1")?;
        let ids = stmt
            .query_map(params![library_id], |row| row.get(0))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(ids)
    }

    /// Paths already cataloged for a library
    pub fn library_file_paths(&self, library_id: i64) -> Result<HashSet<String>, LibraryError> {
        let mut stmt = self
            .conn
            .prepare("SELECT filepath FROM files WHERE library_id = ?1")?;
        let paths = stmt
            .query_map(params![library_id], |row| row.get(0))?
            .collect::<Result<HashSet<_>, _>>()?;
        Ok(paths)
    }

    // --- catalog entries -----------------------------------------------

    pub fn entry_by_path(&self, filepath: &str) -> Result<Option<CatalogEntry>, LibraryError> {
        let entry = self
            .conn
            .query_row(
                &format!("{ENTRY_SELECT} WHERE filepath = ?1"),
                params![filepath],
                Self::row_to_entry,
            )
            .optional()?;
        Ok(entry)
    }

    /// Create a fresh entry; the first identification attempt is this upsert
    pub fn insert_entry(&self, upsert: &EntryUpsert, now: i64) -> Result<i64, LibraryError> {
        self.conn.execute(
            r#"INSERT INTO files
               (filepath, library_id, folder, filename, extension, size,
                identified, identification_type, identification_error,
                identification_attempts, last_attempt)
               VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, 1, ?10)"#,
            params![
                upsert.filepath,
                upsert.library_id,
                upsert.folder,
                upsert.filename,
                upsert.extension,
                upsert.size,
                upsert.identified,
                upsert.identification_type,
                upsert.identification_error,
                now,
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    /// Write back every mutable field of an entry
    pub fn update_entry(&self, entry: &CatalogEntry) -> Result<(), LibraryError> {
        self.conn.execute(
            r#"UPDATE files SET
                 folder = ?1, filename = ?2, extension = ?3, size = ?4,
                 identified = ?5, identification_type = ?6, identification_error = ?7,
                 identification_attempts = ?8, last_attempt = ?9,
                 multicontent = ?10, nb_content = ?11
               WHERE id = ?12"#,
            params![
                entry.folder,
                entry.filename,
                entry.extension,
                entry.size,
                entry.identified,
                entry.identification_type,
                entry.identification_error,
                entry.identification_attempts,
                entry.last_attempt,
                entry.multicontent,
                entry.nb_content,
                entry.id,
            ],
        )?;
        Ok(())
    }

    /// Remove an entry, releasing ownership of any component it alone backed
    pub fn delete_entry(&self, id: i64) -> Result<(), LibraryError> {
        self.detach_entry(id)?;
        self.conn
            .execute("DELETE FROM files WHERE id = ?1", params![id])?;
        Ok(())
    }

    /// Entries needing (re)identification, never-attempted first then oldest
    pub fn entries_to_identify(
        &self,
        library_id: i64,
        force: bool,
        stale_before: i64,
    ) -> Result<Vec<CatalogEntry>, LibraryError> {
        let order = "ORDER BY (last_attempt IS NULL) DESC, last_attempt ASC";
        let entries = if force {
            let mut stmt = self
                .conn
                .prepare(&format!("{ENTRY_SELECT} WHERE library_id = ?1 {order}"))?;
            let rows = stmt.query_map(params![library_id], Self::row_to_entry)?;
            rows.collect::<Result<Vec<_>, _>>()?
        } else {
            let mut stmt = self.conn.prepare(&format!(
                r#"{ENTRY_SELECT}
                   WHERE library_id = ?1
                     AND (identified IS NULL
                          OR identification_type IS NULL
                          OR last_attempt IS NULL
                          OR last_attempt < ?2)
                   {order}"#
            ))?;
            let rows = stmt.query_map(params![library_id, stale_before], Self::row_to_entry)?;
            rows.collect::<Result<Vec<_>, _>>()?
        };
        Ok(entries)
    }

    // --- titles --------------------------------------------------------

    /// Lazily create a title row, returning its database id
    pub fn ensure_title(&self, title_id: &str) -> Result<i64, LibraryError> {
        self.conn.execute(
            "INSERT OR IGNORE INTO titles (title_id) VALUES (?1)",
            params![title_id],
        )?;
        let id: i64 = self.conn.query_row(
            "SELECT id FROM titles WHERE title_id = ?1",
            params![title_id],
            |row| row.get(0),
        )?;
        Ok(id)
    }

    pub fn title_by_id(&self, title_id: &str) -> Result<Option<Title>, LibraryError> {
        let title = self
            .conn
            .query_row(
                "SELECT id, title_id, have_base, up_to_date, complete FROM titles WHERE title_id = ?1",
                params![title_id],
                Self::row_to_title,
            )
            .optional()?;
        Ok(title)
    }

    pub fn titles(&self) -> Result<Vec<Title>, LibraryError> {
        let mut stmt = self.conn.prepare(
            "SELECT id, title_id, have_base, up_to_date, complete FROM titles ORDER BY title_id",
        )?;
        let titles = stmt
            .query_map([], Self::row_to_title)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(titles)
    }

    pub fn set_title_flags(
        &self,
        id: i64,
        have_base: bool,
        up_to_date: bool,
        complete: bool,
    ) -> Result<(), LibraryError> {
        self.conn.execute(
            "UPDATE titles SET have_base = ?1, up_to_date = ?2, complete = ?3 WHERE id = ?4",
            params![have_base, up_to_date, complete, id],
        )?;
        Ok(())
    }

    /// Garbage-collect titles with no owned component of any kind
    pub fn delete_unowned_titles(&self) -> Result<usize, LibraryError> {
        let removed = self.conn.execute(
            r#"DELETE FROM titles WHERE id NOT IN
               (SELECT DISTINCT title_ref FROM components WHERE owned = 1)"#,
            [],
        )?;
        Ok(removed)
    }

    // --- components ----------------------------------------------------

    pub fn component_by_id_version(
        &self,
        component_id: &str,
        version: &str,
    ) -> Result<Option<Component>, LibraryError> {
        let component = self
            .conn
            .query_row(
                &format!("{COMPONENT_SELECT} WHERE c.component_id = ?1 AND c.version = ?2"),
                params![component_id, version],
                Self::row_to_component,
            )
            .optional()?;
        Ok(component)
    }

    pub fn insert_component(
        &self,
        component_id: &str,
        version: &str,
        kind: ComponentKind,
        owned: bool,
        title_ref: i64,
    ) -> Result<i64, LibraryError> {
        self.conn.execute(
            r#"INSERT INTO components (component_id, version, kind, owned, title_ref)
               VALUES (?1, ?2, ?3, ?4, ?5)"#,
            params![component_id, version, kind, owned, title_ref],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    /// Link an entry to a component; a linked component is owned
    pub fn link_entry(&self, component_ref: i64, file_ref: i64) -> Result<(), LibraryError> {
        self.conn.execute(
            "INSERT OR IGNORE INTO component_files (component_ref, file_ref) VALUES (?1, ?2)",
            params![component_ref, file_ref],
        )?;
        self.conn.execute(
            "UPDATE components SET owned = 1 WHERE id = ?1",
            params![component_ref],
        )?;
        Ok(())
    }

    /// Detach an entry from every component it backs, dropping ownership
    /// of components left with no backing entry. Returns how many
    /// components lost ownership.
    pub fn detach_entry(&self, file_ref: i64) -> Result<usize, LibraryError> {
        self.conn.execute(
            "DELETE FROM component_files WHERE file_ref = ?1",
            params![file_ref],
        )?;
        let disowned = self.conn.execute(
            r#"UPDATE components SET owned = 0
               WHERE owned = 1
                 AND id NOT IN (SELECT DISTINCT component_ref FROM component_files)"#,
            [],
        )?;
        Ok(disowned)
    }

    /// Every component, joined with its title id
    pub fn components(&self) -> Result<Vec<Component>, LibraryError> {
        let mut stmt = self
            .conn
            .prepare(&format!("{COMPONENT_SELECT} ORDER BY c.component_id, c.version"))?;
        let components = stmt
            .query_map([], Self::row_to_component)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(components)
    }

    /// Components belonging to a title
    pub fn title_components(&self, title_id: &str) -> Result<Vec<Component>, LibraryError> {
        let mut stmt = self.conn.prepare(&format!(
            "{COMPONENT_SELECT} WHERE t.title_id = ?1 ORDER BY c.component_id, c.version"
        ))?;
        let components = stmt
            .query_map(params![title_id], Self::row_to_component)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(components)
    }

    /// Basename of the first catalog entry backing a component, if any
    pub fn component_file_basename(
        &self,
        component_ref: i64,
    ) -> Result<Option<String>, LibraryError> {
        let basename = self
            .conn
            .query_row(
                r#"SELECT f.filename FROM files f
                   JOIN component_files cf ON cf.file_ref = f.id
                   WHERE cf.component_ref = ?1
                   ORDER BY f.id LIMIT 1"#,
                params![component_ref],
                |row| row.get(0),
            )
            .optional()?;
        Ok(basename.flatten())
    }

    // --- overrides -----------------------------------------------------

    pub fn insert_override(&self, row: &OverrideRow) -> Result<i64, LibraryError> {
        self.conn.execute(
            r#"INSERT INTO overrides
               (title_id, component_id, component_version, file_basename,
                name, publisher, region, description, content_type, version_label,
                icon_path, banner_path, enabled, created_at, updated_at)
               VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)"#,
            params![
                row.title_id,
                row.component_id,
                row.component_version,
                row.file_basename,
                row.name,
                row.publisher,
                row.region,
                row.description,
                row.content_type,
                row.version_label,
                row.icon_path,
                row.banner_path,
                row.enabled,
                row.created_at,
                row.updated_at,
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    /// Enabled overrides whose selectors intersect the given keys
    pub fn matching_overrides(
        &self,
        title_id: Option<&str>,
        component_id: Option<&str>,
        version: Option<&str>,
        file_basename: Option<&str>,
    ) -> Result<Vec<OverrideRow>, LibraryError> {
        if title_id.is_none() && component_id.is_none() && file_basename.is_none() {
            return Ok(Vec::new());
        }
        let mut stmt = self.conn.prepare(
            r#"SELECT id, title_id, component_id, component_version, file_basename,
                      name, publisher, region, description, content_type, version_label,
                      icon_path, banner_path, enabled, created_at, updated_at
               FROM overrides
               WHERE enabled = 1
                 AND ((?1 IS NOT NULL AND title_id = ?1)
                      OR (?2 IS NOT NULL AND component_id = ?2)
                      OR (?4 IS NOT NULL AND file_basename = ?4)
                      OR (?2 IS NOT NULL AND ?3 IS NOT NULL
                          AND component_id = ?2 AND component_version = ?3))
               ORDER BY id"#,
        )?;
        let rows = stmt
            .query_map(
                params![title_id, component_id, version, file_basename],
                Self::row_to_override,
            )?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    // --- row mapping ---------------------------------------------------

    fn row_to_library(row: &rusqlite::Row) -> rusqlite::Result<Library> {
        Ok(Library {
            id: row.get("id")?,
            path: row.get("path")?,
            last_scan: row.get("last_scan")?,
        })
    }

    fn row_to_entry(row: &rusqlite::Row) -> rusqlite::Result<CatalogEntry> {
        Ok(CatalogEntry {
            id: row.get("id")?,
            filepath: row.get("filepath")?,
            library_id: row.get("library_id")?,
            folder: row.get("folder")?,
            filename: row.get("filename")?,
            extension: row.get("extension")?,
            size: row.get("size")?,
            identified: row.get("identified")?,
            identification_type: row.get("identification_type")?,
            identification_error: row.get("identification_error")?,
            identification_attempts: row.get("identification_attempts")?,
            last_attempt: row.get("last_attempt")?,
            multicontent: row.get("multicontent")?,
            nb_content: row.get("nb_content")?,
        })
    }

    fn row_to_title(row: &rusqlite::Row) -> rusqlite::Result<Title> {
        Ok(Title {
            id: row.get("id")?,
            title_id: row.get("title_id")?,
            have_base: row.get("have_base")?,
            up_to_date: row.get("up_to_date")?,
            complete: row.get("complete")?,
        })
    }

    fn row_to_component(row: &rusqlite::Row) -> rusqlite::Result<Component> {
        Ok(Component {
            id: row.get("id")?,
            component_id: row.get("component_id")?,
            version: row.get("version")?,
            kind: row.get("kind")?,
            owned: row.get("owned")?,
            title_id: row.get("title_id")?,
        })
    }

    fn row_to_override(row: &rusqlite::Row) -> rusqlite::Result<OverrideRow> {
        Ok(OverrideRow {
            id: row.get("id")?,
            title_id: row.get("title_id")?,
            component_id: row.get("component_id")?,
            component_version: row.get("component_version")?,
            file_basename: row.get("file_basename")?,
            name: row.get("name")?,
            publisher: row.get("publisher")?,
            region: row.get("region")?,
            description: row.get("description")?,
            content_type: row.get("content_type")?,
            version_label: row.get("version_label")?,
            icon_path: row.get("icon_path")?,
            banner_path: row.get("banner_path")?,
            enabled: row.get("enabled")?,
            created_at: row.get("created_at")?,
            updated_at: row.get("updated_at")?,
        })
    }
}

const ENTRY_SELECT: &str = r#"SELECT id, filepath, library_id, folder, filename, extension, size,
       identified, identification_type, identification_error,
       identification_attempts, last_attempt, multicontent, nb_content
  FROM files"#;

const COMPONENT_SELECT: &str = r#"SELECT c.id AS id, c.component_id AS component_id, c.version AS version,
       c.kind AS kind, c.owned AS owned, t.title_id AS title_id
  FROM components c JOIN titles t ON t.id = c.title_ref"#;
