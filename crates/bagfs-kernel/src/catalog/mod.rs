//! Per-volume SQLite catalog.
//!
//! A catalog records every file in one bag directory together with its tag
//! assignments and extractor output. It is stored next to the bag, at the
//! volume root, so the bag travels with the medium.
//!
//! Each [`Catalog`] owns exactly one connection behind a mutex. Closing the
//! catalog drops the connection; any later call returns
//! [`CatalogError::StaleHandle`] instead of touching a dead store.

mod error;
mod schema;
mod types;

pub use error::{CatalogError, CatalogResult};
pub use types::{
    ALIAS_FOLDER_PREFIX, DerivedTag, FileAttributes, Item, MetaAlias, MetaRecord, MetaTable, Tag,
};

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use rusqlite::{Connection, ErrorCode, OptionalExtension, Row, params, params_from_iter};
use sha2::{Digest, Sha256};
use strum::IntoEnumIterator;

use crate::constants::{DEFAULT_BUSY_TIMEOUT, SUPPORTED_SCHEMA_VERSION};
use types::{from_unix, to_unix};

const ITEM_COLUMNS: &str = "i.id, i.name, i.ext, i.size, i.attr, i.ct, i.lwt, i.lat";

/// Handle to one bag's catalog store.
pub struct Catalog {
    path: PathBuf,
    conn: Mutex<Option<Connection>>,
    location: RwLock<String>,
    version: i64,
    dirty: AtomicBool,
    suspect: AtomicBool,
}

impl std::fmt::Debug for Catalog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Catalog")
            .field("path", &self.path)
            .field("location", &*self.location.read())
            .field("open", &self.is_open())
            .finish()
    }
}

impl Catalog {
    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Open (or create) the store at `path`.
    pub fn open<P: AsRef<Path>>(path: P) -> CatalogResult<Self> {
        Self::open_with_timeout(path, DEFAULT_BUSY_TIMEOUT)
    }

    /// Open with an explicit busy timeout.
    ///
    /// A missing store file is created and initialized in one transaction.
    /// An existing store is gated on its schema version before anything else
    /// is read from it.
    pub fn open_with_timeout<P: AsRef<Path>>(path: P, busy_timeout: Duration) -> CatalogResult<Self> {
        let path = path.as_ref();
        let parent = match path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => Path::new("."),
        };
        if !parent.is_dir() {
            return Err(CatalogError::NotFound(parent.to_path_buf()));
        }

        let fresh = !path.exists();
        let mut conn = Connection::open(path)?;
        conn.busy_timeout(busy_timeout)?;
        conn.pragma_update(None, "foreign_keys", true)?;

        if fresh {
            let tx = conn.transaction()?;
            schema::initialize(&tx)?;
            tx.commit()?;
            tracing::debug!(path = %path.display(), "initialized new catalog store");
        }

        Self::from_connection(path.to_path_buf(), conn)
    }

    /// Create a store for a new bag. Fails if a store already exists.
    pub fn create<P: AsRef<Path>>(path: P, bag_location: &str) -> CatalogResult<Self> {
        Self::create_with_timeout(path, bag_location, DEFAULT_BUSY_TIMEOUT)
    }

    pub fn create_with_timeout<P: AsRef<Path>>(
        path: P,
        bag_location: &str,
        busy_timeout: Duration,
    ) -> CatalogResult<Self> {
        let path = path.as_ref();
        if path.exists() {
            return Err(CatalogError::AlreadyExists(path.display().to_string()));
        }
        let catalog = Self::open_with_timeout(path, busy_timeout)?;
        catalog.set_location(bag_location)?;
        catalog.compute_and_store_integrity_hash()?;
        Ok(catalog)
    }

    /// Create an in-memory catalog (for testing).
    pub fn in_memory() -> CatalogResult<Self> {
        let mut conn = Connection::open_in_memory()?;
        conn.pragma_update(None, "foreign_keys", true)?;
        let tx = conn.transaction()?;
        schema::initialize(&tx)?;
        tx.commit()?;
        Self::from_connection(PathBuf::from(":memory:"), conn)
    }

    fn from_connection(path: PathBuf, conn: Connection) -> CatalogResult<Self> {
        let (location, version) = read_config(&conn)?;
        Ok(Self {
            path,
            conn: Mutex::new(Some(conn)),
            location: RwLock::new(location),
            version,
            dirty: AtomicBool::new(false),
            suspect: AtomicBool::new(false),
        })
    }

    /// Refresh the integrity hash if needed and drop the connection.
    ///
    /// Closing twice is a no-op.
    pub fn close(&self) -> CatalogResult<()> {
        let mut guard = self.conn.lock();
        let Some(conn) = guard.take() else {
            return Ok(());
        };
        if self.dirty.swap(false, Ordering::SeqCst) && !self.is_suspect() {
            let hash = integrity_digest(&conn)?;
            conn.execute("UPDATE Config SET hash = ?1", params![hash])?;
        }
        conn.close().map_err(|(_, e)| CatalogError::from(e))?;
        tracing::debug!(path = %self.path.display(), "closed catalog");
        Ok(())
    }

    pub fn is_open(&self) -> bool {
        self.conn.lock().is_some()
    }

    /// Path of the store file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn with_conn<T>(&self, f: impl FnOnce(&mut Connection) -> CatalogResult<T>) -> CatalogResult<T> {
        let mut guard = self.conn.lock();
        let conn = guard.as_mut().ok_or(CatalogError::StaleHandle)?;
        f(conn)
    }

    fn mark_dirty(&self) {
        self.dirty.store(true, Ordering::SeqCst);
    }

    // ========================================================================
    // Config
    // ========================================================================

    /// Bag directory relative to the volume root, with `/` separators.
    pub fn location(&self) -> CatalogResult<String> {
        self.with_conn(|_| Ok(self.location.read().clone()))
    }

    pub fn set_location(&self, location: &str) -> CatalogResult<()> {
        let location = normalize_location(location);
        self.with_conn(|conn| {
            conn.execute("UPDATE Config SET location = ?1", params![location])?;
            Ok(())
        })?;
        *self.location.write() = location;
        self.mark_dirty();
        Ok(())
    }

    pub fn version(&self) -> i64 {
        self.version
    }

    // ========================================================================
    // Integrity
    // ========================================================================

    /// Hash the catalog contents and persist the result.
    pub fn compute_and_store_integrity_hash(&self) -> CatalogResult<String> {
        let hash = self.with_conn(|conn| {
            let hash = integrity_digest(conn)?;
            conn.execute("UPDATE Config SET hash = ?1", params![hash])?;
            Ok(hash)
        })?;
        self.dirty.store(false, Ordering::SeqCst);
        self.suspect.store(false, Ordering::SeqCst);
        Ok(hash)
    }

    /// Compare the stored hash against the current contents.
    ///
    /// A store that never recorded a hash does not verify.
    pub fn verify_integrity(&self) -> CatalogResult<bool> {
        self.with_conn(|conn| {
            let stored: Option<String> =
                conn.query_row("SELECT hash FROM Config LIMIT 1", [], |row| row.get(0))?;
            let Some(stored) = stored else {
                return Ok(false);
            };
            Ok(stored == integrity_digest(conn)?)
        })
    }

    /// Store a fresh hash only when something changed since the last one.
    ///
    /// A suspect catalog keeps its stored hash; only a full rebuild through
    /// [`Catalog::compute_and_store_integrity_hash`] clears the flag.
    pub fn refresh_integrity_if_dirty(&self) -> CatalogResult<bool> {
        if self.is_suspect() || !self.dirty.load(Ordering::SeqCst) {
            return Ok(false);
        }
        self.compute_and_store_integrity_hash()?;
        Ok(true)
    }

    pub fn mark_suspect(&self) {
        self.suspect.store(true, Ordering::SeqCst);
    }

    /// Set when discovery found a hash mismatch; cleared by a fresh hash.
    pub fn is_suspect(&self) -> bool {
        self.suspect.load(Ordering::SeqCst)
    }

    // ========================================================================
    // Items
    // ========================================================================

    pub fn get_item(&self, id: &str) -> CatalogResult<Option<Item>> {
        self.with_conn(|conn| {
            let item = conn
                .query_row(
                    &format!("SELECT {ITEM_COLUMNS} FROM Item i WHERE i.id = ?1"),
                    params![id],
                    item_from_row,
                )
                .optional()?;
            Ok(item)
        })
    }

    pub fn insert_item(&self, item: &Item) -> CatalogResult<()> {
        self.with_conn(|conn| {
            match write_item(
                conn,
                "INSERT INTO Item (id, name, ext, size, attr, ct, lwt, lat)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                item,
            ) {
                Ok(_) => Ok(()),
                Err(e) if e.sqlite_error_code() == Some(ErrorCode::ConstraintViolation) => {
                    Err(CatalogError::AlreadyExists(item.id.clone()))
                }
                Err(e) => Err(e.into()),
            }
        })?;
        self.mark_dirty();
        Ok(())
    }

    pub fn update_item(&self, item: &Item) -> CatalogResult<()> {
        let changed = self.with_conn(|conn| {
            Ok(write_item(
                conn,
                "UPDATE Item SET name = ?2, ext = ?3, size = ?4, attr = ?5, ct = ?6, lwt = ?7, lat = ?8
                 WHERE id = ?1",
                item,
            )?)
        })?;
        if changed == 0 {
            return Err(CatalogError::item_not_found(&item.id));
        }
        self.mark_dirty();
        Ok(())
    }

    /// Insert, or refresh the core columns of an existing row. Tag
    /// assignments of an existing row survive.
    pub fn upsert_item(&self, item: &Item) -> CatalogResult<()> {
        self.with_conn(|conn| {
            write_item(
                conn,
                "INSERT INTO Item (id, name, ext, size, attr, ct, lwt, lat)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                 ON CONFLICT(id) DO UPDATE SET
                    name = excluded.name, ext = excluded.ext, size = excluded.size,
                    attr = excluded.attr, ct = excluded.ct, lwt = excluded.lwt, lat = excluded.lat",
                item,
            )?;
            Ok(())
        })?;
        self.mark_dirty();
        Ok(())
    }

    /// Remove an item with its assignments and meta rows, then drop tags no
    /// item carries anymore. Deleting an unknown id is a no-op.
    pub fn delete_item(&self, id: &str) -> CatalogResult<()> {
        self.with_conn(|conn| {
            let tx = conn.transaction()?;
            tx.execute("DELETE FROM ItemTag WHERE itemId = ?1", params![id])?;
            for table in MetaTable::iter() {
                tx.execute(&format!("DELETE FROM {table} WHERE itemId = ?1"), params![id])?;
            }
            tx.execute("DELETE FROM Item WHERE id = ?1", params![id])?;
            prune_orphan_tags(&tx)?;
            tx.commit()?;
            Ok(())
        })?;
        self.mark_dirty();
        Ok(())
    }

    /// Clear every item, assignment, tag and meta row. The extension mapping
    /// and config survive.
    pub fn truncate_items(&self) -> CatalogResult<()> {
        self.with_conn(|conn| {
            let tx = conn.transaction()?;
            tx.execute("DELETE FROM ItemTag", [])?;
            for table in MetaTable::iter() {
                tx.execute(&format!("DELETE FROM {table}"), [])?;
            }
            tx.execute("DELETE FROM Item", [])?;
            tx.execute("DELETE FROM Tag", [])?;
            tx.commit()?;
            Ok(())
        })?;
        self.mark_dirty();
        Ok(())
    }

    pub fn item_count(&self) -> CatalogResult<u64> {
        self.count("SELECT COUNT(*) FROM Item")
    }

    pub fn tag_count(&self) -> CatalogResult<u64> {
        self.count("SELECT COUNT(*) FROM Tag")
    }

    fn count(&self, sql: &str) -> CatalogResult<u64> {
        self.with_conn(|conn| {
            let n: i64 = conn.query_row(sql, [], |row| row.get(0))?;
            Ok(u64::try_from(n).unwrap_or(0))
        })
    }

    // ========================================================================
    // Tags
    // ========================================================================

    pub fn tags_for_item(&self, item_id: &str) -> CatalogResult<BTreeSet<Tag>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT t.id, t.rootVisible FROM ItemTag it
                 JOIN Tag t ON t.id = it.tagId
                 WHERE it.itemId = ?1",
            )?;
            let rows = stmt.query_map(params![item_id], tag_from_row)?;
            Ok(rows.collect::<rusqlite::Result<BTreeSet<_>>>()?)
        })
    }

    /// Attach a tag to an item, creating the tag (not root-visible) if needed.
    pub fn assign_tag(&self, item_id: &str, tag_id: &str) -> CatalogResult<()> {
        let tag = normalize_tag(tag_id)?;
        self.with_conn(|conn| {
            let tx = conn.transaction()?;
            let exists = tx
                .query_row("SELECT 1 FROM Item WHERE id = ?1", params![item_id], |_| Ok(()))
                .optional()?
                .is_some();
            if !exists {
                return Err(CatalogError::item_not_found(item_id));
            }
            tx.execute(
                "INSERT OR IGNORE INTO Tag (id, rootVisible) VALUES (?1, 0)",
                params![tag],
            )?;
            tx.execute(
                "INSERT OR IGNORE INTO ItemTag (itemId, tagId) VALUES (?1, ?2)",
                params![item_id, tag],
            )?;
            tx.commit()?;
            Ok(())
        })?;
        self.mark_dirty();
        Ok(())
    }

    /// Create a tag if absent. Root visibility is only ever raised.
    pub fn ensure_tag(&self, tag_id: &str, root_visible: bool) -> CatalogResult<()> {
        let tag = normalize_tag(tag_id)?;
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO Tag (id, rootVisible) VALUES (?1, ?2)
                 ON CONFLICT(id) DO UPDATE SET rootVisible = MAX(rootVisible, excluded.rootVisible)",
                params![tag, root_visible],
            )?;
            Ok(())
        })?;
        self.mark_dirty();
        Ok(())
    }

    pub fn unassign_tag(&self, item_id: &str, tag_id: &str) -> CatalogResult<()> {
        let tag = normalize_tag(tag_id)?;
        self.with_conn(|conn| {
            let tx = conn.transaction()?;
            tx.execute(
                "DELETE FROM ItemTag WHERE itemId = ?1 AND tagId = ?2",
                params![item_id, tag],
            )?;
            prune_orphan_tags(&tx)?;
            tx.commit()?;
            Ok(())
        })?;
        self.mark_dirty();
        Ok(())
    }

    pub fn tag_exists(&self, tag_id: &str) -> CatalogResult<bool> {
        let tag = Tag::normalize(tag_id);
        self.with_conn(|conn| {
            let found = conn
                .query_row("SELECT 1 FROM Tag WHERE id = ?1", params![tag], |_| Ok(()))
                .optional()?;
            Ok(found.is_some())
        })
    }

    /// Tags shown at the top level of the virtual drive.
    pub fn root_tags(&self) -> CatalogResult<BTreeSet<Tag>> {
        self.with_conn(|conn| {
            let mut stmt =
                conn.prepare("SELECT id, rootVisible FROM Tag WHERE rootVisible = 1 ORDER BY id")?;
            let rows = stmt.query_map([], tag_from_row)?;
            Ok(rows.collect::<rusqlite::Result<BTreeSet<_>>>()?)
        })
    }

    /// Items carrying every tag in `tags`.
    pub fn items_matching_all<I, S>(&self, tags: I) -> CatalogResult<Vec<Item>>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let tags = tag_set(tags)?;
        let sql = format!(
            "SELECT {ITEM_COLUMNS} FROM Item i{} ORDER BY i.id",
            tag_joins(tags.len())
        );
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map(params_from_iter(tags.iter()), item_from_row)?;
            Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
        })
    }

    /// Tags that co-occur on items carrying every tag in `tags`, minus `tags`.
    pub fn descendant_tags<I, S>(&self, tags: I) -> CatalogResult<BTreeSet<String>>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let tags = tag_set(tags)?;
        let sql = format!(
            "SELECT DISTINCT x.tagId FROM ItemTag x
             WHERE x.itemId IN (SELECT i.id FROM Item i{})",
            tag_joins(tags.len())
        );
        let found = self.with_conn(|conn| {
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map(params_from_iter(tags.iter()), |row| row.get::<_, String>(0))?;
            Ok(rows.collect::<rusqlite::Result<BTreeSet<_>>>()?)
        })?;
        Ok(found.difference(&tags).cloned().collect())
    }

    /// Category tag configured for an extension in this store.
    pub fn default_tag_for_extension(&self, ext: &str) -> CatalogResult<Option<String>> {
        let ext = ext.trim_start_matches('.').to_ascii_lowercase();
        self.with_conn(|conn| {
            let tag = conn
                .query_row(
                    "SELECT tagId FROM ExtensionTag WHERE ext = ?1",
                    params![ext],
                    |row| row.get(0),
                )
                .optional()?;
            Ok(tag)
        })
    }

    // ========================================================================
    // Meta records
    // ========================================================================

    /// Persist an extractor's specialization row keyed by `item_id`.
    pub fn insert_meta_record(&self, item_id: &str, record: &MetaRecord) -> CatalogResult<()> {
        for column in record.columns.keys() {
            if !record.table.has_column(column) {
                return Err(CatalogError::UnknownMetaTable {
                    table: record.table.to_string(),
                    column: column.clone(),
                });
            }
        }

        let mut names = vec!["itemId".to_string()];
        let mut values = vec![item_id.to_string()];
        for (column, value) in &record.columns {
            names.push(format!("\"{column}\""));
            values.push(value.clone());
        }
        let placeholders: Vec<String> = (1..=values.len()).map(|n| format!("?{n}")).collect();
        let sql = format!(
            "INSERT OR REPLACE INTO {} ({}) VALUES ({})",
            record.table,
            names.join(", "),
            placeholders.join(", ")
        );

        self.with_conn(|conn| {
            match conn.execute(&sql, params_from_iter(values.iter())) {
                Ok(_) => Ok(()),
                Err(e) if e.sqlite_error_code() == Some(ErrorCode::ConstraintViolation) => {
                    Err(CatalogError::item_not_found(item_id))
                }
                Err(e) => Err(e.into()),
            }
        })?;
        self.mark_dirty();
        Ok(())
    }

    /// One column of an item's meta row.
    pub fn meta_value(
        &self,
        table: MetaTable,
        item_id: &str,
        column: &str,
    ) -> CatalogResult<Option<String>> {
        checked_column(table, column)?;
        let sql = format!("SELECT \"{column}\" FROM {table} WHERE itemId = ?1");
        self.with_conn(|conn| {
            let value = conn
                .query_row(&sql, params![item_id], |row| row.get::<_, Option<String>>(0))
                .optional()?;
            Ok(value.flatten())
        })
    }

    // ========================================================================
    // Aliases
    // ========================================================================

    /// Column aliases declared for `table`, ordered by name. Rows naming a
    /// column the table does not have are ignored.
    pub fn aliases(&self, table: MetaTable) -> CatalogResult<Vec<MetaAlias>> {
        let rows = self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT alias, colName FROM MetaAlias
                 WHERE tableName = ?1 AND queryType = 'column'
                 ORDER BY alias, colName",
            )?;
            let rows = stmt.query_map(params![table.to_string()], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
            })?;
            Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
        })?;

        Ok(rows
            .into_iter()
            .filter_map(|(alias, column)| {
                if table.has_column(&column) {
                    Some(MetaAlias { alias, table, column })
                } else {
                    tracing::debug!(%table, alias = %alias, column = %column, "ignoring alias on unknown column");
                    None
                }
            })
            .collect())
    }

    /// Aliases of `table` and of every table extending it.
    pub fn aliases_for_family(&self, table: MetaTable) -> CatalogResult<Vec<MetaAlias>> {
        let mut all = Vec::new();
        for member in table.family() {
            all.extend(self.aliases(member)?);
        }
        Ok(all)
    }

    /// Distinct non-blank values of an alias column among items tagged `tag`.
    pub fn alias_values(&self, tag: &str, alias: &MetaAlias) -> CatalogResult<BTreeSet<String>> {
        let tag = normalize_tag(tag)?;
        checked_column(alias.table, &alias.column)?;
        let sql = format!(
            "SELECT DISTINCT m.\"{col}\" FROM {table} m
             INNER JOIN ItemTag it ON it.itemId = m.itemId AND it.tagId = ?1
             WHERE m.\"{col}\" IS NOT NULL AND TRIM(m.\"{col}\") <> ''",
            col = alias.column,
            table = alias.table,
        );
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map(params![tag], |row| row.get::<_, String>(0))?;
            Ok(rows.collect::<rusqlite::Result<BTreeSet<_>>>()?)
        })
    }

    /// Items tagged `tag` whose alias column equals `value`, ignoring case.
    pub fn items_by_alias(
        &self,
        tag: &str,
        alias: &MetaAlias,
        value: &str,
    ) -> CatalogResult<Vec<Item>> {
        let tag = normalize_tag(tag)?;
        checked_column(alias.table, &alias.column)?;
        let sql = format!(
            "SELECT {ITEM_COLUMNS} FROM Item i
             INNER JOIN ItemTag it ON it.itemId = i.id AND it.tagId = ?1
             INNER JOIN {table} m ON m.itemId = i.id
             WHERE m.\"{col}\" = ?2 COLLATE NOCASE
             ORDER BY i.id",
            col = alias.column,
            table = alias.table,
        );
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map(params![tag, value], item_from_row)?;
            Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
        })
    }
}

// ============================================================================
// Row helpers
// ============================================================================

fn read_config(conn: &Connection) -> CatalogResult<(String, i64)> {
    let row = conn.query_row("SELECT location, version FROM Config LIMIT 1", [], |row| {
        Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
    });
    match row {
        Ok((location, version)) if version == SUPPORTED_SCHEMA_VERSION => Ok((location, version)),
        Ok((_, version)) => Err(CatalogError::IncompatibleSchema {
            found: Some(version),
            supported: SUPPORTED_SCHEMA_VERSION,
        }),
        Err(rusqlite::Error::QueryReturnedNoRows) => Err(CatalogError::IncompatibleSchema {
            found: None,
            supported: SUPPORTED_SCHEMA_VERSION,
        }),
        Err(e) => match CatalogError::from(e) {
            // Missing Config table or column: not a store we know.
            CatalogError::Sqlite(_) => Err(CatalogError::IncompatibleSchema {
                found: None,
                supported: SUPPORTED_SCHEMA_VERSION,
            }),
            other => Err(other),
        },
    }
}

fn item_from_row(row: &Row<'_>) -> rusqlite::Result<Item> {
    Ok(Item {
        id: row.get(0)?,
        display_name: row.get(1)?,
        extension: row.get(2)?,
        size: u64::try_from(row.get::<_, i64>(3)?).unwrap_or(0),
        attributes: FileAttributes::from_bits_retain(row.get::<_, u32>(4)?),
        created_at: from_unix(row.get(5)?),
        modified_at: from_unix(row.get(6)?),
        accessed_at: from_unix(row.get(7)?),
    })
}

fn write_item(conn: &Connection, sql: &str, item: &Item) -> rusqlite::Result<usize> {
    conn.execute(
        sql,
        params![
            item.id,
            item.display_name,
            item.extension,
            i64::try_from(item.size).unwrap_or(i64::MAX),
            item.attributes.bits(),
            to_unix(&item.created_at),
            to_unix(&item.modified_at),
            to_unix(&item.accessed_at),
        ],
    )
}

fn tag_from_row(row: &Row<'_>) -> rusqlite::Result<Tag> {
    Ok(Tag {
        id: row.get(0)?,
        root_visible: row.get(1)?,
    })
}

fn prune_orphan_tags(conn: &Connection) -> rusqlite::Result<usize> {
    conn.execute(
        "DELETE FROM Tag WHERE id NOT IN (SELECT DISTINCT tagId FROM ItemTag)",
        [],
    )
}

/// Column names are spliced into SQL, so only the table's own are accepted.
fn checked_column(table: MetaTable, column: &str) -> CatalogResult<()> {
    if table.has_column(column) {
        Ok(())
    } else {
        Err(CatalogError::UnknownMetaTable {
            table: table.to_string(),
            column: column.to_string(),
        })
    }
}

fn normalize_tag(raw: &str) -> CatalogResult<String> {
    let tag = Tag::normalize(raw);
    if tag.is_empty() {
        return Err(CatalogError::invalid_query("tag id is empty"));
    }
    Ok(tag)
}

fn tag_set<I, S>(tags: I) -> CatalogResult<BTreeSet<String>>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let set: BTreeSet<String> = tags
        .into_iter()
        .map(|t| Tag::normalize(t.as_ref()))
        .filter(|t| !t.is_empty())
        .collect();
    if set.is_empty() {
        return Err(CatalogError::invalid_query("at least one tag is required"));
    }
    Ok(set)
}

/// One self-join on ItemTag per required tag, bound to `?1..?n`.
fn tag_joins(count: usize) -> String {
    (0..count)
        .map(|n| {
            format!(
                " INNER JOIN ItemTag t{n} ON t{n}.itemId = i.id AND t{n}.tagId = ?{}",
                n + 1
            )
        })
        .collect()
}

fn normalize_location(raw: &str) -> String {
    raw.replace('\\', "/").trim_matches('/').to_string()
}

fn integrity_digest(conn: &Connection) -> CatalogResult<String> {
    let (location, version): (String, i64) =
        conn.query_row("SELECT location, version FROM Config LIMIT 1", [], |row| {
            Ok((row.get(0)?, row.get(1)?))
        })?;

    let mut hasher = Sha256::new();
    feed(&mut hasher, location.as_bytes());
    hasher.update(version.to_le_bytes());

    hasher.update(b"Item");
    let mut stmt =
        conn.prepare("SELECT id, name, ext, size, attr, ct, lwt, lat FROM Item ORDER BY id")?;
    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        for idx in 0..3 {
            feed(&mut hasher, row.get::<_, String>(idx)?.as_bytes());
        }
        for idx in 3..8 {
            hasher.update(row.get::<_, i64>(idx)?.to_le_bytes());
        }
    }

    hasher.update(b"Tag");
    let mut stmt = conn.prepare("SELECT id, rootVisible FROM Tag ORDER BY id")?;
    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        feed(&mut hasher, row.get::<_, String>(0)?.as_bytes());
        hasher.update([u8::from(row.get::<_, bool>(1)?)]);
    }

    hasher.update(b"ItemTag");
    let mut stmt = conn.prepare("SELECT itemId, tagId FROM ItemTag ORDER BY itemId, tagId")?;
    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        feed(&mut hasher, row.get::<_, String>(0)?.as_bytes());
        feed(&mut hasher, row.get::<_, String>(1)?.as_bytes());
    }

    Ok(hasher
        .finalize()
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect())
}

/// Length-prefixed so adjacent fields cannot alias.
fn feed(hasher: &mut Sha256, bytes: &[u8]) {
    hasher.update((bytes.len() as u64).to_le_bytes());
    hasher.update(bytes);
}
