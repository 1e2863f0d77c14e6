//! Catalog store schema.

use rusqlite::{Transaction, params};

use crate::constants::SUPPORTED_SCHEMA_VERSION;
use super::MetaTable;
use crate::meta::Category;

pub(crate) const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS Config (
    location TEXT NOT NULL DEFAULT '',
    version INTEGER NOT NULL,
    hash TEXT
);

CREATE TABLE IF NOT EXISTS Item (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    ext TEXT NOT NULL,
    size INTEGER NOT NULL,
    attr INTEGER NOT NULL,
    ct INTEGER NOT NULL,
    lwt INTEGER NOT NULL,
    lat INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS Tag (
    id TEXT PRIMARY KEY,
    rootVisible INTEGER NOT NULL DEFAULT 0
);

CREATE TABLE IF NOT EXISTS ItemTag (
    itemId TEXT NOT NULL REFERENCES Item(id) ON DELETE CASCADE,
    tagId TEXT NOT NULL REFERENCES Tag(id) ON DELETE CASCADE,
    PRIMARY KEY (itemId, tagId)
);

CREATE INDEX IF NOT EXISTS idx_itemtag_tag ON ItemTag(tagId, itemId);

CREATE TABLE IF NOT EXISTS ExtensionTag (
    ext TEXT PRIMARY KEY,
    tagId TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS PictureMeta (
    itemId TEXT PRIMARY KEY REFERENCES Item(id) ON DELETE CASCADE
);

CREATE TABLE IF NOT EXISTS PictureJpegMeta (
    itemId TEXT PRIMARY KEY REFERENCES Item(id) ON DELETE CASCADE,
    model TEXT,
    iso TEXT,
    fstop TEXT,
    artist TEXT,
    year TEXT
);

CREATE TABLE IF NOT EXISTS MusicMeta (
    itemId TEXT PRIMARY KEY REFERENCES Item(id) ON DELETE CASCADE
);

CREATE TABLE IF NOT EXISTS MusicExtMeta (
    itemId TEXT PRIMARY KEY REFERENCES Item(id) ON DELETE CASCADE,
    title TEXT,
    artist TEXT,
    album TEXT,
    year TEXT
);

CREATE TABLE IF NOT EXISTS VideoMeta (
    itemId TEXT PRIMARY KEY REFERENCES Item(id) ON DELETE CASCADE,
    year TEXT
);

CREATE TABLE IF NOT EXISTS DocumentMeta (
    itemId TEXT PRIMARY KEY REFERENCES Item(id) ON DELETE CASCADE,
    year TEXT
);

CREATE TABLE IF NOT EXISTS MiscMeta (
    itemId TEXT PRIMARY KEY REFERENCES Item(id) ON DELETE CASCADE,
    year TEXT
);

CREATE TABLE IF NOT EXISTS MetaAlias (
    alias TEXT NOT NULL,
    colName TEXT NOT NULL,
    tableName TEXT NOT NULL,
    queryType TEXT NOT NULL DEFAULT 'column',
    queryStr TEXT,
    PRIMARY KEY (alias, colName, tableName)
);
"#;

/// Folders offered under each category: (alias, column, table).
const SEEDED_ALIASES: &[(&str, &str, MetaTable)] = &[
    ("Camera", "model", MetaTable::PictureJpegMeta),
    ("Year", "year", MetaTable::PictureJpegMeta),
    ("Artist", "artist", MetaTable::MusicExtMeta),
    ("Album", "album", MetaTable::MusicExtMeta),
    ("Year", "year", MetaTable::MusicExtMeta),
    ("Year", "year", MetaTable::VideoMeta),
    ("Year", "year", MetaTable::DocumentMeta),
    ("Year", "year", MetaTable::MiscMeta),
];

/// Populate a brand new store. Runs inside the caller's transaction so a
/// half-initialized store is never left behind.
pub(crate) fn initialize(tx: &Transaction<'_>) -> rusqlite::Result<()> {
    tx.execute_batch(SCHEMA)?;
    tx.execute(
        "INSERT INTO Config (location, version, hash) VALUES ('', ?1, NULL)",
        params![SUPPORTED_SCHEMA_VERSION],
    )?;

    let mut stmt = tx.prepare("INSERT OR IGNORE INTO ExtensionTag (ext, tagId) VALUES (?1, ?2)")?;
    for category in Category::SEEDED {
        let tag: &str = category.as_ref();
        for ext in category.extensions() {
            stmt.execute(params![ext, tag])?;
        }
    }

    let mut stmt = tx.prepare(
        "INSERT OR IGNORE INTO MetaAlias (alias, colName, tableName, queryType) VALUES (?1, ?2, ?3, 'column')",
    )?;
    for (alias, column, table) in SEEDED_ALIASES {
        stmt.execute(params![alias, column, table.to_string()])?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rusqlite::Connection;

    #[test]
    fn test_initialize_seeds_config_and_extensions() {
        let mut conn = Connection::open_in_memory().unwrap();
        let tx = conn.transaction().unwrap();
        initialize(&tx).unwrap();
        tx.commit().unwrap();

        let version: i64 = conn
            .query_row("SELECT version FROM Config", [], |row| row.get(0))
            .unwrap();
        assert_eq!(version, SUPPORTED_SCHEMA_VERSION);

        let tag: String = conn
            .query_row("SELECT tagId FROM ExtensionTag WHERE ext = 'mp3'", [], |row| {
                row.get(0)
            })
            .unwrap();
        assert_eq!(tag, "music");

        let music_aliases: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM MetaAlias WHERE tableName = 'MusicExtMeta'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(music_aliases, 3);
    }
}
