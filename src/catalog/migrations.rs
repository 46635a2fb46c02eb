//! Versioned, forward-only schema migrations for the metadata catalog.
//!
//! Migrations are append-only and each step is idempotent with respect to
//! re-application (`IF NOT EXISTS` / column-exists probes), per spec §4.4.
//! A fresh database skips straight to [`create_initial_schema`] rather than
//! replaying every historical step.

use crate::{Error, Result};
use rusqlite::{Connection, OptionalExtension};

/// Current schema version this build targets.
pub const TARGET_VERSION: i64 = 6;

pub struct SchemaMigrator;

impl SchemaMigrator {
    pub fn current_version(conn: &Connection) -> Result<i64> {
        let exists: bool = conn
            .query_row(
                "SELECT 1 FROM sqlite_master WHERE type='table' AND name='schema_version'",
                [],
                |_| Ok(true),
            )
            .optional()?
            .unwrap_or(false);
        if !exists {
            return Ok(0);
        }
        let version: Option<i64> = conn
            .query_row("SELECT version FROM schema_version LIMIT 1", [], |row| row.get(0))
            .optional()?;
        Ok(version.unwrap_or(0))
    }

    pub fn target_version() -> i64 {
        TARGET_VERSION
    }

    /// Bring `conn` up to `target_version()`. No-op if already current; fails
    /// `SchemaNewerThanCode` if the stored version exceeds the target.
    pub fn migrate(conn: &mut Connection) -> Result<()> {
        let current = Self::current_version(conn)?;
        if current == TARGET_VERSION {
            return Ok(());
        }
        if current > TARGET_VERSION {
            return Err(Error::SchemaNewerThanCode {
                stored: current,
                target: TARGET_VERSION,
            });
        }

        if current == 0 {
            let tx = conn.transaction()?;
            Self::create_initial_schema(&tx)?;
            tx.commit()?;
            return Ok(());
        }

        for version in (current + 1)..=TARGET_VERSION {
            let tx = conn.transaction()?;
            Self::apply_migration(&tx, version).map_err(|e| Error::MigrationFailed {
                version,
                reason: e.to_string(),
            })?;
            tx.execute("DELETE FROM schema_version", [])?;
            tx.execute("INSERT INTO schema_version(version) VALUES (?1)", [version])?;
            tx.commit()?;
        }
        Ok(())
    }

    /// Used when `current_version == 0`: writes the full DDL for
    /// `TARGET_VERSION` directly, then records that version.
    pub fn create_initial_schema(conn: &Connection) -> Result<()> {
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS snapshots (
                id TEXT PRIMARY KEY,
                name TEXT UNIQUE NOT NULL,
                created_at INTEGER NOT NULL,
                description TEXT,
                parent_id TEXT,
                total_files INTEGER NOT NULL DEFAULT 0,
                total_size INTEGER NOT NULL DEFAULT 0,
                merkle_root TEXT
            );

            CREATE TABLE IF NOT EXISTS chunks (
                hash TEXT PRIMARY KEY,
                size INTEGER NOT NULL,
                first_seen INTEGER NOT NULL,
                reference_count INTEGER NOT NULL DEFAULT 1,
                last_accessed INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS files (
                id TEXT PRIMARY KEY,
                snapshot_id TEXT NOT NULL REFERENCES snapshots(id) ON DELETE CASCADE,
                path TEXT NOT NULL,
                size INTEGER NOT NULL,
                modified_time INTEGER NOT NULL,
                file_hash TEXT NOT NULL,
                encryption_mode TEXT NOT NULL DEFAULT 'NONE',
                UNIQUE(snapshot_id, path)
            );

            CREATE TABLE IF NOT EXISTS file_chunks (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                file_id TEXT NOT NULL REFERENCES files(id) ON DELETE CASCADE,
                chunk_hash TEXT NOT NULL REFERENCES chunks(hash) ON DELETE CASCADE,
                chunk_order INTEGER NOT NULL,
                chunk_size INTEGER NOT NULL,
                UNIQUE(file_id, chunk_order)
            );

            CREATE TABLE IF NOT EXISTS file_keywords (
                file_id TEXT NOT NULL REFERENCES files(id) ON DELETE CASCADE,
                keyword_hash TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_file_keywords_hash ON file_keywords(keyword_hash);
            CREATE INDEX IF NOT EXISTS idx_file_keywords_file ON file_keywords(file_id);

            CREATE TABLE IF NOT EXISTS merkle_nodes (
                hash TEXT PRIMARY KEY,
                type TEXT NOT NULL CHECK(type IN ('FILE','DIRECTORY')),
                name TEXT NOT NULL,
                size INTEGER NOT NULL,
                children BLOB,
                file_id TEXT,
                compression TEXT
            );

            CREATE VIRTUAL TABLE IF NOT EXISTS files_fts USING fts5(file_id UNINDEXED, path);

            CREATE TRIGGER IF NOT EXISTS files_fts_ai AFTER INSERT ON files BEGIN
                INSERT INTO files_fts(file_id, path) VALUES (new.id, new.path);
            END;
            CREATE TRIGGER IF NOT EXISTS files_fts_ad AFTER DELETE ON files BEGIN
                DELETE FROM files_fts WHERE file_id = old.id;
            END;
            CREATE TRIGGER IF NOT EXISTS files_fts_au AFTER UPDATE ON files BEGIN
                DELETE FROM files_fts WHERE file_id = old.id;
                INSERT INTO files_fts(file_id, path) VALUES (new.id, new.path);
            END;

            CREATE TABLE IF NOT EXISTS schema_version (version INTEGER PRIMARY KEY);
            ",
        )?;
        conn.execute("DELETE FROM schema_version", [])?;
        conn.execute(
            "INSERT INTO schema_version(version) VALUES (?1)",
            [TARGET_VERSION],
        )?;
        Ok(())
    }

    /// Returns true iff current==target and every required table exists.
    pub fn validate(conn: &Connection) -> Result<bool> {
        if Self::current_version(conn)? != TARGET_VERSION {
            return Ok(false);
        }
        const REQUIRED: &[&str] = &[
            "snapshots",
            "files",
            "file_chunks",
            "chunks",
            "file_keywords",
            "merkle_nodes",
            "schema_version",
        ];
        for table in REQUIRED {
            let exists: bool = conn
                .query_row(
                    "SELECT 1 FROM sqlite_master WHERE type IN ('table','view') AND name=?1",
                    [table],
                    |_| Ok(true),
                )
                .optional()?
                .unwrap_or(false);
            if !exists {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Incremental step applied when upgrading an existing database that is
    /// below `TARGET_VERSION`. A brand-new database never goes through this
    /// path (see `create_initial_schema`).
    fn apply_migration(conn: &Connection, version: i64) -> Result<()> {
        match version {
            1 => conn.execute_batch(
                "
                CREATE TABLE IF NOT EXISTS snapshots (
                    id TEXT PRIMARY KEY, name TEXT UNIQUE NOT NULL, created_at INTEGER NOT NULL,
                    description TEXT, parent_id TEXT, total_files INTEGER NOT NULL DEFAULT 0,
                    total_size INTEGER NOT NULL DEFAULT 0, merkle_root TEXT
                );
                CREATE TABLE IF NOT EXISTS files (
                    id TEXT PRIMARY KEY, snapshot_id TEXT NOT NULL, path TEXT NOT NULL,
                    size INTEGER NOT NULL, modified_time INTEGER NOT NULL, file_hash TEXT NOT NULL,
                    UNIQUE(snapshot_id, path)
                );
                CREATE TABLE IF NOT EXISTS file_chunks (
                    id INTEGER PRIMARY KEY AUTOINCREMENT, file_id TEXT NOT NULL,
                    chunk_hash TEXT NOT NULL, chunk_order INTEGER NOT NULL, chunk_size INTEGER NOT NULL,
                    UNIQUE(file_id, chunk_order)
                );
                CREATE TABLE IF NOT EXISTS chunks (
                    hash TEXT PRIMARY KEY, size INTEGER NOT NULL, first_seen INTEGER NOT NULL,
                    reference_count INTEGER NOT NULL DEFAULT 1, last_accessed INTEGER NOT NULL
                );
                ",
            ),
            2 => conn.execute_batch(
                "
                CREATE TABLE file_chunks_new (
                    id INTEGER PRIMARY KEY AUTOINCREMENT, file_id TEXT NOT NULL,
                    chunk_hash TEXT NOT NULL REFERENCES chunks(hash) ON DELETE CASCADE,
                    chunk_order INTEGER NOT NULL, chunk_size INTEGER NOT NULL,
                    UNIQUE(file_id, chunk_order)
                );
                INSERT INTO file_chunks_new SELECT * FROM file_chunks;
                DROP TABLE file_chunks;
                ALTER TABLE file_chunks_new RENAME TO file_chunks;
                ",
            ),
            3 => conn.execute_batch(
                "
                CREATE VIRTUAL TABLE IF NOT EXISTS files_fts USING fts5(file_id UNINDEXED, path);
                CREATE TRIGGER IF NOT EXISTS files_fts_ai AFTER INSERT ON files BEGIN
                    INSERT INTO files_fts(file_id, path) VALUES (new.id, new.path);
                END;
                CREATE TRIGGER IF NOT EXISTS files_fts_ad AFTER DELETE ON files BEGIN
                    DELETE FROM files_fts WHERE file_id = old.id;
                END;
                CREATE TRIGGER IF NOT EXISTS files_fts_au AFTER UPDATE ON files BEGIN
                    DELETE FROM files_fts WHERE file_id = old.id;
                    INSERT INTO files_fts(file_id, path) VALUES (new.id, new.path);
                END;
                INSERT INTO files_fts(file_id, path) SELECT id, path FROM files;
                ",
            ),
            4 => {
                if !column_exists(conn, "files", "encryption_mode")? {
                    conn.execute(
                        "ALTER TABLE files ADD COLUMN encryption_mode TEXT NOT NULL DEFAULT 'NONE'",
                        [],
                    )?;
                }
                conn.execute_batch(
                    "CREATE TABLE IF NOT EXISTS file_keywords (
                        file_id TEXT NOT NULL REFERENCES files(id) ON DELETE CASCADE,
                        keyword_hash TEXT NOT NULL
                    );
                    CREATE INDEX IF NOT EXISTS idx_file_keywords_hash ON file_keywords(keyword_hash);
                    CREATE INDEX IF NOT EXISTS idx_file_keywords_file ON file_keywords(file_id);",
                )
            }
            5 => conn.execute_batch(
                "CREATE TABLE IF NOT EXISTS merkle_nodes (
                    hash TEXT PRIMARY KEY, type TEXT NOT NULL CHECK(type IN ('FILE','DIRECTORY')),
                    name TEXT NOT NULL, size INTEGER NOT NULL, children BLOB, file_id TEXT
                );",
            ),
            6 => {
                if !column_exists(conn, "merkle_nodes", "compression")? {
                    conn.execute("ALTER TABLE merkle_nodes ADD COLUMN compression TEXT", [])?;
                }
                if !column_exists(conn, "snapshots", "merkle_root")? {
                    conn.execute("ALTER TABLE snapshots ADD COLUMN merkle_root TEXT", [])?;
                }
                Ok(())
            }
            other => unreachable!("no migration step defined for version {other}"),
        }
        .map_err(Error::from)
    }
}

fn column_exists(conn: &Connection, table: &str, column: &str) -> Result<bool> {
    let mut stmt = conn.prepare(&format!("PRAGMA table_info({table})"))?;
    let found = stmt
        .query_map([], |row| row.get::<_, String>(1))?
        .collect::<rusqlite::Result<Vec<_>>>()?
        .into_iter()
        .any(|name| name == column);
    Ok(found)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_db_migrates_to_target() {
        let mut conn = Connection::open_in_memory().unwrap();
        assert_eq!(SchemaMigrator::current_version(&conn).unwrap(), 0);
        SchemaMigrator::migrate(&mut conn).unwrap();
        assert_eq!(SchemaMigrator::current_version(&conn).unwrap(), TARGET_VERSION);
        assert!(SchemaMigrator::validate(&conn).unwrap());
    }

    #[test]
    fn migrate_is_idempotent() {
        let mut conn = Connection::open_in_memory().unwrap();
        SchemaMigrator::migrate(&mut conn).unwrap();
        SchemaMigrator::migrate(&mut conn).unwrap();
        assert_eq!(SchemaMigrator::current_version(&conn).unwrap(), TARGET_VERSION);
    }

    #[test]
    fn newer_stored_version_fails() {
        let mut conn = Connection::open_in_memory().unwrap();
        SchemaMigrator::migrate(&mut conn).unwrap();
        conn.execute("UPDATE schema_version SET version = ?1", [TARGET_VERSION + 1])
            .unwrap();
        let err = SchemaMigrator::migrate(&mut conn).unwrap_err();
        assert!(matches!(err, Error::SchemaNewerThanCode { .. }));
    }

    #[test]
    fn stepwise_migration_from_v1_reaches_target() {
        let mut conn = Connection::open_in_memory().unwrap();
        let tx = conn.transaction().unwrap();
        SchemaMigrator::apply_migration(&tx, 1).unwrap();
        tx.execute("CREATE TABLE IF NOT EXISTS schema_version (version INTEGER PRIMARY KEY)", [])
            .unwrap();
        tx.execute("INSERT INTO schema_version(version) VALUES (1)", [])
            .unwrap();
        tx.commit().unwrap();

        SchemaMigrator::migrate(&mut conn).unwrap();
        assert_eq!(SchemaMigrator::current_version(&conn).unwrap(), TARGET_VERSION);
        assert!(SchemaMigrator::validate(&conn).unwrap());
    }
}
