//! Transactional relational metadata catalog: snapshots, files, file↔chunk
//! edges, chunk stats, Merkle nodes, and FTS/blind-index search.
//!
//! Backed by a pooled SQLite connection (`r2d2` + `r2d2_sqlite`), generalized
//! from the single `Arc<Mutex<Connection>>` pattern this is grounded on
//! because spec §5 requires a connection pool bounded by `max_connections`,
//! not one exclusive mutex.

pub mod chunk_meta;
pub mod file;
pub mod merkle_store;
pub mod migrations;
pub mod search;
pub mod snapshot;
pub mod types;

pub use types::{ChunkMetadata, EncryptionMode, FileMetadata, SnapshotRow};

use crate::config::RepoConfig;
use crate::merkle::MerkleNode;
use crate::{Error, Result};
use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;
use std::path::Path;
use std::time::Duration;

pub type Conn = PooledConnection<SqliteConnectionManager>;

/// The metadata catalog. Cloning is cheap (the pool is internally
/// reference-counted) so a `Catalog` handle can be shared across worker
/// threads the way `SnapshotService` fans ingest out with `rayon`.
#[derive(Clone)]
pub struct Catalog {
    pool: Pool<SqliteConnectionManager>,
    busy_timeout: Duration,
}

impl Catalog {
    /// Opens (creating if absent) the catalog at `db_path`, applying pragmas
    /// from spec §4.3.4 and migrating to the current schema version.
    pub fn open<P: AsRef<Path>>(db_path: P, config: &RepoConfig) -> Result<Self> {
        let busy_timeout = Duration::from_millis(config.busy_timeout_ms);
        let manager = SqliteConnectionManager::file(db_path.as_ref()).with_init(move |conn| {
            conn.execute_batch(
                "PRAGMA journal_mode=WAL;
                 PRAGMA synchronous=NORMAL;
                 PRAGMA foreign_keys=ON;
                 PRAGMA temp_store=MEMORY;
                 PRAGMA mmap_size=268435456;",
            )?;
            conn.busy_timeout(busy_timeout)?;
            Ok(())
        });

        let pool = Pool::builder()
            .max_size(config.max_connections)
            .build(manager)
            .map_err(Error::from)?;

        let catalog = Self { pool, busy_timeout };
        let mut conn = catalog.pooled()?;
        migrations::SchemaMigrator::migrate(&mut conn)?;
        Ok(catalog)
    }

    /// An in-memory catalog for tests; `DELETE`-style journal per spec
    /// §4.3.4's test carve-out.
    pub fn open_in_memory() -> Result<Self> {
        let manager = SqliteConnectionManager::memory().with_init(|conn| {
            conn.execute_batch("PRAGMA journal_mode=DELETE; PRAGMA foreign_keys=ON;")?;
            Ok(())
        });
        let pool = Pool::builder().max_size(1).build(manager).map_err(Error::from)?;
        let catalog = Self {
            pool,
            busy_timeout: Duration::from_secs(5),
        };
        let mut conn = catalog.pooled()?;
        migrations::SchemaMigrator::migrate(&mut conn)?;
        Ok(catalog)
    }

    pub fn pooled(&self) -> Result<Conn> {
        self.pool.get().map_err(Error::from)
    }

    /// Runs `f` inside a transaction; commits on `Ok`, rolls back (via
    /// rusqlite's drop-without-commit semantics) on `Err`.
    pub fn with_transaction<T>(&self, f: impl FnOnce(&rusqlite::Transaction) -> Result<T>) -> Result<T> {
        let mut conn = self.pooled()?;
        let tx = conn.transaction()?;
        let value = f(&tx)?;
        tx.commit()?;
        Ok(value)
    }

    // --- Snapshot -----------------------------------------------------

    pub fn create_snapshot(&self, name: &str, description: Option<&str>, parent_id: Option<&str>, now: i64) -> Result<SnapshotRow> {
        self.with_transaction(|tx| snapshot::create(tx, name, description, parent_id, now))
    }

    pub fn get_snapshot(&self, id: &str) -> Result<SnapshotRow> {
        snapshot::get(&self.pooled()?, id)
    }

    pub fn get_snapshot_by_name(&self, name: &str) -> Result<SnapshotRow> {
        snapshot::get_by_name(&self.pooled()?, name)
    }

    pub fn list_snapshots(&self) -> Result<Vec<SnapshotRow>> {
        snapshot::list(&self.pooled()?)
    }

    pub fn delete_snapshot(&self, id: &str) -> Result<()> {
        self.with_transaction(|tx| snapshot::delete(tx, id))
    }

    /// Deletes every snapshot whose `merkle_root` is still NULL — an ingest
    /// that never reached the commit step (spec §9 `validate_snapshot_chain`).
    pub fn validate_snapshot_chain(&self) -> Result<Vec<SnapshotRow>> {
        let conn = self.pooled()?;
        let invalid = snapshot::list_invalid(&conn)?;
        for row in &invalid {
            snapshot::delete(&conn, &row.id)?;
        }
        Ok(invalid)
    }

    // --- File -----------------------------------------------------------

    pub fn get_file(&self, id: &str) -> Result<FileMetadata> {
        file::get(&self.pooled()?, id)
    }

    pub fn list_files_by_snapshot(&self, snapshot_id: &str) -> Result<Vec<FileMetadata>> {
        file::list_by_snapshot(&self.pooled()?, snapshot_id)
    }

    pub fn delete_file(&self, id: &str) -> Result<()> {
        self.with_transaction(|tx| file::delete(tx, id))
    }

    // --- Chunk ------------------------------------------------------------

    pub fn get_chunk(&self, hash: &str) -> Result<ChunkMetadata> {
        chunk_meta::get(&self.pooled()?, hash)
    }

    pub fn record_chunk_access(&self, hash: &str, now: i64) -> Result<()> {
        chunk_meta::record_access(&self.pooled()?, hash, now)
    }

    pub fn delete_chunk(&self, hash: &str) -> Result<()> {
        chunk_meta::delete(&self.pooled()?, hash)
    }

    pub fn list_orphaned_chunks(&self) -> Result<Vec<String>> {
        chunk_meta::list_orphaned(&self.pooled()?)
    }

    // --- Merkle ---------------------------------------------------------

    pub fn upsert_node(&self, node: &MerkleNode) -> Result<()> {
        merkle_store::upsert_node(&self.pooled()?, node)
    }

    pub fn get_node(&self, hash: &str) -> Result<Option<MerkleNode>> {
        merkle_store::get_node(&self.pooled()?, hash)
    }

    pub fn gc_unreachable_nodes(&self) -> Result<usize> {
        merkle_store::gc_unreachable(&self.pooled()?)
    }

    // --- Search -----------------------------------------------------------

    pub fn search_files(&self, query: &str, blind_index: Option<&crate::encryption::BlindIndex>) -> Result<Vec<FileMetadata>> {
        let conn = self.pooled()?;
        match blind_index {
            Some(index) => search::search_files_blind_index(&conn, index, query),
            None => search::search_files_fts(&conn, query),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_in_memory_migrates_to_target() {
        let catalog = Catalog::open_in_memory().unwrap();
        let conn = catalog.pooled().unwrap();
        assert!(migrations::SchemaMigrator::validate(&conn).unwrap());
    }

    #[test]
    fn create_and_list_snapshots() {
        let catalog = Catalog::open_in_memory().unwrap();
        catalog.create_snapshot("s1", None, None, 1).unwrap();
        catalog.create_snapshot("s2", None, None, 2).unwrap();
        let snapshots = catalog.list_snapshots().unwrap();
        assert_eq!(snapshots.len(), 2);
    }

    #[test]
    fn validate_snapshot_chain_drops_rootless_snapshots() {
        let catalog = Catalog::open_in_memory().unwrap();
        let bad = catalog.create_snapshot("bad", None, None, 1).unwrap();
        let good = catalog.create_snapshot("good", None, None, 2).unwrap();
        catalog.with_transaction(|tx| snapshot::set_root(tx, &good.id, "root")).unwrap();

        let removed = catalog.validate_snapshot_chain().unwrap();
        assert_eq!(removed.len(), 1);
        assert_eq!(removed[0].id, bad.id);
        assert!(catalog.get_snapshot(&good.id).is_ok());
        assert!(catalog.get_snapshot(&bad.id).is_err());
    }
}
