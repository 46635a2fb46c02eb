//! Chunk row operations (the catalog's view of chunk statistics; the blob
//! content itself lives in `crate::chunk::ChunkStore`).

use super::types::ChunkMetadata;
use crate::{Error, Result};
use rusqlite::{params, Connection, OptionalExtension};

pub fn get(conn: &Connection, hash: &str) -> Result<ChunkMetadata> {
    conn.query_row(
        "SELECT size, first_seen, reference_count, last_accessed FROM chunks WHERE hash = ?1",
        [hash],
        |row| {
            Ok(ChunkMetadata {
                size: row.get(0)?,
                first_seen: row.get(1)?,
                reference_count: row.get(2)?,
                last_accessed: row.get(3)?,
            })
        },
    )
    .optional()?
    .ok_or_else(|| Error::ChunkNotFound {
        hash: hash.to_string(),
    })
}

/// Insert a new chunk row or, if one exists, bump its reference count by
/// `delta`. `size`/`first_seen` are only used on first insert.
pub fn upsert(conn: &Connection, hash: &str, size: i64, now: i64, delta: i64) -> Result<()> {
    conn.execute(
        "INSERT INTO chunks(hash, size, first_seen, reference_count, last_accessed)
         VALUES (?1, ?2, ?3, ?4, ?3)
         ON CONFLICT(hash) DO UPDATE SET
            reference_count = reference_count + ?4,
            last_accessed = ?3",
        params![hash, size, now, delta],
    )?;
    Ok(())
}

pub fn record_access(conn: &Connection, hash: &str, now: i64) -> Result<()> {
    let changed = conn.execute(
        "UPDATE chunks SET last_accessed = ?1 WHERE hash = ?2",
        params![now, hash],
    )?;
    if changed == 0 {
        return Err(Error::ChunkNotFound {
            hash: hash.to_string(),
        });
    }
    Ok(())
}

pub fn delete(conn: &Connection, hash: &str) -> Result<()> {
    conn.execute("DELETE FROM chunks WHERE hash = ?1", [hash])?;
    Ok(())
}

/// Insert-if-absent placeholder rows (`reference_count = 1`) for every hash
/// not already present, so that `file_chunks` FK inserts never race ahead of
/// their `chunks` row (spec §4.3.2: "chunks referenced by any file edge must
/// have a row").
pub fn ensure_exists_batch(conn: &Connection, hashes: &[(String, i64)], now: i64) -> Result<()> {
    for (hash, size) in hashes {
        conn.execute(
            "INSERT INTO chunks(hash, size, first_seen, reference_count, last_accessed)
             VALUES (?1, ?2, ?3, 1, ?3)
             ON CONFLICT(hash) DO NOTHING",
            params![hash, size, now],
        )?;
    }
    Ok(())
}

/// Chunks with `reference_count <= 0`, candidates for GC.
pub fn list_orphaned(conn: &Connection) -> Result<Vec<String>> {
    let mut stmt = conn.prepare("SELECT hash FROM chunks WHERE reference_count <= 0")?;
    let hashes = stmt
        .query_map([], |row| row.get(0))?
        .collect::<rusqlite::Result<Vec<String>>>()?;
    Ok(hashes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::migrations::SchemaMigrator;

    fn setup() -> Connection {
        let mut conn = Connection::open_in_memory().unwrap();
        conn.execute_batch("PRAGMA foreign_keys=ON;").unwrap();
        SchemaMigrator::migrate(&mut conn).unwrap();
        conn
    }

    #[test]
    fn ensure_exists_batch_is_insert_if_absent() {
        let conn = setup();
        let hashes = vec![("h1".to_string(), 10), ("h2".to_string(), 20)];
        ensure_exists_batch(&conn, &hashes, 100).unwrap();
        ensure_exists_batch(&conn, &hashes, 200).unwrap();

        let meta = get(&conn, "h1").unwrap();
        assert_eq!(meta.reference_count, 1);
        assert_eq!(meta.first_seen, 100);
    }

    #[test]
    fn upsert_accumulates_reference_count() {
        let conn = setup();
        upsert(&conn, "h1", 10, 100, 1).unwrap();
        upsert(&conn, "h1", 10, 200, 1).unwrap();
        let meta = get(&conn, "h1").unwrap();
        assert_eq!(meta.reference_count, 2);
        assert_eq!(meta.last_accessed, 200);
    }

    #[test]
    fn get_missing_chunk_errors() {
        let conn = setup();
        assert!(matches!(get(&conn, "missing").unwrap_err(), Error::ChunkNotFound { .. }));
    }

    #[test]
    fn list_orphaned_finds_zero_ref_chunks() {
        let conn = setup();
        upsert(&conn, "live", 1, 1, 1).unwrap();
        upsert(&conn, "dead", 1, 1, 1).unwrap();
        upsert(&conn, "dead", 1, 1, -1).unwrap();

        let orphaned = list_orphaned(&conn).unwrap();
        assert_eq!(orphaned, vec!["dead".to_string()]);
    }
}
