//! Snapshot row operations.

use super::types::SnapshotRow;
use crate::{Error, Result};
use rusqlite::{params, Connection, OptionalExtension};
use uuid::Uuid;

pub fn create(
    conn: &Connection,
    name: &str,
    description: Option<&str>,
    parent_id: Option<&str>,
    created_at: i64,
) -> Result<SnapshotRow> {
    let id = Uuid::new_v4().to_string();
    let inserted = conn.execute(
        "INSERT INTO snapshots(id, name, created_at, description, parent_id, total_files, total_size, merkle_root)
         VALUES (?1, ?2, ?3, ?4, ?5, 0, 0, NULL)",
        params![id, name, created_at, description, parent_id],
    );
    match inserted {
        Ok(_) => {}
        Err(rusqlite::Error::SqliteFailure(e, _))
            if e.code == rusqlite::ErrorCode::ConstraintViolation =>
        {
            return Err(Error::Conflict {
                reason: format!("snapshot name {name} already exists"),
            });
        }
        Err(e) => return Err(e.into()),
    }

    Ok(SnapshotRow {
        id,
        name: name.to_string(),
        created_at,
        description: description.map(|s| s.to_string()),
        parent_id: parent_id.map(|s| s.to_string()),
        total_files: 0,
        total_size: 0,
        merkle_root: None,
    })
}

pub fn get(conn: &Connection, id: &str) -> Result<SnapshotRow> {
    conn.query_row(
        "SELECT id, name, created_at, description, parent_id, total_files, total_size, merkle_root
         FROM snapshots WHERE id = ?1",
        [id],
        row_to_snapshot,
    )
    .optional()?
    .ok_or_else(|| Error::NotFound {
        what: format!("snapshot {id}"),
    })
}

pub fn get_by_name(conn: &Connection, name: &str) -> Result<SnapshotRow> {
    conn.query_row(
        "SELECT id, name, created_at, description, parent_id, total_files, total_size, merkle_root
         FROM snapshots WHERE name = ?1",
        [name],
        row_to_snapshot,
    )
    .optional()?
    .ok_or_else(|| Error::NotFound {
        what: format!("snapshot named {name}"),
    })
}

pub fn list(conn: &Connection) -> Result<Vec<SnapshotRow>> {
    let mut stmt = conn.prepare(
        "SELECT id, name, created_at, description, parent_id, total_files, total_size, merkle_root
         FROM snapshots ORDER BY created_at DESC",
    )?;
    let rows = stmt
        .query_map([], row_to_snapshot)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(rows)
}

pub fn update_totals(conn: &Connection, id: &str, total_files: i64, total_size: i64) -> Result<()> {
    let changed = conn.execute(
        "UPDATE snapshots SET total_files = ?1, total_size = ?2 WHERE id = ?3",
        params![total_files, total_size, id],
    )?;
    if changed == 0 {
        return Err(Error::NotFound {
            what: format!("snapshot {id}"),
        });
    }
    Ok(())
}

pub fn set_root(conn: &Connection, id: &str, node_hash: &str) -> Result<()> {
    let changed = conn.execute(
        "UPDATE snapshots SET merkle_root = ?1 WHERE id = ?2",
        params![node_hash, id],
    )?;
    if changed == 0 {
        return Err(Error::NotFound {
            what: format!("snapshot {id}"),
        });
    }
    Ok(())
}

pub fn get_root(conn: &Connection, id: &str) -> Result<Option<String>> {
    conn.query_row("SELECT merkle_root FROM snapshots WHERE id = ?1", [id], |row| {
        row.get(0)
    })
    .optional()?
    .ok_or_else(|| Error::NotFound {
        what: format!("snapshot {id}"),
    })
}

/// Decrements `chunks.reference_count` for every edge this snapshot's files
/// hold, then deletes the snapshot row, which cascades to files, file_chunks,
/// and file_keywords via `ON DELETE CASCADE`. Ref counts must be dropped
/// first, before the cascade removes the file_chunks rows out from under the
/// subquery (spec §3: `reference_count` equals the number of live
/// FileChunkEdges).
pub fn delete(conn: &Connection, id: &str) -> Result<()> {
    conn.execute(
        "UPDATE chunks SET reference_count = reference_count - 1
         WHERE hash IN (
             SELECT chunk_hash FROM file_chunks
             WHERE file_id IN (SELECT id FROM files WHERE snapshot_id = ?1)
         )",
        [id],
    )?;
    conn.execute("DELETE FROM snapshots WHERE id = ?1", [id])?;
    Ok(())
}

/// Snapshots whose `merkle_root` is still NULL: ingest was interrupted before
/// the commit step and the row is not yet considered valid (spec §4.6
/// failure model / §9 `validate_snapshot_chain`).
pub fn list_invalid(conn: &Connection) -> Result<Vec<SnapshotRow>> {
    let mut stmt = conn.prepare(
        "SELECT id, name, created_at, description, parent_id, total_files, total_size, merkle_root
         FROM snapshots WHERE merkle_root IS NULL",
    )?;
    let rows = stmt
        .query_map([], row_to_snapshot)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(rows)
}

fn row_to_snapshot(row: &rusqlite::Row) -> rusqlite::Result<SnapshotRow> {
    Ok(SnapshotRow {
        id: row.get(0)?,
        name: row.get(1)?,
        created_at: row.get(2)?,
        description: row.get(3)?,
        parent_id: row.get(4)?,
        total_files: row.get(5)?,
        total_size: row.get(6)?,
        merkle_root: row.get(7)?,
    })
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
    fn create_and_get_round_trip() {
        let conn = setup();
        let snap = create(&conn, "s1", Some("desc"), None, 1_000).unwrap();
        let fetched = get(&conn, &snap.id).unwrap();
        assert_eq!(fetched.name, "s1");
        assert_eq!(fetched.description.as_deref(), Some("desc"));
        assert!(fetched.merkle_root.is_none());
    }

    #[test]
    fn duplicate_name_is_conflict() {
        let conn = setup();
        create(&conn, "dup", None, None, 1).unwrap();
        let err = create(&conn, "dup", None, None, 2).unwrap_err();
        assert!(matches!(err, Error::Conflict { .. }));
    }

    #[test]
    fn list_orders_by_created_at_desc() {
        let conn = setup();
        create(&conn, "older", None, None, 100).unwrap();
        create(&conn, "newer", None, None, 200).unwrap();
        let names: Vec<String> = list(&conn).unwrap().into_iter().map(|s| s.name).collect();
        assert_eq!(names, vec!["newer", "older"]);
    }

    #[test]
    fn set_root_then_get_root() {
        let conn = setup();
        let snap = create(&conn, "s1", None, None, 1).unwrap();
        assert_eq!(get_root(&conn, &snap.id).unwrap(), None);
        set_root(&conn, &snap.id, "abc123").unwrap();
        assert_eq!(get_root(&conn, &snap.id).unwrap(), Some("abc123".to_string()));
    }

    #[test]
    fn list_invalid_finds_rows_without_root() {
        let conn = setup();
        let a = create(&conn, "a", None, None, 1).unwrap();
        let b = create(&conn, "b", None, None, 2).unwrap();
        set_root(&conn, &b.id, "root").unwrap();

        let invalid = list_invalid(&conn).unwrap();
        assert_eq!(invalid.len(), 1);
        assert_eq!(invalid[0].id, a.id);
    }
}
