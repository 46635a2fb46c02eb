//! File row + file/chunk edge operations.

use super::types::{EncryptionMode, FileMetadata};
use crate::{Error, Result};
use rusqlite::{params, Connection, OptionalExtension};
use uuid::Uuid;

/// Batch size used by `insert_batch` (spec §4.3.1).
pub const INSERT_BATCH_SIZE: usize = 500;

pub fn insert(conn: &Connection, file: &FileMetadata) -> Result<String> {
    let id = if file.id.is_empty() {
        Uuid::new_v4().to_string()
    } else {
        file.id.clone()
    };

    if file.size == 0 && !file.chunks.is_empty() {
        return Err(Error::InvalidInput {
            reason: "a zero-size file must have an empty chunk list".to_string(),
        });
    }

    let result = conn.execute(
        "INSERT INTO files(id, snapshot_id, path, size, modified_time, file_hash, encryption_mode)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            id,
            file.snapshot_id,
            file.path,
            file.size,
            file.modified_time,
            file.file_hash,
            file.encryption_mode.as_db_str(),
        ],
    );
    match result {
        Ok(_) => {}
        Err(rusqlite::Error::SqliteFailure(e, _))
            if e.code == rusqlite::ErrorCode::ConstraintViolation =>
        {
            return Err(Error::Conflict {
                reason: format!("file already exists at path {} in this snapshot", file.path),
            });
        }
        Err(e) => return Err(e.into()),
    }

    for (order, (chunk_hash, chunk_size)) in file.chunks.iter().enumerate() {
        conn.execute(
            "INSERT INTO file_chunks(file_id, chunk_hash, chunk_order, chunk_size) VALUES (?1, ?2, ?3, ?4)",
            params![id, chunk_hash, order as i64, chunk_size],
        )?;
    }

    Ok(id)
}

/// Insert files in batches of [`INSERT_BATCH_SIZE`]; callers wrap this in a
/// transaction spanning multiple batches if they want atomicity across the
/// whole set.
pub fn insert_batch(conn: &Connection, files: &[FileMetadata]) -> Result<Vec<String>> {
    let mut ids = Vec::with_capacity(files.len());
    for chunk in files.chunks(INSERT_BATCH_SIZE) {
        for file in chunk {
            ids.push(insert(conn, file)?);
        }
    }
    Ok(ids)
}

pub fn get(conn: &Connection, id: &str) -> Result<FileMetadata> {
    let mut file = conn
        .query_row(
            "SELECT id, snapshot_id, path, size, modified_time, file_hash, encryption_mode
             FROM files WHERE id = ?1",
            [id],
            row_to_file,
        )
        .optional()?
        .ok_or_else(|| Error::NotFound {
            what: format!("file {id}"),
        })?;
    file.chunks = load_chunks(conn, id)?;
    Ok(file)
}

/// Files for a snapshot, sorted by path (decryption, if any, happens before
/// this sort at the caller level — this module only sees what's on disk).
pub fn list_by_snapshot(conn: &Connection, snapshot_id: &str) -> Result<Vec<FileMetadata>> {
    let mut stmt = conn.prepare(
        "SELECT id, snapshot_id, path, size, modified_time, file_hash, encryption_mode
         FROM files WHERE snapshot_id = ?1 ORDER BY path ASC",
    )?;
    let mut files = stmt
        .query_map([snapshot_id], row_to_file)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    for file in &mut files {
        file.chunks = load_chunks(conn, &file.id)?;
    }
    Ok(files)
}

pub fn update(conn: &Connection, file: &FileMetadata) -> Result<()> {
    let changed = conn.execute(
        "UPDATE files SET path = ?1, size = ?2, modified_time = ?3, file_hash = ?4, encryption_mode = ?5
         WHERE id = ?6",
        params![
            file.path,
            file.size,
            file.modified_time,
            file.file_hash,
            file.encryption_mode.as_db_str(),
            file.id,
        ],
    )?;
    if changed == 0 {
        return Err(Error::NotFound {
            what: format!("file {}", file.id),
        });
    }
    conn.execute("DELETE FROM file_chunks WHERE file_id = ?1", [&file.id])?;
    for (order, (chunk_hash, chunk_size)) in file.chunks.iter().enumerate() {
        conn.execute(
            "INSERT INTO file_chunks(file_id, chunk_hash, chunk_order, chunk_size) VALUES (?1, ?2, ?3, ?4)",
            params![file.id, chunk_hash, order as i64, chunk_size],
        )?;
    }
    Ok(())
}

/// Decrements `chunks.reference_count` for this file's edges, then deletes
/// the file row, which cascades to file_chunks and file_keywords.
pub fn delete(conn: &Connection, id: &str) -> Result<()> {
    conn.execute(
        "UPDATE chunks SET reference_count = reference_count - 1
         WHERE hash IN (SELECT chunk_hash FROM file_chunks WHERE file_id = ?1)",
        [id],
    )?;
    conn.execute("DELETE FROM files WHERE id = ?1", [id])?;
    Ok(())
}

/// Duplicates files, file_chunks, and file_keywords rows for every path in
/// `src_snapshot_id` not present in `changed_paths`, assigning fresh file ids
/// in `dst_snapshot_id`. Used by incremental ingest (spec §4.6 step 4).
pub fn copy_unchanged_files(
    conn: &Connection,
    src_snapshot_id: &str,
    dst_snapshot_id: &str,
    changed_paths: &std::collections::HashSet<String>,
    now: i64,
) -> Result<usize> {
    let unchanged = list_by_snapshot(conn, src_snapshot_id)?
        .into_iter()
        .filter(|f| !changed_paths.contains(&f.path))
        .collect::<Vec<_>>();

    for file in &unchanged {
        let new_id = Uuid::new_v4().to_string();
        conn.execute(
            "INSERT INTO files(id, snapshot_id, path, size, modified_time, file_hash, encryption_mode)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                new_id,
                dst_snapshot_id,
                file.path,
                file.size,
                file.modified_time,
                file.file_hash,
                file.encryption_mode.as_db_str(),
            ],
        )?;
        for (order, (chunk_hash, chunk_size)) in file.chunks.iter().enumerate() {
            conn.execute(
                "INSERT INTO file_chunks(file_id, chunk_hash, chunk_order, chunk_size) VALUES (?1, ?2, ?3, ?4)",
                params![new_id, chunk_hash, order as i64, chunk_size],
            )?;
            // Each duplicated edge is a new live reference to the chunk.
            super::chunk_meta::upsert(conn, chunk_hash, *chunk_size, now, 1)?;
        }
        conn.execute(
            "INSERT INTO file_keywords(file_id, keyword_hash)
             SELECT ?1, keyword_hash FROM file_keywords WHERE file_id = ?2",
            params![new_id, file.id],
        )?;
    }

    Ok(unchanged.len())
}

fn load_chunks(conn: &Connection, file_id: &str) -> Result<Vec<(String, i64)>> {
    let mut stmt = conn.prepare(
        "SELECT chunk_hash, chunk_size FROM file_chunks WHERE file_id = ?1 ORDER BY chunk_order ASC",
    )?;
    let chunks = stmt
        .query_map([file_id], |row| Ok((row.get(0)?, row.get(1)?)))?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(chunks)
}

fn row_to_file(row: &rusqlite::Row) -> rusqlite::Result<FileMetadata> {
    let encryption_mode: String = row.get(6)?;
    Ok(FileMetadata {
        id: row.get(0)?,
        snapshot_id: row.get(1)?,
        path: row.get(2)?,
        size: row.get(3)?,
        modified_time: row.get(4)?,
        file_hash: row.get(5)?,
        encryption_mode: EncryptionMode::from_db_str(&encryption_mode),
        chunks: Vec::new(),
    })
}
