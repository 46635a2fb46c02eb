//! Path search: FTS5 over plaintext paths, or blind-index lookup when the
//! repository is encrypted (spec §4.3.1 `search_files`, §4.7).

use super::file::get as get_file;
use super::types::FileMetadata;
use crate::encryption::BlindIndex;
use crate::Result;
use rusqlite::Connection;

/// Maximum files returned per call (spec §4.7).
pub const MAX_RESULTS: usize = 100;

/// FTS path-match search, used when the repository has no encryption key.
pub fn search_files_fts(conn: &Connection, query: &str) -> Result<Vec<FileMetadata>> {
    let mut stmt = conn.prepare(
        "SELECT file_id FROM files_fts WHERE files_fts MATCH ?1 LIMIT ?2",
    )?;
    let ids = stmt
        .query_map(rusqlite::params![query, MAX_RESULTS as i64], |row| {
            row.get::<_, String>(0)
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    ids.into_iter().map(|id| get_file(conn, &id)).collect()
}

/// Blind-index search, used when the repository was opened with an
/// encryption key: tokenizes `query` identically to ingest-time tokenization,
/// joins `file_keywords` on hash equality, and dedups resulting file ids.
pub fn search_files_blind_index(
    conn: &Connection,
    blind_index: &BlindIndex,
    query: &str,
) -> Result<Vec<FileMetadata>> {
    let tokens = BlindIndex::tokenize(query);
    let mut seen = std::collections::HashSet::new();
    let mut results = Vec::new();

    'tokens: for token in tokens {
        let hash = blind_index.keyword_hash(&token);
        let mut stmt = conn.prepare("SELECT DISTINCT file_id FROM file_keywords WHERE keyword_hash = ?1")?;
        let ids = stmt
            .query_map([&hash], |row| row.get::<_, String>(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        for id in ids {
            if seen.insert(id.clone()) {
                if results.len() >= MAX_RESULTS {
                    break 'tokens;
                }
                results.push(get_file(conn, &id)?);
            }
        }
    }

    Ok(results)
}

/// Writes `file_keywords` rows for a freshly-inserted file, in the same
/// transaction as the file insert (spec §4.7).
pub fn index_keywords(conn: &Connection, file_id: &str, blind_index: &BlindIndex, path: &str) -> Result<()> {
    for hash in blind_index.hashes_for_path(path) {
        conn.execute(
            "INSERT INTO file_keywords(file_id, keyword_hash) VALUES (?1, ?2)",
            rusqlite::params![file_id, hash],
        )?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::migrations::SchemaMigrator;
    use crate::catalog::snapshot;
    use crate::catalog::types::{EncryptionMode, FileMetadata};

    fn setup() -> Connection {
        let mut conn = Connection::open_in_memory().unwrap();
        conn.execute_batch("PRAGMA foreign_keys=ON;").unwrap();
        SchemaMigrator::migrate(&mut conn).unwrap();
        conn
    }

    #[test]
    fn fts_search_finds_matching_path() {
        let conn = setup();
        let snap = snapshot::create(&conn, "s1", None, None, 1).unwrap();
        super::super::file::insert(
            &conn,
            &FileMetadata {
                id: String::new(),
                snapshot_id: snap.id.clone(),
                path: "reports/2024/q1.pdf".to_string(),
                size: 1,
                modified_time: 1,
                file_hash: "h".repeat(64),
                encryption_mode: EncryptionMode::None,
                chunks: vec![],
            },
        )
        .unwrap();

        let results = search_files_fts(&conn, "q1").unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].path, "reports/2024/q1.pdf");
    }

    #[test]
    fn blind_index_search_finds_matching_file() {
        let conn = setup();
        let snap = snapshot::create(&conn, "s1", None, None, 1).unwrap();
        let key = [9u8; 32];
        let index = BlindIndex::new(key);
        let path = "reports/2024/q1.pdf";

        let file_id = super::super::file::insert(
            &conn,
            &FileMetadata {
                id: String::new(),
                snapshot_id: snap.id.clone(),
                path: path.to_string(),
                size: 1,
                modified_time: 1,
                file_hash: "h".repeat(64),
                encryption_mode: EncryptionMode::Aes,
                chunks: vec![],
            },
        )
        .unwrap();
        index_keywords(&conn, &file_id, &index, path).unwrap();

        let results = search_files_blind_index(&conn, &index, "q1").unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].id, file_id);
    }
}
