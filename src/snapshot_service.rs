//! Snapshot ingest/restore/GC orchestrator: the one component that drives
//! the hasher, chunk store, catalog, and Merkle engine together.
//!
//! Grounded on the teacher's `BackupEngine` (rayon `par_iter` fan-out over
//! discovered files, one chunk-store write per chunk) and `RestoreEngine`
//! (chunk-by-chunk reassembly into an output file), generalized from a flat
//! JSON manifest onto the relational catalog and per-snapshot Merkle tree.

use crate::catalog::{self, Catalog, EncryptionMode, FileMetadata, SnapshotRow};
use crate::chunk::{ChunkHash, ChunkStore, Chunker};
use crate::config::RepoConfig;
use crate::encryption::{BlindIndex, PathCipher};
use crate::hash::Hasher;
use crate::merkle::{self, DiffEntry, FileLeaf};
use crate::{Error, Result};
use rayon::prelude::*;
use std::collections::{HashMap, HashSet};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::{debug, info, instrument};
use walkdir::WalkDir;

fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}

#[derive(Debug, Clone)]
struct DiscoveredFile {
    relative_path: String,
    absolute_path: PathBuf,
    size: u64,
    modified_time: i64,
}

struct IngestedFile {
    relative_path: String,
    size: u64,
    modified_time: i64,
    file_hash: String,
    chunks: Vec<(String, u64)>,
}

/// Outcome of a successful restore.
#[derive(Debug, Clone, Copy, Default)]
pub struct RestoreReport {
    pub files_restored: u64,
    pub bytes_restored: u64,
}

/// Outcome of a `gc_sweep`.
#[derive(Debug, Clone, Copy, Default)]
pub struct GcReport {
    pub chunks_removed: u64,
    pub merkle_nodes_removed: usize,
}

/// Drives ingest, restore, GC, and validation across the catalog, chunk
/// store, and Merkle engine. Cheap to clone (the catalog pool and chunk
/// store path are both shared handles), so one instance can be handed to
/// multiple CLI invocations within a process.
#[derive(Clone)]
pub struct SnapshotService {
    catalog: Catalog,
    chunk_store: ChunkStore,
    hasher: Hasher,
    config: RepoConfig,
    path_cipher: Option<PathCipher>,
    blind_index: Option<BlindIndex>,
}

impl SnapshotService {
    /// Opens (creating if absent) a repository rooted at `root`: the
    /// metadata catalog at `<root>/metadata.db` and the chunk store at
    /// `<root>/chunks`.
    pub fn open(root: &Path, config: RepoConfig) -> Result<Self> {
        fs::create_dir_all(root)?;
        let catalog = Catalog::open(root.join("metadata.db"), &config)?;
        let chunk_store = ChunkStore::new(root)?;
        let (path_cipher, blind_index) = match config.encryption_key()? {
            Some(key) => (Some(PathCipher::new(key)), Some(BlindIndex::new(key))),
            None => (None, None),
        };
        Ok(Self {
            catalog,
            chunk_store,
            hasher: Hasher::new(),
            config,
            path_cipher,
            blind_index,
        })
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    fn encode_path(&self, relative_path: &str) -> Result<(String, EncryptionMode)> {
        match &self.path_cipher {
            Some(cipher) => Ok((cipher.encrypt(relative_path)?, EncryptionMode::Aes)),
            None => Ok((relative_path.to_string(), EncryptionMode::None)),
        }
    }

    fn decode_path(&self, stored_path: &str) -> String {
        match &self.path_cipher {
            Some(cipher) => cipher.decrypt_or_marker(stored_path),
            None => stored_path.to_string(),
        }
    }

    /// Files belonging to a snapshot, with plaintext paths. When the
    /// repository is encrypted, results are re-sorted after decoding since
    /// the catalog's `ORDER BY path` only sorted ciphertext.
    pub fn list_snapshot_files(&self, snapshot_id: &str) -> Result<Vec<(String, FileMetadata)>> {
        let mut files: Vec<(String, FileMetadata)> = self
            .catalog
            .list_files_by_snapshot(snapshot_id)?
            .into_iter()
            .map(|f| (self.decode_path(&f.path), f))
            .collect();
        if self.path_cipher.is_some() {
            files.sort_by(|a, b| a.0.cmp(&b.0));
        }
        Ok(files)
    }

    /// Ingests every file under `source_dir` as a brand new snapshot with no
    /// parent (spec §4.6 full ingest).
    #[instrument(skip(self, chunker), fields(name = %name))]
    pub fn ingest_full(
        &self,
        name: &str,
        description: Option<&str>,
        source_dir: &Path,
        chunker: &(dyn Chunker + Sync),
    ) -> Result<SnapshotRow> {
        let now = now_ms();
        let snapshot = self.catalog.create_snapshot(name, description, None, now)?;

        let files = discover_files(source_dir)?;
        info!(file_count = files.len(), "discovered files for full snapshot");

        let ingested: Vec<IngestedFile> = files
            .par_iter()
            .map(|f| self.process_file(f, chunker))
            .collect::<Result<Vec<_>>>()?;

        self.write_ingested_files(&snapshot.id, &ingested, now)?;
        self.finalize_snapshot(&snapshot)
    }

    /// Ingests only files that changed size or modification time relative to
    /// `parent_name`; unchanged files are duplicated as fresh rows pointing
    /// at the same chunks (spec §4.6 incremental ingest).
    #[instrument(skip(self, chunker), fields(name = %name, parent = %parent_name))]
    pub fn ingest_incremental(
        &self,
        name: &str,
        parent_name: &str,
        description: Option<&str>,
        source_dir: &Path,
        chunker: &(dyn Chunker + Sync),
    ) -> Result<SnapshotRow> {
        let now = now_ms();
        let parent = self.catalog.get_snapshot_by_name(parent_name)?;
        let snapshot = self.catalog.create_snapshot(name, description, Some(&parent.id), now)?;

        let parent_by_path: HashMap<String, (i64, i64)> = self
            .list_snapshot_files(&parent.id)?
            .into_iter()
            .map(|(path, meta)| (path, (meta.size, meta.modified_time)))
            .collect();

        let files = discover_files(source_dir)?;
        let mut changed_relative_paths = Vec::new();
        let mut to_ingest = Vec::new();
        for f in &files {
            match parent_by_path.get(&f.relative_path) {
                Some((size, modified_time)) if *size == f.size as i64 && *modified_time == f.modified_time => {}
                _ => {
                    changed_relative_paths.push(f.relative_path.clone());
                    to_ingest.push(f.clone());
                }
            }
        }
        info!(
            total = files.len(),
            changed = to_ingest.len(),
            "discovered files for incremental snapshot"
        );

        let mut changed_stored_paths = HashSet::with_capacity(changed_relative_paths.len());
        for relative_path in &changed_relative_paths {
            let (stored, _) = self.encode_path(relative_path)?;
            changed_stored_paths.insert(stored);
        }
        self.catalog.with_transaction(|tx| {
            catalog::file::copy_unchanged_files(tx, &parent.id, &snapshot.id, &changed_stored_paths, now)
        })?;

        let ingested: Vec<IngestedFile> = to_ingest
            .par_iter()
            .map(|f| self.process_file(f, chunker))
            .collect::<Result<Vec<_>>>()?;
        self.write_ingested_files(&snapshot.id, &ingested, now)?;

        self.finalize_snapshot(&snapshot)
    }

    /// Chunks and hashes one discovered file. Pure with respect to the
    /// catalog (only touches the chunk store), so callers can run this
    /// across files in parallel and commit the catalog rows afterwards.
    fn process_file(&self, file: &DiscoveredFile, chunker: &(dyn Chunker + Sync)) -> Result<IngestedFile> {
        let mut reader = fs::File::open(&file.absolute_path)?;
        let raw_chunks = chunker.chunk(&mut reader)?;

        let mut incremental = self.hasher.incremental();
        let mut chunks = Vec::with_capacity(raw_chunks.len());
        for chunk_bytes in &raw_chunks {
            incremental.update(chunk_bytes)?;
            let hash = ChunkHash::from_bytes(chunk_bytes);
            self.chunk_store.put(&hash, chunk_bytes)?;
            chunks.push((hash.as_str().to_string(), chunk_bytes.len() as u64));
        }
        let file_hash = crate::hash::to_hex(&incremental.digest());

        debug!(path = %file.relative_path, chunk_count = chunks.len(), "ingested file");
        Ok(IngestedFile {
            relative_path: file.relative_path.clone(),
            size: file.size,
            modified_time: file.modified_time,
            file_hash,
            chunks,
        })
    }

    /// Writes file rows, file/chunk edges, and (if enabled) blind-index
    /// entries for `ingested`, batched per `catalog::file::INSERT_BATCH_SIZE`
    /// so no single transaction holds the write lock for the whole snapshot.
    fn write_ingested_files(&self, snapshot_id: &str, ingested: &[IngestedFile], now: i64) -> Result<()> {
        for batch in ingested.chunks(catalog::file::INSERT_BATCH_SIZE) {
            self.catalog.with_transaction(|tx| {
                for item in batch {
                    for (hash, size) in &item.chunks {
                        catalog::chunk_meta::upsert(tx, hash, *size as i64, now, 1)?;
                    }
                    let (stored_path, encryption_mode) = self.encode_path(&item.relative_path)?;
                    let file_meta = FileMetadata {
                        id: String::new(),
                        snapshot_id: snapshot_id.to_string(),
                        path: stored_path,
                        size: item.size as i64,
                        modified_time: item.modified_time,
                        file_hash: item.file_hash.clone(),
                        encryption_mode,
                        chunks: item.chunks.iter().map(|(h, s)| (h.clone(), *s as i64)).collect(),
                    };
                    let file_id = catalog::file::insert(tx, &file_meta)?;
                    if let Some(index) = &self.blind_index {
                        catalog::search::index_keywords(tx, &file_id, index, &item.relative_path)?;
                    }
                }
                Ok(())
            })?;
        }
        Ok(())
    }

    /// Builds the Merkle tree over every file currently in `snapshot`,
    /// persists its nodes, sets the snapshot's root and totals, and returns
    /// the refreshed row. Once this returns, the snapshot is valid (spec §9
    /// `validate_snapshot_chain` treats a NULL `merkle_root` as an
    /// interrupted ingest).
    fn finalize_snapshot(&self, snapshot: &SnapshotRow) -> Result<SnapshotRow> {
        let files = self.list_snapshot_files(&snapshot.id)?;
        let leaves: Vec<FileLeaf> = files
            .into_iter()
            .map(|(path, meta)| FileLeaf {
                path,
                file_hash: meta.file_hash,
                size: meta.size as u64,
                file_id: meta.id,
            })
            .collect();

        let total_files = leaves.len() as i64;
        let total_size: i64 = leaves.iter().map(|f| f.size as i64).sum();
        let tree = merkle::build_tree(&leaves)?;

        self.catalog.with_transaction(|tx| {
            for node in tree.nodes.values() {
                catalog::merkle_store::upsert_node(tx, node)?;
            }
            catalog::snapshot::update_totals(tx, &snapshot.id, total_files, total_size)?;
            catalog::snapshot::set_root(tx, &snapshot.id, &tree.root_hash)?;
            Ok(())
        })?;

        self.catalog.get_snapshot(&snapshot.id)
    }

    /// Restores every file in `snapshot_id` under `target_dir`, preserving
    /// relative paths.
    #[instrument(skip(self), fields(snapshot_id = %snapshot_id))]
    pub fn restore_snapshot(&self, snapshot_id: &str, target_dir: &Path) -> Result<RestoreReport> {
        fs::create_dir_all(target_dir)?;
        let files = self.list_snapshot_files(snapshot_id)?;

        let mut report = RestoreReport::default();
        for (path, meta) in &files {
            self.restore_file_to(meta, &target_dir.join(path))?;
            report.files_restored += 1;
            report.bytes_restored += meta.size as u64;
        }
        Ok(report)
    }

    /// Restores a single file, identified by its catalog id, to `target_path`.
    pub fn restore_file(&self, file_id: &str, target_path: &Path) -> Result<()> {
        let meta = self.catalog.get_file(file_id)?;
        self.restore_file_to(&meta, target_path)
    }

    fn restore_file_to(&self, meta: &FileMetadata, target_path: &Path) -> Result<()> {
        if let Some(parent) = target_path.parent() {
            fs::create_dir_all(parent)?;
        }
        {
            let mut out = fs::File::create(target_path)?;
            for (hash_hex, _size) in &meta.chunks {
                let hash = ChunkHash::new(hash_hex.clone());
                let bytes = self.chunk_store.get(&hash)?;
                out.write_all(&bytes)?;
                self.catalog.record_chunk_access(hash_hex, now_ms())?;
            }
            out.sync_all()?;
        }

        if meta.size > 0 {
            let verify = fs::File::open(target_path)?;
            let digest = self.hasher.hash_stream(
                verify,
                self.config.stream_hash_max_bytes,
                Duration::from_secs(self.config.stream_hash_timeout_secs),
            )?;
            let hex = crate::hash::to_hex(&digest);
            if hex != meta.file_hash {
                return Err(Error::IntegrityError {
                    reason: format!(
                        "restored file {} hashes to {hex}, expected {}",
                        target_path.display(),
                        meta.file_hash
                    ),
                });
            }
        }
        Ok(())
    }

    /// Diffs two snapshots' file namespaces in O(|Delta|).
    pub fn diff_snapshots(&self, snapshot_a: &str, snapshot_b: &str) -> Result<Vec<DiffEntry>> {
        let a = self.catalog.get_snapshot(snapshot_a)?;
        let b = self.catalog.get_snapshot(snapshot_b)?;
        let conn = self.catalog.pooled()?;
        let provider = catalog::merkle_store::CatalogNodeProvider { conn: &conn };
        merkle::diff(&provider, a.merkle_root.as_deref(), b.merkle_root.as_deref())
    }

    /// Searches file paths (FTS5 when unencrypted, blind index otherwise),
    /// returning plaintext paths alongside their metadata.
    pub fn search(&self, query: &str) -> Result<Vec<(String, FileMetadata)>> {
        let results = self.catalog.search_files(query, self.blind_index.as_ref())?;
        Ok(results
            .into_iter()
            .map(|meta| (self.decode_path(&meta.path), meta))
            .collect())
    }

    /// Drops snapshots that never finished ingest (NULL `merkle_root`),
    /// per spec §9.
    pub fn validate_snapshot_chain(&self) -> Result<Vec<SnapshotRow>> {
        self.catalog.validate_snapshot_chain()
    }

    /// Deletes chunks with a zero-or-negative reference count, then sweeps
    /// unreachable Merkle nodes. Run after deleting snapshots (spec §4.6).
    #[instrument(skip(self))]
    pub fn gc_sweep(&self) -> Result<GcReport> {
        let orphaned = self.catalog.list_orphaned_chunks()?;
        let mut report = GcReport::default();
        for hash in &orphaned {
            let chunk_hash = ChunkHash::new(hash.clone());
            self.chunk_store.delete(&chunk_hash)?;
            self.catalog.delete_chunk(hash)?;
            report.chunks_removed += 1;
        }
        report.merkle_nodes_removed = self.catalog.gc_unreachable_nodes()?;
        info!(chunks_removed = report.chunks_removed, nodes_removed = report.merkle_nodes_removed, "gc sweep complete");
        Ok(report)
    }

    /// Deletes a snapshot row (cascading to its files/edges). Does not run
    /// GC; call `gc_sweep` afterwards to reclaim now-orphaned chunks.
    pub fn delete_snapshot(&self, snapshot_id: &str) -> Result<()> {
        self.catalog.delete_snapshot(snapshot_id)
    }

    pub fn list_snapshots(&self) -> Result<Vec<SnapshotRow>> {
        self.catalog.list_snapshots()
    }
}

/// Walks `source_dir`, collecting every regular file's relative path, size,
/// and modification time. Symlinks are not followed (spec §1 non-goals).
fn discover_files(source_dir: &Path) -> Result<Vec<DiscoveredFile>> {
    let mut files = Vec::new();
    for entry in WalkDir::new(source_dir).follow_links(false) {
        let entry = entry.map_err(|e| Error::Io(std::io::Error::other(e)))?;
        if !entry.file_type().is_file() {
            continue;
        }
        let metadata = entry.metadata().map_err(|e| Error::Io(std::io::Error::other(e)))?;
        let relative = entry
            .path()
            .strip_prefix(source_dir)
            .unwrap_or_else(|_| entry.path())
            .to_string_lossy()
            .replace('\\', "/");
        let modified_time = metadata
            .modified()?
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as i64;

        files.push(DiscoveredFile {
            relative_path: relative,
            absolute_path: entry.path().to_path_buf(),
            size: metadata.len(),
            modified_time,
        });
    }
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk::FixedSizeChunker;
    use tempfile::TempDir;

    fn service(root: &Path) -> SnapshotService {
        SnapshotService::open(root, RepoConfig::default()).unwrap()
    }

    fn write_file(dir: &Path, rel: &str, contents: &[u8]) {
        let path = dir.join(rel);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(path, contents).unwrap();
    }

    #[test]
    fn full_ingest_then_restore_round_trips() {
        let repo_dir = TempDir::new().unwrap();
        let source_dir = TempDir::new().unwrap();
        write_file(source_dir.path(), "a.txt", b"hello world");
        write_file(source_dir.path(), "nested/b.txt", b"nested content");

        let service = service(repo_dir.path());
        let chunker = FixedSizeChunker::default();
        let snapshot = service
            .ingest_full("snap1", None, source_dir.path(), &chunker)
            .unwrap();
        assert!(snapshot.merkle_root.is_some());
        assert_eq!(snapshot.total_files, 2);

        let restore_dir = TempDir::new().unwrap();
        let report = service.restore_snapshot(&snapshot.id, restore_dir.path()).unwrap();
        assert_eq!(report.files_restored, 2);
        assert_eq!(
            fs::read(restore_dir.path().join("a.txt")).unwrap(),
            b"hello world"
        );
        assert_eq!(
            fs::read(restore_dir.path().join("nested/b.txt")).unwrap(),
            b"nested content"
        );
    }

    #[test]
    fn incremental_ingest_dedups_unchanged_chunks() {
        let repo_dir = TempDir::new().unwrap();
        let source_dir = TempDir::new().unwrap();
        write_file(source_dir.path(), "a.txt", b"unchanged content");
        write_file(source_dir.path(), "b.txt", b"will change");

        let service = service(repo_dir.path());
        let chunker = FixedSizeChunker::default();
        let parent = service
            .ingest_full("parent", None, source_dir.path(), &chunker)
            .unwrap();

        write_file(source_dir.path(), "b.txt", b"changed content!");
        let child = service
            .ingest_incremental("child", "parent", None, source_dir.path(), &chunker)
            .unwrap();

        assert_eq!(child.total_files, 2);
        let files = service.list_snapshot_files(&child.id).unwrap();
        let a_file = files.iter().find(|(p, _)| p == "a.txt").unwrap();
        let parent_files = service.list_snapshot_files(&parent.id).unwrap();
        let parent_a = parent_files.iter().find(|(p, _)| p == "a.txt").unwrap();
        assert_eq!(a_file.1.file_hash, parent_a.1.file_hash);
        assert_ne!(a_file.1.id, parent_a.1.id);

        let chunk_hash = &a_file.1.chunks[0].0;
        let meta = service.catalog.get_chunk(chunk_hash).unwrap();
        assert_eq!(meta.reference_count, 2);
    }

    #[test]
    fn gc_sweep_removes_chunks_orphaned_by_snapshot_delete() {
        let repo_dir = TempDir::new().unwrap();
        let source_dir = TempDir::new().unwrap();
        write_file(source_dir.path(), "only.txt", b"lonely content");

        let service = service(repo_dir.path());
        let chunker = FixedSizeChunker::default();
        let snapshot = service
            .ingest_full("snap1", None, source_dir.path(), &chunker)
            .unwrap();
        let files = service.list_snapshot_files(&snapshot.id).unwrap();
        let chunk_hash = files[0].1.chunks[0].0.clone();

        service.delete_snapshot(&snapshot.id).unwrap();
        let report = service.gc_sweep().unwrap();
        assert_eq!(report.chunks_removed, 1);
        assert!(!service
            .chunk_store
            .exists(&ChunkHash::new(chunk_hash)));
    }

    #[test]
    fn validate_snapshot_chain_drops_incomplete_snapshot() {
        let repo_dir = TempDir::new().unwrap();
        let service = service(repo_dir.path());
        service.catalog.create_snapshot("incomplete", None, None, 1).unwrap();
        let removed = service.validate_snapshot_chain().unwrap();
        assert_eq!(removed.len(), 1);
    }

    #[test]
    fn search_returns_plaintext_paths_when_unencrypted() {
        let repo_dir = TempDir::new().unwrap();
        let source_dir = TempDir::new().unwrap();
        write_file(source_dir.path(), "reports/q1.pdf", b"report contents");

        let service = service(repo_dir.path());
        let chunker = FixedSizeChunker::default();
        service
            .ingest_full("snap1", None, source_dir.path(), &chunker)
            .unwrap();

        let results = service.search("q1").unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].0, "reports/q1.pdf");
    }
}
