use std::{
    path::{Path, PathBuf},
    sync::atomic::{AtomicU64, Ordering},
};

use redb::{Database, ReadableDatabase, ReadableTable, TableDefinition};

use crate::{
    error::{Error, Result},
    registry::now_millis,
    vector_store::{StoredChunk, VectorStore},
};

const INFO: TableDefinition<&str, u64> = TableDefinition::new("info");
const CHUNKS: TableDefinition<u64, &[u8]> = TableDefinition::new("chunks");
const VECTORS: TableDefinition<u64, &[u8]> = TableDefinition::new("vectors");

const FORMAT_VERSION: u64 = 1;
const PREFIX: &str = "vectors-";
const SUFFIX: &str = ".redb";
const TMP_SUFFIX: &str = ".tmp";

/// Default number of snapshots kept on disk.
pub const DEFAULT_RETENTION: usize = 3;

static TMP_COUNTER: AtomicU64 = AtomicU64::new(0);

/// A snapshot file found on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotFile {
    pub timestamp: u64,
    pub path: PathBuf,
}

/// A store loaded from disk together with the timestamp it was saved under.
#[derive(Debug)]
pub struct LoadedSnapshot {
    pub timestamp: u64,
    pub store: VectorStore,
}

/// Directory of durable vector snapshots.
///
/// Each snapshot is a redb file named `vectors-<timestamp>.redb` with three
/// tables: `info` (format version, timestamp, dimension, chunk count and
/// next chunk id), `chunks` (chunk id to JSON [`StoredChunk`]) and
/// `vectors` (chunk id to little-endian f32 values). Saves write a `.tmp`
/// file and rename it into place. Several processes may share the
/// directory; the newest timestamp wins.
#[derive(Debug, Clone)]
pub struct SnapshotStore {
    dir: PathBuf,
    retention: usize,
}

fn snapshot_name(timestamp: u64) -> String {
    format!("{PREFIX}{timestamp:020}{SUFFIX}")
}

fn parse_snapshot_name(name: &str) -> Option<u64> {
    let digits = name.strip_prefix(PREFIX)?.strip_suffix(SUFFIX)?;
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}

fn snapshot_error(path: &Path, what: &str) -> Error {
    Error::Snapshot(format!("{}: {what}", path.display()))
}

impl SnapshotStore {
    /// Open a snapshot directory, creating it if needed.
    pub fn open(dir: &Path, retention: usize) -> Result<Self> {
        std::fs::create_dir_all(dir)?;
        Ok(Self {
            dir: dir.to_path_buf(),
            retention: retention.max(1),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Snapshot files on disk, newest first. Only names are inspected.
    pub fn list(&self) -> Result<Vec<SnapshotFile>> {
        let mut files = Vec::new();
        for entry in std::fs::read_dir(&self.dir)? {
            let entry = entry?;
            let name = entry.file_name();
            let Some(timestamp) =
                name.to_str().and_then(parse_snapshot_name)
            else {
                continue;
            };
            if entry.file_type()?.is_file() {
                files.push(SnapshotFile {
                    timestamp,
                    path: entry.path(),
                });
            }
        }
        files.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        Ok(files)
    }

    /// Highest snapshot timestamp on disk, if any.
    pub fn latest_timestamp(&self) -> Result<Option<u64>> {
        Ok(self.list()?.first().map(|f| f.timestamp))
    }

    /// Persist `store` as a new snapshot and apply retention.
    ///
    /// The new timestamp is strictly greater than `after` and than every
    /// snapshot already on disk. Returns that timestamp.
    pub fn save(
        &self,
        store: &VectorStore,
        after: Option<u64>,
    ) -> Result<u64> {
        let floor = after
            .into_iter()
            .chain(self.latest_timestamp()?)
            .max()
            .map(|t| t + 1)
            .unwrap_or(0);
        let timestamp = now_millis().max(floor);

        let final_path = self.dir.join(snapshot_name(timestamp));
        let tmp_path = self.dir.join(format!(
            "{}.{}-{}{TMP_SUFFIX}",
            snapshot_name(timestamp),
            std::process::id(),
            TMP_COUNTER.fetch_add(1, Ordering::Relaxed),
        ));

        if let Err(e) = write_snapshot(&tmp_path, store, timestamp) {
            let _ = std::fs::remove_file(&tmp_path);
            return Err(e);
        }
        std::fs::rename(&tmp_path, &final_path)?;

        tracing::info!(
            timestamp,
            chunks = store.len(),
            path = %final_path.display(),
            "saved vector snapshot"
        );

        if let Err(e) = self.apply_retention() {
            tracing::warn!(error = %e, "snapshot retention cleanup failed");
        }
        Ok(timestamp)
    }

    /// Delete all but the newest `retention` snapshots.
    pub fn apply_retention(&self) -> Result<usize> {
        let mut removed = 0;
        for file in self.list()?.into_iter().skip(self.retention) {
            match std::fs::remove_file(&file.path) {
                Ok(()) => {
                    tracing::debug!(
                        timestamp = file.timestamp,
                        "removed old snapshot"
                    );
                    removed += 1;
                }
                // Another process got there first.
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(removed)
    }

    /// Remove temporary files left behind by interrupted saves. A live
    /// writer in another process may own a fresh temp file, so only files
    /// older than `max_age_ms` are touched.
    pub fn sweep_temp_files(&self, max_age_ms: u64) -> Result<usize> {
        let now = std::time::SystemTime::now();
        let mut removed = 0;
        for entry in std::fs::read_dir(&self.dir)? {
            let entry = entry?;
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            if !(name.starts_with(PREFIX) && name.ends_with(TMP_SUFFIX)) {
                continue;
            }
            let age_ms = entry
                .metadata()
                .and_then(|m| m.modified())
                .ok()
                .and_then(|modified| now.duration_since(modified).ok())
                .map(|d| d.as_millis() as u64)
                .unwrap_or(u64::MAX);
            if age_ms >= max_age_ms
                && std::fs::remove_file(entry.path()).is_ok()
            {
                removed += 1;
            }
        }
        Ok(removed)
    }

    /// Load one snapshot file.
    pub fn load(&self, file: &SnapshotFile) -> Result<LoadedSnapshot> {
        let store = read_snapshot(&file.path, file.timestamp)?;
        Ok(LoadedSnapshot {
            timestamp: file.timestamp,
            store,
        })
    }

    /// Load the newest snapshot that reads cleanly and is newer than
    /// `newer_than`. Unreadable snapshots are skipped with a warning.
    pub fn load_latest(
        &self,
        newer_than: Option<u64>,
    ) -> Option<LoadedSnapshot> {
        let files = match self.list() {
            Ok(files) => files,
            Err(e) => {
                tracing::warn!(error = %e, "cannot list snapshot directory");
                return None;
            }
        };

        for file in files {
            if newer_than.is_some_and(|t| file.timestamp <= t) {
                break;
            }
            match self.load(&file) {
                Ok(loaded) => {
                    tracing::info!(
                        timestamp = loaded.timestamp,
                        chunks = loaded.store.len(),
                        "loaded vector snapshot"
                    );
                    return Some(loaded);
                }
                Err(e) => {
                    tracing::warn!(
                        timestamp = file.timestamp,
                        error = %e,
                        "skipping unreadable snapshot"
                    );
                }
            }
        }
        None
    }
}

fn write_snapshot(
    path: &Path,
    store: &VectorStore,
    timestamp: u64,
) -> Result<()> {
    let db = Database::create(path)?;
    let txn = db.begin_write()?;
    {
        let mut info = txn.open_table(INFO)?;
        info.insert("version", FORMAT_VERSION)?;
        info.insert("timestamp", timestamp)?;
        info.insert("dimension", store.dimension() as u64)?;
        info.insert("next_chunk_id", store.next_chunk_id())?;
        info.insert("chunk_count", store.len() as u64)?;

        let mut chunks = txn.open_table(CHUNKS)?;
        let mut vectors = txn.open_table(VECTORS)?;
        for (row, chunk) in store.chunks().iter().enumerate() {
            let record = serde_json::to_vec(chunk)?;
            chunks.insert(chunk.chunk_id, record.as_slice())?;
            let bytes: &[u8] = bytemuck::cast_slice(store.vector(row));
            vectors.insert(chunk.chunk_id, bytes)?;
        }
    }
    txn.commit()?;
    drop(db);
    Ok(())
}

fn read_snapshot(path: &Path, expected_timestamp: u64) -> Result<VectorStore> {
    let db = Database::open(path)?;
    let txn = db.begin_read()?;

    let info = txn.open_table(INFO)?;
    let read_info = |key: &str| -> Result<u64> {
        info.get(key)?
            .map(|v| v.value())
            .ok_or_else(|| snapshot_error(path, &format!("missing {key}")))
    };
    let read_size = |key: &str| -> Result<usize> {
        usize::try_from(read_info(key)?)
            .map_err(|_| snapshot_error(path, &format!("{key} out of range")))
    };

    let version = read_info("version")?;
    if version != FORMAT_VERSION {
        return Err(snapshot_error(
            path,
            &format!("unsupported version {version}"),
        ));
    }
    if read_info("timestamp")? != expected_timestamp {
        return Err(snapshot_error(path, "timestamp does not match file name"));
    }
    let dimension = read_size("dimension")?;
    let next_chunk_id = read_info("next_chunk_id")?;
    let chunk_count = read_size("chunk_count")?;

    // Header values are untrusted; size arithmetic must not overflow and
    // nothing is preallocated from them.
    let vector_bytes = dimension
        .checked_mul(4)
        .ok_or_else(|| snapshot_error(path, "dimension out of range"))?;
    chunk_count
        .checked_mul(dimension)
        .ok_or_else(|| snapshot_error(path, "chunk count out of range"))?;

    let chunks_table = txn.open_table(CHUNKS)?;
    let vectors_table = txn.open_table(VECTORS)?;

    let mut chunks = Vec::new();
    let mut vectors = Vec::new();
    for entry in chunks_table.iter()? {
        let (key, value) = entry?;
        let chunk_id = key.value();
        let chunk: StoredChunk = serde_json::from_slice(value.value())?;

        let raw = vectors_table.get(chunk_id)?.ok_or_else(|| {
            snapshot_error(path, &format!("chunk {chunk_id} has no vector"))
        })?;
        let raw = raw.value();
        if raw.len() != vector_bytes {
            return Err(snapshot_error(
                path,
                &format!("chunk {chunk_id} vector is truncated"),
            ));
        }
        vectors.extend(
            raw.chunks_exact(4)
                .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]])),
        );
        chunks.push(chunk);
    }

    if chunks.len() != chunk_count {
        return Err(snapshot_error(path, "chunk count does not match header"));
    }

    VectorStore::from_parts(dimension, chunks, vectors, next_chunk_id)
        .ok_or_else(|| {
            snapshot_error(path, "vector data does not match chunks")
        })
}
