//! The semantic index: chunk embeddings with snapshot persistence.
//!
//! A [`VectorIndex`] moves through `Uninitialized -> Initializing ->
//! {Ready, Unavailable}`. Without an embedding backend it settles in
//! `Unavailable` and every operation reports [`VectorError::NotConfigured`]
//! instead of failing hard.
//!
//! Mutations (add, remove, rebuild, snapshot load and save) are serialized
//! by one mutex. Searches take only a read lock on the resident store, so
//! they run concurrently with each other and never observe a half-applied
//! mutation. Embedding happens before any state lock is taken.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex, MutexGuard, RwLock},
    time::Duration,
};

use serde::Serialize;

use crate::{
    chunking::{Chunk, ChunkingConfig, chunk_document},
    document::IndexedDocument,
    embedding::{EmbedError, Embedder},
    extract::TextExtractor,
    ingestion,
    registry::DocumentRegistry,
    snapshot::{LoadedSnapshot, SnapshotStore},
    vector_store::{RelevantChunk, VectorStore},
};

/// Default number of chunks sent to the embedder per call.
pub const DEFAULT_EMBED_BATCH_SIZE: usize = 32;

/// Temp files younger than this may belong to a live writer.
const TEMP_FILE_GRACE_MS: u64 = 10 * 60 * 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum VectorStatus {
    Uninitialized,
    Initializing,
    Ready,
    Unavailable,
}

impl std::fmt::Display for VectorStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            VectorStatus::Uninitialized => "uninitialized",
            VectorStatus::Initializing => "initializing",
            VectorStatus::Ready => "ready",
            VectorStatus::Unavailable => "unavailable",
        })
    }
}

/// Failure of a vector-index operation.
///
/// The `Display` form is for logs. Show [`VectorError::user_message`] to
/// end users; it never contains backend error text.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum VectorError {
    #[error("no embedding backend is configured")]
    NotConfigured,

    #[error("the vector index holds no documents")]
    EmptyIndex,

    #[error("embedding backend rate limited: {0}")]
    RateLimited(String),

    #[error("embedding backend unreachable: {0}")]
    Network(String),

    #[error("embedding timed out after {0:?}")]
    Timeout(Duration),

    #[error("vector processing failed: {0}")]
    Processing(String),
}

impl VectorError {
    /// Whether retrying the same call later may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            VectorError::RateLimited(_)
                | VectorError::Network(_)
                | VectorError::Timeout(_)
        )
    }

    /// A short, non-technical description for end users.
    pub fn user_message(&self) -> &'static str {
        match self {
            VectorError::NotConfigured => {
                "Semantic search is not available because no embedding \
                 backend is configured."
            }
            VectorError::EmptyIndex => {
                "No documents have been indexed for semantic search yet."
            }
            VectorError::RateLimited(_) => {
                "The embedding service is temporarily rate limited. Please \
                 try again in a few minutes."
            }
            VectorError::Network(_) => {
                "The embedding service could not be reached. Please try \
                 again later."
            }
            VectorError::Timeout(_) => {
                "The embedding service took too long to respond. Please try \
                 again later."
            }
            VectorError::Processing(_) => {
                "Semantic search failed while processing the request."
            }
        }
    }
}

/// Serialized for API consumers: a stable kind, the user message and the
/// retry hint. Backend text is left out.
impl Serialize for VectorError {
    fn serialize<S: serde::Serializer>(
        &self,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        use serde::ser::SerializeStruct;

        let kind = match self {
            VectorError::NotConfigured => "not_configured",
            VectorError::EmptyIndex => "empty_index",
            VectorError::RateLimited(_) => "rate_limited",
            VectorError::Network(_) => "network",
            VectorError::Timeout(_) => "timeout",
            VectorError::Processing(_) => "processing",
        };
        let mut s = serializer.serialize_struct("VectorError", 3)?;
        s.serialize_field("kind", kind)?;
        s.serialize_field("message", self.user_message())?;
        s.serialize_field("retryable", &self.is_retryable())?;
        s.end()
    }
}

impl From<EmbedError> for VectorError {
    fn from(e: EmbedError) -> Self {
        match e {
            EmbedError::RateLimited(msg) => VectorError::RateLimited(msg),
            EmbedError::Network(msg) => VectorError::Network(msg),
            EmbedError::Backend(msg) => VectorError::Processing(msg),
        }
    }
}

fn processing(e: impl std::fmt::Display) -> VectorError {
    VectorError::Processing(e.to_string())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct AddOutcome {
    /// Chunks now stored for the document.
    pub chunks: usize,
    /// Whether a snapshot including this change reached disk.
    pub persisted: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct RebuildSummary {
    pub documents: usize,
    pub chunks: usize,
    /// Documents left out because their bytes or text were unusable.
    pub skipped: usize,
    pub persisted: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VectorStats {
    pub chunk_count: usize,
    pub document_count: usize,
    /// Timestamp of the snapshot the resident store matches, if any.
    pub snapshot_timestamp: Option<u64>,
}

#[derive(Debug)]
struct Resident {
    store: VectorStore,
    /// Snapshot timestamp this store was loaded from or last saved as.
    timestamp: Option<u64>,
}

impl Resident {
    fn is_older_than(&self, disk_latest: Option<u64>) -> bool {
        match (disk_latest, self.timestamp) {
            (Some(disk), Some(mem)) => disk > mem,
            (Some(_), None) => true,
            (None, _) => false,
        }
    }
}

impl From<LoadedSnapshot> for Resident {
    fn from(loaded: LoadedSnapshot) -> Self {
        Self {
            store: loaded.store,
            timestamp: Some(loaded.timestamp),
        }
    }
}

#[derive(Debug)]
struct State {
    status: VectorStatus,
    resident: Option<Resident>,
}

/// Puts the status back to `Uninitialized` if initialization unwinds, so
/// the next call can try again.
struct InitGuard<'a> {
    index: &'a VectorIndex,
    settled: bool,
}

impl Drop for InitGuard<'_> {
    fn drop(&mut self) {
        if !self.settled {
            tracing::warn!("vector index initialization aborted");
            self.index.write_state().status = VectorStatus::Uninitialized;
        }
    }
}

pub struct VectorIndex {
    embedder: Option<Arc<dyn Embedder>>,
    registry: Arc<dyn DocumentRegistry>,
    extractor: Arc<dyn TextExtractor>,
    snapshots: SnapshotStore,
    chunking: ChunkingConfig,
    batch_size: usize,
    state: RwLock<State>,
    mutation: Mutex<()>,
}

impl VectorIndex {
    pub fn new(
        embedder: Option<Arc<dyn Embedder>>,
        registry: Arc<dyn DocumentRegistry>,
        extractor: Arc<dyn TextExtractor>,
        snapshots: SnapshotStore,
        chunking: ChunkingConfig,
        batch_size: usize,
    ) -> Self {
        Self {
            embedder,
            registry,
            extractor,
            snapshots,
            chunking,
            batch_size: batch_size.max(1),
            state: RwLock::new(State {
                status: VectorStatus::Uninitialized,
                resident: None,
            }),
            mutation: Mutex::new(()),
        }
    }

    fn read_state(&self) -> std::sync::RwLockReadGuard<'_, State> {
        self.state.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write_state(&self) -> std::sync::RwLockWriteGuard<'_, State> {
        self.state.write().unwrap_or_else(|e| e.into_inner())
    }

    fn lock_mutation(&self) -> MutexGuard<'_, ()> {
        self.mutation.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn status(&self) -> VectorStatus {
        self.read_state().status
    }

    /// Bring the index up. Idempotent; returns the settled status.
    ///
    /// With an embedder configured, stale temp files are swept and the
    /// newest loadable snapshot (if any) becomes the resident store.
    pub fn initialize(&self) -> VectorStatus {
        let status = self.status();
        if status != VectorStatus::Uninitialized {
            return status;
        }

        let _guard = self.lock_mutation();
        let status = self.status();
        if status != VectorStatus::Uninitialized {
            return status;
        }
        self.write_state().status = VectorStatus::Initializing;
        let mut init = InitGuard {
            index: self,
            settled: false,
        };

        if self.embedder.is_none() {
            tracing::info!(
                "no embedding backend configured; semantic search unavailable"
            );
            self.write_state().status = VectorStatus::Unavailable;
            init.settled = true;
            return VectorStatus::Unavailable;
        }

        match self.snapshots.sweep_temp_files(TEMP_FILE_GRACE_MS) {
            Ok(0) => {}
            Ok(n) => {
                tracing::info!(removed = n, "removed stale snapshot temp files")
            }
            Err(e) => {
                tracing::warn!(error = %e, "cannot sweep snapshot temp files")
            }
        }

        let loaded = self.snapshots.load_latest(None).map(Resident::from);
        let mut state = self.write_state();
        state.resident = loaded;
        state.status = VectorStatus::Ready;
        init.settled = true;
        tracing::debug!(
            resident = state.resident.is_some(),
            "vector index ready"
        );
        VectorStatus::Ready
    }

    /// Initialize if needed and hand out the embedder.
    fn ready_embedder(&self) -> Result<&Arc<dyn Embedder>, VectorError> {
        match self.initialize() {
            VectorStatus::Ready => {
                self.embedder.as_ref().ok_or(VectorError::NotConfigured)
            }
            _ => Err(VectorError::NotConfigured),
        }
    }

    fn disk_latest(&self) -> Option<u64> {
        self.snapshots.latest_timestamp().unwrap_or_else(|e| {
            tracing::warn!(error = %e, "cannot read snapshot directory");
            None
        })
    }

    /// Reload from disk when another writer saved a newer snapshot.
    /// Returns whether a reload happened. Caller holds the mutation lock.
    fn refresh_locked(&self) -> bool {
        let disk_latest = self.disk_latest();
        let current = {
            let state = self.read_state();
            match &state.resident {
                Some(resident) if !resident.is_older_than(disk_latest) => {
                    return false;
                }
                Some(resident) => resident.timestamp,
                None if disk_latest.is_none() => return false,
                None => None,
            }
        };

        let Some(loaded) = self.snapshots.load_latest(current) else {
            return false;
        };
        tracing::info!(
            from = ?current,
            to = loaded.timestamp,
            "reloading newer vector snapshot"
        );
        self.write_state().resident = Some(loaded.into());
        true
    }

    /// Make sure a store is resident: refresh if stale, else load the latest
    /// snapshot, else rebuild from the registry.
    fn ensure_resident(
        &self,
        embedder: &Arc<dyn Embedder>,
    ) -> Result<(), VectorError> {
        {
            let state = self.read_state();
            if let Some(resident) = &state.resident {
                let disk_latest = self.disk_latest();
                if !resident.is_older_than(disk_latest) {
                    return Ok(());
                }
            }
        }

        let _guard = self.lock_mutation();
        self.refresh_locked();
        if self.read_state().resident.is_some() {
            return Ok(());
        }
        tracing::info!("no usable vector snapshot; building from registry");
        self.rebuild_locked(embedder).map(|_| ())
    }

    fn embed_chunks(
        &self,
        embedder: &Arc<dyn Embedder>,
        chunks: &[Chunk],
    ) -> Result<Vec<Vec<f32>>, VectorError> {
        let mut embeddings = Vec::with_capacity(chunks.len());
        for batch in chunks.chunks(self.batch_size) {
            let texts: Vec<String> =
                batch.iter().map(|c| c.text.clone()).collect();
            let vectors = embedder.embed_documents(&texts)?;
            if vectors.len() != texts.len() {
                return Err(VectorError::Processing(format!(
                    "embedder returned {} vectors for {} chunks",
                    vectors.len(),
                    texts.len()
                )));
            }
            embeddings.extend(vectors);
        }
        Ok(embeddings)
    }

    /// Save the resident store. Failures are logged, never raised.
    /// Caller holds the mutation lock.
    fn persist_locked(&self) -> bool {
        let saved = {
            let state = self.read_state();
            let Some(resident) = &state.resident else {
                return false;
            };
            self.snapshots.save(&resident.store, resident.timestamp)
        };

        match saved {
            Ok(ts) => {
                if let Some(resident) = self.write_state().resident.as_mut() {
                    resident.timestamp = Some(ts);
                }
                true
            }
            Err(e) => {
                tracing::warn!(error = %e, "failed to save vector snapshot");
                false
            }
        }
    }

    /// Chunk, embed and store a document, replacing any chunks previously
    /// stored under the same id, then save a snapshot.
    ///
    /// On error the resident store is unchanged.
    pub fn add_document(
        &self,
        document: &IndexedDocument,
        content: &str,
    ) -> Result<AddOutcome, VectorError> {
        let embedder = self.ready_embedder()?;
        let chunks = chunk_document(&document.id, content, &self.chunking);

        let _guard = self.lock_mutation();
        self.refresh_locked();

        let embeddings = self.embed_chunks(embedder, &chunks)?;
        let chunk_count = chunks.len();

        let changed = {
            let mut state = self.write_state();
            if state.resident.is_none()
                && let Some(first) = embeddings.first()
            {
                state.resident = Some(Resident {
                    store: VectorStore::new(first.len()),
                    timestamp: None,
                });
            }

            match state.resident.as_mut() {
                None => false,
                Some(resident) => {
                    let store = &mut resident.store;
                    if let Some(bad) = embeddings
                        .iter()
                        .find(|v| v.len() != store.dimension())
                    {
                        return Err(VectorError::Processing(format!(
                            "embedding dimension {} does not match index \
                             dimension {}",
                            bad.len(),
                            store.dimension()
                        )));
                    }
                    let replaced = store.remove_document(&document.id);
                    if replaced > 0 {
                        tracing::debug!(
                            id = %document.id,
                            replaced,
                            "replacing document chunks"
                        );
                    }
                    store
                        .insert(document, chunks, embeddings)
                        .map_err(processing)?;
                    replaced > 0 || chunk_count > 0
                }
            }
        };

        let persisted = changed && self.persist_locked();
        tracing::debug!(
            id = %document.id,
            chunks = chunk_count,
            persisted,
            "embedded document"
        );
        Ok(AddOutcome {
            chunks: chunk_count,
            persisted,
        })
    }

    /// Drop every chunk of a document. Returns how many were removed.
    pub fn remove_document(&self, id: &str) -> Result<usize, VectorError> {
        self.ready_embedder()?;
        let _guard = self.lock_mutation();
        self.refresh_locked();

        let removed = self
            .write_state()
            .resident
            .as_mut()
            .map(|r| r.store.remove_document(id))
            .unwrap_or(0);

        if removed > 0 {
            self.persist_locked();
        } else {
            tracing::debug!(id, "document has no vector chunks");
        }
        Ok(removed)
    }

    /// Rebuild the whole index from the registry and save it.
    ///
    /// Documents that cannot be read or extracted are skipped. An embedding
    /// failure aborts the rebuild and leaves the resident store untouched.
    pub fn rebuild_all(&self) -> Result<RebuildSummary, VectorError> {
        let embedder = self.ready_embedder()?;
        let _guard = self.lock_mutation();
        self.rebuild_locked(embedder)
    }

    fn rebuild_locked(
        &self,
        embedder: &Arc<dyn Embedder>,
    ) -> Result<RebuildSummary, VectorError> {
        let report = ingestion::load_all(
            self.registry.as_ref(),
            self.extractor.as_ref(),
        )
        .map_err(processing)?;

        let mut summary = RebuildSummary {
            skipped: report.skipped.len(),
            ..RebuildSummary::default()
        };
        let mut store: Option<VectorStore> = None;

        for loaded in &report.loaded {
            let chunks = chunk_document(
                &loaded.document.id,
                &loaded.content,
                &self.chunking,
            );
            let embeddings = self.embed_chunks(embedder, &chunks)?;
            let Some(first) = embeddings.first() else {
                continue;
            };
            let store =
                store.get_or_insert_with(|| VectorStore::new(first.len()));
            summary.chunks += store
                .insert(&loaded.document, chunks, embeddings)
                .map_err(processing)?;
            summary.documents += 1;
        }

        {
            let mut state = self.write_state();
            let previous_dimension =
                state.resident.as_ref().map(|r| r.store.dimension());
            // Keep an empty store when the dimension is known, so the
            // empty state is persisted and older snapshots stay shadowed.
            let store =
                store.or_else(|| previous_dimension.map(VectorStore::new));
            let timestamp = state.resident.as_ref().and_then(|r| r.timestamp);
            state.resident = store.map(|store| Resident { store, timestamp });
        }

        summary.persisted = self.persist_locked();
        tracing::info!(
            documents = summary.documents,
            chunks = summary.chunks,
            skipped = summary.skipped,
            persisted = summary.persisted,
            "rebuilt vector index"
        );
        Ok(summary)
    }

    /// Top-`k` chunks most similar to `query`.
    ///
    /// Loads or builds the index first if none is resident.
    pub fn similarity_search(
        &self,
        query: &str,
        k: usize,
    ) -> Result<Vec<RelevantChunk>, VectorError> {
        let embedder = self.ready_embedder()?;
        self.ensure_resident(embedder)?;

        if self
            .read_state()
            .resident
            .as_ref()
            .is_none_or(|r| r.store.is_empty())
        {
            return Err(VectorError::EmptyIndex);
        }

        let query_vector = embedder.embed_query(query)?;

        let state = self.read_state();
        let resident =
            state.resident.as_ref().ok_or(VectorError::EmptyIndex)?;
        if resident.store.is_empty() {
            return Err(VectorError::EmptyIndex);
        }
        resident.store.search(&query_vector, k).map_err(processing)
    }

    /// Whether a non-empty index is resident, loading or building one first
    /// if needed.
    pub fn is_available(&self) -> bool {
        let Ok(embedder) = self.ready_embedder() else {
            return false;
        };
        if let Err(e) = self.ensure_resident(embedder) {
            tracing::warn!(
                error = %e,
                "vector index could not be made resident"
            );
            return false;
        }
        self.read_state()
            .resident
            .as_ref()
            .is_some_and(|r| !r.store.is_empty())
    }

    /// Metadata of every embedded document, after catching up with newer
    /// snapshots on disk.
    pub fn documents(
        &self,
    ) -> Result<HashMap<String, IndexedDocument>, VectorError> {
        self.ready_embedder()?;
        let _guard = self.lock_mutation();
        self.refresh_locked();
        Ok(self
            .read_state()
            .resident
            .as_ref()
            .map(|r| r.store.documents())
            .unwrap_or_default())
    }

    pub fn stats(&self) -> VectorStats {
        let state = self.read_state();
        match &state.resident {
            Some(resident) => VectorStats {
                chunk_count: resident.store.len(),
                document_count: resident.store.document_count(),
                snapshot_timestamp: resident.timestamp,
            },
            None => VectorStats::default(),
        }
    }

    /// Wait for in-flight mutations and release the resident store. A later
    /// call initializes again from disk.
    pub fn shutdown(&self) {
        let _guard = self.lock_mutation();
        let mut state = self.write_state();
        if state.status == VectorStatus::Ready {
            tracing::debug!("vector index shut down");
        }
        state.resident = None;
        state.status = VectorStatus::Uninitialized;
    }
}

impl std::fmt::Debug for VectorIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VectorIndex")
            .field("status", &self.status())
            .field("snapshots", &self.snapshots.dir())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    use super::*;
    use crate::{
        embedding::{HashingEmbedder, classify_backend_error},
        extract::FileTextExtractor,
        registry::MemoryRegistry,
    };

    /// Hashing embedder that can be switched into a rate-limited mode.
    struct Flaky {
        inner: HashingEmbedder,
        limited: AtomicBool,
        calls: AtomicUsize,
    }

    impl Flaky {
        fn new() -> Self {
            Self {
                inner: HashingEmbedder::new(64),
                limited: AtomicBool::new(false),
                calls: AtomicUsize::new(0),
            }
        }
    }

    impl Embedder for Flaky {
        fn embed_documents(
            &self,
            texts: &[String],
        ) -> Result<Vec<Vec<f32>>, EmbedError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.limited.load(Ordering::SeqCst) {
                return Err(classify_backend_error(
                    "HTTP 429 Too Many Requests",
                ));
            }
            self.inner.embed_documents(texts)
        }

        fn embed_query(&self, text: &str) -> Result<Vec<f32>, EmbedError> {
            self.inner.embed_query(text)
        }
    }

    struct Fixture {
        _dir: tempfile::TempDir,
        registry: Arc<MemoryRegistry>,
        embedder: Arc<Flaky>,
        index: VectorIndex,
    }

    fn index_over(
        dir: &std::path::Path,
        registry: Arc<MemoryRegistry>,
        embedder: Arc<Flaky>,
    ) -> VectorIndex {
        VectorIndex::new(
            Some(embedder as Arc<dyn Embedder>),
            registry,
            Arc::new(FileTextExtractor),
            SnapshotStore::open(dir, 3).unwrap(),
            ChunkingConfig {
                chunk_size: 200,
                overlap: 40,
            },
            4,
        )
    }

    fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let registry = Arc::new(MemoryRegistry::new());
        let embedder = Arc::new(Flaky::new());
        let index = index_over(dir.path(), registry.clone(), embedder.clone());
        Fixture {
            _dir: dir,
            registry,
            embedder,
            index,
        }
    }

    fn upload(
        registry: &MemoryRegistry,
        name: &str,
        text: &str,
    ) -> IndexedDocument {
        registry.put(name, None, text.as_bytes()).unwrap()
    }

    fn hit_documents(hits: Vec<RelevantChunk>) -> Vec<String> {
        hits.into_iter().map(|h| h.document_id).collect()
    }

    #[test]
    fn unconfigured_index_is_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let index = VectorIndex::new(
            None,
            Arc::new(MemoryRegistry::new()),
            Arc::new(FileTextExtractor),
            SnapshotStore::open(dir.path(), 3).unwrap(),
            ChunkingConfig::default(),
            8,
        );

        assert_eq!(index.initialize(), VectorStatus::Unavailable);
        assert!(!index.is_available());
        let err = index.similarity_search("anything", 4).unwrap_err();
        assert_eq!(err, VectorError::NotConfigured);
        assert!(!err.is_retryable());
        assert!(!err.user_message().contains("Error"));
    }

    #[test]
    fn lazy_initialization() {
        let f = fixture();
        assert_eq!(f.index.status(), VectorStatus::Uninitialized);
        let doc = upload(&f.registry, "a.txt", "rust ownership and borrowing");
        f.index
            .add_document(&doc, "rust ownership and borrowing")
            .unwrap();
        assert_eq!(f.index.status(), VectorStatus::Ready);
    }

    #[test]
    fn add_then_search() {
        let f = fixture();
        let rust_text = "rust ownership borrowing lifetimes";
        let cook_text = "bread flour yeast oven baking";
        let rust = upload(&f.registry, "rust.txt", rust_text);
        let cook = upload(&f.registry, "cook.txt", cook_text);

        let outcome = f.index.add_document(&rust, rust_text).unwrap();
        assert_eq!(outcome.chunks, 1);
        assert!(outcome.persisted);
        f.index.add_document(&cook, cook_text).unwrap();

        let hits = f.index.similarity_search("rust borrowing", 2).unwrap();
        assert_eq!(hits[0].document_id, rust.id);
        assert_eq!(hits[0].document.original_name, "rust.txt");
    }

    #[test]
    fn re_adding_replaces_chunks() {
        let f = fixture();
        let doc = upload(&f.registry, "a.txt", "first version");

        f.index.add_document(&doc, "first version").unwrap();
        f.index.add_document(&doc, "second version").unwrap();

        let stats = f.index.stats();
        assert_eq!(stats.chunk_count, 1);
        assert_eq!(stats.document_count, 1);
        let hits = f.index.similarity_search("version", 5).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].text, "second version");
    }

    #[test]
    fn rate_limit_is_retryable_and_keeps_state() {
        let f = fixture();
        let a = upload(&f.registry, "a.txt", "alpha document");
        f.index.add_document(&a, "alpha document").unwrap();

        f.embedder.limited.store(true, Ordering::SeqCst);
        let b = upload(&f.registry, "b.txt", "beta document");
        let err = f.index.add_document(&b, "beta document").unwrap_err();

        assert!(matches!(err, VectorError::RateLimited(_)));
        assert!(err.is_retryable());
        assert!(!err.user_message().contains("429"));
        assert_eq!(f.index.stats().document_count, 1);

        let err = f.index.rebuild_all().unwrap_err();
        assert!(err.is_retryable());
        assert_eq!(f.index.stats().document_count, 1);
    }

    #[test]
    fn remove_document_drops_chunks() {
        let f = fixture();
        let a = upload(&f.registry, "a.txt", "alpha");
        let b = upload(&f.registry, "b.txt", "beta");
        f.index.add_document(&a, "alpha").unwrap();
        f.index.add_document(&b, "beta").unwrap();

        assert_eq!(f.index.remove_document(&a.id).unwrap(), 1);
        assert_eq!(f.index.remove_document(&a.id).unwrap(), 0);

        let hits = f.index.similarity_search("alpha", 5).unwrap();
        assert!(hits.iter().all(|h| h.document_id != a.id));
    }

    #[test]
    fn search_builds_from_registry_when_nothing_on_disk() {
        let f = fixture();
        upload(
            &f.registry,
            "a.md",
            "# Notes\n\nvector databases and embeddings",
        );
        upload(&f.registry, "b.pptx", "not extractable");

        assert!(f.index.is_available());
        let stats = f.index.stats();
        assert_eq!(stats.document_count, 1);
        assert!(stats.snapshot_timestamp.is_some());
    }

    #[test]
    fn unreadable_snapshots_fall_back_to_rebuild() {
        let f = fixture();
        let doc = upload(&f.registry, "a.txt", "recovered semantic text");
        for name in [
            "vectors-00000000000000000001.redb",
            "vectors-00000000000000000002.redb",
        ] {
            std::fs::write(f._dir.path().join(name), b"not a database")
                .unwrap();
        }

        assert_eq!(f.index.initialize(), VectorStatus::Ready);
        let hits = f.index.similarity_search("recovered", 3).unwrap();
        assert_eq!(hit_documents(hits), vec![doc.id]);

        let saved = f.index.stats().snapshot_timestamp.unwrap();
        assert!(saved > 2);
        let reloaded = f.index.snapshots.load_latest(None).unwrap();
        assert_eq!(reloaded.timestamp, saved);
        assert_eq!(reloaded.store.len(), 1);
    }

    #[test]
    fn aborted_initialization_can_be_retried() {
        let f = fixture();
        f.index.write_state().status = VectorStatus::Initializing;
        drop(InitGuard {
            index: &f.index,
            settled: false,
        });
        assert_eq!(f.index.status(), VectorStatus::Uninitialized);
        assert_eq!(f.index.initialize(), VectorStatus::Ready);
    }

    #[test]
    fn empty_registry_is_not_available() {
        let f = fixture();
        assert!(!f.index.is_available());
        assert_eq!(
            f.index.similarity_search("x", 3).unwrap_err(),
            VectorError::EmptyIndex
        );
    }

    #[test]
    fn restart_loads_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let registry = Arc::new(MemoryRegistry::new());
        let text = "persistent semantic content";
        let doc = upload(&registry, "a.txt", text);

        let first =
            index_over(dir.path(), registry.clone(), Arc::new(Flaky::new()));
        first.add_document(&doc, text).unwrap();
        let before =
            hit_documents(first.similarity_search("semantic", 3).unwrap());
        first.shutdown();

        let embedder = Arc::new(Flaky::new());
        let second = index_over(dir.path(), registry, embedder.clone());
        let after =
            hit_documents(second.similarity_search("semantic", 3).unwrap());

        assert_eq!(before, after);
        // Loaded from disk, not re-embedded.
        assert_eq!(embedder.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn picks_up_snapshots_from_other_instances() {
        let dir = tempfile::tempdir().unwrap();
        let registry = Arc::new(MemoryRegistry::new());
        let a = upload(&registry, "a.txt", "shared alpha");
        let b = upload(&registry, "b.txt", "shared beta");

        let one =
            index_over(dir.path(), registry.clone(), Arc::new(Flaky::new()));
        let two =
            index_over(dir.path(), registry.clone(), Arc::new(Flaky::new()));

        one.add_document(&a, "shared alpha").unwrap();
        assert_eq!(two.similarity_search("shared", 5).unwrap().len(), 1);

        one.add_document(&b, "shared beta").unwrap();
        let ids = hit_documents(two.similarity_search("shared", 5).unwrap());
        assert_eq!(ids.len(), 2);
        assert!(ids.contains(&b.id));
    }

    #[test]
    fn repeated_search_is_stable() {
        let f = fixture();
        for i in 0..5 {
            let text = format!("identical words {}", i % 2);
            let doc = upload(&f.registry, &format!("{i}.txt"), &text);
            f.index.add_document(&doc, &text).unwrap();
        }
        let ids = |hits: Vec<RelevantChunk>| {
            hits.into_iter().map(|h| h.chunk_id).collect::<Vec<_>>()
        };
        let query = "identical words";
        let first = ids(f.index.similarity_search(query, 5).unwrap());
        let second = ids(f.index.similarity_search(query, 5).unwrap());
        assert_eq!(first, second);
    }

    #[test]
    fn retention_holds_across_adds() {
        let f = fixture();
        for i in 0..5 {
            let doc = upload(&f.registry, &format!("{i}.txt"), "text");
            f.index.add_document(&doc, "text").unwrap();
        }
        assert_eq!(f.index.snapshots.list().unwrap().len(), 3);
    }

    #[test]
    fn rebuild_of_empty_registry_persists_empty_state() {
        let f = fixture();
        let doc = upload(&f.registry, "a.txt", "soon gone");
        f.index.add_document(&doc, "soon gone").unwrap();
        f.registry.delete(&doc.id).unwrap();

        let summary = f.index.rebuild_all().unwrap();
        assert_eq!(summary.documents, 0);
        assert!(summary.persisted);
        assert!(!f.index.is_available());
    }
}
