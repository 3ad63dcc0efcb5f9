//! The search orchestrator.
//!
//! [`SearchService`] is the single entry point for callers. It writes to
//! the lexical index synchronously and to the vector index best-effort: a
//! vector failure is reported alongside the result but never undoes the
//! lexical write or fails the call. Vector work, registry reads and text
//! extraction run on tokio's blocking pool; embedding and extraction are
//! bounded by their configured timeouts.

use std::{
    collections::HashSet,
    path::Path,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::{Duration, Instant},
};

use serde::Serialize;

use crate::{
    config::{DEFAULT_EXTRACT_TIMEOUT, EngineConfig},
    document::IndexedDocument,
    error::{Error, Result},
    extract::{ExtractError, TextExtractor},
    incremental::{DiffResult, diff_documents},
    ingestion::{self, LoadReport},
    lexical::{LexicalIndex, SearchOptions},
    registry::DocumentRegistry,
    snapshot::SnapshotStore,
    vector_index::{
        RebuildSummary, VectorError, VectorIndex, VectorStats, VectorStatus,
    },
    vector_store::RelevantChunk,
};

/// What happened on the vector side of a write.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum VectorWrite {
    /// Semantic search is not configured.
    Skipped,
    /// Chunks written (for adds) or dropped (for removals).
    Applied { chunks: usize, persisted: bool },
    Failed { error: VectorError },
}

impl VectorWrite {
    fn from_result<T>(
        result: std::result::Result<T, VectorError>,
        f: impl FnOnce(T) -> Self,
    ) -> Self {
        match result {
            Ok(value) => f(value),
            Err(VectorError::NotConfigured) => VectorWrite::Skipped,
            Err(error) => VectorWrite::Failed { error },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IndexOutcome {
    /// Whether the document is now lexically searchable. `false` when the
    /// content had no text.
    pub indexed: bool,
    pub vector: VectorWrite,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RemoveOutcome {
    /// Whether the lexical index held the document.
    pub lexical: bool,
    pub vector: VectorWrite,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchResponse {
    pub results: Vec<IndexedDocument>,
    pub total: usize,
    pub query: String,
    pub elapsed_ms: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexStats {
    pub document_count: usize,
    pub vector_available: bool,
}

/// Health of each index, observed independently.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineHealth {
    pub lexical_ready: bool,
    pub lexical_documents: usize,
    pub vector_status: VectorStatus,
    pub vector: VectorStats,
}

/// Outcome of reconciling the indexes with the registry.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SyncSummary {
    pub added: usize,
    pub updated: usize,
    pub removed: usize,
    /// Documents whose text could not be extracted.
    pub skipped: usize,
    /// Writes that reached the lexical index but failed on the vector side.
    pub vector_failures: usize,
}

pub struct SearchService {
    registry: Arc<dyn DocumentRegistry>,
    extractor: Arc<dyn TextExtractor>,
    lexical: LexicalIndex,
    lexical_ready: AtomicBool,
    vector: Arc<VectorIndex>,
    embed_timeout: Duration,
    extract_timeout: Duration,
}

impl SearchService {
    pub fn new(
        registry: Arc<dyn DocumentRegistry>,
        extractor: Arc<dyn TextExtractor>,
        vector: VectorIndex,
        embed_timeout: Duration,
    ) -> Result<Self> {
        Ok(Self {
            registry,
            extractor,
            lexical: LexicalIndex::new()?,
            lexical_ready: AtomicBool::new(false),
            vector: Arc::new(vector),
            embed_timeout,
            extract_timeout: DEFAULT_EXTRACT_TIMEOUT,
        })
    }

    /// Bound on extracting the text of one upload.
    pub fn with_extract_timeout(mut self, timeout: Duration) -> Self {
        self.extract_timeout = timeout;
        self
    }

    /// Wire up a service from configuration. Snapshots live in
    /// `snapshot_dir`.
    pub fn from_config(
        config: &EngineConfig,
        registry: Arc<dyn DocumentRegistry>,
        extractor: Arc<dyn TextExtractor>,
        snapshot_dir: &Path,
    ) -> Result<Self> {
        let snapshots =
            SnapshotStore::open(snapshot_dir, config.snapshot_retention)?;
        let vector = VectorIndex::new(
            config.build_embedder(),
            registry.clone(),
            extractor.clone(),
            snapshots,
            config.chunking,
            config.embed_batch_size,
        );
        Ok(Self::new(registry, extractor, vector, config.embed_timeout)?
            .with_extract_timeout(config.extract_timeout))
    }

    pub fn registry(&self) -> &Arc<dyn DocumentRegistry> {
        &self.registry
    }

    pub fn lexical(&self) -> &LexicalIndex {
        &self.lexical
    }

    /// Run `f` against the vector index on the blocking pool.
    async fn run_vector<T, F>(
        &self,
        timeout: Option<Duration>,
        f: F,
    ) -> std::result::Result<T, VectorError>
    where
        T: Send + 'static,
        F: FnOnce(&VectorIndex) -> std::result::Result<T, VectorError>
            + Send
            + 'static,
    {
        let vector = self.vector.clone();
        let task = tokio::task::spawn_blocking(move || f(&vector));

        let joined = match timeout {
            Some(limit) => tokio::time::timeout(limit, task)
                .await
                .map_err(|_| VectorError::Timeout(limit))?,
            None => task.await,
        };
        joined.map_err(|e| {
            VectorError::Processing(format!("vector task failed: {e}"))
        })?
    }

    /// Run `f` against the registry on the blocking pool.
    async fn on_registry<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&dyn DocumentRegistry) -> Result<T> + Send + 'static,
    {
        let registry = self.registry.clone();
        tokio::task::spawn_blocking(move || f(registry.as_ref()))
            .await
            .map_err(|e| Error::Io(std::io::Error::other(e)))?
    }

    /// Extract text on the blocking pool, bounded by the extract timeout.
    async fn extract_in_background(
        &self,
        bytes: Arc<[u8]>,
        file_name: &str,
    ) -> std::result::Result<String, ExtractError> {
        let extractor = self.extractor.clone();
        let name = file_name.to_string();
        let task = tokio::task::spawn_blocking(move || {
            extractor.extract(&bytes, &name)
        });

        let limit = self.extract_timeout;
        tokio::time::timeout(limit, task)
            .await
            .map_err(|_| ExtractError::Timeout(limit))?
            .map_err(|e| ExtractError::Failed(format!("task failed: {e}")))?
    }

    /// Fetch and extract on the blocking pool. `None` loads everything.
    async fn load_in_background(
        &self,
        documents: Option<Vec<IndexedDocument>>,
    ) -> Result<LoadReport> {
        let registry = self.registry.clone();
        let extractor = self.extractor.clone();
        tokio::task::spawn_blocking(move || {
            let (registry, extractor) =
                (registry.as_ref(), extractor.as_ref());
            match documents {
                Some(docs) => {
                    Ok(ingestion::load_documents(registry, extractor, &docs))
                }
                None => ingestion::load_all(registry, extractor),
            }
        })
        .await
        .map_err(|e| Error::Io(std::io::Error::other(e)))?
    }

    /// Bring both indexes up: initialize the vector index (loading its
    /// latest snapshot) and build the lexical index from the registry.
    pub async fn initialize(&self) -> Result<EngineHealth> {
        let status = self
            .run_vector(None, |v| Ok(v.initialize()))
            .await
            .unwrap_or(VectorStatus::Unavailable);

        let report = self.load_in_background(None).await?;
        self.lexical.clear()?;
        for loaded in &report.loaded {
            self.lexical.add(&loaded.document, &loaded.content)?;
        }
        self.lexical_ready.store(true, Ordering::Release);

        tracing::info!(
            documents = report.loaded.len(),
            skipped = report.skipped.len(),
            vector = %status,
            "search engine initialized"
        );
        Ok(self.health())
    }

    /// Index a document in both indexes.
    ///
    /// Content without any text is a successful no-op (`indexed = false`).
    pub async fn index_document(
        &self,
        document: &IndexedDocument,
        content: &str,
    ) -> Result<IndexOutcome> {
        if content.trim().is_empty() {
            tracing::info!(
                id = %document.id,
                name = %document.original_name,
                "no text to index"
            );
            return Ok(IndexOutcome {
                indexed: false,
                vector: VectorWrite::Skipped,
            });
        }

        self.lexical.add(document, content)?;

        let doc = document.clone();
        let text = content.to_string();
        let result = self
            .run_vector(Some(self.embed_timeout), move |v| {
                v.add_document(&doc, &text)
            })
            .await;
        if let Err(e) = &result
            && *e != VectorError::NotConfigured
        {
            tracing::warn!(
                id = %document.id,
                error = %e,
                "semantic indexing failed"
            );
        }

        Ok(IndexOutcome {
            indexed: true,
            vector: VectorWrite::from_result(result, |o| {
                VectorWrite::Applied {
                    chunks: o.chunks,
                    persisted: o.persisted,
                }
            }),
        })
    }

    /// Re-index a document whose content changed. Content without text
    /// removes the document from both indexes.
    pub async fn update_document(
        &self,
        document: &IndexedDocument,
        content: &str,
    ) -> Result<IndexOutcome> {
        if content.trim().is_empty() {
            let removed = self.remove_document(&document.id).await?;
            return Ok(IndexOutcome {
                indexed: false,
                vector: removed.vector,
            });
        }
        self.index_document(document, content).await
    }

    /// Remove a document from both indexes, whatever their health.
    pub async fn remove_document(&self, id: &str) -> Result<RemoveOutcome> {
        let lexical = self.lexical.remove(id)?;

        let owned = id.to_string();
        let result = self
            .run_vector(Some(self.embed_timeout), move |v| {
                v.remove_document(&owned)
            })
            .await;

        Ok(RemoveOutcome {
            lexical,
            vector: VectorWrite::from_result(result, |chunks| {
                VectorWrite::Applied {
                    chunks,
                    persisted: chunks > 0,
                }
            }),
        })
    }

    /// Store a new upload in the registry, extract its text and index it.
    /// Extraction failure or timeout leaves the document stored but
    /// unindexed.
    pub async fn upload(
        &self,
        original_name: &str,
        mime_type: Option<&str>,
        bytes: &[u8],
    ) -> Result<(IndexedDocument, IndexOutcome)> {
        let bytes: Arc<[u8]> = Arc::from(bytes);
        let (name, mime) =
            (original_name.to_string(), mime_type.map(str::to_string));
        let stored = bytes.clone();
        let document = self
            .on_registry(move |r| r.put(&name, mime.as_deref(), &stored))
            .await?;

        let content = match self
            .extract_in_background(bytes, original_name)
            .await
        {
            Ok(text) => text,
            Err(e) => {
                tracing::warn!(
                    name = original_name,
                    error = %e,
                    "text extraction failed"
                );
                String::new()
            }
        };
        let outcome = self.index_document(&document, &content).await?;
        Ok((document, outcome))
    }

    /// Delete a document from the registry and both indexes.
    pub async fn delete(&self, id: &str) -> Result<RemoveOutcome> {
        let owned = id.to_string();
        let deleted = self.on_registry(move |r| r.delete(&owned)).await?;
        if !deleted && !self.lexical.contains(id) {
            return Err(Error::NotFound {
                kind: "document",
                name: id.to_string(),
            });
        }
        self.remove_document(id).await
    }

    /// Lexical search with registry-fresh metadata.
    ///
    /// Ids the registry no longer knows are dropped from the page; `total`
    /// is the lexical match count.
    pub async fn search(
        &self,
        query: &str,
        options: &SearchOptions,
    ) -> Result<SearchResponse> {
        let started = Instant::now();
        let page = self.lexical.search(query, options)?;
        let cached = page.documents;
        let results = self
            .on_registry(move |r| Ok(refresh_metadata(r, cached)))
            .await?;

        Ok(SearchResponse {
            results,
            total: page.total,
            query: query.to_string(),
            elapsed_ms: started.elapsed().as_millis() as u64,
        })
    }

    /// Semantic search straight against the vector index.
    pub async fn vector_search(
        &self,
        query: &str,
        k: usize,
    ) -> std::result::Result<Vec<RelevantChunk>, VectorError> {
        let query = query.to_string();
        self.run_vector(Some(self.embed_timeout), move |v| {
            v.similarity_search(&query, k)
        })
        .await
    }

    /// Rebuild the vector index from the registry.
    pub async fn rebuild_vectors(
        &self,
    ) -> std::result::Result<RebuildSummary, VectorError> {
        self.run_vector(None, |v| v.rebuild_all()).await
    }

    /// Searchable document count and whether semantic search can answer.
    /// May load or build the vector index.
    pub async fn stats(&self) -> IndexStats {
        let vector_available = self
            .run_vector(Some(self.embed_timeout), |v| Ok(v.is_available()))
            .await
            .unwrap_or(false);
        IndexStats {
            document_count: self.lexical.stats().document_count,
            vector_available,
        }
    }

    pub fn health(&self) -> EngineHealth {
        EngineHealth {
            lexical_ready: self.lexical_ready.load(Ordering::Acquire),
            lexical_documents: self.lexical.stats().document_count,
            vector_status: self.vector.status(),
            vector: self.vector.stats(),
        }
    }

    /// Bring both indexes in line with the registry: index new and changed
    /// documents, drop deleted ones. Each index is diffed on its own, so a
    /// vector index that lags behind catches up even when the lexical index
    /// is current.
    pub async fn synchronize(&self) -> Result<SyncSummary> {
        let registry_docs = self.on_registry(|r| r.list_all()).await?;
        let lexical_diff =
            diff_documents(&registry_docs, &self.lexical.documents());
        let vector_diff = match self
            .run_vector(Some(self.embed_timeout), |v| v.documents())
            .await
        {
            Ok(indexed) => diff_documents(&registry_docs, &indexed),
            Err(VectorError::NotConfigured) => DiffResult::default(),
            Err(e) => {
                tracing::warn!(error = %e, "skipping semantic index sync");
                DiffResult::default()
            }
        };

        let mut summary = SyncSummary::default();
        if lexical_diff.is_empty() && vector_diff.is_empty() {
            return Ok(summary);
        }

        let removed: HashSet<&str> = lexical_diff
            .deleted_ids
            .iter()
            .chain(&vector_diff.deleted_ids)
            .map(String::as_str)
            .collect();
        summary.removed = removed.len();
        for id in &lexical_diff.deleted_ids {
            self.lexical.remove(id)?;
        }
        for id in &vector_diff.deleted_ids {
            summary.vector_failures +=
                usize::from(self.vector_remove(id).await);
        }

        let lexical_ids = ids_of(&lexical_diff.to_index());
        let vector_ids = ids_of(&vector_diff.to_index());
        let changed: HashSet<String> = lexical_diff
            .changed_documents
            .iter()
            .chain(&vector_diff.changed_documents)
            .map(|d| d.id.clone())
            .collect();

        let mut to_load = lexical_diff.to_index();
        to_load.extend(
            vector_diff
                .to_index()
                .into_iter()
                .filter(|d| !lexical_ids.contains(&d.id)),
        );

        let report = self.load_in_background(Some(to_load)).await?;
        for skipped in &report.skipped {
            // A changed document whose text is gone leaves both indexes.
            let id = &skipped.document.id;
            self.lexical.remove(id)?;
            if vector_diff.changed_documents.iter().any(|d| &d.id == id) {
                summary.vector_failures +=
                    usize::from(self.vector_remove(id).await);
            }
            summary.skipped += 1;
        }

        for loaded in &report.loaded {
            let id = &loaded.document.id;
            if lexical_ids.contains(id) {
                self.lexical.add(&loaded.document, &loaded.content)?;
            }
            if vector_ids.contains(id) {
                let (doc, text) =
                    (loaded.document.clone(), loaded.content.clone());
                let result = self
                    .run_vector(Some(self.embed_timeout), move |v| {
                        v.add_document(&doc, &text)
                    })
                    .await;
                if let Err(e) = result {
                    tracing::warn!(
                        %id,
                        error = %e,
                        "semantic indexing failed"
                    );
                    summary.vector_failures += 1;
                }
            }
            if changed.contains(id) {
                summary.updated += 1;
            } else {
                summary.added += 1;
            }
        }

        tracing::info!(
            added = summary.added,
            updated = summary.updated,
            removed = summary.removed,
            skipped = summary.skipped,
            vector_failures = summary.vector_failures,
            "synchronized with registry"
        );
        Ok(summary)
    }

    /// Remove a document from the vector index. Returns whether it failed.
    async fn vector_remove(&self, id: &str) -> bool {
        let owned = id.to_string();
        let result = self
            .run_vector(Some(self.embed_timeout), move |v| {
                v.remove_document(&owned)
            })
            .await;
        match result {
            Ok(_) | Err(VectorError::NotConfigured) => false,
            Err(e) => {
                tracing::warn!(id, error = %e, "semantic removal failed");
                true
            }
        }
    }

    /// Wait for in-flight vector work and release the vector index.
    pub async fn shutdown(&self) {
        let _ = self
            .run_vector(None, |v| {
                v.shutdown();
                Ok(())
            })
            .await;
        self.lexical_ready.store(false, Ordering::Release);
    }
}

fn ids_of(documents: &[IndexedDocument]) -> HashSet<String> {
    documents.iter().map(|d| d.id.clone()).collect()
}

/// Swap indexed metadata for the registry's current copy. Ids the registry
/// no longer knows are dropped; a failed lookup keeps the indexed copy.
fn refresh_metadata(
    registry: &dyn DocumentRegistry,
    cached: Vec<IndexedDocument>,
) -> Vec<IndexedDocument> {
    let mut results = Vec::with_capacity(cached.len());
    for doc in cached {
        match registry.get_metadata(&doc.id) {
            Ok(Some(fresh)) => results.push(fresh),
            Ok(None) => {
                tracing::debug!(id = %doc.id, "not in registry, dropped");
            }
            Err(e) => {
                tracing::warn!(
                    id = %doc.id,
                    error = %e,
                    "registry lookup failed, using indexed metadata"
                );
                results.push(doc);
            }
        }
    }
    results
}

impl std::fmt::Debug for SearchService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SearchService")
            .field("lexical", &self.lexical)
            .field("vector", &self.vector)
            .finish_non_exhaustive()
    }
}
