use rayon::prelude::*;

use crate::{
    document::IndexedDocument,
    error::Result,
    extract::{ExtractError, TextExtractor},
    registry::DocumentRegistry,
};

/// A registry document with its extracted text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadedDocument {
    pub document: IndexedDocument,
    pub content: String,
}

/// Why a document was left out of a bulk load.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    /// Listed by the registry but its bytes are gone.
    Missing,
    /// The registry failed while reading the bytes.
    Registry(String),
    Extraction(ExtractError),
    /// Extraction succeeded but produced only whitespace.
    Empty,
}

impl std::fmt::Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SkipReason::Missing => f.write_str("file bytes not found"),
            SkipReason::Registry(e) => write!(f, "registry error: {e}"),
            SkipReason::Extraction(e) => write!(f, "{e}"),
            SkipReason::Empty => f.write_str("no extractable text"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedDocument {
    pub document: IndexedDocument,
    pub reason: SkipReason,
}

/// Outcome of loading a set of registry documents.
#[derive(Debug, Default)]
pub struct LoadReport {
    pub loaded: Vec<LoadedDocument>,
    pub skipped: Vec<SkippedDocument>,
}

/// Fetch and extract one document.
pub fn load_document(
    registry: &dyn DocumentRegistry,
    extractor: &dyn TextExtractor,
    document: &IndexedDocument,
) -> std::result::Result<LoadedDocument, SkipReason> {
    let bytes = registry
        .get_bytes(&document.id)
        .map_err(|e| SkipReason::Registry(e.to_string()))?
        .ok_or(SkipReason::Missing)?;

    let content = extractor
        .extract(&bytes, &document.original_name)
        .map_err(SkipReason::Extraction)?;

    if content.trim().is_empty() {
        return Err(SkipReason::Empty);
    }

    Ok(LoadedDocument {
        document: document.clone(),
        content,
    })
}

/// Fetch and extract the given documents in parallel.
///
/// Per-document failures are logged and collected in
/// [`LoadReport::skipped`]; they never abort the batch. Loaded documents
/// keep the input order.
pub fn load_documents(
    registry: &dyn DocumentRegistry,
    extractor: &dyn TextExtractor,
    documents: &[IndexedDocument],
) -> LoadReport {
    let results: Vec<_> = documents
        .par_iter()
        .map(|doc| (doc, load_document(registry, extractor, doc)))
        .collect();

    let mut report = LoadReport::default();
    for (doc, result) in results {
        match result {
            Ok(loaded) => report.loaded.push(loaded),
            Err(reason) => {
                tracing::warn!(
                    id = %doc.id,
                    name = %doc.original_name,
                    %reason,
                    "skipping document"
                );
                report.skipped.push(SkippedDocument {
                    document: doc.clone(),
                    reason,
                });
            }
        }
    }
    report
}

/// Load every document the registry knows about.
pub fn load_all(
    registry: &dyn DocumentRegistry,
    extractor: &dyn TextExtractor,
) -> Result<LoadReport> {
    let documents = registry.list_all()?;
    Ok(load_documents(registry, extractor, &documents))
}
