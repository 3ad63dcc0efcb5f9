use std::collections::HashMap;

use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::{
    chunking::Chunk, document::IndexedDocument, embedding::cosine_similarity,
};

/// A chunk as held by the vector store, with its provenance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredChunk {
    pub chunk_id: u64,
    pub document_id: String,
    pub sequence: usize,
    pub text: String,
    /// Metadata of the originating document at embed time.
    pub document: IndexedDocument,
}

/// A similarity search hit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RelevantChunk {
    pub chunk_id: u64,
    pub document_id: String,
    pub sequence: usize,
    pub text: String,
    pub score: f32,
    pub document: IndexedDocument,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("vector has dimension {actual}, index expects {expected}")]
pub struct DimensionMismatch {
    pub expected: usize,
    pub actual: usize,
}

/// Exact nearest-neighbour store over chunk embeddings.
///
/// Vectors are kept in one flat row-major buffer: row `i` belongs to
/// `chunks[i]`.
#[derive(Debug, Clone, PartialEq)]
pub struct VectorStore {
    dimension: usize,
    chunks: Vec<StoredChunk>,
    vectors: Vec<f32>,
    next_chunk_id: u64,
}

impl VectorStore {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            chunks: Vec::new(),
            vectors: Vec::new(),
            next_chunk_id: 0,
        }
    }

    /// Reassemble a store from persisted parts.
    pub(crate) fn from_parts(
        dimension: usize,
        chunks: Vec<StoredChunk>,
        vectors: Vec<f32>,
        next_chunk_id: u64,
    ) -> Option<Self> {
        if chunks.len().checked_mul(dimension) != Some(vectors.len()) {
            return None;
        }
        let next_chunk_id = chunks
            .iter()
            .map(|c| c.chunk_id + 1)
            .max()
            .unwrap_or(0)
            .max(next_chunk_id);
        Some(Self {
            dimension,
            chunks,
            vectors,
            next_chunk_id,
        })
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn chunks(&self) -> &[StoredChunk] {
        &self.chunks
    }

    pub fn vector(&self, row: usize) -> &[f32] {
        &self.vectors[row * self.dimension..(row + 1) * self.dimension]
    }

    pub fn next_chunk_id(&self) -> u64 {
        self.next_chunk_id
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    /// Number of distinct documents with at least one chunk.
    pub fn document_count(&self) -> usize {
        let mut ids: Vec<&str> =
            self.chunks.iter().map(|c| c.document_id.as_str()).collect();
        ids.sort_unstable();
        ids.dedup();
        ids.len()
    }

    /// Metadata of every document with chunks, as captured at embed time.
    pub fn documents(&self) -> HashMap<String, IndexedDocument> {
        self.chunks
            .iter()
            .map(|c| (c.document_id.clone(), c.document.clone()))
            .collect()
    }

    /// Append chunks of one document with their embeddings.
    ///
    /// Nothing is inserted if any vector has the wrong dimension.
    pub fn insert(
        &mut self,
        document: &IndexedDocument,
        chunks: Vec<Chunk>,
        embeddings: Vec<Vec<f32>>,
    ) -> Result<usize, DimensionMismatch> {
        if let Some(bad) =
            embeddings.iter().find(|v| v.len() != self.dimension)
        {
            return Err(DimensionMismatch {
                expected: self.dimension,
                actual: bad.len(),
            });
        }

        let mut inserted = 0;
        for (chunk, embedding) in chunks.into_iter().zip(embeddings) {
            self.chunks.push(StoredChunk {
                chunk_id: self.next_chunk_id,
                document_id: chunk.document_id,
                sequence: chunk.sequence,
                text: chunk.text,
                document: document.clone(),
            });
            self.vectors.extend_from_slice(&embedding);
            self.next_chunk_id += 1;
            inserted += 1;
        }
        Ok(inserted)
    }

    /// Remove all chunks of a document. Returns how many were removed.
    pub fn remove_document(&mut self, document_id: &str) -> usize {
        let before = self.chunks.len();
        let dim = self.dimension;
        let mut row = 0;
        let mut kept_vectors = Vec::with_capacity(self.vectors.len());
        self.chunks.retain(|c| {
            let keep = c.document_id != document_id;
            if keep {
                let start = row * dim;
                kept_vectors
                    .extend_from_slice(&self.vectors[start..start + dim]);
            }
            row += 1;
            keep
        });
        self.vectors = kept_vectors;
        before - self.chunks.len()
    }

    /// Top-`k` chunks by cosine similarity, best first. Equal scores are
    /// ordered by chunk id so repeated queries return the same sequence.
    pub fn search(
        &self,
        query: &[f32],
        k: usize,
    ) -> Result<Vec<RelevantChunk>, DimensionMismatch> {
        if query.len() != self.dimension {
            return Err(DimensionMismatch {
                expected: self.dimension,
                actual: query.len(),
            });
        }

        let mut scored: Vec<(usize, f32)> = (0..self.chunks.len())
            .into_par_iter()
            .map(|row| (row, cosine_similarity(query, self.vector(row))))
            .collect();

        let chunk_id = |row: usize| self.chunks[row].chunk_id;
        scored.sort_by(|(ra, a), (rb, b)| {
            b.partial_cmp(a)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| chunk_id(*ra).cmp(&chunk_id(*rb)))
        });

        Ok(scored
            .into_iter()
            .take(k)
            .map(|(row, score)| {
                let c = &self.chunks[row];
                RelevantChunk {
                    chunk_id: c.chunk_id,
                    document_id: c.document_id.clone(),
                    sequence: c.sequence,
                    text: c.text.clone(),
                    score,
                    document: c.document.clone(),
                }
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc(id: &str) -> IndexedDocument {
        IndexedDocument {
            id: id.to_string(),
            file_name: format!("{id}.txt"),
            original_name: format!("{id}.txt"),
            file_extension: "txt".to_string(),
            mime_type: "text/plain".to_string(),
            upload_date: 0,
            file_size: 0,
        }
    }

    fn chunk(doc_id: &str, seq: usize) -> Chunk {
        Chunk {
            document_id: doc_id.to_string(),
            text: format!("{doc_id}-{seq}"),
            sequence: seq,
        }
    }

    #[test]
    fn insert_and_search() {
        let mut store = VectorStore::new(2);
        store
            .insert(&doc("a"), vec![chunk("a", 0)], vec![vec![1.0, 0.0]])
            .unwrap();
        store
            .insert(&doc("b"), vec![chunk("b", 0)], vec![vec![0.0, 1.0]])
            .unwrap();

        let hits = store.search(&[0.9, 0.1], 2).unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].document_id, "a");
        assert!(hits[0].score > hits[1].score);
        assert_eq!(hits[0].document.id, "a");
    }

    #[test]
    fn search_truncates_to_k() {
        let mut store = VectorStore::new(1);
        for i in 0..5 {
            let id = format!("d{i}");
            store
                .insert(&doc(&id), vec![chunk(&id, 0)], vec![vec![1.0]])
                .unwrap();
        }
        assert_eq!(store.search(&[1.0], 3).unwrap().len(), 3);
        assert!(store.search(&[1.0], 0).unwrap().is_empty());
    }

    #[test]
    fn ties_break_by_chunk_id() {
        let mut store = VectorStore::new(2);
        for id in ["x", "y", "z"] {
            store
                .insert(&doc(id), vec![chunk(id, 0)], vec![vec![1.0, 1.0]])
                .unwrap();
        }
        let ids = |store: &VectorStore| -> Vec<u64> {
            let hits = store.search(&[1.0, 1.0], 3).unwrap();
            hits.iter().map(|h| h.chunk_id).collect()
        };
        let first = ids(&store);
        let second = ids(&store);
        assert_eq!(first, vec![0, 1, 2]);
        assert_eq!(first, second);
    }

    #[test]
    fn remove_document_keeps_rows_aligned() {
        let mut store = VectorStore::new(2);
        store
            .insert(
                &doc("a"),
                vec![chunk("a", 0), chunk("a", 1)],
                vec![vec![1.0, 0.0], vec![1.0, 0.0]],
            )
            .unwrap();
        store
            .insert(&doc("b"), vec![chunk("b", 0)], vec![vec![0.0, 1.0]])
            .unwrap();

        assert_eq!(store.remove_document("a"), 2);
        assert_eq!(store.remove_document("a"), 0);
        assert_eq!(store.len(), 1);
        assert_eq!(store.vector(0), &[0.0, 1.0]);
        assert_eq!(store.document_count(), 1);
        assert!(store.documents().contains_key("b"));

        let hits = store.search(&[0.0, 1.0], 5).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].document_id, "b");
    }

    #[test]
    fn chunk_ids_are_not_reused_after_removal() {
        let mut store = VectorStore::new(1);
        let a = || (doc("a"), vec![chunk("a", 0)], vec![vec![1.0]]);
        let (d, c, v) = a();
        store.insert(&d, c, v).unwrap();
        store.remove_document("a");
        let (d, c, v) = a();
        store.insert(&d, c, v).unwrap();
        assert_eq!(store.chunks()[0].chunk_id, 1);
    }

    #[test]
    fn dimension_mismatch_rejected() {
        let mut store = VectorStore::new(3);
        let err = store
            .insert(&doc("a"), vec![chunk("a", 0)], vec![vec![1.0]])
            .unwrap_err();
        assert_eq!(err, DimensionMismatch { expected: 3, actual: 1 });
        assert!(store.is_empty());
        assert!(store.search(&[1.0, 2.0], 1).is_err());
    }

    #[test]
    fn from_parts_validates_lengths() {
        assert!(VectorStore::from_parts(2, vec![], vec![1.0], 0).is_none());
        let store = VectorStore::from_parts(
            1,
            vec![StoredChunk {
                chunk_id: 7,
                document_id: "a".into(),
                sequence: 0,
                text: "t".into(),
                document: doc("a"),
            }],
            vec![0.5],
            0,
        )
        .unwrap();
        assert_eq!(store.next_chunk_id(), 8);
    }

    #[test]
    fn from_parts_rejects_overflowing_dimension() {
        let chunks: Vec<StoredChunk> = (0..2)
            .map(|i| StoredChunk {
                chunk_id: i,
                document_id: "a".into(),
                sequence: i as usize,
                text: "t".into(),
                document: doc("a"),
            })
            .collect();
        let store = VectorStore::from_parts(usize::MAX, chunks, vec![], 0);
        assert!(store.is_none());
    }
}
