use std::{
    collections::HashMap,
    sync::RwLock,
    time::{SystemTime, UNIX_EPOCH},
};

use crate::{
    doc_id::DocumentId,
    document::{IndexedDocument, extension_of, mime_for_extension},
    error::Result,
};

/// Authoritative store of uploaded document bytes and metadata.
///
/// The engine never owns this data. It reads from the registry to rebuild
/// its indexes and to refresh metadata on search results.
pub trait DocumentRegistry: Send + Sync {
    /// Metadata for every stored document.
    fn list_all(&self) -> Result<Vec<IndexedDocument>>;

    /// Raw bytes of a document, or `None` if the id is unknown.
    fn get_bytes(&self, id: &str) -> Result<Option<Vec<u8>>>;

    /// Current metadata of a document, or `None` if the id is unknown.
    fn get_metadata(&self, id: &str) -> Result<Option<IndexedDocument>>;

    /// Store a new upload and return the metadata assigned to it.
    fn put(
        &self,
        original_name: &str,
        mime_type: Option<&str>,
        bytes: &[u8],
    ) -> Result<IndexedDocument>;

    /// Delete a document. Returns `false` if it did not exist.
    fn delete(&self, id: &str) -> Result<bool>;
}

/// Milliseconds since the Unix epoch.
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Build the metadata record for a fresh upload.
pub fn new_upload(
    original_name: &str,
    mime_type: Option<&str>,
    size: u64,
) -> IndexedDocument {
    let upload_date = now_millis();
    let id = DocumentId::for_upload(original_name, size, upload_date);
    let file_extension = extension_of(original_name);
    let file_name = if file_extension.is_empty() {
        id.hex.clone()
    } else {
        format!("{}.{file_extension}", id.hex)
    };
    let mime_type = mime_type
        .map(str::to_string)
        .unwrap_or_else(|| mime_for_extension(&file_extension).to_string());

    IndexedDocument {
        id: id.hex,
        file_name,
        original_name: original_name.to_string(),
        file_extension,
        mime_type,
        upload_date,
        file_size: size,
    }
}

/// A registry that keeps everything in process memory.
#[derive(Debug, Default)]
pub struct MemoryRegistry {
    documents: RwLock<HashMap<String, (IndexedDocument, Vec<u8>)>>,
}

impl MemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a document under caller-chosen metadata.
    pub fn insert(&self, document: IndexedDocument, bytes: Vec<u8>) {
        let mut docs = self
            .documents
            .write()
            .unwrap_or_else(|e| e.into_inner());
        docs.insert(document.id.clone(), (document, bytes));
    }
}

impl DocumentRegistry for MemoryRegistry {
    fn list_all(&self) -> Result<Vec<IndexedDocument>> {
        let docs = self.documents.read().unwrap_or_else(|e| e.into_inner());
        let mut all: Vec<IndexedDocument> =
            docs.values().map(|(meta, _)| meta.clone()).collect();
        all.sort_by(|a, b| {
            a.upload_date.cmp(&b.upload_date).then_with(|| a.id.cmp(&b.id))
        });
        Ok(all)
    }

    fn get_bytes(&self, id: &str) -> Result<Option<Vec<u8>>> {
        let docs = self.documents.read().unwrap_or_else(|e| e.into_inner());
        Ok(docs.get(id).map(|(_, bytes)| bytes.clone()))
    }

    fn get_metadata(&self, id: &str) -> Result<Option<IndexedDocument>> {
        let docs = self.documents.read().unwrap_or_else(|e| e.into_inner());
        Ok(docs.get(id).map(|(meta, _)| meta.clone()))
    }

    fn put(
        &self,
        original_name: &str,
        mime_type: Option<&str>,
        bytes: &[u8],
    ) -> Result<IndexedDocument> {
        let meta = new_upload(original_name, mime_type, bytes.len() as u64);
        self.insert(meta.clone(), bytes.to_vec());
        Ok(meta)
    }

    fn delete(&self, id: &str) -> Result<bool> {
        let mut docs =
            self.documents.write().unwrap_or_else(|e| e.into_inner());
        Ok(docs.remove(id).is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn put_assigns_metadata() {
        let registry = MemoryRegistry::new();
        let meta = registry.put("Guide.MD", None, b"# hello").unwrap();

        assert_eq!(meta.original_name, "Guide.MD");
        assert_eq!(meta.file_extension, "md");
        assert_eq!(meta.mime_type, "text/markdown");
        assert_eq!(meta.file_size, 7);
        assert_eq!(meta.file_name, format!("{}.md", meta.id));
    }

    #[test]
    fn crud_roundtrip() {
        let registry = MemoryRegistry::new();
        let meta = registry.put("a.txt", Some("text/plain"), b"abc").unwrap();

        assert_eq!(registry.get_bytes(&meta.id).unwrap().unwrap(), b"abc");
        assert_eq!(registry.get_metadata(&meta.id).unwrap().unwrap(), meta);
        assert_eq!(registry.list_all().unwrap().len(), 1);

        assert!(registry.delete(&meta.id).unwrap());
        assert!(!registry.delete(&meta.id).unwrap());
        assert!(registry.get_bytes(&meta.id).unwrap().is_none());
        assert!(registry.get_metadata(&meta.id).unwrap().is_none());
    }

    #[test]
    fn file_without_extension() {
        let meta = new_upload("README", None, 0);
        assert_eq!(meta.file_extension, "");
        assert_eq!(meta.file_name, meta.id);
        assert_eq!(meta.mime_type, "application/octet-stream");
    }
}
