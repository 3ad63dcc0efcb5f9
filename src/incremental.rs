use std::collections::{HashMap, HashSet};

use crate::document::IndexedDocument;

/// Result of comparing the registry against what an index holds.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct DiffResult {
    /// Registry documents the index has never seen.
    pub new_documents: Vec<IndexedDocument>,
    /// Registry documents whose metadata differs from the indexed copy.
    pub changed_documents: Vec<IndexedDocument>,
    /// Indexed ids the registry no longer knows.
    pub deleted_ids: Vec<String>,
}

impl DiffResult {
    pub fn is_empty(&self) -> bool {
        self.new_documents.is_empty()
            && self.changed_documents.is_empty()
            && self.deleted_ids.is_empty()
    }

    /// New and changed documents, in registry order.
    pub fn to_index(&self) -> Vec<IndexedDocument> {
        self.new_documents
            .iter()
            .chain(&self.changed_documents)
            .cloned()
            .collect()
    }
}

/// Compare registry metadata against indexed metadata.
///
/// A document counts as changed when any metadata field differs. Ids are
/// stable for a document's lifetime, so a re-upload under the same id
/// shows up as a new upload date or size.
///
/// # Examples
///
/// ```
/// use std::collections::HashMap;
/// use docsift::{document::IndexedDocument, incremental::diff_documents};
///
/// let doc = IndexedDocument {
///     id: "a1".into(),
///     file_name: "a1.txt".into(),
///     original_name: "notes.txt".into(),
///     file_extension: "txt".into(),
///     mime_type: "text/plain".into(),
///     upload_date: 1,
///     file_size: 10,
/// };
///
/// let diff = diff_documents(&[doc.clone()], &HashMap::new());
/// assert_eq!(diff.new_documents, vec![doc]);
/// ```
pub fn diff_documents(
    registry: &[IndexedDocument],
    indexed: &HashMap<String, IndexedDocument>,
) -> DiffResult {
    let mut result = DiffResult::default();
    let mut seen = HashSet::with_capacity(registry.len());

    for doc in registry {
        seen.insert(doc.id.as_str());
        match indexed.get(&doc.id) {
            None => result.new_documents.push(doc.clone()),
            Some(stored) if stored != doc => {
                result.changed_documents.push(doc.clone())
            }
            Some(_) => {}
        }
    }

    result.deleted_ids = indexed
        .keys()
        .filter(|id| !seen.contains(id.as_str()))
        .cloned()
        .collect();
    result.deleted_ids.sort();

    result
}
