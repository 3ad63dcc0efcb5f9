use std::path::Path;

use serde::{Deserialize, Serialize};

/// One document admitted to the lexical and/or vector index.
///
/// The `id` is assigned by the
/// [`DocumentRegistry`](crate::registry::DocumentRegistry) and stays stable
/// for the lifetime of the document. Everything else is a point-in-time
/// copy captured when the document was indexed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexedDocument {
    pub id: String,
    /// Name the file is stored under in the registry.
    pub file_name: String,
    /// Name the file had when it was uploaded.
    pub original_name: String,
    /// Lowercase extension without the leading dot (`"pdf"`, `"md"`).
    pub file_extension: String,
    pub mime_type: String,
    /// Upload time in milliseconds since the Unix epoch.
    pub upload_date: u64,
    pub file_size: u64,
}

impl IndexedDocument {
    /// Whether this document's extension is one of `file_types`.
    ///
    /// Comparison ignores case and a leading dot, so `".PDF"` matches a
    /// document with extension `pdf`.
    ///
    /// # Examples
    ///
    /// ```
    /// use docsift::document::IndexedDocument;
    ///
    /// let doc = IndexedDocument {
    ///     id: "a1".into(),
    ///     file_name: "a1.pdf".into(),
    ///     original_name: "report.pdf".into(),
    ///     file_extension: "pdf".into(),
    ///     mime_type: "application/pdf".into(),
    ///     upload_date: 0,
    ///     file_size: 10,
    /// };
    /// assert!(doc.matches_file_types(&[".PDF".to_string()]));
    /// assert!(!doc.matches_file_types(&["txt".to_string()]));
    /// ```
    pub fn matches_file_types(&self, file_types: &[String]) -> bool {
        file_types
            .iter()
            .any(|t| normalize_extension(t) == self.file_extension)
    }
}

/// Lowercase an extension and strip any leading dots.
pub fn normalize_extension(ext: &str) -> String {
    ext.trim().trim_start_matches('.').to_ascii_lowercase()
}

/// Extension of a file name, normalized. Empty when there is none.
pub fn extension_of(file_name: &str) -> String {
    Path::new(file_name)
        .extension()
        .and_then(|e| e.to_str())
        .map(normalize_extension)
        .unwrap_or_default()
}

const DOCX_MIME: &str = "application/\
    vnd.openxmlformats-officedocument.wordprocessingml.document";

/// Best-effort mime type for the extensions the engine knows how to read.
pub fn mime_for_extension(ext: &str) -> &'static str {
    match normalize_extension(ext).as_str() {
        "pdf" => "application/pdf",
        "docx" => DOCX_MIME,
        "md" | "markdown" => "text/markdown",
        "txt" | "log" => "text/plain",
        "csv" => "text/csv",
        "json" => "application/json",
        _ => "application/octet-stream",
    }
}
