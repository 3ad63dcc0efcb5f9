use std::{
    collections::hash_map::DefaultHasher,
    hash::{Hash, Hasher},
    sync::atomic::{AtomicU64, Ordering},
};

static UPLOAD_COUNTER: AtomicU64 = AtomicU64::new(0);

/// An opaque registry identifier for an uploaded document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentId {
    /// The numeric hash the id is rendered from.
    pub numeric: u64,
    /// The full 16-character hex form used as the document key.
    pub hex: String,
}

impl DocumentId {
    /// Derive an id for a new upload.
    ///
    /// The name, content size, upload time and a process-wide counter are
    /// hashed together, so two uploads of the same file get distinct ids.
    pub fn for_upload(
        original_name: &str,
        size: u64,
        uploaded_at: u64,
    ) -> Self {
        let mut hasher = DefaultHasher::new();
        original_name.hash(&mut hasher);
        size.hash(&mut hasher);
        uploaded_at.hash(&mut hasher);
        std::process::id().hash(&mut hasher);
        UPLOAD_COUNTER.fetch_add(1, Ordering::Relaxed).hash(&mut hasher);
        Self::from_numeric(hasher.finish())
    }

    pub fn from_numeric(numeric: u64) -> Self {
        Self {
            numeric,
            hex: format!("{numeric:016x}"),
        }
    }
}

impl std::fmt::Display for DocumentId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.hex)
    }
}
