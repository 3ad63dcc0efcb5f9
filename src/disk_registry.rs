use std::path::{Path, PathBuf};

use redb::{Database, ReadableDatabase, ReadableTable, TableDefinition};

use crate::{
    document::IndexedDocument,
    error::Result,
    registry::{DocumentRegistry, new_upload},
};

const DOCUMENTS: TableDefinition<&str, &[u8]> =
    TableDefinition::new("documents");

/// A registry backed by the local disk.
///
/// Metadata lives in a redb table keyed by document id (JSON values); file
/// bytes are stored as one blob per document under `files_dir`, named by
/// the document's `file_name`.
pub struct DiskRegistry {
    db: Database,
    files_dir: PathBuf,
}

impl DiskRegistry {
    pub fn open(db_path: &Path, files_dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(files_dir)?;
        let db = Database::create(db_path)?;

        let txn = db.begin_write()?;
        txn.open_table(DOCUMENTS)?;
        txn.commit()?;

        Ok(Self {
            db,
            files_dir: files_dir.to_path_buf(),
        })
    }

    fn blob_path(&self, meta: &IndexedDocument) -> PathBuf {
        self.files_dir.join(&meta.file_name)
    }

    fn write_metadata(&self, meta: &IndexedDocument) -> Result<()> {
        let bytes = serde_json::to_vec(meta)?;
        let txn = self.db.begin_write()?;
        {
            let mut table = txn.open_table(DOCUMENTS)?;
            table.insert(meta.id.as_str(), bytes.as_slice())?;
        }
        txn.commit()?;
        Ok(())
    }
}

impl DocumentRegistry for DiskRegistry {
    fn list_all(&self) -> Result<Vec<IndexedDocument>> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(DOCUMENTS)?;
        let mut result = Vec::new();
        for entry in table.iter()? {
            let (_k, v) = entry?;
            match serde_json::from_slice::<IndexedDocument>(v.value()) {
                Ok(meta) => result.push(meta),
                Err(e) => {
                    tracing::warn!(
                        error = %e,
                        "skipping unreadable registry entry"
                    )
                }
            }
        }
        result.sort_by(|a, b| {
            a.upload_date.cmp(&b.upload_date).then_with(|| a.id.cmp(&b.id))
        });
        Ok(result)
    }

    fn get_bytes(&self, id: &str) -> Result<Option<Vec<u8>>> {
        let Some(meta) = self.get_metadata(id)? else {
            return Ok(None);
        };
        match std::fs::read(self.blob_path(&meta)) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn get_metadata(&self, id: &str) -> Result<Option<IndexedDocument>> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(DOCUMENTS)?;
        let Some(guard) = table.get(id)? else {
            return Ok(None);
        };
        Ok(Some(serde_json::from_slice(guard.value())?))
    }

    fn put(
        &self,
        original_name: &str,
        mime_type: Option<&str>,
        bytes: &[u8],
    ) -> Result<IndexedDocument> {
        let meta = new_upload(original_name, mime_type, bytes.len() as u64);

        let path = self.blob_path(&meta);
        let tmp = path.with_extension("part");
        std::fs::write(&tmp, bytes)?;
        std::fs::rename(&tmp, &path)?;

        self.write_metadata(&meta)?;
        Ok(meta)
    }

    fn delete(&self, id: &str) -> Result<bool> {
        let Some(meta) = self.get_metadata(id)? else {
            return Ok(false);
        };

        let txn = self.db.begin_write()?;
        {
            let mut table = txn.open_table(DOCUMENTS)?;
            table.remove(id)?;
        }
        txn.commit()?;

        match std::fs::remove_file(self.blob_path(&meta)) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        Ok(true)
    }
}

impl std::fmt::Debug for DiskRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DiskRegistry")
            .field("files_dir", &self.files_dir)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_registry() -> (tempfile::TempDir, DiskRegistry) {
        let tmp = tempfile::tempdir().unwrap();
        let registry = DiskRegistry::open(
            &tmp.path().join("registry.redb"),
            &tmp.path().join("files"),
        )
        .unwrap();
        (tmp, registry)
    }

    #[test]
    fn put_and_get() {
        let (_tmp, registry) = test_registry();
        let meta = registry.put("notes.md", None, b"# Notes").unwrap();

        assert_eq!(registry.get_metadata(&meta.id).unwrap().unwrap(), meta);
        assert_eq!(registry.get_bytes(&meta.id).unwrap().unwrap(), b"# Notes");
        assert_eq!(registry.list_all().unwrap(), vec![meta]);
    }

    #[test]
    fn delete_removes_blob_and_metadata() {
        let (tmp, registry) = test_registry();
        let meta = registry.put("a.txt", None, b"abc").unwrap();
        let blob = tmp.path().join("files").join(&meta.file_name);
        assert!(blob.exists());

        assert!(registry.delete(&meta.id).unwrap());
        assert!(!blob.exists());
        assert!(registry.get_metadata(&meta.id).unwrap().is_none());
        assert!(!registry.delete(&meta.id).unwrap());
    }

    #[test]
    fn missing_blob_reads_as_absent() {
        let (tmp, registry) = test_registry();
        let meta = registry.put("a.txt", None, b"abc").unwrap();
        std::fs::remove_file(tmp.path().join("files").join(&meta.file_name))
            .unwrap();

        assert!(registry.get_bytes(&meta.id).unwrap().is_none());
        assert!(registry.get_metadata(&meta.id).unwrap().is_some());
    }

    #[test]
    fn reopen_preserves_documents() {
        let tmp = tempfile::tempdir().unwrap();
        let db_path = tmp.path().join("registry.redb");
        let files = tmp.path().join("files");

        let id = {
            let registry = DiskRegistry::open(&db_path, &files).unwrap();
            registry.put("keep.txt", None, b"persist").unwrap().id
        };

        let registry = DiskRegistry::open(&db_path, &files).unwrap();
        assert_eq!(registry.get_bytes(&id).unwrap().unwrap(), b"persist");
    }
}
