use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

/// On-disk layout of a docsift installation.
///
/// ```text
/// <root>/
///   registry.redb   document metadata
///   files/          uploaded file bytes
///   snapshots/      vector index snapshots
/// ```
#[derive(Debug, Clone)]
pub struct DataDir {
    root: PathBuf,
}

impl DataDir {
    /// Resolve the data directory from, in order of priority:
    /// 1. An explicit path (from --data-dir)
    /// 2. The DOCSIFT_DATA_DIR environment variable
    /// 3. The XDG data directory (~/.local/share/docsift/)
    pub fn resolve(explicit: Option<&Path>) -> Result<Self> {
        let root = if let Some(path) = explicit {
            path.to_path_buf()
        } else if let Ok(val) = std::env::var("DOCSIFT_DATA_DIR") {
            PathBuf::from(val)
        } else {
            xdg::BaseDirectories::with_prefix("docsift")
                .get_data_home()
                .ok_or_else(|| {
                    Error::Config(
                        "could not determine XDG data home directory".into(),
                    )
                })?
        };

        ensure_dir(&root)?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn registry_db(&self) -> PathBuf {
        self.root.join("registry.redb")
    }

    pub fn files_dir(&self) -> Result<PathBuf> {
        let path = self.root.join("files");
        ensure_dir(&path)?;
        Ok(path)
    }

    pub fn snapshots_dir(&self) -> Result<PathBuf> {
        let path = self.root.join("snapshots");
        ensure_dir(&path)?;
        Ok(path)
    }
}

fn ensure_dir(path: &Path) -> Result<()> {
    std::fs::create_dir_all(path)
        .map_err(|_| Error::DataDir(path.to_path_buf()))
}
