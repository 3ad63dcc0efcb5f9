use std::path::{Path, PathBuf};

use crate::error::Result;

/// A file found while expanding upload arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredFile {
    /// Path relative to the directory it was found under.
    pub relative_path: PathBuf,
    /// Fully resolved absolute path.
    pub absolute_path: PathBuf,
    pub size: u64,
}

/// Extensions picked up when walking a directory.
const SUPPORTED_EXTENSIONS: &[&str] = &["pdf", "docx", "txt", "md", "markdown"];

/// Recursively walk a directory and discover uploadable files.
///
/// Skips hidden files/directories (names starting with `.`) and only
/// returns files with supported extensions. Results are sorted by path.
pub fn discover_files(root: &Path) -> Result<Vec<DiscoveredFile>> {
    let canonical_root = root.canonicalize()?;
    let mut results = Vec::new();
    walk_dir(&canonical_root, &canonical_root, &mut results)?;
    results.sort_by(|a, b| a.relative_path.cmp(&b.relative_path));
    Ok(results)
}

/// Expand command-line paths: directories are walked, files are taken as
/// given whatever their extension.
pub fn expand_paths(paths: &[PathBuf]) -> Result<Vec<DiscoveredFile>> {
    let mut files = Vec::new();
    for path in paths {
        if path.is_dir() {
            files.extend(discover_files(path)?);
        } else {
            let absolute_path = path.canonicalize()?;
            let relative_path = path
                .file_name()
                .map(PathBuf::from)
                .unwrap_or_else(|| path.clone());
            files.push(DiscoveredFile {
                size: std::fs::metadata(&absolute_path)?.len(),
                relative_path,
                absolute_path,
            });
        }
    }
    Ok(files)
}

fn walk_dir(
    root: &Path,
    current: &Path,
    results: &mut Vec<DiscoveredFile>,
) -> Result<()> {
    for entry in std::fs::read_dir(current)? {
        let entry = entry?;
        let file_name = entry.file_name();
        if file_name.to_string_lossy().starts_with('.') {
            continue;
        }

        let file_type = entry.file_type()?;
        let path = entry.path();

        if file_type.is_dir() {
            walk_dir(root, &path, results)?;
        } else if file_type.is_symlink() {
            let Ok(resolved) = path.canonicalize() else {
                continue; // broken symlink
            };
            // Directory links are not followed (cycle prevention).
            if resolved.is_file() && is_supported(&resolved) {
                results.push(discovered(root, &path, &resolved)?);
            }
        } else if file_type.is_file() && is_supported(&path) {
            let abs = path.canonicalize()?;
            results.push(discovered(root, &path, &abs)?);
        }
    }

    Ok(())
}

fn is_supported(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| {
            SUPPORTED_EXTENSIONS
                .iter()
                .any(|s| s.eq_ignore_ascii_case(ext))
        })
}

fn discovered(
    root: &Path,
    original_path: &Path,
    absolute_path: &Path,
) -> Result<DiscoveredFile> {
    let relative_path = original_path
        .strip_prefix(root)
        .unwrap_or(original_path)
        .to_path_buf();

    Ok(DiscoveredFile {
        relative_path,
        absolute_path: absolute_path.to_path_buf(),
        size: std::fs::metadata(absolute_path)?.len(),
    })
}
