//! Resolution of `upload` step values to files on disk.

use crate::{Error, Result};
use std::path::{Component, Path, PathBuf};
use tracing::debug;

/// Read-only directory of files available to `upload` steps.
///
/// A step value may be:
/// - `file:<path>`: an explicit path, absolute or relative to the working directory
/// - `asset:<name>` / `upload:<name>`: a file inside the store
/// - anything else: an existing path, or a fuzzy filename search in the store
#[derive(Debug, Clone)]
pub struct UploadStore {
    root: PathBuf,
}

impl UploadStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn resolve(&self, reference: &str) -> Result<PathBuf> {
        let reference = reference.trim();
        if reference.is_empty() {
            return Err(Error::UploadNotFound("empty file reference".into()));
        }

        if let Some(path) = strip_prefix_ci(reference, "file:") {
            let path = PathBuf::from(path.trim());
            return if path.is_file() {
                Ok(path)
            } else {
                Err(Error::UploadNotFound(path.display().to_string()))
            };
        }

        let named = strip_prefix_ci(reference, "asset:")
            .or_else(|| strip_prefix_ci(reference, "upload:"))
            .map(str::trim);
        if let Some(name) = named {
            if is_contained(name) {
                let direct = self.root.join(name);
                if direct.is_file() {
                    return Ok(direct);
                }
            }
            return self.search(name);
        }

        let direct = PathBuf::from(reference);
        if direct.is_file() {
            return Ok(direct);
        }
        self.search(reference)
    }

    /// Fuzzy filename search: exact name, then case-insensitive name, then
    /// case-insensitive stem, then shortest name containing the query.
    fn search(&self, query: &str) -> Result<PathBuf> {
        let query_name = Path::new(query)
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or(query);
        let q = query_name.to_lowercase();
        let mut files = Vec::new();
        collect_files(&self.root, &mut files);
        files.sort();

        let name_of = |p: &PathBuf| {
            p.file_name()
                .and_then(|n| n.to_str())
                .map(str::to_string)
                .unwrap_or_default()
        };
        let stem_of = |p: &PathBuf| {
            p.file_stem()
                .and_then(|n| n.to_str())
                .map(str::to_lowercase)
                .unwrap_or_default()
        };

        let found = files
            .iter()
            .find(|p| name_of(p) == query_name)
            .or_else(|| files.iter().find(|p| name_of(p).to_lowercase() == q))
            .or_else(|| files.iter().find(|p| stem_of(p) == q))
            .or_else(|| {
                files
                    .iter()
                    .filter(|p| name_of(p).to_lowercase().contains(&q))
                    .min_by_key(|p| name_of(p).len())
            });

        match found {
            Some(path) => {
                debug!("upload '{}' resolved to {}", query, path.display());
                Ok(path.clone())
            }
            None => Err(Error::UploadNotFound(format!(
                "'{}' in {}",
                query,
                self.root.display()
            ))),
        }
    }
}

fn strip_prefix_ci<'a>(s: &'a str, prefix: &str) -> Option<&'a str> {
    if s.len() >= prefix.len()
        && s.is_char_boundary(prefix.len())
        && s[..prefix.len()].eq_ignore_ascii_case(prefix)
    {
        Some(&s[prefix.len()..])
    } else {
        None
    }
}

/// Whether a relative name stays inside the store.
fn is_contained(name: &str) -> bool {
    Path::new(name)
        .components()
        .all(|c| matches!(c, Component::Normal(_) | Component::CurDir))
}

fn collect_files(dir: &Path, out: &mut Vec<PathBuf>) {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return;
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            collect_files(&path, out);
        } else if path.is_file() {
            out.push(path);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> (tempfile::TempDir, UploadStore) {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("Avatar.png"), b"png").unwrap();
        std::fs::write(dir.path().join("report-2024.pdf"), b"pdf").unwrap();
        std::fs::write(dir.path().join("report-2024-final.pdf"), b"pdf").unwrap();
        std::fs::create_dir(dir.path().join("data")).unwrap();
        std::fs::write(dir.path().join("data").join("users.csv"), b"a,b").unwrap();
        let store = UploadStore::new(dir.path());
        (dir, store)
    }

    #[test]
    fn explicit_file_prefix() {
        let (dir, store) = store();
        let path = dir.path().join("Avatar.png");
        let found = store.resolve(&format!("file:{}", path.display())).unwrap();
        assert_eq!(found, path);
        assert!(store.resolve("file:/definitely/not/here.png").is_err());
    }

    #[test]
    fn asset_reference() {
        let (dir, store) = store();
        assert_eq!(
            store.resolve("asset:data/users.csv").unwrap(),
            dir.path().join("data").join("users.csv")
        );
        assert_eq!(
            store.resolve("upload:Avatar.png").unwrap(),
            dir.path().join("Avatar.png")
        );
    }

    #[test]
    fn asset_reference_cannot_escape_root() {
        let (_dir, store) = store();
        assert!(store.resolve("asset:../etc/passwd").is_err());
    }

    #[test]
    fn fuzzy_search() {
        let (dir, store) = store();
        assert_eq!(store.resolve("avatar.PNG").unwrap(), dir.path().join("Avatar.png"));
        assert_eq!(store.resolve("avatar").unwrap(), dir.path().join("Avatar.png"));
        assert_eq!(store.resolve("users").unwrap(), dir.path().join("data").join("users.csv"));
        // shortest containing name wins
        assert_eq!(
            store.resolve("report").unwrap(),
            dir.path().join("report-2024.pdf")
        );
        let err = store.resolve("missing.docx").unwrap_err();
        assert!(matches!(err, Error::UploadNotFound(_)));
    }
}
