//! Read-only test lookup.

use crate::config::{Params, TestCase};
use crate::Result;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{PoisonError, RwLock};
use tracing::{debug, warn};

/// Source of test definitions. Returned tests are snapshots: later updates to
/// the store never reach a copy already handed out.
pub trait TestStore: Send + Sync {
    fn get(&self, id: &str) -> Option<TestCase>;
    fn ids(&self) -> Vec<String>;
}

/// In-memory store.
#[derive(Debug, Default)]
pub struct MemoryTestStore {
    tests: RwLock<HashMap<String, TestCase>>,
}

impl MemoryTestStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a test; returns the previous version.
    pub fn put(&self, test: TestCase) -> Option<TestCase> {
        self.tests
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(test.id.clone(), test)
    }

    pub fn remove(&self, id: &str) -> Option<TestCase> {
        self.tests
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(id)
    }
}

impl TestStore for MemoryTestStore {
    fn get(&self, id: &str) -> Option<TestCase> {
        self.tests
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .cloned()
    }

    fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .tests
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        ids.sort();
        ids
    }
}

/// Store backed by a directory of YAML test files, loaded once.
#[derive(Debug)]
pub struct DirTestStore {
    root: PathBuf,
    inner: MemoryTestStore,
}

impl DirTestStore {
    /// Load every `*.yaml`/`*.yml` file under `root` (not recursive).
    /// Files that fail to parse are skipped with a warning.
    pub fn open<P: AsRef<Path>>(root: P, params: &Params) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        let inner = MemoryTestStore::new();
        let mut entries: Vec<PathBuf> = std::fs::read_dir(&root)?
            .filter_map(|e| e.ok().map(|e| e.path()))
            .filter(|p| {
                matches!(
                    p.extension().and_then(|e| e.to_str()),
                    Some("yaml") | Some("yml")
                )
            })
            .collect();
        entries.sort();

        for path in entries {
            match TestCase::load_with_params(&path, params) {
                Ok(test) => {
                    debug!("loaded test '{}' from {}", test.id, path.display());
                    if let Some(prev) = inner.put(test) {
                        warn!("duplicate test id '{}' in {}", prev.id, path.display());
                    }
                }
                Err(e) => warn!("skipping {}: {}", path.display(), e),
            }
        }
        Ok(Self { root, inner })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl TestStore for DirTestStore {
    fn get(&self, id: &str) -> Option<TestCase> {
        self.inner.get(id)
    }

    fn ids(&self) -> Vec<String> {
        self.inner.ids()
    }
}
