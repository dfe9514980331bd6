//! Concurrency-safe backend registry with optional JSON persistence.
//!
//! # Responsibilities
//! - Hold the ordered list of eligible backends
//! - Serialize writers, let readers run concurrently
//! - Mirror every mutation to the snapshot file when persistence is enabled

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use thiserror::Error;

use crate::observability::metrics;
use crate::registry::backend::Backend;

/// Errors raised by registry persistence.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// The snapshot file could not be read or written.
    #[error("registry snapshot {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The snapshot file exists but is not a valid backend list.
    #[error("malformed registry snapshot {path:?}: {source}")]
    Malformed {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    /// The in-memory list could not be serialized.
    #[error("failed to serialize registry: {0}")]
    Serialize(#[source] serde_json::Error),
}

/// The authoritative set of currently eligible backends.
///
/// The in-memory list is the source of truth; the snapshot file is
/// best-effort durability for restarts. A failed write is reported to the
/// caller but the mutation stays applied.
#[derive(Debug)]
pub struct Registry {
    backends: RwLock<Vec<Backend>>,
    path: Option<PathBuf>,
}

impl Registry {
    /// A registry without persistence.
    pub fn in_memory() -> Self {
        Self {
            backends: RwLock::new(Vec::new()),
            path: None,
        }
    }

    /// Open a persistent registry, loading the snapshot at `path`.
    ///
    /// A missing file starts an empty registry; a malformed one is an error.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, RegistryError> {
        let path = path.into();
        let backends = load_snapshot(&path)?;

        tracing::info!(path = ?path, backends = backends.len(), "Registry loaded");
        metrics::set_registry_size(backends.len());

        Ok(Self {
            backends: RwLock::new(backends),
            path: Some(path),
        })
    }

    /// Open from an optional path, falling back to an in-memory registry.
    pub fn from_path(path: Option<&str>) -> Result<Self, RegistryError> {
        match path {
            Some(p) => Self::open(p),
            None => Ok(Self::in_memory()),
        }
    }

    /// Append a backend. Duplicates are not rejected here.
    pub fn add(&self, backend: Backend) -> Result<(), RegistryError> {
        let mut backends = self.backends.write().expect("registry lock poisoned");
        tracing::info!(address = %backend.address, "Backend registered");
        backends.push(backend);
        metrics::set_registry_size(backends.len());
        self.persist(&backends)
    }

    /// Append a backend unless its address is already registered.
    ///
    /// Returns whether the backend was added. The check and the append
    /// happen under one write lock.
    pub fn add_if_absent(&self, backend: Backend) -> Result<bool, RegistryError> {
        let mut backends = self.backends.write().expect("registry lock poisoned");
        if backends.iter().any(|b| b.address == backend.address) {
            return Ok(false);
        }
        tracing::info!(address = %backend.address, "Backend registered");
        backends.push(backend);
        metrics::set_registry_size(backends.len());
        self.persist(&backends)?;
        Ok(true)
    }

    /// Remove the first backend with `address`.
    ///
    /// Returns whether an entry was removed; absent addresses are a no-op.
    pub fn remove(&self, address: &str) -> Result<bool, RegistryError> {
        let mut backends = self.backends.write().expect("registry lock poisoned");
        let Some(index) = backends.iter().position(|b| b.address == address) else {
            return Ok(false);
        };
        backends.remove(index);
        tracing::info!(address = %address, remaining = backends.len(), "Backend removed");
        metrics::set_registry_size(backends.len());
        self.persist(&backends)?;
        Ok(true)
    }

    /// Snapshot copy of the current backends, in registration order.
    pub fn get_all(&self) -> Vec<Backend> {
        self.backends.read().expect("registry lock poisoned").clone()
    }

    pub fn contains(&self, address: &str) -> bool {
        self.backends
            .read()
            .expect("registry lock poisoned")
            .iter()
            .any(|b| b.address == address)
    }

    pub fn len(&self) -> usize {
        self.backends.read().expect("registry lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Snapshot file path, if persistence is enabled.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    // Called with the write lock held so file order matches mutation order.
    fn persist(&self, backends: &[Backend]) -> Result<(), RegistryError> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let result = save_snapshot(path, backends);
        if let Err(e) = &result {
            tracing::error!(error = %e, "Failed to persist registry");
        }
        result
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::in_memory()
    }
}

fn load_snapshot(path: &Path) -> Result<Vec<Backend>, RegistryError> {
    let data = match fs::read(path) {
        Ok(data) => data,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(source) => {
            return Err(RegistryError::Io {
                path: path.to_path_buf(),
                source,
            })
        }
    };
    serde_json::from_slice(&data).map_err(|source| RegistryError::Malformed {
        path: path.to_path_buf(),
        source,
    })
}

fn save_snapshot(path: &Path, backends: &[Backend]) -> Result<(), RegistryError> {
    let data = serde_json::to_vec(backends).map_err(RegistryError::Serialize)?;

    // Write-then-rename so readers never observe a truncated snapshot.
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);

    let io_err = |source: io::Error| RegistryError::Io {
        path: path.to_path_buf(),
        source,
    };
    fs::write(&tmp, &data).map_err(io_err)?;
    fs::rename(&tmp, path).map_err(io_err)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Arc;
    use tempfile::tempdir;

    #[test]
    fn test_add_remove_get_all() {
        let registry = Registry::in_memory();
        registry.add(Backend::new("a:1")).unwrap();
        registry.add(Backend::new("b:2")).unwrap();
        registry.add(Backend::new("a:1")).unwrap();

        assert_eq!(registry.len(), 3);
        assert!(registry.remove("a:1").unwrap());
        assert_eq!(
            registry.get_all(),
            vec![Backend::new("b:2"), Backend::new("a:1")],
            "only the first match is removed"
        );
        assert!(!registry.remove("missing:0").unwrap());
    }

    #[test]
    fn test_add_if_absent() {
        let registry = Registry::in_memory();
        assert!(registry.add_if_absent(Backend::new("a:1")).unwrap());
        assert!(!registry.add_if_absent(Backend::new("a:1")).unwrap());
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_snapshot_is_a_copy() {
        let registry = Registry::in_memory();
        registry.add(Backend::new("a:1")).unwrap();
        let snapshot = registry.get_all();
        registry.remove("a:1").unwrap();
        assert_eq!(snapshot.len(), 1);
        assert!(registry.is_empty());
    }

    #[test]
    fn test_persistence_round_trip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("registry.json");

        let registry = Registry::open(&path).unwrap();
        registry.add(Backend::new("10.0.0.1:80")).unwrap();
        registry.add(Backend::new("10.0.0.2:80")).unwrap();
        drop(registry);

        let reopened = Registry::open(&path).unwrap();
        let set: HashSet<_> = reopened.get_all().into_iter().collect();
        let expected: HashSet<_> = [Backend::new("10.0.0.1:80"), Backend::new("10.0.0.2:80")]
            .into_iter()
            .collect();
        assert_eq!(set, expected);

        let raw = fs::read_to_string(&path).unwrap();
        assert_eq!(raw, r#"[{"Address":"10.0.0.1:80"},{"Address":"10.0.0.2:80"}]"#);
    }

    #[test]
    fn test_missing_file_starts_empty() {
        let dir = tempdir().unwrap();
        let registry = Registry::open(dir.path().join("absent.json")).unwrap();
        assert!(registry.is_empty());
    }

    #[test]
    fn test_malformed_file_is_fatal() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("registry.json");
        fs::write(&path, "{not json").unwrap();
        assert!(matches!(
            Registry::open(&path),
            Err(RegistryError::Malformed { .. })
        ));
    }

    #[test]
    fn test_write_failure_keeps_mutation() {
        let dir = tempdir().unwrap();
        // Parent directory does not exist, so every save fails.
        let registry = Registry::open(dir.path().join("missing-dir").join("r.json")).unwrap();

        assert!(registry.add(Backend::new("a:1")).is_err());
        assert!(registry.contains("a:1"));
    }

    #[test]
    fn test_concurrent_mutations_are_not_lost() {
        let registry = Arc::new(Registry::in_memory());
        let handles: Vec<_> = (0..8)
            .map(|t| {
                let registry = registry.clone();
                std::thread::spawn(move || {
                    for i in 0..50 {
                        let addr = format!("10.0.{}.{}:80", t, i);
                        registry.add(Backend::new(addr.clone())).unwrap();
                        let _ = registry.get_all();
                        if i % 2 == 0 {
                            assert!(registry.remove(&addr).unwrap());
                        }
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        let all = registry.get_all();
        assert_eq!(all.len(), 8 * 25);
        let unique: HashSet<_> = all.iter().collect();
        assert_eq!(unique.len(), all.len());
    }
}
