//! Resolution of service keys to rendezvous paths.
//!
//! The engine consults its [`Locator`] once for every request that needs a
//! fresh connection. Two implementations are provided:
//!
//! - [`DirectoryLocator`]: services listen on sockets named by their search
//!   key inside one directory
//! - [`MapLocator`]: an explicit in-memory table

use crate::error::{Fault, FaultCode};
use crate::service_key::ServiceKey;

use std::collections::HashMap;
use std::fs;
use std::os::unix::fs::FileTypeExt;
use std::path::{Path, PathBuf};
use tracing::trace;

pub trait Locator: Send + Sync {
    /// Returns the socket path serving `key`, or a `ServiceNotFound` fault.
    fn resolve(&self, key: &ServiceKey) -> Result<PathBuf, Fault>;
}

fn not_found(key: &ServiceKey) -> Fault {
    Fault::new(
        FaultCode::ServiceNotFound,
        format!("no service for {}", key.english_key()),
    )
}

/// Looks up `<dir>/<search key>`, then `<dir>/<wildcard search key>`.
#[derive(Debug, Clone)]
pub struct DirectoryLocator {
    dir: PathBuf,
}

impl DirectoryLocator {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Where a service registering `key` should listen.
    pub fn path_for(&self, key: &ServiceKey) -> PathBuf {
        self.dir.join(key.search_key())
    }

    fn is_socket(path: &Path) -> bool {
        fs::symlink_metadata(path)
            .map(|meta| meta.file_type().is_socket())
            .unwrap_or(false)
    }
}

impl Locator for DirectoryLocator {
    fn resolve(&self, key: &ServiceKey) -> Result<PathBuf, Fault> {
        let candidates = [key.search_key(), key.wildcard_search_key()];

        for name in candidates {
            let path = self.dir.join(&name);
            if Self::is_socket(&path) {
                trace!(key = %key, path = %path.display(), "resolved service");
                return Ok(path);
            }
        }

        Err(not_found(key))
    }
}

/// Resolves from a table keyed by search key or wildcard search key.
#[derive(Debug, Clone, Default)]
pub struct MapLocator {
    entries: HashMap<String, PathBuf>,
}

impl MapLocator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `path` for the service named by `key`, which may omit the
    /// function to serve every function.
    pub fn insert(&mut self, key: &str, path: impl Into<PathBuf>) -> Result<(), Fault> {
        let key = ServiceKey::parse_service(key)?;
        self.entries.insert(key.search_key(), path.into());
        Ok(())
    }

    pub fn with(mut self, key: &str, path: impl Into<PathBuf>) -> Result<Self, Fault> {
        self.insert(key, path)?;
        Ok(self)
    }
}

impl Locator for MapLocator {
    fn resolve(&self, key: &ServiceKey) -> Result<PathBuf, Fault> {
        self.entries
            .get(&key.search_key())
            .or_else(|| self.entries.get(&key.wildcard_search_key()))
            .cloned()
            .ok_or_else(|| not_found(key))
    }
}
