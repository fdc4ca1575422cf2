//! Storage endpoints for chunk and metadata blobs.

use bytes::Bytes;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use strata_common::{BuildConfig, Result, StrataError};
use tracing::warn;

/// Longest pause between put attempts.
const MAX_BACKOFF: Duration = Duration::from_millis(500);

/// Flat blob store addressed by relative path.
pub trait Endpoint: Send + Sync {
    /// Stores `data` at `path`, replacing any previous blob.
    fn put(&self, path: &str, data: &[u8]) -> Result<()>;

    /// Fetches the blob at `path`, or None if it does not exist.
    fn try_get(&self, path: &str) -> Result<Option<Vec<u8>>>;

    /// Fetches the blob at `path`, failing if it does not exist.
    fn get(&self, path: &str) -> Result<Vec<u8>> {
        self.try_get(path)?.ok_or_else(|| StrataError::NotFound {
            path: path.to_string(),
        })
    }
}

/// Puts a blob, retrying with exponential backoff.
///
/// Exhausting the attempts is returned as `PutFailed`.
pub fn ensure_put(endpoint: &dyn Endpoint, path: &str, data: &[u8], attempts: usize) -> Result<()> {
    let attempts = attempts.max(1);
    let mut backoff = Duration::from_millis(1);
    let mut last_error = String::new();

    for attempt in 1..=attempts {
        match endpoint.put(path, data) {
            Ok(()) => return Ok(()),
            Err(e) => {
                warn!(path, attempt, error = %e, "chunk put failed");
                last_error = e.to_string();
            }
        }
        if attempt < attempts {
            std::thread::sleep(backoff);
            backoff = (backoff * 2).min(MAX_BACKOFF);
        }
    }

    Err(StrataError::PutFailed {
        path: path.to_string(),
        attempts,
        reason: last_error,
    })
}

/// Configuration for the filesystem endpoint.
#[derive(Debug, Clone)]
pub struct FsEndpointConfig {
    /// Directory all paths are relative to.
    pub root: PathBuf,
    /// Enable fsync after writes.
    pub fsync_enabled: bool,
}

impl Default for FsEndpointConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("./index"),
            fsync_enabled: true,
        }
    }
}

impl From<&BuildConfig> for FsEndpointConfig {
    fn from(config: &BuildConfig) -> Self {
        Self {
            root: config.output_dir.clone(),
            fsync_enabled: config.fsync_enabled,
        }
    }
}

/// Endpoint backed by a local directory.
///
/// Writes go to a temporary sibling and are renamed into place, so readers
/// never observe a partially written chunk.
pub struct FsEndpoint {
    config: FsEndpointConfig,
}

impl FsEndpoint {
    /// Creates the endpoint, creating its root directory if needed.
    pub fn new(config: FsEndpointConfig) -> Result<Self> {
        fs::create_dir_all(&config.root)?;
        Ok(Self { config })
    }

    /// Returns the root directory.
    pub fn root(&self) -> &Path {
        &self.config.root
    }

    fn full_path(&self, path: &str) -> PathBuf {
        self.config.root.join(path)
    }
}

impl Endpoint for FsEndpoint {
    fn put(&self, path: &str, data: &[u8]) -> Result<()> {
        let full = self.full_path(path);
        if let Some(parent) = full.parent() {
            fs::create_dir_all(parent)?;
        }

        let mut tmp_name = full.clone().into_os_string();
        tmp_name.push(".tmp");
        let tmp = PathBuf::from(tmp_name);

        {
            let mut file = File::create(&tmp)?;
            file.write_all(data)?;
            if self.config.fsync_enabled {
                file.sync_all()?;
            }
        }
        fs::rename(&tmp, &full)?;
        Ok(())
    }

    fn try_get(&self, path: &str) -> Result<Option<Vec<u8>>> {
        match fs::read(self.full_path(path)) {
            Ok(data) => Ok(Some(data)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

/// Endpoint held entirely in memory.
#[derive(Default)]
pub struct MemoryEndpoint {
    objects: Mutex<HashMap<String, Bytes>>,
    failing_puts: AtomicUsize,
    put_count: AtomicUsize,
}

impl MemoryEndpoint {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the next `count` puts fail with an I/O error.
    pub fn fail_next_puts(&self, count: usize) {
        self.failing_puts.store(count, Ordering::Release);
    }

    /// Number of successful puts so far.
    pub fn put_count(&self) -> usize {
        self.put_count.load(Ordering::Acquire)
    }

    /// Returns true if a blob exists at `path`.
    pub fn contains(&self, path: &str) -> bool {
        self.objects.lock().contains_key(path)
    }

    /// Sorted list of stored paths.
    pub fn paths(&self) -> Vec<String> {
        let mut paths: Vec<_> = self.objects.lock().keys().cloned().collect();
        paths.sort();
        paths
    }
}

impl Endpoint for MemoryEndpoint {
    fn put(&self, path: &str, data: &[u8]) -> Result<()> {
        let failing = self
            .failing_puts
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1));
        if failing.is_ok() {
            return Err(StrataError::IoError(format!("injected put failure: {}", path)));
        }

        self.objects
            .lock()
            .insert(path.to_string(), Bytes::copy_from_slice(data));
        self.put_count.fetch_add(1, Ordering::AcqRel);
        Ok(())
    }

    fn try_get(&self, path: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.objects.lock().get(path).map(|b| b.to_vec()))
    }
}
