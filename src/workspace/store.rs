//! Allocation, materialisation and teardown of a run's scratch paths ([`RunWorkspace`]).
//!
//! Allocation is synchronous and guarded by a short `std::sync::Mutex`
//! critical section so the separator and trainer adapters can allocate from
//! the same workspace while they run side by side. The lock is never held
//! across an `.await`.
//!
//! Release is a single sequential pass: registered paths are removed deepest
//! first (newest first among equals), so a directory is never removed while
//! one of its registered children is still pending.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use thiserror::Error;
use uuid::Uuid;

use crate::audio::{AudioBlob, AudioRole, DEFAULT_EXTENSION};

// ---------------------------------------------------------------------------
// WorkspaceError
// ---------------------------------------------------------------------------

/// Failures allocating or writing scratch storage.
#[derive(Debug, Error)]
pub enum WorkspaceError {
    /// A run or tool-output directory could not be created.
    #[error("cannot create scratch directory {}: {source}", path.display())]
    CreateDir {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// An input blob could not be written to disk (disk full, permissions …).
    #[error("cannot write scratch file {}: {source}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The workspace was already torn down.
    #[error("workspace for run {0} has already been released")]
    Released(Uuid),
}

// ---------------------------------------------------------------------------
// ReleaseReport
// ---------------------------------------------------------------------------

/// Outcome of [`RunWorkspace::release`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReleaseReport {
    /// Paths that existed and were deleted.
    pub removed: usize,
    /// Paths that were already gone (never written, or deleted by a tool).
    pub missing: usize,
    /// Paths that could not be deleted; each one was logged.
    pub failed: usize,
}

// ---------------------------------------------------------------------------
// RunWorkspace
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct Allocations {
    next_seq: u32,
    root_created: bool,
    paths: Vec<PathBuf>,
}

/// Scratch storage owned by exactly one pipeline run.
#[derive(Debug)]
pub struct RunWorkspace {
    run_id: Uuid,
    root: PathBuf,
    allocations: Mutex<Allocations>,
    released: AtomicBool,
}

impl RunWorkspace {
    /// Create a workspace for a new run under `scratch_root`.
    ///
    /// Nothing touches the disk until the first allocation, so a run that
    /// fails early leaves no trace.
    pub fn create(scratch_root: impl AsRef<Path>) -> Self {
        let run_id = Uuid::new_v4();
        let root = scratch_root.as_ref().join(format!("run-{}", run_id.simple()));
        Self {
            run_id,
            root,
            allocations: Mutex::new(Allocations::default()),
            released: AtomicBool::new(false),
        }
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    /// The run directory (`<scratch_root>/run-<uuid>`).
    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn is_released(&self) -> bool {
        self.released.load(Ordering::SeqCst)
    }

    /// Every path registered so far, in registration order.
    pub fn allocated_paths(&self) -> Vec<PathBuf> {
        self.lock().paths.clone()
    }

    // -----------------------------------------------------------------------
    // Allocation
    // -----------------------------------------------------------------------

    /// Reserve a file path for `role`. The file itself is not created.
    pub fn allocate_file(&self, role: AudioRole, extension: &str) -> Result<PathBuf, WorkspaceError> {
        let extension = sanitize_extension(extension);
        let mut alloc = self.lock_for_allocation()?;
        let seq = alloc.next_seq;
        alloc.next_seq += 1;

        let path = self.root.join(format!("{seq:02}-{}.{extension}", role.slug()));
        alloc.paths.push(path.clone());
        Ok(path)
    }

    /// Create and register a directory for tool output.
    pub fn allocate_dir(&self, label: &str) -> Result<PathBuf, WorkspaceError> {
        let mut alloc = self.lock_for_allocation()?;
        let seq = alloc.next_seq;
        alloc.next_seq += 1;

        let path = self.root.join(format!("{seq:02}-{label}"));
        // Register before creating so a partial create_dir is still cleaned up.
        alloc.paths.push(path.clone());
        std::fs::create_dir_all(&path).map_err(|source| WorkspaceError::CreateDir {
            path: path.clone(),
            source,
        })?;
        Ok(path)
    }

    /// Allocate a file for `blob` and write its bytes.
    pub async fn materialize(&self, blob: &AudioBlob) -> Result<PathBuf, WorkspaceError> {
        let path = self.allocate_file(blob.role(), blob.extension())?;
        tokio::fs::write(&path, blob.bytes())
            .await
            .map_err(|source| WorkspaceError::Write {
                path: path.clone(),
                source,
            })?;
        log::debug!(
            "workspace {}: wrote {} ({} bytes)",
            self.run_id,
            path.display(),
            blob.len()
        );
        Ok(path)
    }

    // -----------------------------------------------------------------------
    // Teardown
    // -----------------------------------------------------------------------

    /// Delete every registered path and the run directory.
    ///
    /// Only the first call does any work; later calls return an empty report.
    /// Deletion failures are logged and counted, never returned.
    pub fn release(&self) -> ReleaseReport {
        if self.released.swap(true, Ordering::SeqCst) {
            return ReleaseReport::default();
        }

        let paths = std::mem::take(&mut self.lock().paths);

        let mut ordered: Vec<(usize, PathBuf)> = paths.into_iter().enumerate().collect();
        ordered.sort_by(|(ia, a), (ib, b)| {
            b.components()
                .count()
                .cmp(&a.components().count())
                .then(ib.cmp(ia))
        });

        let mut report = ReleaseReport::default();
        for (_, path) in ordered {
            match remove_path(&path) {
                Ok(true) => report.removed += 1,
                Ok(false) => report.missing += 1,
                Err(e) => {
                    report.failed += 1;
                    log::warn!(
                        "workspace {}: failed to remove {}: {e}",
                        self.run_id,
                        path.display()
                    );
                }
            }
        }

        log::debug!(
            "workspace {}: released (removed={}, missing={}, failed={})",
            self.run_id,
            report.removed,
            report.missing,
            report.failed
        );
        report
    }

    // -----------------------------------------------------------------------
    // Helpers
    // -----------------------------------------------------------------------

    fn lock(&self) -> MutexGuard<'_, Allocations> {
        self.allocations.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Lock the allocation table, creating the run directory on first use.
    fn lock_for_allocation(&self) -> Result<MutexGuard<'_, Allocations>, WorkspaceError> {
        if self.is_released() {
            return Err(WorkspaceError::Released(self.run_id));
        }

        let mut alloc = self.lock();
        if !alloc.root_created {
            if let Some(parent) = self.root.parent() {
                std::fs::create_dir_all(parent).map_err(|source| WorkspaceError::CreateDir {
                    path: parent.to_path_buf(),
                    source,
                })?;
            }
            // `create_dir` (not `_all`): an existing run directory means a collision.
            std::fs::create_dir(&self.root).map_err(|source| WorkspaceError::CreateDir {
                path: self.root.clone(),
                source,
            })?;
            alloc.root_created = true;
            alloc.paths.push(self.root.clone());
        }
        Ok(alloc)
    }
}

impl Drop for RunWorkspace {
    fn drop(&mut self) {
        if !self.is_released() {
            log::debug!("workspace {}: dropped before release, cleaning up", self.run_id);
            self.release();
        }
    }
}

/// Remove a file or directory tree. `Ok(false)` when it was already gone.
fn remove_path(path: &Path) -> io::Result<bool> {
    let meta = match std::fs::symlink_metadata(path) {
        Ok(meta) => meta,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(false),
        Err(e) => return Err(e),
    };

    let result = if meta.is_dir() {
        std::fs::remove_dir_all(path)
    } else {
        std::fs::remove_file(path)
    };

    match result {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e),
    }
}

fn sanitize_extension(extension: &str) -> &str {
    let ext = extension.trim_start_matches('.');
    if !ext.is_empty() && ext.chars().all(|c| c.is_ascii_alphanumeric()) {
        ext
    } else {
        DEFAULT_EXTENSION
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
