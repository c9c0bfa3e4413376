//! # Staging Area
//!
//! Private scratch space for one sync call, outside the device. Every file
//! handed out is registered at creation time and removed by
//! [`StagingArea::cleanup`], which the orchestrator runs on every exit path.
//! Dropping an area that was never cleaned up removes it synchronously as a
//! last resort.

use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use uuid::Uuid;

/// Prefix of per-sync staging directories.
pub const STAGING_PREFIX: &str = "sync-";

/// Result of a cleanup pass.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CleanupReport {
    /// Registered files that were removed
    pub removed: usize,
    /// Registered files that could not be removed
    pub failed: usize,
}

#[derive(Debug)]
pub struct StagingArea {
    root: PathBuf,
    pending: Vec<PathBuf>,
    next_id: usize,
    cleaned: bool,
}

impl StagingArea {
    /// Create `<base>/sync-<uuid>`.
    pub async fn create(base: &Path) -> io::Result<Self> {
        let root = base.join(format!("{}{}", STAGING_PREFIX, Uuid::new_v4()));
        tokio::fs::create_dir_all(&root).await?;
        debug!(root = %root.display(), "Created staging area");

        Ok(Self {
            root,
            pending: Vec::new(),
            next_id: 0,
            cleaned: false,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Reserve a unique staged path and register it for cleanup.
    ///
    /// The file itself is not created.
    pub fn register(&mut self, label: &str) -> PathBuf {
        let path = self.root.join(format!("{:05}-{}", self.next_id, label));
        self.next_id += 1;
        self.pending.push(path.clone());
        path
    }

    /// Remove a single staged file early. It stays registered; cleanup
    /// tolerates files that are already gone.
    pub async fn discard(&self, path: &Path) {
        if let Err(e) = tokio::fs::remove_file(path).await {
            if e.kind() != io::ErrorKind::NotFound {
                warn!(path = %path.display(), "Failed to discard staged file: {}", e);
            }
        }
    }

    /// Remove every registered file and the area itself. Failures are
    /// logged, never returned.
    pub async fn cleanup(&mut self) -> CleanupReport {
        let mut report = CleanupReport::default();

        for path in self.pending.drain(..) {
            match tokio::fs::remove_file(&path).await {
                Ok(()) => report.removed += 1,
                Err(e) if e.kind() == io::ErrorKind::NotFound => report.removed += 1,
                Err(e) => {
                    warn!(path = %path.display(), "Failed to remove staged file: {}", e);
                    report.failed += 1;
                }
            }
        }

        if let Err(e) = tokio::fs::remove_dir_all(&self.root).await {
            if e.kind() != io::ErrorKind::NotFound {
                warn!(root = %self.root.display(), "Failed to remove staging area: {}", e);
            }
        }

        self.cleaned = true;
        debug!(removed = report.removed, failed = report.failed, "Staging cleaned up");
        report
    }
}

impl Drop for StagingArea {
    fn drop(&mut self) {
        if self.cleaned {
            return;
        }

        if let Err(e) = std::fs::remove_dir_all(&self.root) {
            if e.kind() != io::ErrorKind::NotFound {
                warn!(root = %self.root.display(), "Failed to remove abandoned staging area: {}", e);
            }
        }
    }
}

/// Remove staging directories left behind by a process that was killed
/// mid-sync. Returns how many were removed.
///
/// Must not run while another sync uses the same `base`.
pub async fn sweep_stale(base: &Path) -> io::Result<usize> {
    let mut entries = match tokio::fs::read_dir(base).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(0),
        Err(e) => return Err(e),
    };

    let mut removed = 0;
    while let Some(entry) = entries.next_entry().await? {
        let name = entry.file_name();
        let is_staging = name.to_str().is_some_and(|n| n.starts_with(STAGING_PREFIX));
        if !is_staging || !entry.file_type().await?.is_dir() {
            continue;
        }

        match tokio::fs::remove_dir_all(entry.path()).await {
            Ok(()) => removed += 1,
            Err(e) => warn!(path = %entry.path().display(), "Failed to sweep staging dir: {}", e),
        }
    }

    if removed > 0 {
        debug!("Swept {} stale staging directories", removed);
    }
    Ok(removed)
}
