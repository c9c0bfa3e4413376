//! # Directory Diff Engine
//!
//! Compares what is on the device against the [`DesiredLayout`] and splits
//! the work into delete / create / keep sets. Identity is the artifact's
//! relative path (`<folder>/<stem>.<ext>`, forward slashes); a moved or
//! renamed file is therefore a delete plus a create.

use crate::library::{DesiredFile, DesiredLayout};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

/// Artifacts currently on the device: relative path → absolute path.
pub type ExistingArtifacts = BTreeMap<String, PathBuf>;

/// One artifact the device should hold after the sync.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedArtifact {
    /// Path relative to the artifacts directory, `/`-separated
    pub relative_path: String,
    /// Position of the owning folder in the layout
    pub folder_index: usize,
    /// Owning folder name, empty for root-level files
    pub folder_name: String,
    pub file: DesiredFile,
}

/// Deduplicated list of desired artifacts, in layout order.
#[derive(Debug, Clone, Default)]
pub struct ArtifactPlan {
    artifacts: Vec<PlannedArtifact>,
    by_path: HashMap<String, usize>,
}

impl ArtifactPlan {
    /// Expand a layout into artifact paths.
    ///
    /// When two desired files map to the same relative path, the last one
    /// wins and takes the later position.
    pub fn from_layout(layout: &DesiredLayout, extension: &str) -> Self {
        let mut candidates = Vec::with_capacity(layout.file_count());
        for (folder_index, folder) in layout.music_folders.iter().enumerate() {
            for file in &folder.files {
                candidates.push(PlannedArtifact {
                    relative_path: artifact_relative_path(&folder.name, file, extension),
                    folder_index,
                    folder_name: folder.name.clone(),
                    file: file.clone(),
                });
            }
        }

        let mut last_seen: HashMap<&str, usize> = HashMap::new();
        for (position, candidate) in candidates.iter().enumerate() {
            if let Some(previous) = last_seen.insert(&candidate.relative_path, position) {
                warn!(
                    path = %candidate.relative_path,
                    replaced = %candidates[previous].file.source_path.display(),
                    "Duplicate artifact path, last occurrence wins"
                );
            }
        }

        let keep: Vec<bool> = candidates
            .iter()
            .enumerate()
            .map(|(position, c)| last_seen.get(c.relative_path.as_str()) == Some(&position))
            .collect();

        let artifacts: Vec<PlannedArtifact> = candidates
            .into_iter()
            .zip(keep)
            .filter_map(|(candidate, keep)| keep.then_some(candidate))
            .collect();

        let by_path = artifacts
            .iter()
            .enumerate()
            .map(|(position, artifact)| (artifact.relative_path.clone(), position))
            .collect();

        Self { artifacts, by_path }
    }

    pub fn len(&self) -> usize {
        self.artifacts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.artifacts.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &PlannedArtifact> {
        self.artifacts.iter()
    }

    pub fn get(&self, relative_path: &str) -> Option<&PlannedArtifact> {
        self.by_path
            .get(relative_path)
            .map(|position| &self.artifacts[*position])
    }

    pub fn contains(&self, relative_path: &str) -> bool {
        self.by_path.contains_key(relative_path)
    }
}

/// `<folder>/<stem>.<ext>`, or `<stem>.<ext>` for the root folder.
pub fn artifact_relative_path(folder_name: &str, file: &DesiredFile, extension: &str) -> String {
    if folder_name.is_empty() {
        format!("{}.{}", file.stem(), extension)
    } else {
        format!("{}/{}.{}", folder_name, file.stem(), extension)
    }
}

/// The add/keep/delete split.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncDiff {
    /// On the device but not desired
    pub to_delete: ExistingArtifacts,
    /// Desired but absent, in plan order
    pub to_create: Vec<String>,
    /// Desired and already present, in plan order
    pub to_keep: Vec<String>,
}

/// Compute the diff between the device and the plan.
///
/// Since `to_delete` only ever holds undesired paths, a failed deletion can
/// never turn a desired file into a kept one; create/keep are final here.
pub fn compute_diff(existing: &ExistingArtifacts, plan: &ArtifactPlan) -> SyncDiff {
    let to_delete: ExistingArtifacts = existing
        .iter()
        .filter(|(relative, _)| !plan.contains(relative))
        .map(|(relative, absolute)| (relative.clone(), absolute.clone()))
        .collect();

    let (to_keep, to_create): (Vec<String>, Vec<String>) = plan
        .iter()
        .map(|artifact| artifact.relative_path.clone())
        .partition(|relative| existing.contains_key(relative));

    debug!(
        delete = to_delete.len(),
        create = to_create.len(),
        keep = to_keep.len(),
        "Computed sync diff"
    );

    SyncDiff {
        to_delete,
        to_create,
        to_keep,
    }
}

/// Recursively collect every artifact under `music_root`.
///
/// Extension matching is ASCII case-insensitive. Unreadable entries are
/// skipped with a warning.
///
/// Keys keep the on-disk spelling and compare case-sensitively. A folder
/// renamed only by case (`Pop` to `pop`) is therefore a delete plus
/// recreate. On case-insensitive media the old directory is pruned once
/// emptied, so the new spelling takes over on the next write. If it still
/// holds foreign files it cannot be pruned, and its artifacts are recreated
/// under the old spelling on every sync.
pub fn scan_artifacts(music_root: &Path, extension: &str) -> ExistingArtifacts {
    let mut found = ExistingArtifacts::new();

    for entry in WalkDir::new(music_root).follow_links(false) {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                warn!("Skipping unreadable entry during scan: {}", e);
                continue;
            }
        };

        if !entry.file_type().is_file() {
            continue;
        }

        let matches = entry
            .path()
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case(extension));
        if !matches {
            continue;
        }

        let Ok(relative) = entry.path().strip_prefix(music_root) else {
            continue;
        };

        let key = relative
            .components()
            .map(|component| component.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");

        found.insert(key, entry.path().to_path_buf());
    }

    found
}

/// [`scan_artifacts`] on the blocking pool.
pub async fn scan_artifacts_async(music_root: &Path, extension: &str) -> io::Result<ExistingArtifacts> {
    let root = music_root.to_path_buf();
    let extension = extension.to_string();

    tokio::task::spawn_blocking(move || scan_artifacts(&root, &extension))
        .await
        .map_err(io::Error::other)
}

/// Outcome of removing stale artifacts.
#[derive(Debug, Default)]
pub struct DeletionOutcome {
    pub deleted: Vec<String>,
    pub failed: Vec<(String, io::Error)>,
}

/// Delete every stale artifact, continuing past failures.
pub async fn delete_stale(to_delete: &ExistingArtifacts) -> DeletionOutcome {
    let mut outcome = DeletionOutcome::default();

    for (relative, absolute) in to_delete {
        match tokio::fs::remove_file(absolute).await {
            Ok(()) => {
                debug!(path = %relative, "Deleted stale artifact");
                outcome.deleted.push(relative.clone());
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                outcome.deleted.push(relative.clone());
            }
            Err(e) => {
                warn!(path = %relative, "Failed to delete stale artifact: {}", e);
                outcome.failed.push((relative.clone(), e));
            }
        }
    }

    if !outcome.deleted.is_empty() {
        info!("Deleted {} stale artifacts", outcome.deleted.len());
    }

    outcome
}

/// Remove now-empty folder directories that are not part of the layout.
///
/// Only direct children of `music_root` are considered; anything non-empty
/// is left alone. Returns the number of directories removed.
pub async fn prune_empty_folders(music_root: &Path, layout: &DesiredLayout) -> usize {
    let desired: BTreeSet<&str> = layout.folder_names().collect();
    let mut removed = 0;

    let mut entries = match tokio::fs::read_dir(music_root).await {
        Ok(entries) => entries,
        Err(e) => {
            warn!("Cannot list artifacts directory for pruning: {}", e);
            return 0;
        }
    };

    loop {
        let entry = match entries.next_entry().await {
            Ok(Some(entry)) => entry,
            Ok(None) => break,
            Err(e) => {
                warn!("Stopped pruning early: {}", e);
                break;
            }
        };

        let is_dir = entry.file_type().await.map(|t| t.is_dir()).unwrap_or(false);
        let name = entry.file_name();
        let Some(name) = name.to_str() else { continue };

        if !is_dir || desired.contains(name) {
            continue;
        }

        // remove_dir refuses non-empty directories, which is what we want
        match tokio::fs::remove_dir(entry.path()).await {
            Ok(()) => {
                debug!(folder = %name, "Removed empty stale folder");
                removed += 1;
            }
            Err(e) => debug!(folder = %name, "Kept folder: {}", e),
        }
    }

    removed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::library::DesiredFolder;
    use tempfile::TempDir;

    fn layout(folders: &[(&str, &[&str])]) -> DesiredLayout {
        DesiredLayout::new(
            folders
                .iter()
                .map(|(name, files)| {
                    DesiredFolder::new(
                        *name,
                        files
                            .iter()
                            .map(|f| DesiredFile::new(*f, format!("/src/{}", f)))
                            .collect(),
                    )
                })
                .collect(),
        )
    }

    fn existing(paths: &[&str]) -> ExistingArtifacts {
        paths
            .iter()
            .map(|p| (p.to_string(), PathBuf::from(format!("/dev/music/{}", p))))
            .collect()
    }

    #[test]
    fn test_relative_paths() {
        let plan = ArtifactPlan::from_layout(
            &layout(&[("Pop", &["song1.mp3"]), ("", &["intro.flac"])]),
            "pcm",
        );
        let paths: Vec<_> = plan.iter().map(|a| a.relative_path.as_str()).collect();
        assert_eq!(paths, vec!["Pop/song1.pcm", "intro.pcm"]);
    }

    #[test]
    fn test_duplicate_paths_last_wins() {
        let plan = ArtifactPlan::from_layout(
            &layout(&[("Pop", &["song.mp3", "other.mp3", "song.flac"])]),
            "pcm",
        );

        assert_eq!(plan.len(), 2);
        let paths: Vec<_> = plan.iter().map(|a| a.relative_path.as_str()).collect();
        assert_eq!(paths, vec!["Pop/other.pcm", "Pop/song.pcm"]);
        assert_eq!(plan.get("Pop/song.pcm").unwrap().file.name, "song.flac");
    }

    #[test]
    fn test_diff_empty_device() {
        let plan = ArtifactPlan::from_layout(
            &layout(&[("Pop", &["song1.mp3"]), ("Rock", &["song2.mp3"])]),
            "pcm",
        );
        let diff = compute_diff(&ExistingArtifacts::new(), &plan);

        assert!(diff.to_delete.is_empty());
        assert_eq!(diff.to_create, vec!["Pop/song1.pcm", "Rock/song2.pcm"]);
        assert!(diff.to_keep.is_empty());
    }

    #[test]
    fn test_diff_is_minimal() {
        let plan = ArtifactPlan::from_layout(
            &layout(&[("Pop", &["song1.mp3", "song3.mp3"])]),
            "pcm",
        );
        let diff = compute_diff(&existing(&["Pop/song1.pcm", "Rock/song2.pcm"]), &plan);

        assert_eq!(
            diff.to_delete.keys().collect::<Vec<_>>(),
            vec!["Rock/song2.pcm"]
        );
        assert_eq!(diff.to_create, vec!["Pop/song3.pcm"]);
        assert_eq!(diff.to_keep, vec!["Pop/song1.pcm"]);
    }

    #[test]
    fn test_move_is_delete_plus_create() {
        let plan = ArtifactPlan::from_layout(&layout(&[("PopRenamed", &["song1.mp3"])]), "pcm");
        let diff = compute_diff(&existing(&["Pop/song1.pcm"]), &plan);

        assert!(diff.to_delete.contains_key("Pop/song1.pcm"));
        assert_eq!(diff.to_create, vec!["PopRenamed/song1.pcm"]);
        assert!(diff.to_keep.is_empty());
    }

    #[test]
    fn test_scan_artifacts() {
        let dir = TempDir::new().unwrap();
        let root = dir.path();
        std::fs::create_dir_all(root.join("Pop/Nested")).unwrap();
        std::fs::write(root.join("Pop/song1.pcm"), b"x").unwrap();
        std::fs::write(root.join("Pop/Nested/deep.PCM"), b"x").unwrap();
        std::fs::write(root.join("intro.pcm"), b"x").unwrap();
        std::fs::write(root.join("index.json"), b"{}").unwrap();
        std::fs::write(root.join("Pop/cover.jpg"), b"x").unwrap();

        let found = scan_artifacts(root, "pcm");
        assert_eq!(
            found.keys().collect::<Vec<_>>(),
            vec!["Pop/Nested/deep.PCM", "Pop/song1.pcm", "intro.pcm"]
        );
        assert_eq!(found["intro.pcm"], root.join("intro.pcm"));
    }

    #[test]
    fn test_scan_missing_root_is_empty() {
        let dir = TempDir::new().unwrap();
        assert!(scan_artifacts(&dir.path().join("nope"), "pcm").is_empty());
    }

    #[tokio::test]
    async fn test_delete_stale_and_prune() {
        let dir = TempDir::new().unwrap();
        let root = dir.path();
        std::fs::create_dir_all(root.join("Pop")).unwrap();
        std::fs::create_dir_all(root.join("Rock")).unwrap();
        std::fs::create_dir_all(root.join("Jazz")).unwrap();
        std::fs::write(root.join("Rock/song2.pcm"), b"x").unwrap();
        std::fs::write(root.join("Jazz/notes.txt"), b"keep me").unwrap();

        let stale = scan_artifacts(root, "pcm");
        let outcome = delete_stale(&stale).await;
        assert_eq!(outcome.deleted, vec!["Rock/song2.pcm"]);
        assert!(outcome.failed.is_empty());

        let removed = prune_empty_folders(root, &layout(&[("Pop", &["song1.mp3"])])).await;
        assert_eq!(removed, 1);
        assert!(root.join("Pop").is_dir());
        assert!(!root.join("Rock").exists());
        assert!(root.join("Jazz").is_dir());
    }
}
