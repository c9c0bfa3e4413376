//! # Index Builder
//!
//! Builds `index.json`, the catalogue the player reads instead of walking
//! the filesystem. The index is rebuilt from scratch on every sync from what
//! is actually on the device afterwards: newly converted artifacts plus kept
//! ones. Files that failed are simply absent.
//!
//! ```json
//! {
//!   "version": "1.0",
//!   "totalFiles": 1,
//!   "allFiles": [{"name": "song1.pcm", "path": "Pop/song1.pcm", "sampleRate": 44100,
//!                 "bitDepth": 16, "channels": 2, "folderIndex": 0,
//!                 "song": null, "album": null, "artist": null}],
//!   "musicFolders": [{"name": "Pop", "files": [...]}]
//! }
//! ```
//!
//! Writing goes through staging: serialize, write to the staging area,
//! parse it back and verify, copy onto the device, then re-read and verify
//! the device copy.

use crate::diff::ArtifactPlan;
use crate::error::{Result, SyncError};
use crate::library::Tags;
use crate::pipeline::ConversionResult;
use crate::staging::StagingArea;
use core_codec::PcmFormat;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Entry of the flat `allFiles` list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexEntry {
    pub name: String,
    pub path: String,
    pub sample_rate: u32,
    pub bit_depth: u16,
    pub channels: u16,
    /// Position in `musicFolders`
    pub folder_index: usize,
    #[serde(default)]
    pub song: Option<String>,
    #[serde(default)]
    pub album: Option<String>,
    #[serde(default)]
    pub artist: Option<String>,
}

/// Entry of a folder's `files` list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FolderEntry {
    pub name: String,
    pub path: String,
    pub sample_rate: u32,
    pub bit_depth: u16,
    pub channels: u16,
    #[serde(default)]
    pub song: Option<String>,
    #[serde(default)]
    pub album: Option<String>,
    #[serde(default)]
    pub artist: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexFolder {
    pub name: String,
    pub files: Vec<FolderEntry>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexFile {
    pub version: String,
    pub total_files: usize,
    pub all_files: Vec<IndexEntry>,
    pub music_folders: Vec<IndexFolder>,
}

impl IndexFile {
    pub fn to_json(&self) -> Result<Vec<u8>> {
        serde_json::to_vec_pretty(self)
            .map_err(|e| SyncError::IndexWrite(format!("Failed to serialize index: {}", e)))
    }

    /// Check internal consistency against the expected number of files.
    pub fn verify(&self, expected_files: usize) -> std::result::Result<(), String> {
        if self.total_files != expected_files {
            return Err(format!(
                "totalFiles is {}, expected {}",
                self.total_files, expected_files
            ));
        }

        if self.all_files.len() != expected_files {
            return Err(format!(
                "allFiles has {} entries, expected {}",
                self.all_files.len(),
                expected_files
            ));
        }

        let folder_files: usize = self.music_folders.iter().map(|f| f.files.len()).sum();
        if folder_files != expected_files {
            return Err(format!(
                "musicFolders list {} files, expected {}",
                folder_files, expected_files
            ));
        }

        if let Some(entry) = self
            .all_files
            .iter()
            .find(|entry| entry.folder_index >= self.music_folders.len())
        {
            return Err(format!(
                "{} points at folder {} of {}",
                entry.path,
                entry.folder_index,
                self.music_folders.len()
            ));
        }

        Ok(())
    }

    fn by_path(&self) -> HashMap<&str, &IndexEntry> {
        self.all_files
            .iter()
            .map(|entry| (entry.path.as_str(), entry))
            .collect()
    }
}

/// What the index records about one present artifact.
#[derive(Debug, Clone)]
struct PresentTrack {
    format: PcmFormat,
    tags: Tags,
}

/// Assembles an [`IndexFile`] in layout order.
pub struct IndexBuilder<'a> {
    plan: &'a ArtifactPlan,
    version: &'a str,
    prior: Option<&'a IndexFile>,
}

impl<'a> IndexBuilder<'a> {
    pub fn new(plan: &'a ArtifactPlan, version: &'a str) -> Self {
        Self {
            plan,
            version,
            prior: None,
        }
    }

    /// Index read from the device before this sync, used to re-associate
    /// kept files with their recorded parameters.
    pub fn with_prior(mut self, prior: Option<&'a IndexFile>) -> Self {
        self.prior = prior;
        self
    }

    /// Build the index from this run's conversions plus kept artifacts.
    ///
    /// Kept files take audio parameters from the prior index when it lists
    /// them, else the device format. Tags come from the desired file when it
    /// has any, else from the prior entry.
    pub fn build(&self, converted: &[ConversionResult], kept: &[String]) -> IndexFile {
        let mut present: HashMap<&str, PresentTrack> = HashMap::new();

        let prior = self.prior.map(IndexFile::by_path).unwrap_or_default();
        for relative in kept {
            let Some(artifact) = self.plan.get(relative) else {
                continue;
            };

            let track = match prior.get(relative.as_str()) {
                Some(entry) => PresentTrack {
                    format: PcmFormat::new(entry.sample_rate, entry.bit_depth, entry.channels),
                    tags: if artifact.file.tags.is_empty() {
                        Tags {
                            title: entry.song.clone(),
                            album: entry.album.clone(),
                            artist: entry.artist.clone(),
                        }
                    } else {
                        artifact.file.tags.clone()
                    },
                },
                None => PresentTrack {
                    format: PcmFormat::DEVICE,
                    tags: artifact.file.tags.clone(),
                },
            };
            present.insert(relative.as_str(), track);
        }

        for result in converted {
            present.insert(
                result.relative_path.as_str(),
                PresentTrack {
                    format: result.format,
                    tags: result.tags.clone(),
                },
            );
        }

        let mut all_files = Vec::with_capacity(present.len());
        let mut music_folders: Vec<IndexFolder> = Vec::new();
        let mut current_layout_folder: Option<usize> = None;

        for artifact in self.plan.iter() {
            let Some(track) = present.get(artifact.relative_path.as_str()) else {
                continue;
            };

            if current_layout_folder != Some(artifact.folder_index) {
                current_layout_folder = Some(artifact.folder_index);
                music_folders.push(IndexFolder {
                    name: artifact.folder_name.clone(),
                    files: Vec::new(),
                });
            }
            let folder_index = music_folders.len() - 1;

            let name = artifact
                .relative_path
                .rsplit('/')
                .next()
                .unwrap_or(&artifact.relative_path)
                .to_string();

            all_files.push(IndexEntry {
                name: name.clone(),
                path: artifact.relative_path.clone(),
                sample_rate: track.format.sample_rate,
                bit_depth: track.format.bit_depth,
                channels: track.format.channels,
                folder_index,
                song: track.tags.title.clone(),
                album: track.tags.album.clone(),
                artist: track.tags.artist.clone(),
            });

            music_folders[folder_index].files.push(FolderEntry {
                name,
                path: artifact.relative_path.clone(),
                sample_rate: track.format.sample_rate,
                bit_depth: track.format.bit_depth,
                channels: track.format.channels,
                song: track.tags.title.clone(),
                album: track.tags.album.clone(),
                artist: track.tags.artist.clone(),
            });
        }

        debug!(
            files = all_files.len(),
            folders = music_folders.len(),
            "Built index"
        );

        IndexFile {
            version: self.version.to_string(),
            total_files: all_files.len(),
            all_files,
            music_folders,
        }
    }
}

/// Read the index currently on the device. A missing or unparsable index
/// is not an error; the sync rebuilds it anyway.
pub async fn read_prior_index(path: &Path) -> Option<IndexFile> {
    let bytes = match tokio::fs::read(path).await {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return None,
        Err(e) => {
            warn!("Cannot read existing index: {}", e);
            return None;
        }
    };

    match serde_json::from_slice(&bytes) {
        Ok(index) => Some(index),
        Err(e) => {
            warn!("Ignoring unparsable existing index: {}", e);
            None
        }
    }
}

/// Serialize into staging and verify the staged copy parses back intact.
pub async fn stage_index(index: &IndexFile, staging: &mut StagingArea) -> Result<PathBuf> {
    let json = index.to_json()?;
    let staged = staging.register("index.json");

    tokio::fs::write(&staged, &json)
        .await
        .map_err(|e| SyncError::IndexWrite(format!("Cannot stage index: {}", e)))?;

    verify_file(&staged, index.total_files).await?;
    debug!(path = %staged.display(), bytes = json.len(), "Index staged and verified");
    Ok(staged)
}

/// Copy a staged index onto the device and verify the device copy.
pub async fn commit_index(staged: &Path, destination: &Path, expected_files: usize) -> Result<()> {
    tokio::fs::copy(staged, destination).await.map_err(|e| {
        SyncError::IndexWrite(format!(
            "Cannot copy index to {}: {}",
            destination.display(),
            e
        ))
    })?;

    verify_file(destination, expected_files).await?;
    info!(path = %destination.display(), files = expected_files, "Index written");
    Ok(())
}

async fn verify_file(path: &Path, expected_files: usize) -> Result<()> {
    let bytes = tokio::fs::read(path).await.map_err(|e| {
        SyncError::IndexVerification(format!("Cannot re-read {}: {}", path.display(), e))
    })?;

    let parsed: IndexFile = serde_json::from_slice(&bytes).map_err(|e| {
        SyncError::IndexVerification(format!("{} is not valid JSON: {}", path.display(), e))
    })?;

    parsed
        .verify(expected_files)
        .map_err(SyncError::IndexVerification)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::library::{DesiredFile, DesiredFolder, DesiredLayout};
    use tempfile::TempDir;

    fn plan() -> ArtifactPlan {
        let mut tagged = DesiredFile::new("song3.mp3", "/src/song3.mp3");
        tagged.tags.title = Some("Song Three".into());

        let layout = DesiredLayout::new(vec![
            DesiredFolder::new(
                "Pop",
                vec![DesiredFile::new("song1.mp3", "/src/song1.mp3"), tagged],
            ),
            DesiredFolder::new("Rock", vec![DesiredFile::new("song2.mp3", "/src/song2.mp3")]),
            DesiredFolder::new("", vec![DesiredFile::new("intro.mp3", "/src/intro.mp3")]),
        ]);
        ArtifactPlan::from_layout(&layout, "pcm")
    }

    fn converted(plan: &ArtifactPlan, path: &str) -> ConversionResult {
        let artifact = plan.get(path).unwrap();
        ConversionResult {
            source_path: artifact.file.source_path.clone(),
            relative_path: path.to_string(),
            folder_name: artifact.folder_name.clone(),
            format: PcmFormat::DEVICE,
            tags: artifact.file.tags.clone(),
        }
    }

    #[test]
    fn test_index_follows_layout_order() {
        let plan = plan();
        let index = IndexBuilder::new(&plan, "1.0").build(
            &[
                converted(&plan, "intro.pcm"),
                converted(&plan, "Pop/song1.pcm"),
            ],
            &["Rock/song2.pcm".to_string()],
        );

        assert_eq!(index.total_files, 3);
        let paths: Vec<_> = index.all_files.iter().map(|e| e.path.as_str()).collect();
        assert_eq!(paths, vec!["Pop/song1.pcm", "Rock/song2.pcm", "intro.pcm"]);

        let folders: Vec<_> = index.music_folders.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(folders, vec!["Pop", "Rock", ""]);
        assert_eq!(index.all_files[2].folder_index, 2);
        assert_eq!(index.all_files[0].name, "song1.pcm");
        assert!(index.verify(3).is_ok());
    }

    #[test]
    fn test_failed_files_and_empty_folders_are_omitted() {
        let plan = plan();
        // song1 failed, Rock entirely failed
        let index = IndexBuilder::new(&plan, "1.0")
            .build(&[converted(&plan, "Pop/song3.pcm"), converted(&plan, "intro.pcm")], &[]);

        assert_eq!(index.total_files, 2);
        assert_eq!(index.music_folders.len(), 2);
        assert_eq!(index.music_folders[1].name, "");
        assert_eq!(index.all_files[1].folder_index, 1);
        assert_eq!(index.all_files[0].song.as_deref(), Some("Song Three"));
    }

    #[test]
    fn test_kept_files_reuse_prior_entry() {
        let plan = plan();
        let prior = IndexFile {
            version: "1.0".into(),
            total_files: 1,
            all_files: vec![IndexEntry {
                name: "song1.pcm".into(),
                path: "Pop/song1.pcm".into(),
                sample_rate: 22_050,
                bit_depth: 16,
                channels: 1,
                folder_index: 0,
                song: Some("Old Title".into()),
                album: Some("Old Album".into()),
                artist: None,
            }],
            music_folders: vec![],
        };

        let index = IndexBuilder::new(&plan, "1.0")
            .with_prior(Some(&prior))
            .build(&[], &["Pop/song1.pcm".to_string(), "Pop/song3.pcm".to_string()]);

        let song1 = &index.all_files[0];
        assert_eq!(song1.sample_rate, 22_050);
        assert_eq!(song1.channels, 1);
        assert_eq!(song1.album.as_deref(), Some("Old Album"));

        // Not in the prior index: device defaults, desired tags
        let song3 = &index.all_files[1];
        assert_eq!(song3.sample_rate, 44_100);
        assert_eq!(song3.song.as_deref(), Some("Song Three"));
    }

    #[test]
    fn test_rebuild_is_byte_identical() {
        let plan = plan();
        let first = IndexBuilder::new(&plan, "1.0").build(
            &[
                converted(&plan, "Pop/song1.pcm"),
                converted(&plan, "Pop/song3.pcm"),
                converted(&plan, "Rock/song2.pcm"),
                converted(&plan, "intro.pcm"),
            ],
            &[],
        );

        let kept: Vec<String> = plan.iter().map(|a| a.relative_path.clone()).collect();
        let second = IndexBuilder::new(&plan, "1.0")
            .with_prior(Some(&first))
            .build(&[], &kept);

        assert_eq!(first.to_json().unwrap(), second.to_json().unwrap());
    }

    #[test]
    fn test_wire_field_names() {
        let plan = plan();
        let index = IndexBuilder::new(&plan, "1.0").build(&[converted(&plan, "Rock/song2.pcm")], &[]);
        let value = serde_json::to_value(&index).unwrap();

        assert_eq!(value["totalFiles"], 1);
        assert_eq!(value["allFiles"][0]["sampleRate"], 44_100);
        assert_eq!(value["allFiles"][0]["bitDepth"], 16);
        assert_eq!(value["allFiles"][0]["folderIndex"], 0);
        assert!(value["allFiles"][0]["song"].is_null());
        assert_eq!(value["musicFolders"][0]["files"][0]["path"], "Rock/song2.pcm");
        assert!(value["musicFolders"][0]["files"][0].get("folderIndex").is_none());
    }

    #[test]
    fn test_verify_detects_inconsistency() {
        let plan = plan();
        let mut index =
            IndexBuilder::new(&plan, "1.0").build(&[converted(&plan, "Rock/song2.pcm")], &[]);
        assert!(index.verify(2).is_err());

        index.all_files[0].folder_index = 5;
        assert!(index.verify(1).is_err());
    }

    #[tokio::test]
    async fn test_stage_and_commit() {
        let dir = TempDir::new().unwrap();
        let device = dir.path().join("music");
        std::fs::create_dir_all(&device).unwrap();
        let mut staging = StagingArea::create(&dir.path().join("staging")).await.unwrap();

        let plan = plan();
        let index = IndexBuilder::new(&plan, "1.0").build(&[converted(&plan, "intro.pcm")], &[]);

        let staged = stage_index(&index, &mut staging).await.unwrap();
        let destination = device.join("index.json");
        commit_index(&staged, &destination, 1).await.unwrap();

        let on_device = read_prior_index(&destination).await.unwrap();
        assert_eq!(on_device, index);

        staging.cleanup().await;
        assert!(!staged.exists());
    }

    #[tokio::test]
    async fn test_commit_to_missing_directory_fails() {
        let dir = TempDir::new().unwrap();
        let mut staging = StagingArea::create(dir.path()).await.unwrap();
        let plan = plan();
        let index = IndexBuilder::new(&plan, "1.0").build(&[], &[]);

        let staged = stage_index(&index, &mut staging).await.unwrap();
        let result = commit_index(&staged, &dir.path().join("nope/index.json"), 0).await;
        assert!(matches!(result, Err(SyncError::IndexWrite(_))));

        staging.cleanup().await;
    }

    #[tokio::test]
    async fn test_read_prior_index_tolerates_garbage() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("index.json");
        assert!(read_prior_index(&path).await.is_none());

        std::fs::write(&path, b"{ truncated").unwrap();
        assert!(read_prior_index(&path).await.is_none());
    }
}
