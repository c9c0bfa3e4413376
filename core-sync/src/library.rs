//! # Library Projection
//!
//! The user's virtual library is a tree of [`LibraryNode`]s. The sync engine
//! never walks that tree; it consumes the flattened [`DesiredLayout`]: one
//! entry per folder that directly contains audio files, each with its ordered
//! file list. Root-level files live in the folder with the empty name.

use crate::error::{Result, SyncError};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::warn;

/// Name of the implicit folder holding root-level files.
pub const ROOT_FOLDER: &str = "";

/// Optional descriptive tags carried through to the index unchanged.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tags {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub album: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artist: Option<String>,
}

impl Tags {
    pub fn is_empty(&self) -> bool {
        self.title.is_none() && self.album.is_none() && self.artist.is_none()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeKind {
    Folder,
    File,
}

/// A file or folder in the virtual library.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LibraryNode {
    pub id: String,
    pub name: String,
    pub kind: NodeKind,
    /// Absolute source path; `None` for folders
    #[serde(default)]
    pub source_path: Option<PathBuf>,
    /// Containing folder id; `None` means the library root
    #[serde(default)]
    pub parent_id: Option<String>,
    #[serde(default)]
    pub is_audio: bool,
    #[serde(flatten)]
    pub tags: Tags,
}

impl LibraryNode {
    pub fn folder(id: impl Into<String>, name: impl Into<String>, parent_id: Option<&str>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            kind: NodeKind::Folder,
            source_path: None,
            parent_id: parent_id.map(str::to_string),
            is_audio: false,
            tags: Tags::default(),
        }
    }

    pub fn audio_file(
        id: impl Into<String>,
        name: impl Into<String>,
        source_path: impl Into<PathBuf>,
        parent_id: Option<&str>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            kind: NodeKind::File,
            source_path: Some(source_path.into()),
            parent_id: parent_id.map(str::to_string),
            is_audio: true,
            tags: Tags::default(),
        }
    }

    pub fn with_tags(mut self, tags: Tags) -> Self {
        self.tags = tags;
        self
    }
}

/// A file the device should hold.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DesiredFile {
    /// Display name, e.g. `song1.mp3`
    pub name: String,
    pub source_path: PathBuf,
    #[serde(flatten)]
    pub tags: Tags,
}

impl DesiredFile {
    pub fn new(name: impl Into<String>, source_path: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            source_path: source_path.into(),
            tags: Tags::default(),
        }
    }

    /// Base name of the artifact: the display name without its extension.
    pub fn stem(&self) -> &str {
        Path::new(&self.name)
            .file_stem()
            .and_then(|stem| stem.to_str())
            .unwrap_or(&self.name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DesiredFolder {
    /// Folder name; empty for root-level files
    pub name: String,
    pub files: Vec<DesiredFile>,
}

impl DesiredFolder {
    pub fn new(name: impl Into<String>, files: Vec<DesiredFile>) -> Self {
        Self {
            name: name.into(),
            files,
        }
    }

    pub fn is_root(&self) -> bool {
        self.name == ROOT_FOLDER
    }
}

/// Flattened folder → files view the orchestrator consumes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DesiredLayout {
    pub music_folders: Vec<DesiredFolder>,
}

impl DesiredLayout {
    pub fn new(music_folders: Vec<DesiredFolder>) -> Self {
        Self { music_folders }
    }

    /// Project a library onto the folders that directly contain audio files.
    ///
    /// Folders appear in the order their first audio file appears in
    /// `nodes`; files keep their relative order. Only the immediate parent
    /// folder's name is used, nested folders are not reflected in the layout.
    /// A file whose parent id is unknown is treated as a root-level file.
    pub fn from_library(nodes: &[LibraryNode]) -> Self {
        let folders: HashMap<&str, &LibraryNode> = nodes
            .iter()
            .filter(|node| node.kind == NodeKind::Folder)
            .map(|node| (node.id.as_str(), node))
            .collect();

        // Keyed by parent id ("" for root) to keep same-named folders apart
        let mut positions: HashMap<&str, usize> = HashMap::new();
        let mut music_folders: Vec<DesiredFolder> = Vec::new();

        for node in nodes {
            if node.kind != NodeKind::File || !node.is_audio {
                continue;
            }

            let Some(source_path) = &node.source_path else {
                warn!(file = %node.name, "Audio file has no source path, skipping");
                continue;
            };

            let (key, folder_name) = match node.parent_id.as_deref() {
                None => (ROOT_FOLDER, ROOT_FOLDER),
                Some(parent) => match folders.get(parent) {
                    Some(folder) => (parent, folder.name.as_str()),
                    None => {
                        warn!(file = %node.name, parent, "Unknown parent folder, treating as root");
                        (ROOT_FOLDER, ROOT_FOLDER)
                    }
                },
            };

            let position = *positions.entry(key).or_insert_with(|| {
                music_folders.push(DesiredFolder::new(folder_name, Vec::new()));
                music_folders.len() - 1
            });

            music_folders[position].files.push(DesiredFile {
                name: node.name.clone(),
                source_path: source_path.clone(),
                tags: node.tags.clone(),
            });
        }

        Self { music_folders }
    }

    /// Reject names that would escape the artifacts directory.
    pub fn validate(&self) -> Result<()> {
        for folder in &self.music_folders {
            if !folder.is_root() && !is_plain_component(&folder.name) {
                return Err(SyncError::InvalidLayout(format!(
                    "Folder name '{}' is not a plain directory name",
                    folder.name
                )));
            }

            for file in &folder.files {
                if !is_plain_component(&file.name) || !is_plain_component(file.stem()) {
                    return Err(SyncError::InvalidLayout(format!(
                        "File name '{}' in folder '{}' is not a plain file name",
                        file.name, folder.name
                    )));
                }
            }
        }

        Ok(())
    }

    pub fn file_count(&self) -> usize {
        self.music_folders.iter().map(|folder| folder.files.len()).sum()
    }

    /// Names of folders that need a directory on the device.
    pub fn folder_names(&self) -> impl Iterator<Item = &str> {
        self.music_folders
            .iter()
            .filter(|folder| !folder.is_root())
            .map(|folder| folder.name.as_str())
    }
}

fn is_plain_component(name: &str) -> bool {
    !name.is_empty()
        && name != "."
        && name != ".."
        && !name.contains(['/', '\\'])
        && !name.contains('\0')
}
