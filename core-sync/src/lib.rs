//! # Device Sync Module
//!
//! Mirrors a desired music layout onto a removable device as
//! header-prefixed PCM artifacts plus a JSON index.
//!
//! ## Overview
//!
//! A sync is incremental: artifacts already on the device are kept, stale
//! ones are deleted and only missing ones are converted. Per-file failures
//! are reported and skipped; only precondition and index failures abort.
//!
//! ## Components
//!
//! - **Library** (`library`): Desired layout and its projection from a library tree
//! - **Artifact Header** (`header`): 32-byte header prefixed to every artifact
//! - **Diff Engine** (`diff`): Plan, device scan and keep/create/delete sets
//! - **Staging** (`staging`): Private scratch space for intermediate payloads
//! - **Conversion Pipeline** (`pipeline`): Decode, stage and commit artifacts
//! - **Index Builder** (`index`): Builds, verifies and writes the device index
//! - **Sync Phases** (`phase`): Validated phase state machine of one sync call
//! - **Sync Orchestrator** (`orchestrator`): Drives a full sync and streams events

pub mod diff;
pub mod error;
pub mod header;
pub mod index;
pub mod library;
pub mod orchestrator;
pub mod phase;
pub mod pipeline;
pub mod staging;

pub use diff::{
    compute_diff, scan_artifacts, ArtifactPlan, ExistingArtifacts, PlannedArtifact, SyncDiff,
};
pub use error::{FileError, Result, SyncError};
pub use header::{ArtifactHeader, HeaderError, HEADER_LEN};
pub use index::{IndexBuilder, IndexEntry, IndexFile, IndexFolder};
pub use library::{DesiredFile, DesiredFolder, DesiredLayout, LibraryNode, NodeKind, Tags};
pub use orchestrator::{SyncOrchestrator, SyncReport, SyncRequest};
pub use phase::{PhaseTracker, SyncPhase};
pub use pipeline::{ConversionPipeline, ConversionResult, FileFailure};
pub use staging::{sweep_stale, StagingArea};
