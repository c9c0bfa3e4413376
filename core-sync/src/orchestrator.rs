//! # Sync Orchestrator
//!
//! Single entry point of the engine. One [`SyncOrchestrator::sync`] call
//! takes a desired layout and a device root and drives the full sequence:
//! preconditions, folder preparation, diff, deletion, conversion, index
//! build, index write, cleanup. Progress is published on the [`EventBus`];
//! the call itself resolves to a [`SyncReport`] or a fatal [`SyncError`].
//!
//! Callers must not run two syncs against the same device concurrently.

use crate::diff::{
    compute_diff, delete_stale, prune_empty_folders, scan_artifacts_async, ArtifactPlan,
    PlannedArtifact,
};
use crate::error::{is_read_only, Result, SyncError};
use crate::index::{commit_index, read_prior_index, stage_index, IndexBuilder};
use crate::library::DesiredLayout;
use crate::phase::{PhaseTracker, SyncPhase};
use crate::pipeline::{ConversionPipeline, FileFailure};
use crate::staging::StagingArea;
use core_codec::{PcmFormat, PcmTranscoder};
use core_runtime::config::CoreConfig;
use core_runtime::events::{EventBus, Receiver, SyncEvent, SyncStats, SyncStep};
use serde::{Deserialize, Serialize};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, error, info, instrument, warn};

/// Input of one sync call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncRequest {
    pub desired_layout: DesiredLayout,
    pub device_root: PathBuf,
}

impl SyncRequest {
    pub fn new(desired_layout: DesiredLayout, device_root: impl Into<PathBuf>) -> Self {
        Self {
            desired_layout,
            device_root: device_root.into(),
        }
    }
}

/// Summary of a successful sync.
#[derive(Debug)]
pub struct SyncReport {
    /// `<deviceRoot>/<artifact dir>`
    pub output_dir: PathBuf,
    pub index_path: PathBuf,
    /// Relative paths converted in this run
    pub converted: Vec<String>,
    /// Relative paths left untouched
    pub kept: Vec<String>,
    /// Stale relative paths removed
    pub deleted: Vec<String>,
    /// Files that could not be synced
    pub failures: Vec<FileFailure>,
    /// Files listed in the written index
    pub indexed_files: usize,
    /// Counters as reported in the completion event
    pub stats: SyncStats,
}

pub struct SyncOrchestrator {
    config: CoreConfig,
    transcoder: Arc<dyn PcmTranscoder>,
    events: EventBus,
}

impl SyncOrchestrator {
    pub fn new(config: CoreConfig, transcoder: Arc<dyn PcmTranscoder>) -> Self {
        let events = EventBus::new(config.event_buffer_size);
        Self {
            config,
            transcoder,
            events,
        }
    }

    /// Publish on an existing bus instead of a private one.
    pub fn with_event_bus(mut self, events: EventBus) -> Self {
        self.events = events;
        self
    }

    pub fn event_bus(&self) -> &EventBus {
        &self.events
    }

    pub fn subscribe(&self) -> Receiver<SyncEvent> {
        self.events.subscribe()
    }

    pub fn config(&self) -> &CoreConfig {
        &self.config
    }

    /// `<deviceRoot>/<artifact dir>`
    pub fn output_dir(&self, device_root: &Path) -> PathBuf {
        device_root.join(&self.config.artifact_dir_name)
    }

    /// Run one full sync.
    ///
    /// # Errors
    ///
    /// Fatal errors only: failed preconditions (nothing on the device is
    /// touched), staging unavailable, or index write/verification failure
    /// (artifacts already converted stay on the device). Per-file problems
    /// are reported as events and in [`SyncReport::failures`].
    #[instrument(skip_all, fields(device = %request.device_root.display()))]
    pub async fn sync(&self, request: SyncRequest) -> Result<SyncReport> {
        let mut phases = PhaseTracker::new();
        let mut staging: Option<StagingArea> = None;

        let outcome = self.run(&request, &mut phases, &mut staging).await;

        phases.advance(SyncPhase::Cleanup)?;
        if let Some(mut area) = staging.take() {
            let cleanup = area.cleanup().await;
            if outcome.is_ok() {
                self.emit(SyncEvent::status(
                    SyncStep::Cleanup,
                    format!("Removed {} staged files", cleanup.removed),
                ));
            }
        }

        match outcome {
            Ok(report) => {
                phases.advance(SyncPhase::Complete)?;
                info!(
                    converted = report.stats.files_converted,
                    total = report.stats.total_files,
                    failed = report.failures.len(),
                    "Sync complete"
                );
                self.emit(SyncEvent::Complete {
                    message: format!(
                        "Synced {} of {} files",
                        report.indexed_files, report.stats.total_files
                    ),
                    output_dir: report.output_dir.display().to_string(),
                    stats: report.stats,
                });
                Ok(report)
            }
            Err(e) => {
                phases.advance(SyncPhase::Fatal)?;
                error!("Sync failed: {}", e);
                Err(e)
            }
        }
    }

    async fn run(
        &self,
        request: &SyncRequest,
        phases: &mut PhaseTracker,
        staging: &mut Option<StagingArea>,
    ) -> Result<SyncReport> {
        let layout = &request.desired_layout;
        let extension = self.config.artifact_extension.as_str();

        phases.advance(SyncPhase::PreconditionCheck)?;
        layout.validate()?;
        let output_dir = self.check_preconditions(&request.device_root).await?;
        let index_path = output_dir.join(&self.config.index_file_name);

        let staging = staging.insert(
            StagingArea::create(&self.config.staging_dir)
                .await
                .map_err(|e| SyncError::Staging(e.to_string()))?,
        );

        phases.advance(SyncPhase::FolderPrep)?;
        let folders_created = self.prepare_folders(&output_dir, layout).await;
        self.emit(SyncEvent::status(
            SyncStep::Preparation,
            format!("Prepared {} folders", folders_created),
        ));

        phases.advance(SyncPhase::Diffing)?;
        let plan = ArtifactPlan::from_layout(layout, extension);
        let existing = scan_artifacts_async(&output_dir, extension).await?;
        let prior = read_prior_index(&index_path).await;
        let diff = compute_diff(&existing, &plan);

        phases.advance(SyncPhase::Deleting)?;
        let deletion = delete_stale(&diff.to_delete).await;
        for (relative, err) in &deletion.failed {
            self.emit(SyncEvent::file_error(
                relative,
                format!("Failed to delete stale file: {}", err),
            ));
        }
        prune_empty_folders(&output_dir, layout).await;
        self.emit(SyncEvent::status(
            SyncStep::Deletion,
            format!("Removed {} stale files", deletion.deleted.len()),
        ));

        phases.advance(SyncPhase::Converting)?;
        let to_create: Vec<&PlannedArtifact> = diff
            .to_create
            .iter()
            .filter_map(|relative| plan.get(relative))
            .collect();
        let pipeline = ConversionPipeline::new(
            self.transcoder.as_ref(),
            &output_dir,
            PcmFormat::DEVICE,
            &self.events,
        );
        let conversion = pipeline.run(&to_create, staging).await;
        self.emit(SyncEvent::status(
            SyncStep::Conversion,
            format!(
                "Converted {} of {} files",
                conversion.converted.len(),
                to_create.len()
            ),
        ));

        phases.advance(SyncPhase::IndexBuilding)?;
        let index = IndexBuilder::new(&plan, &self.config.index_version)
            .with_prior(prior.as_ref())
            .build(&conversion.converted, &diff.to_keep);

        phases.advance(SyncPhase::IndexWriting)?;
        let staged = stage_index(&index, staging).await?;
        self.emit(SyncEvent::status(
            SyncStep::Index,
            format!("Index built with {} files", index.total_files),
        ));
        commit_index(&staged, &index_path, index.total_files).await?;
        self.emit(SyncEvent::status(
            SyncStep::Copy,
            "Index copied to device and verified",
        ));

        let stats = SyncStats {
            files_converted: conversion.converted.len(),
            total_files: plan.len(),
            folders_created,
        };

        Ok(SyncReport {
            output_dir,
            index_path,
            converted: conversion
                .converted
                .into_iter()
                .map(|result| result.relative_path)
                .collect(),
            kept: diff.to_keep,
            deleted: deletion.deleted,
            failures: conversion.failures,
            indexed_files: index.total_files,
            stats,
        })
    }

    /// Check the device is present and writable, and that the artifact
    /// directory exists (creating it if needed) and is writable.
    ///
    /// Apart from creating the artifact directory, nothing is changed; a
    /// directory created here is removed again if its probe fails.
    async fn check_preconditions(&self, device_root: &Path) -> Result<PathBuf> {
        let meta = match tokio::fs::metadata(device_root).await {
            Ok(meta) => meta,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(SyncError::DeviceNotFound {
                    path: device_root.to_path_buf(),
                })
            }
            Err(e) => return Err(SyncError::Io(e)),
        };

        if !meta.is_dir() {
            return Err(SyncError::NotADirectory {
                path: device_root.to_path_buf(),
            });
        }

        self.probe_writable(device_root)
            .await
            .map_err(|e| SyncError::DeviceReadOnly {
                path: device_root.to_path_buf(),
                reason: e.to_string(),
            })?;

        let output_dir = self.output_dir(device_root);
        let unavailable = |reason: String| SyncError::OutputDirUnavailable {
            path: output_dir.clone(),
            reason,
        };

        let created = match tokio::fs::metadata(&output_dir).await {
            Ok(meta) if meta.is_dir() => false,
            Ok(_) => return Err(unavailable("exists and is not a directory".to_string())),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                tokio::fs::create_dir(&output_dir).await.map_err(|e| {
                    if is_read_only(&e) {
                        SyncError::DeviceReadOnly {
                            path: device_root.to_path_buf(),
                            reason: e.to_string(),
                        }
                    } else {
                        unavailable(e.to_string())
                    }
                })?;
                true
            }
            Err(e) => return Err(unavailable(e.to_string())),
        };

        if let Err(e) = self.probe_writable(&output_dir).await {
            if created {
                let _ = tokio::fs::remove_dir(&output_dir).await;
            }
            return Err(unavailable(e.to_string()));
        }

        debug!(output_dir = %output_dir.display(), "Preconditions passed");
        Ok(output_dir)
    }

    async fn probe_writable(&self, dir: &Path) -> io::Result<()> {
        let marker = dir.join(&self.config.write_probe_name);
        tokio::fs::write(&marker, b"").await?;
        tokio::fs::remove_file(&marker).await
    }

    /// Create a directory for every named layout folder, even ones whose
    /// files will all fail. Returns how many are in place.
    async fn prepare_folders(&self, output_dir: &Path, layout: &DesiredLayout) -> usize {
        let mut prepared = 0;
        for name in layout.folder_names() {
            match tokio::fs::create_dir_all(output_dir.join(name)).await {
                Ok(()) => prepared += 1,
                Err(e) => warn!(folder = %name, "Failed to create folder: {}", e),
            }
        }
        prepared
    }

    fn emit(&self, event: SyncEvent) {
        if self.events.emit(event).is_err() {
            debug!("No event subscribers");
        }
    }
}
