//! # Conversion Pipeline
//!
//! Produces the final on-device artifact for every file in `toCreate`,
//! strictly one at a time in input order:
//!
//! 1. check the source is readable
//! 2. ensure the destination folder exists
//! 3. decode into a staged raw payload (registered for cleanup up front)
//! 4. prepend the header and write the artifact in a single write
//! 5. verify the artifact landed with the expected size
//!
//! Every failure is scoped to its file: it is reported on the event bus and
//! the pipeline moves on.

use crate::diff::PlannedArtifact;
use crate::error::FileError;
use crate::header;
use crate::library::Tags;
use crate::staging::StagingArea;
use core_codec::{PcmFormat, PcmTranscoder};
use core_runtime::events::{EventBus, SyncEvent};
use core_runtime::logging::strip_path;
use std::path::{Path, PathBuf};
use tracing::{debug, info, instrument, warn};

/// One successfully written artifact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversionResult {
    pub source_path: PathBuf,
    /// Path relative to the artifacts directory
    pub relative_path: String,
    /// Owning folder, empty for root-level files
    pub folder_name: String,
    pub format: PcmFormat,
    pub tags: Tags,
}

/// A file the pipeline gave up on.
#[derive(Debug)]
pub struct FileFailure {
    /// Display name of the desired file
    pub file: String,
    pub relative_path: String,
    pub error: FileError,
}

#[derive(Debug, Default)]
pub struct PipelineOutcome {
    pub converted: Vec<ConversionResult>,
    pub failures: Vec<FileFailure>,
}

pub struct ConversionPipeline<'a> {
    transcoder: &'a dyn PcmTranscoder,
    music_root: &'a Path,
    format: PcmFormat,
    events: &'a EventBus,
}

impl<'a> ConversionPipeline<'a> {
    pub fn new(
        transcoder: &'a dyn PcmTranscoder,
        music_root: &'a Path,
        format: PcmFormat,
        events: &'a EventBus,
    ) -> Self {
        Self {
            transcoder,
            music_root,
            format,
            events,
        }
    }

    /// Convert every artifact, emitting a progress event after each attempt.
    #[instrument(skip_all, fields(total = artifacts.len()))]
    pub async fn run(
        &self,
        artifacts: &[&PlannedArtifact],
        staging: &mut StagingArea,
    ) -> PipelineOutcome {
        let total = artifacts.len();
        let mut outcome = PipelineOutcome::default();

        for (position, artifact) in artifacts.iter().enumerate() {
            match self.convert(artifact, staging).await {
                Ok(result) => {
                    debug!(path = %result.relative_path, "Artifact written");
                    outcome.converted.push(result);
                }
                Err(error) => {
                    warn!(file = %artifact.file.name, "Conversion failed: {}", error);
                    self.emit(SyncEvent::file_error(&artifact.file.name, error.to_string()));
                    outcome.failures.push(FileFailure {
                        file: artifact.file.name.clone(),
                        relative_path: artifact.relative_path.clone(),
                        error,
                    });
                }
            }

            self.emit(SyncEvent::progress(
                &artifact.file.name,
                &artifact.folder_name,
                position + 1,
                total,
            ));
        }

        info!(
            converted = outcome.converted.len(),
            failed = outcome.failures.len(),
            "Conversion finished"
        );
        outcome
    }

    /// Run all steps for one file.
    pub async fn convert(
        &self,
        artifact: &PlannedArtifact,
        staging: &mut StagingArea,
    ) -> Result<ConversionResult, FileError> {
        let source = &artifact.file.source_path;
        check_readable(source).await?;
        debug!(
            source = %strip_path(&source.to_string_lossy()),
            destination = %artifact.relative_path,
            "Converting"
        );

        let destination = self.destination(&artifact.relative_path);
        if let Some(parent) = destination.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| FileError::from_destination_io(parent.to_path_buf(), &e))?;
        }

        let staged = staging.register("payload.raw");
        let payload = match self.decode(source, &staged).await {
            Ok(payload) => payload,
            Err(e) => {
                staging.discard(&staged).await;
                return Err(e);
            }
        };
        // The payload is in memory now; free staging space early
        staging.discard(&staged).await;

        self.commit(&destination, &payload).await?;

        Ok(ConversionResult {
            source_path: source.clone(),
            relative_path: artifact.relative_path.clone(),
            folder_name: artifact.folder_name.clone(),
            format: self.format,
            tags: artifact.file.tags.clone(),
        })
    }

    fn destination(&self, relative_path: &str) -> PathBuf {
        relative_path
            .split('/')
            .fold(self.music_root.to_path_buf(), |path, part| path.join(part))
    }

    async fn decode(&self, source: &Path, staged: &Path) -> Result<Vec<u8>, FileError> {
        self.transcoder
            .transcode(source, staged, self.format)
            .await
            .map_err(|e| FileError::Decode(e.to_string()))?;

        tokio::fs::read(staged)
            .await
            .map_err(|e| FileError::Staging(format!("Cannot read staged payload: {}", e)))
    }

    /// Header + payload in one write, then verify. A failed write leaves no
    /// partial artifact behind for the next scan to mistake for a kept file.
    async fn commit(&self, destination: &Path, payload: &[u8]) -> Result<(), FileError> {
        let data_length = u32::try_from(payload.len()).map_err(|_| FileError::PayloadTooLarge {
            size: payload.len() as u64,
        })?;

        let mut artifact = Vec::with_capacity(header::HEADER_LEN + payload.len());
        artifact.extend_from_slice(&header::encode_format(self.format, data_length));
        artifact.extend_from_slice(payload);

        if let Err(e) = tokio::fs::write(destination, &artifact).await {
            remove_partial(destination).await;
            return Err(FileError::from_destination_io(destination.to_path_buf(), &e));
        }

        match tokio::fs::metadata(destination).await {
            Ok(meta) if meta.len() == artifact.len() as u64 => Ok(()),
            Ok(meta) => {
                remove_partial(destination).await;
                Err(FileError::DestinationIo {
                    path: destination.to_path_buf(),
                    reason: format!(
                        "Size mismatch after write: expected {} bytes, found {}",
                        artifact.len(),
                        meta.len()
                    ),
                })
            }
            Err(e) => Err(FileError::from_destination_io(destination.to_path_buf(), &e)),
        }
    }

    fn emit(&self, event: SyncEvent) {
        if self.events.emit(event).is_err() {
            debug!("No event subscribers");
        }
    }
}

async fn check_readable(source: &Path) -> Result<(), FileError> {
    let unreadable = |reason: String| FileError::SourceUnreadable {
        path: source.to_path_buf(),
        reason,
    };

    let meta = tokio::fs::metadata(source)
        .await
        .map_err(|e| unreadable(e.to_string()))?;
    if !meta.is_file() {
        return Err(unreadable("not a regular file".to_string()));
    }

    tokio::fs::File::open(source)
        .await
        .map_err(|e| unreadable(e.to_string()))?;
    Ok(())
}

async fn remove_partial(path: &Path) {
    if let Err(e) = tokio::fs::remove_file(path).await {
        if e.kind() != std::io::ErrorKind::NotFound {
            warn!(path = %path.display(), "Failed to remove partial artifact: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diff::ArtifactPlan;
    use crate::library::{DesiredFile, DesiredFolder, DesiredLayout};
    use core_codec::{CodecError, TranscodeStats};
    use core_runtime::events::EventStream;
    use mockall::mock;
    use tempfile::TempDir;

    mock! {
        pub Transcoder {}

        #[async_trait::async_trait]
        impl PcmTranscoder for Transcoder {
            async fn transcode(
                &self,
                source: &Path,
                destination: &Path,
                format: PcmFormat,
            ) -> core_codec::Result<TranscodeStats>;
        }
    }

    struct Fixture {
        _dir: TempDir,
        sources: PathBuf,
        music_root: PathBuf,
        staging_base: PathBuf,
    }

    fn fixture() -> Fixture {
        let dir = TempDir::new().unwrap();
        let sources = dir.path().join("src");
        let music_root = dir.path().join("device/music");
        let staging_base = dir.path().join("staging");
        std::fs::create_dir_all(&sources).unwrap();
        std::fs::create_dir_all(&music_root).unwrap();
        Fixture {
            _dir: dir,
            sources,
            music_root,
            staging_base,
        }
    }

    fn plan_for(sources: &Path, folders: &[(&str, &[&str])]) -> ArtifactPlan {
        let layout = DesiredLayout::new(
            folders
                .iter()
                .map(|(name, files)| {
                    DesiredFolder::new(
                        *name,
                        files
                            .iter()
                            .map(|f| DesiredFile::new(*f, sources.join(f)))
                            .collect(),
                    )
                })
                .collect(),
        );
        ArtifactPlan::from_layout(&layout, "pcm")
    }

    fn writing_transcoder(payload: &'static [u8]) -> MockTranscoder {
        let mut transcoder = MockTranscoder::new();
        transcoder
            .expect_transcode()
            .returning(move |_, destination, _| {
                std::fs::write(destination, payload).unwrap();
                Ok(TranscodeStats {
                    bytes_written: payload.len() as u64,
                    ..Default::default()
                })
            });
        transcoder
    }

    #[tokio::test]
    async fn test_converts_and_writes_header() {
        let fx = fixture();
        std::fs::write(fx.sources.join("song1.mp3"), b"mp3").unwrap();
        let plan = plan_for(&fx.sources, &[("Pop", &["song1.mp3"])]);

        let transcoder = writing_transcoder(&[1, 2, 3, 4]);
        let events = EventBus::new(16);
        let mut stream = EventStream::new(events.subscribe());
        let mut staging = StagingArea::create(&fx.staging_base).await.unwrap();

        let pipeline = ConversionPipeline::new(&transcoder, &fx.music_root, PcmFormat::DEVICE, &events);
        let artifacts: Vec<_> = plan.iter().collect();
        let outcome = pipeline.run(&artifacts, &mut staging).await;

        assert_eq!(outcome.converted.len(), 1);
        assert!(outcome.failures.is_empty());
        assert_eq!(outcome.converted[0].relative_path, "Pop/song1.pcm");
        assert_eq!(outcome.converted[0].folder_name, "Pop");

        let written = std::fs::read(fx.music_root.join("Pop/song1.pcm")).unwrap();
        assert_eq!(written.len(), 36);
        assert_eq!(&written[..32], &header::encode(44_100, 16, 2, 4));
        assert_eq!(&written[32..], &[1, 2, 3, 4]);

        let received = stream.drain();
        assert_eq!(received, vec![SyncEvent::progress("song1.mp3", "Pop", 1, 1)]);

        staging.cleanup().await;
    }

    #[tokio::test]
    async fn test_runs_without_event_subscribers() {
        let fx = fixture();
        std::fs::write(fx.sources.join("song1.mp3"), b"mp3").unwrap();
        let plan = plan_for(&fx.sources, &[("", &["song1.mp3"])]);

        let transcoder = writing_transcoder(&[9, 9]);
        let events = EventBus::new(4);
        assert_eq!(events.subscriber_count(), 0);
        let mut staging = StagingArea::create(&fx.staging_base).await.unwrap();

        let pipeline = ConversionPipeline::new(&transcoder, &fx.music_root, PcmFormat::DEVICE, &events);
        let artifacts: Vec<_> = plan.iter().collect();
        let outcome = pipeline.run(&artifacts, &mut staging).await;

        assert_eq!(outcome.converted.len(), 1);
        assert!(fx.music_root.join("song1.pcm").exists());

        staging.cleanup().await;
    }

    #[tokio::test]
    async fn test_unreadable_source_is_skipped() {
        let fx = fixture();
        std::fs::write(fx.sources.join("good.mp3"), b"mp3").unwrap();
        let plan = plan_for(&fx.sources, &[("", &["missing.mp3", "good.mp3"])]);

        let mut transcoder = MockTranscoder::new();
        transcoder
            .expect_transcode()
            .withf(|source, _, _| source.ends_with("good.mp3"))
            .times(1)
            .returning(|_, destination, _| {
                std::fs::write(destination, [0u8; 8]).unwrap();
                Ok(TranscodeStats::default())
            });

        let events = EventBus::new(16);
        let mut stream = EventStream::new(events.subscribe());
        let mut staging = StagingArea::create(&fx.staging_base).await.unwrap();
        let pipeline = ConversionPipeline::new(&transcoder, &fx.music_root, PcmFormat::DEVICE, &events);

        let artifacts: Vec<_> = plan.iter().collect();
        let outcome = pipeline.run(&artifacts, &mut staging).await;

        assert_eq!(outcome.converted.len(), 1);
        assert_eq!(outcome.failures.len(), 1);
        assert!(matches!(
            outcome.failures[0].error,
            FileError::SourceUnreadable { .. }
        ));
        assert!(fx.music_root.join("good.pcm").exists());

        let received = stream.drain();
        assert_eq!(received.len(), 3);
        assert!(matches!(&received[0], SyncEvent::Error { file, .. } if file == "missing.mp3"));
        assert!(matches!(received[1], SyncEvent::Progress { current: 1, total: 2, .. }));
        assert!(matches!(received[2], SyncEvent::Progress { current: 2, total: 2, progress: 100, .. }));

        staging.cleanup().await;
    }

    #[tokio::test]
    async fn test_decode_failure_discards_staged_file() {
        let fx = fixture();
        std::fs::write(fx.sources.join("bad.mp3"), b"not audio").unwrap();
        let plan = plan_for(&fx.sources, &[("Pop", &["bad.mp3"])]);

        let mut transcoder = MockTranscoder::new();
        transcoder
            .expect_transcode()
            .returning(|_, destination, _| {
                std::fs::write(destination, b"partial").unwrap();
                Err(CodecError::InvalidFormat("garbage".to_string()))
            });

        let events = EventBus::new(16);
        let mut staging = StagingArea::create(&fx.staging_base).await.unwrap();
        let pipeline = ConversionPipeline::new(&transcoder, &fx.music_root, PcmFormat::DEVICE, &events);

        let artifact = plan.get("Pop/bad.pcm").unwrap();
        let result = pipeline.convert(artifact, &mut staging).await;

        assert!(matches!(result, Err(FileError::Decode(_))));
        assert!(!fx.music_root.join("Pop/bad.pcm").exists());
        let leftovers = std::fs::read_dir(staging.root()).unwrap().count();
        assert_eq!(leftovers, 0);

        staging.cleanup().await;
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_read_only_destination_is_classified() {
        use std::os::unix::fs::PermissionsExt;

        let fx = fixture();
        std::fs::write(fx.sources.join("song.mp3"), b"mp3").unwrap();
        let plan = plan_for(&fx.sources, &[("Locked", &["song.mp3"])]);

        let locked = fx.music_root.join("Locked");
        std::fs::create_dir_all(&locked).unwrap();
        std::fs::set_permissions(&locked, std::fs::Permissions::from_mode(0o555)).unwrap();

        // Running as root bypasses permission bits; nothing to assert then
        if std::fs::write(locked.join("probe"), b"").is_ok() {
            std::fs::remove_file(locked.join("probe")).unwrap();
            return;
        }

        let transcoder = writing_transcoder(&[0, 0, 0, 0]);
        let events = EventBus::new(16);
        let mut staging = StagingArea::create(&fx.staging_base).await.unwrap();
        let pipeline = ConversionPipeline::new(&transcoder, &fx.music_root, PcmFormat::DEVICE, &events);

        let result = pipeline
            .convert(plan.get("Locked/song.pcm").unwrap(), &mut staging)
            .await;
        assert!(matches!(result, Err(FileError::ReadOnly { .. })));

        std::fs::set_permissions(&locked, std::fs::Permissions::from_mode(0o755)).unwrap();
        staging.cleanup().await;
    }
}
