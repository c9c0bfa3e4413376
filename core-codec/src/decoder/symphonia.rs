//! # Symphonia Transcoder Implementation
//!
//! Decodes any container/codec Symphonia supports into the device's raw PCM
//! layout, streaming packet by packet into the staged output file.

use crate::decoder::format_detector::FormatDetector;
use crate::decoder::sample_converter::{LinearResampler, SampleConverter};
use crate::error::{CodecError, Result};
use crate::traits::{PcmFormat, PcmTranscoder, TranscodeStats};
use async_trait::async_trait;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{Decoder, DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::{FormatOptions, FormatReader};
use symphonia::core::io::{MediaSource, MediaSourceStream};
use symphonia::core::meta::MetadataOptions;
use tracing::{debug, error, info, instrument, warn};

/// Consecutive bad packets tolerated before the stream is declared corrupt.
const MAX_CONSECUTIVE_ERRORS: usize = 10;

/// Transcoder backed by Symphonia's pure-Rust decoders.
///
/// Supports everything enabled by the `symphonia/all` feature (MP3, FLAC,
/// Vorbis, AAC/ALAC in MP4, WAV, AIFF, ...). Only 16-bit output is produced;
/// any target sample rate and channel count are accepted.
#[derive(Debug, Clone, Copy, Default)]
pub struct SymphoniaTranscoder;

impl SymphoniaTranscoder {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl PcmTranscoder for SymphoniaTranscoder {
    #[instrument(skip_all, fields(source = %source.display()))]
    async fn transcode(
        &self,
        source: &Path,
        destination: &Path,
        format: PcmFormat,
    ) -> Result<TranscodeStats> {
        if format.bit_depth != 16 || format.channels == 0 || format.sample_rate == 0 {
            return Err(CodecError::UnsupportedOutput(format.to_string()));
        }

        let source: PathBuf = source.to_path_buf();
        let destination: PathBuf = destination.to_path_buf();

        tokio::task::spawn_blocking(move || {
            TranscodeJob::open(&source)?.run(&destination, format)
        })
        .await
        .map_err(|e| CodecError::Internal(format!("Transcode task failed: {}", e)))?
    }
}

/// One source file being decoded on the blocking pool.
struct TranscodeJob {
    /// Format reader (demuxer), owns the media source stream
    format_reader: Box<dyn FormatReader>,

    /// Codec decoder for the selected track
    decoder: Box<dyn Decoder>,

    /// Selected track ID
    track_id: u32,

    /// Source path, for logs
    source_info: String,
}

impl TranscodeJob {
    fn open(path: &Path) -> Result<Self> {
        let file = File::open(path).map_err(|e| {
            error!("Failed to open file {:?}: {}", path, e);
            CodecError::SourceError(format!("Failed to open file: {}", e))
        })?;

        let hint = FormatDetector::hint_from_path(path);
        let media_source = Box::new(file) as Box<dyn MediaSource>;
        let mss = MediaSourceStream::new(media_source, Default::default());

        let probed = symphonia::default::get_probe()
            .format(
                &hint,
                mss,
                &FormatOptions::default(),
                &MetadataOptions::default(),
            )
            .map_err(|e| {
                error!("Format probe failed: {}", e);
                CodecError::InvalidFormat(format!("Failed to probe format: {}", e))
            })?;

        let format_reader = probed.format;

        let track = format_reader
            .tracks()
            .iter()
            .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
            .ok_or_else(|| {
                error!("No supported audio tracks found");
                CodecError::FormatNotDecodable("No supported audio tracks".to_string())
            })?;

        let track_id = track.id;
        debug!(
            track_id,
            codec = FormatDetector::codec_name(track.codec_params.codec),
            sample_rate = ?track.codec_params.sample_rate,
            "Selected track"
        );

        let decoder = symphonia::default::get_codecs()
            .make(&track.codec_params, &DecoderOptions::default())
            .map_err(|e| {
                error!("Failed to create decoder: {}", e);
                CodecError::DecoderError(format!("Failed to create codec decoder: {}", e))
            })?;

        Ok(Self {
            format_reader,
            decoder,
            track_id,
            source_info: path.display().to_string(),
        })
    }

    /// Decode every packet of the selected track into `destination`.
    fn run(mut self, destination: &Path, target: PcmFormat) -> Result<TranscodeStats> {
        let mut writer = BufWriter::new(File::create(destination)?);
        let target_channels = target.channels as usize;

        let mut stats = TranscodeStats::default();
        let mut resampler: Option<LinearResampler> = None;
        let mut sample_buf: Option<SampleBuffer<f32>> = None;
        let mut bytes = Vec::new();
        let mut consecutive_errors = 0;

        loop {
            let packet = match self.format_reader.next_packet() {
                Ok(packet) => packet,
                Err(SymphoniaError::IoError(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                    debug!("Reached end of stream");
                    break;
                }
                Err(SymphoniaError::ResetRequired) => {
                    warn!("Decoder reset required for track list change");
                    return Err(CodecError::DecoderError(
                        "Track list changed, reset required".to_string(),
                    ));
                }
                Err(SymphoniaError::IoError(e)) => {
                    consecutive_errors += 1;
                    warn!(
                        "I/O error reading packet (attempt {}/{}): {}",
                        consecutive_errors, MAX_CONSECUTIVE_ERRORS, e
                    );

                    if consecutive_errors >= MAX_CONSECUTIVE_ERRORS {
                        return Err(CodecError::SourceError(format!(
                            "Stream I/O failure after {} attempts: {}",
                            MAX_CONSECUTIVE_ERRORS, e
                        )));
                    }
                    continue;
                }
                Err(e) => {
                    error!("Fatal format reader error: {}", e);
                    return Err(CodecError::DecodingError(format!(
                        "Failed to read packet: {}",
                        e
                    )));
                }
            };

            // Drain metadata revisions; tags come from the library, not the stream
            while !self.format_reader.metadata().is_latest() {
                self.format_reader.metadata().pop();
            }

            if packet.track_id() != self.track_id {
                continue;
            }

            let decoded = match self.decoder.decode(&packet) {
                Ok(decoded) => {
                    consecutive_errors = 0;
                    decoded
                }
                Err(err @ (SymphoniaError::IoError(_) | SymphoniaError::DecodeError(_))) => {
                    consecutive_errors += 1;
                    stats.packets_skipped += 1;
                    warn!(
                        "Skipping corrupted packet (attempt {}/{}): {}",
                        consecutive_errors, MAX_CONSECUTIVE_ERRORS, err
                    );

                    if consecutive_errors >= MAX_CONSECUTIVE_ERRORS {
                        error!("Too many consecutive decode errors, stream may be corrupted");
                        return Err(CodecError::CorruptedStream(format!(
                            "Stream corruption after {} failed packets",
                            MAX_CONSECUTIVE_ERRORS
                        )));
                    }
                    continue;
                }
                Err(e) => {
                    error!("Fatal decode error: {}", e);
                    return Err(CodecError::DecoderError(format!(
                        "Failed to decode packet: {}",
                        e
                    )));
                }
            };

            let spec = *decoded.spec();
            let source_channels = spec.channels.count();
            if decoded.frames() == 0 || source_channels == 0 {
                continue;
            }

            if resampler.is_none() {
                stats.source_sample_rate = spec.rate;
                stats.source_channels = source_channels as u16;
                info!(
                    source = %self.source_info,
                    "Transcoding {}Hz/{}ch to {}",
                    spec.rate, source_channels, target
                );
            } else if stats.source_sample_rate != spec.rate {
                return Err(CodecError::DecodingError(format!(
                    "Sample rate changed mid-stream ({} -> {})",
                    stats.source_sample_rate, spec.rate
                )));
            }
            let active = resampler.get_or_insert_with(|| {
                LinearResampler::new(spec.rate, target.sample_rate, target_channels)
            });

            // Symphonia buffers are only valid until the next decode() call
            let needed = decoded.capacity() * source_channels;
            if sample_buf.as_ref().is_some_and(|buf| buf.capacity() < needed) {
                sample_buf = None;
            }
            let buf = sample_buf
                .get_or_insert_with(|| SampleBuffer::<f32>::new(decoded.capacity() as u64, spec));
            buf.copy_interleaved_ref(decoded);

            let mapped = SampleConverter::map_channels(buf.samples(), source_channels, target_channels);
            let resampled = active.process(&mapped);

            bytes.clear();
            SampleConverter::to_le_i16_bytes(&resampled, &mut bytes);
            writer.write_all(&bytes)?;
            stats.bytes_written += bytes.len() as u64;
        }

        let Some(mut resampler) = resampler else {
            warn!(source = %self.source_info, "Source decoded to zero frames");
            return Err(CodecError::EmptyStream);
        };

        let tail = resampler.finish();
        bytes.clear();
        SampleConverter::to_le_i16_bytes(&tail, &mut bytes);
        writer.write_all(&bytes)?;
        stats.bytes_written += bytes.len() as u64;

        writer.flush()?;

        stats.frames_written = stats.bytes_written / target.bytes_per_frame() as u64;
        debug!(
            frames = stats.frames_written,
            skipped = stats.packets_skipped,
            "Transcode finished"
        );

        Ok(stats)
    }
}
