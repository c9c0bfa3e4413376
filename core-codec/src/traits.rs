//! # Transcoder Abstraction
//!
//! The seam between the sync engine and whatever turns compressed audio into
//! raw samples. The engine only ever asks for one thing: "decode this source
//! into a raw interleaved little-endian PCM file at that path".

use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

/// Fixed raw PCM parameters of a payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PcmFormat {
    /// Frames per second
    pub sample_rate: u32,
    /// Bits per sample (signed, little-endian)
    pub bit_depth: u16,
    /// Interleaved channel count
    pub channels: u16,
}

impl PcmFormat {
    /// The format every device artifact is written in: 44.1 kHz, 16-bit, stereo.
    pub const DEVICE: PcmFormat = PcmFormat {
        sample_rate: 44_100,
        bit_depth: 16,
        channels: 2,
    };

    pub const fn new(sample_rate: u32, bit_depth: u16, channels: u16) -> Self {
        Self {
            sample_rate,
            bit_depth,
            channels,
        }
    }

    /// Size of one interleaved frame in bytes.
    pub fn bytes_per_frame(&self) -> usize {
        (self.bit_depth as usize / 8) * self.channels as usize
    }
}

impl Default for PcmFormat {
    fn default() -> Self {
        Self::DEVICE
    }
}

impl fmt::Display for PcmFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}Hz/{}-bit/{}ch",
            self.sample_rate, self.bit_depth, self.channels
        )
    }
}

/// Outcome of a successful transcode.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TranscodeStats {
    /// Frames written to the staged file
    pub frames_written: u64,
    /// Bytes written to the staged file
    pub bytes_written: u64,
    /// Sample rate of the source track
    pub source_sample_rate: u32,
    /// Channel count of the source track
    pub source_channels: u16,
    /// Corrupt packets skipped while decoding
    pub packets_skipped: usize,
}

/// Decodes a source audio file into a raw PCM file.
///
/// Implementations must write **only** raw interleaved samples (no header,
/// no container) to `destination`, creating or truncating it. On error the
/// destination may hold partial output; callers are responsible for removing
/// it.
///
/// Transcoding is CPU-bound. Implementations are expected to move the work
/// off the async executor (e.g. `tokio::task::spawn_blocking`).
#[async_trait]
pub trait PcmTranscoder: Send + Sync {
    /// Decode `source` into `destination` at `format`.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The source cannot be opened or is not a recognizable audio file
    /// - No audio could be decoded
    /// - `format` is not supported by this implementation
    /// - The destination cannot be written
    async fn transcode(
        &self,
        source: &Path,
        destination: &Path,
        format: PcmFormat,
    ) -> Result<TranscodeStats>;
}
