//! # Audio Decoder Module
//!
//! Symphonia-based implementation of [`PcmTranscoder`](crate::PcmTranscoder).
//!
//! ## Pipeline
//!
//! ```text
//! File → MediaSourceStream → FormatReader → Decoder → SampleBuffer<f32>
//!      → channel map → LinearResampler → LE i16 → staged file
//! ```
//!
//! Decoding runs on tokio's blocking pool; one call decodes one file.

mod format_detector;
mod sample_converter;
mod symphonia;

pub use self::symphonia::SymphoniaTranscoder;
pub use format_detector::FormatDetector;
pub use sample_converter::{LinearResampler, SampleConverter};
