//! # Core Codec
//!
//! Turns source audio files into the raw PCM payloads stored on the device.
//!
//! ## Overview
//!
//! - [`PcmTranscoder`]: the async seam the sync engine calls for every file
//!   it needs to (re)create
//! - [`SymphoniaTranscoder`]: pure-Rust implementation on top of Symphonia
//! - [`PcmFormat`]: fixed output parameters, [`PcmFormat::DEVICE`] being the
//!   44.1 kHz / 16-bit / stereo layout the player expects
//!
//! ```rust,no_run
//! use core_codec::{PcmFormat, PcmTranscoder, SymphoniaTranscoder};
//! use std::path::Path;
//!
//! # async fn example() -> core_codec::Result<()> {
//! let stats = SymphoniaTranscoder::new()
//!     .transcode(
//!         Path::new("/music/song.flac"),
//!         Path::new("/tmp/staging/song.raw"),
//!         PcmFormat::DEVICE,
//!     )
//!     .await?;
//! println!("wrote {} frames", stats.frames_written);
//! # Ok(())
//! # }
//! ```

pub mod decoder;
pub mod error;
pub mod traits;

pub use decoder::{FormatDetector, LinearResampler, SampleConverter, SymphoniaTranscoder};
pub use error::{CodecError, Result};
pub use traits::{PcmFormat, PcmTranscoder, TranscodeStats};
