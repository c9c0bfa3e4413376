//! # Format Detection Module
//!
//! Probe hints and codec naming on top of Symphonia's probe system.

use std::path::Path;
use symphonia::core::codecs::CodecType;
use symphonia::core::probe::Hint;
use tracing::debug;

/// Format detector for source files.
pub struct FormatDetector;

impl FormatDetector {
    /// Create a probe hint from a file path.
    ///
    /// The extension is only a hint: Symphonia still sniffs the container, so a
    /// mislabelled file decodes as long as its content is recognizable.
    ///
    /// ```rust
    /// use core_codec::FormatDetector;
    /// use std::path::Path;
    ///
    /// let _hint = FormatDetector::hint_from_path(Path::new("/music/song.MP3"));
    /// ```
    pub fn hint_from_path(path: &Path) -> Hint {
        let mut hint = Hint::new();

        match path.extension().and_then(|ext| ext.to_str()) {
            Some(extension) => {
                let extension = extension.to_ascii_lowercase();
                debug!(extension = %extension, "Setting probe hint extension");
                hint.with_extension(&extension);
            }
            None => debug!("No file extension found, probe will auto-detect"),
        }

        hint
    }

    /// Human-readable codec name for logs.
    pub fn codec_name(codec_type: CodecType) -> &'static str {
        symphonia::default::get_codecs()
            .get_codec(codec_type)
            .map(|descriptor| descriptor.short_name)
            .unwrap_or("unknown")
    }
}
