//! # Codec Error Types
//!
//! Errors raised while turning a source audio file into staged raw PCM.

use thiserror::Error;

/// Errors that can occur during a transcode.
#[derive(Error, Debug)]
pub enum CodecError {
    // ========================================================================
    // Source Errors
    // ========================================================================
    /// Failed to open or read the source file.
    #[error("Failed to open audio source: {0}")]
    SourceError(String),

    // ========================================================================
    // Format/Codec Errors
    // ========================================================================
    /// Container format is not recognized or cannot be parsed.
    #[error("Unsupported or invalid audio format: {0}")]
    InvalidFormat(String),

    /// Container was recognized but holds no decodable audio track.
    #[error("Cannot decode audio format: {0}")]
    FormatNotDecodable(String),

    /// Requested output format is not produced by this transcoder.
    #[error("Unsupported output format: {0}")]
    UnsupportedOutput(String),

    // ========================================================================
    // Decoding Errors
    // ========================================================================
    /// Error occurred while decoding packets.
    #[error("Decoding error: {0}")]
    DecodingError(String),

    /// Audio stream is corrupted or contains invalid data.
    #[error("Corrupted audio stream: {0}")]
    CorruptedStream(String),

    /// Decoder could not be constructed or failed internally.
    #[error("Decoder internal error: {0}")]
    DecoderError(String),

    /// Stream decoded cleanly but produced no audio.
    #[error("No audio frames decoded")]
    EmptyStream,

    // ========================================================================
    // Generic Errors
    // ========================================================================
    /// I/O error while writing the staged output.
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// Internal error (blocking task panicked or was cancelled).
    #[error("Internal error: {0}")]
    Internal(String),
}

impl CodecError {
    /// Returns `true` if the source itself is unusable (as opposed to a
    /// failure writing the staged output).
    pub fn is_source_error(&self) -> bool {
        matches!(
            self,
            CodecError::SourceError(_)
                | CodecError::InvalidFormat(_)
                | CodecError::FormatNotDecodable(_)
                | CodecError::DecodingError(_)
                | CodecError::CorruptedStream(_)
                | CodecError::EmptyStream
        )
    }
}

/// Result type for codec operations.
pub type Result<T> = std::result::Result<T, CodecError>;
