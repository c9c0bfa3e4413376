//! # Artifact Header Codec
//!
//! Every artifact on the device starts with a fixed 32-byte preamble followed
//! by raw interleaved little-endian PCM:
//!
//! ```text
//! offset  size  field
//! 0       8     magic "DSPCM001"
//! 8       4     sample rate (u32 LE)
//! 12      2     bit depth   (u16 LE)
//! 14      2     channels    (u16 LE)
//! 16      4     payload size in bytes (u32 LE)
//! 20      12    reserved, zero
//! ```

use core_codec::PcmFormat;
use thiserror::Error;

/// Header length in bytes.
pub const HEADER_LEN: usize = 32;

/// Magic bytes identifying an artifact.
pub const MAGIC: [u8; 8] = *b"DSPCM001";

#[derive(Error, Debug, PartialEq, Eq)]
pub enum HeaderError {
    #[error("Header too short: {0} bytes")]
    TooShort(usize),

    #[error("Bad magic bytes")]
    BadMagic,
}

/// Decoded artifact header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArtifactHeader {
    pub format: PcmFormat,
    pub data_length: u32,
}

/// Build the 32-byte header for a payload of `data_length` bytes.
pub fn encode(sample_rate: u32, bit_depth: u16, channels: u16, data_length: u32) -> [u8; HEADER_LEN] {
    let mut header = [0u8; HEADER_LEN];
    header[0..8].copy_from_slice(&MAGIC);
    header[8..12].copy_from_slice(&sample_rate.to_le_bytes());
    header[12..14].copy_from_slice(&bit_depth.to_le_bytes());
    header[14..16].copy_from_slice(&channels.to_le_bytes());
    header[16..20].copy_from_slice(&data_length.to_le_bytes());
    header
}

/// [`encode`] for a [`PcmFormat`].
pub fn encode_format(format: PcmFormat, data_length: u32) -> [u8; HEADER_LEN] {
    encode(
        format.sample_rate,
        format.bit_depth,
        format.channels,
        data_length,
    )
}

/// Parse the header at the start of `bytes`. Trailing bytes are ignored.
pub fn decode(bytes: &[u8]) -> Result<ArtifactHeader, HeaderError> {
    if bytes.len() < HEADER_LEN {
        return Err(HeaderError::TooShort(bytes.len()));
    }

    if bytes[0..8] != MAGIC {
        return Err(HeaderError::BadMagic);
    }

    let u32_at = |at: usize| u32::from_le_bytes([bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]]);
    let u16_at = |at: usize| u16::from_le_bytes([bytes[at], bytes[at + 1]]);

    Ok(ArtifactHeader {
        format: PcmFormat::new(u32_at(8), u16_at(12), u16_at(14)),
        data_length: u32_at(16),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_exact_bytes() {
        let header = encode(44_100, 16, 2, 1000);

        let expected: [u8; 32] = [
            b'D', b'S', b'P', b'C', b'M', b'0', b'0', b'1', // magic
            0x44, 0xAC, 0x00, 0x00, // 44100
            0x10, 0x00, // 16
            0x02, 0x00, // 2
            0xE8, 0x03, 0x00, 0x00, // 1000
            0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0,
        ];
        assert_eq!(header, expected);
    }

    #[test]
    fn test_encode_is_pure() {
        assert_eq!(encode(48_000, 16, 1, 7), encode(48_000, 16, 1, 7));
        assert_eq!(
            encode_format(PcmFormat::DEVICE, 7),
            encode(44_100, 16, 2, 7)
        );
    }

    #[test]
    fn test_decode_reads_fields() {
        let mut artifact = encode(22_050, 16, 1, 4).to_vec();
        artifact.extend_from_slice(&[1, 2, 3, 4]);

        let header = decode(&artifact).unwrap();
        assert_eq!(header.format, PcmFormat::new(22_050, 16, 1));
        assert_eq!(header.data_length, 4);
    }

    #[test]
    fn test_decode_rejects_bad_input() {
        assert_eq!(decode(&[0u8; 10]), Err(HeaderError::TooShort(10)));

        let mut bytes = encode(44_100, 16, 2, 0);
        bytes[0] = b'X';
        assert_eq!(decode(&bytes), Err(HeaderError::BadMagic));
    }

    #[test]
    fn test_max_payload_length() {
        let header = encode(44_100, 16, 2, u32::MAX);
        assert_eq!(&header[16..20], &[0xFF, 0xFF, 0xFF, 0xFF]);
        assert!(header[20..].iter().all(|b| *b == 0));
    }
}
