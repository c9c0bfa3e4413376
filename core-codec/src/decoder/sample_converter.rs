//! # Sample Format Converter
//!
//! Turns decoded interleaved f32 audio into the device layout: channel
//! mapping, sample-rate conversion and 16-bit quantization.

/// Stateless helpers for channel layout and quantization.
pub struct SampleConverter;

impl SampleConverter {
    /// Map interleaved frames from `src_channels` to `dst_channels`.
    ///
    /// - mono to N: the single channel is duplicated
    /// - N to fewer: the leading (front) channels are kept
    /// - N to more (N > 1): the last source channel is repeated
    pub fn map_channels(samples: &[f32], src_channels: usize, dst_channels: usize) -> Vec<f32> {
        if src_channels == dst_channels || src_channels == 0 {
            return samples.to_vec();
        }

        let frames = samples.len() / src_channels;
        let mut mapped = Vec::with_capacity(frames * dst_channels);

        for frame in samples.chunks_exact(src_channels) {
            for channel in 0..dst_channels {
                mapped.push(frame[channel.min(src_channels - 1)]);
            }
        }

        mapped
    }

    /// Quantize one normalized sample to signed 16-bit.
    pub fn quantize_i16(sample: f32) -> i16 {
        (sample * 32768.0).round().clamp(-32768.0, 32767.0) as i16
    }

    /// Quantize interleaved samples into little-endian 16-bit bytes.
    pub fn to_le_i16_bytes(samples: &[f32], out: &mut Vec<u8>) {
        out.reserve(samples.len() * 2);
        for &sample in samples {
            out.extend_from_slice(&Self::quantize_i16(sample).to_le_bytes());
        }
    }
}

/// Streaming linear-interpolation resampler over interleaved frames.
///
/// Input may arrive in chunks of any size; the output is the same as
/// resampling the concatenated input in one call (up to float rounding).
/// Call [`finish`](Self::finish) once after the last chunk to flush the tail.
#[derive(Debug, Clone)]
pub struct LinearResampler {
    channels: usize,
    /// Source frames advanced per output frame
    step: f64,
    /// Read position, relative to the first carried frame
    position: f64,
    /// Frames not yet fully consumed by interpolation
    carry: Vec<f32>,
}

impl LinearResampler {
    pub fn new(source_rate: u32, target_rate: u32, channels: usize) -> Self {
        Self {
            channels: channels.max(1),
            step: source_rate as f64 / target_rate as f64,
            position: 0.0,
            carry: Vec::new(),
        }
    }

    /// `true` when source and target rates match.
    pub fn is_passthrough(&self) -> bool {
        self.step == 1.0
    }

    /// Resample one chunk of interleaved frames.
    pub fn process(&mut self, input: &[f32]) -> Vec<f32> {
        if self.is_passthrough() {
            return input.to_vec();
        }

        self.carry.extend_from_slice(input);
        let channels = self.channels;
        let frames = self.carry.len() / channels;

        let mut output = Vec::new();
        while self.position + 1.0 < frames as f64 {
            let index = self.position.floor() as usize;
            let frac = (self.position - index as f64) as f32;
            let current = &self.carry[index * channels..(index + 1) * channels];
            let next = &self.carry[(index + 1) * channels..(index + 2) * channels];

            for channel in 0..channels {
                output.push(current[channel] + (next[channel] - current[channel]) * frac);
            }
            self.position += self.step;
        }

        // Keep the frame under the read position for the next chunk
        let consumed = (self.position.floor() as usize).min(frames);
        self.carry.drain(..consumed * channels);
        self.position -= consumed as f64;

        output
    }

    /// Flush frames that were waiting for a right-hand neighbour.
    pub fn finish(&mut self) -> Vec<f32> {
        if self.is_passthrough() {
            return Vec::new();
        }

        let channels = self.channels;
        let frames = self.carry.len() / channels;

        let mut output = Vec::new();
        while self.position < frames as f64 {
            let index = self.position.floor() as usize;
            output.extend_from_slice(&self.carry[index * channels..(index + 1) * channels]);
            self.position += self.step;
        }

        self.carry.clear();
        self.position = 0.0;
        output
    }
}
