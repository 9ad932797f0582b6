//! Audio types at the pipeline boundary and the canonical PCM format.
//!
//! Everything past [`resample::FrameResampler`] is 16 kHz mono signed 16-bit
//! little-endian PCM. Frames used for activity detection are exactly 10, 20 or
//! 30 ms long; shorter tails are dropped, never zero-padded.

pub mod frame;
pub mod resample;

use std::time::Duration;

use crate::error::{ParleyError, Result};

/// Sample rate of every buffer inside the pipeline (Hz).
pub const CANONICAL_SAMPLE_RATE: u32 = 16_000;

/// Bytes per canonical sample (signed 16-bit).
pub const BYTES_PER_SAMPLE: usize = 2;

/// Encoding of the interleaved samples carried by an inbound [`AudioFrame`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleFormat {
    /// Signed 16-bit little-endian.
    S16,
    /// 32-bit IEEE float little-endian, nominal range [-1.0, 1.0].
    F32,
}

impl SampleFormat {
    /// Width of one sample in bytes.
    pub fn width(self) -> usize {
        match self {
            SampleFormat::S16 => 2,
            SampleFormat::F32 => 4,
        }
    }
}

/// A raw frame as delivered by the transport, in whatever format it negotiated.
#[derive(Debug, Clone)]
pub struct AudioFrame {
    /// Interleaved sample bytes.
    pub data: Vec<u8>,
    /// Sample rate in Hz.
    pub sample_rate: u32,
    /// Number of interleaved channels.
    pub channels: u16,
    pub format: SampleFormat,
}

impl AudioFrame {
    pub fn new(data: Vec<u8>, sample_rate: u32, channels: u16, format: SampleFormat) -> Self {
        Self {
            data,
            sample_rate,
            channels,
            format,
        }
    }

    /// Build a frame from signed 16-bit interleaved samples.
    pub fn from_i16(samples: &[i16], sample_rate: u32, channels: u16) -> Self {
        let data = samples.iter().flat_map(|s| s.to_le_bytes()).collect();
        Self::new(data, sample_rate, channels, SampleFormat::S16)
    }

    /// Build a frame from f32 interleaved samples.
    pub fn from_f32(samples: &[f32], sample_rate: u32, channels: u16) -> Self {
        let data = samples.iter().flat_map(|s| s.to_le_bytes()).collect();
        Self::new(data, sample_rate, channels, SampleFormat::F32)
    }

    /// Bytes occupied by one sample across all channels.
    pub fn bytes_per_sample_frame(&self) -> usize {
        self.format.width() * self.channels as usize
    }

    /// Number of samples per channel, or `None` if the layout is inconsistent.
    pub fn samples_per_channel(&self) -> Option<usize> {
        let stride = self.bytes_per_sample_frame();
        if stride == 0 || self.data.len() % stride != 0 {
            return None;
        }
        Some(self.data.len() / stride)
    }

    /// Playback duration of this frame (zero when the layout is inconsistent).
    pub fn duration(&self) -> Duration {
        match self.samples_per_channel() {
            Some(n) if self.sample_rate > 0 => {
                Duration::from_secs_f64(n as f64 / self.sample_rate as f64)
            }
            _ => Duration::ZERO,
        }
    }
}

/// Mono 16 kHz signed 16-bit PCM of arbitrary length.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Pcm16Buffer {
    bytes: Vec<u8>,
}

impl Pcm16Buffer {
    /// Wrap little-endian PCM bytes. A dangling odd byte is discarded.
    pub fn from_bytes(mut bytes: Vec<u8>) -> Self {
        bytes.truncate(bytes.len() - bytes.len() % BYTES_PER_SAMPLE);
        Self { bytes }
    }

    pub fn from_samples(samples: &[i16]) -> Self {
        Self {
            bytes: samples.iter().flat_map(|s| s.to_le_bytes()).collect(),
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }

    pub fn sample_count(&self) -> usize {
        self.bytes.len() / BYTES_PER_SAMPLE
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn duration_ms(&self) -> u64 {
        self.sample_count() as u64 * 1000 / CANONICAL_SAMPLE_RATE as u64
    }

    pub fn samples(&self) -> impl Iterator<Item = i16> + '_ {
        decode_pcm16(&self.bytes)
    }
}

/// Allowed durations for a [`FixedFrame`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FrameDuration {
    Ms10,
    Ms20,
    Ms30,
}

impl FrameDuration {
    pub fn as_ms(self) -> u32 {
        match self {
            FrameDuration::Ms10 => 10,
            FrameDuration::Ms20 => 20,
            FrameDuration::Ms30 => 30,
        }
    }

    /// Canonical samples in one frame of this duration.
    pub fn samples(self) -> usize {
        (CANONICAL_SAMPLE_RATE * self.as_ms() / 1000) as usize
    }

    /// Exact byte length of one frame of this duration.
    pub fn byte_len(self) -> usize {
        self.samples() * BYTES_PER_SAMPLE
    }
}

impl TryFrom<u32> for FrameDuration {
    type Error = ParleyError;

    fn try_from(ms: u32) -> Result<Self> {
        match ms {
            10 => Ok(FrameDuration::Ms10),
            20 => Ok(FrameDuration::Ms20),
            30 => Ok(FrameDuration::Ms30),
            other => Err(ParleyError::InvalidFrameDuration(other)),
        }
    }
}

/// A canonical PCM slice whose length is exactly one [`FrameDuration`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FixedFrame {
    bytes: Vec<u8>,
    duration: FrameDuration,
}

impl FixedFrame {
    /// # Errors
    /// `ParleyError::MalformedFrame` if `bytes` is not exactly `duration.byte_len()` long.
    pub fn new(bytes: Vec<u8>, duration: FrameDuration) -> Result<Self> {
        if bytes.len() != duration.byte_len() {
            return Err(ParleyError::MalformedFrame(format!(
                "expected {} bytes for {} ms, got {}",
                duration.byte_len(),
                duration.as_ms(),
                bytes.len()
            )));
        }
        Ok(Self { bytes, duration })
    }

    /// A frame of digital silence.
    pub fn silent(duration: FrameDuration) -> Self {
        Self {
            bytes: vec![0u8; duration.byte_len()],
            duration,
        }
    }

    /// A frame holding one repeated sample value.
    pub fn filled(duration: FrameDuration, sample: i16) -> Self {
        let bytes = std::iter::repeat(sample.to_le_bytes())
            .take(duration.samples())
            .flatten()
            .collect();
        Self { bytes, duration }
    }

    pub fn duration(&self) -> FrameDuration {
        self.duration
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn samples(&self) -> impl Iterator<Item = i16> + '_ {
        decode_pcm16(&self.bytes)
    }
}

pub(crate) fn decode_pcm16(bytes: &[u8]) -> impl Iterator<Item = i16> + '_ {
    bytes
        .chunks_exact(BYTES_PER_SAMPLE)
        .map(|b| i16::from_le_bytes([b[0], b[1]]))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_duration_byte_lengths() {
        assert_eq!(FrameDuration::Ms10.byte_len(), 320);
        assert_eq!(FrameDuration::Ms20.byte_len(), 640);
        assert_eq!(FrameDuration::Ms30.byte_len(), 960);
    }

    #[test]
    fn frame_duration_rejects_unsupported_values() {
        assert!(FrameDuration::try_from(20).is_ok());
        for ms in [0, 5, 15, 25, 40, 100] {
            assert!(matches!(
                FrameDuration::try_from(ms),
                Err(ParleyError::InvalidFrameDuration(v)) if v == ms
            ));
        }
    }

    #[test]
    fn fixed_frame_requires_exact_length() {
        assert!(FixedFrame::new(vec![0; 640], FrameDuration::Ms20).is_ok());
        assert!(FixedFrame::new(vec![0; 638], FrameDuration::Ms20).is_err());
        assert!(FixedFrame::new(vec![0; 642], FrameDuration::Ms20).is_err());
    }

    #[test]
    fn audio_frame_duration_accounts_for_channels_and_width() {
        // 480 stereo f32 samples at 48 kHz = 10 ms
        let frame = AudioFrame::from_f32(&vec![0.0; 960], 48_000, 2);
        assert_eq!(frame.samples_per_channel(), Some(480));
        assert_eq!(frame.duration(), Duration::from_millis(10));
    }

    #[test]
    fn audio_frame_with_ragged_layout_has_no_sample_count() {
        let frame = AudioFrame::new(vec![0; 7], 16_000, 1, SampleFormat::S16);
        assert_eq!(frame.samples_per_channel(), None);
        assert_eq!(frame.duration(), Duration::ZERO);
    }

    #[test]
    fn pcm_buffer_drops_dangling_byte() {
        let buf = Pcm16Buffer::from_bytes(vec![1, 0, 2, 0, 9]);
        assert_eq!(buf.sample_count(), 2);
        assert_eq!(buf.samples().collect::<Vec<_>>(), vec![1, 2]);
    }
}
