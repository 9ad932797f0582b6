//! Normalisation of inbound transport frames to canonical PCM.
//!
//! ## Design
//!
//! Transports deliver whatever they negotiated (48 kHz stereo Opus decodes,
//! 8 kHz telephony, f32 or s16). `FrameResampler` decodes the interleaved
//! samples, averages channels down to mono, converts the rate with a rubato
//! `FastFixedIn` session and quantises back to s16le.
//!
//! When the inbound rate already is 16 kHz, no rubato session exists and the
//! samples pass straight through. A rate change mid-stream rebuilds the
//! converter; samples buffered for the old rate are discarded.

use rubato::{FastFixedIn, PolynomialDegree, Resampler};
use tracing::{debug, error, info, warn};

use super::{AudioFrame, Pcm16Buffer, SampleFormat, CANONICAL_SAMPLE_RATE};
use crate::error::{ParleyError, Result};

/// Converts f32 mono audio from one fixed sample rate to another.
pub struct RateConverter {
    /// `None` when input rate == target rate (passthrough mode).
    resampler: Option<FastFixedIn<f32>>,
    /// Holds partial input blocks between calls.
    pending: Vec<f32>,
    /// Input samples rubato consumes per call.
    block: usize,
    /// Pre-allocated output buffer: `[1][output_frames_max]`.
    scratch: Vec<Vec<f32>>,
    input_rate: u32,
}

impl RateConverter {
    /// # Errors
    /// Returns `ParleyError::Resampler` if rubato rejects the ratio or block size.
    pub fn new(input_rate: u32, target_rate: u32, block: usize) -> Result<Self> {
        if input_rate == target_rate {
            return Ok(Self {
                resampler: None,
                pending: Vec::new(),
                block,
                scratch: Vec::new(),
                input_rate,
            });
        }

        let ratio = target_rate as f64 / input_rate as f64;
        let resampler = FastFixedIn::<f32>::new(ratio, 1.0, PolynomialDegree::Cubic, block, 1)
            .map_err(|e| ParleyError::Resampler(format!("init {input_rate}->{target_rate}: {e}")))?;

        let scratch = vec![vec![0f32; resampler.output_frames_max()]; 1];

        info!(input_rate, target_rate, block, "resampling enabled");

        Ok(Self {
            resampler: Some(resampler),
            pending: Vec::with_capacity(block * 2),
            block,
            scratch,
            input_rate,
        })
    }

    pub fn input_rate(&self) -> u32 {
        self.input_rate
    }

    /// Returns `true` when no conversion happens.
    pub fn is_passthrough(&self) -> bool {
        self.resampler.is_none()
    }

    /// Feed samples, returning whatever output is ready (may be empty while
    /// a block is still filling).
    pub fn process(&mut self, samples: &[f32]) -> Vec<f32> {
        let Some(ref mut resampler) = self.resampler else {
            return samples.to_vec();
        };

        self.pending.extend_from_slice(samples);

        let mut out = Vec::new();
        while self.pending.len() >= self.block {
            let input = &self.pending[..self.block];
            match resampler.process_into_buffer(&[input], &mut self.scratch, None) {
                Ok((_consumed, produced)) => out.extend_from_slice(&self.scratch[0][..produced]),
                Err(e) => error!("resampler process error: {e}"),
            }
            self.pending.drain(..self.block);
        }
        out
    }
}

/// Normalises [`AudioFrame`]s to [`Pcm16Buffer`]s at 16 kHz mono.
///
/// Owned by the session ingress; not shared between sessions.
#[derive(Default)]
pub struct FrameResampler {
    converter: Option<RateConverter>,
}

impl FrameResampler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Normalise one frame.
    ///
    /// Returns `None` when the frame is malformed (logged at `warn`) or when the
    /// converter is still filling its first block. Never blocks.
    pub fn normalize(&mut self, frame: &AudioFrame) -> Option<Pcm16Buffer> {
        match self.try_normalize(frame) {
            Ok(pcm) => pcm,
            Err(e) => {
                warn!(error = %e, "dropping inbound frame");
                None
            }
        }
    }

    /// Like [`normalize`](Self::normalize) but reports malformed frames as
    /// errors instead of logging them.
    pub fn try_normalize(&mut self, frame: &AudioFrame) -> Result<Option<Pcm16Buffer>> {
        validate(frame)?;

        // Fast path: already canonical.
        if frame.sample_rate == CANONICAL_SAMPLE_RATE
            && frame.channels == 1
            && frame.format == SampleFormat::S16
        {
            return Ok(Some(Pcm16Buffer::from_bytes(frame.data.clone())));
        }

        let mono = downmix(frame);
        let resampled = self.converter_for(frame.sample_rate)?.process(&mono);
        if resampled.is_empty() {
            debug!(
                sample_rate = frame.sample_rate,
                "resampler accumulating input"
            );
            return Ok(None);
        }

        let samples: Vec<i16> = resampled.iter().map(|&s| quantize(s)).collect();
        Ok(Some(Pcm16Buffer::from_samples(&samples)))
    }

    fn converter_for(&mut self, input_rate: u32) -> Result<&mut RateConverter> {
        let stale = self
            .converter
            .as_ref()
            .map_or(true, |c| c.input_rate() != input_rate);
        if stale {
            if let Some(old) = &self.converter {
                info!(
                    from = old.input_rate(),
                    to = input_rate,
                    "inbound sample rate changed; rebuilding resampler"
                );
            }
            // 10 ms blocks keep the added latency below one VAD frame.
            let block = (input_rate as usize / 100).max(1);
            self.converter = Some(RateConverter::new(
                input_rate,
                CANONICAL_SAMPLE_RATE,
                block,
            )?);
        }
        self.converter
            .as_mut()
            .ok_or_else(|| ParleyError::Resampler("converter missing".into()))
    }
}

fn validate(frame: &AudioFrame) -> Result<()> {
    if frame.data.is_empty() {
        return Err(ParleyError::MalformedFrame("zero-length frame".into()));
    }
    if frame.sample_rate == 0 {
        return Err(ParleyError::MalformedFrame("sample rate is zero".into()));
    }
    if frame.channels == 0 {
        return Err(ParleyError::MalformedFrame("channel count is zero".into()));
    }
    if frame.samples_per_channel().is_none() {
        return Err(ParleyError::MalformedFrame(format!(
            "{} bytes is not a multiple of {} channels x {} bytes",
            frame.data.len(),
            frame.channels,
            frame.format.width()
        )));
    }
    Ok(())
}

/// Decode interleaved samples and average channels into mono f32.
fn downmix(frame: &AudioFrame) -> Vec<f32> {
    let channels = frame.channels as usize;
    let decoded: Vec<f32> = match frame.format {
        SampleFormat::S16 => frame
            .data
            .chunks_exact(2)
            .map(|b| i16::from_le_bytes([b[0], b[1]]) as f32 / 32768.0)
            .collect(),
        SampleFormat::F32 => frame
            .data
            .chunks_exact(4)
            .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
            .collect(),
    };
    if channels == 1 {
        return decoded;
    }
    decoded
        .chunks_exact(channels)
        .map(|c| c.iter().sum::<f32>() / channels as f32)
        .collect()
}

fn quantize(sample: f32) -> i16 {
    (sample * 32768.0).clamp(-32768.0, 32767.0) as i16
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn passthrough_identity() {
        let mut rc = RateConverter::new(16_000, 16_000, 160).unwrap();
        assert!(rc.is_passthrough());
        let samples: Vec<f32> = (0..480).map(|i| i as f32 * 0.001).collect();
        assert_eq!(rc.process(&samples), samples);
    }

    #[test]
    fn ratio_48k_to_16k_correct_length() {
        let mut rc = RateConverter::new(48_000, 16_000, 480).unwrap();
        assert!(!rc.is_passthrough());
        let out = rc.process(&vec![0.0f32; 480]);
        assert!(
            (out.len() as isize - 160).unsigned_abs() <= 5,
            "output len={} expected≈160",
            out.len()
        );
    }

    #[test]
    fn partial_block_is_held_back() {
        let mut rc = RateConverter::new(48_000, 16_000, 480).unwrap();
        assert!(rc.process(&vec![0.0f32; 300]).is_empty());
        assert!(!rc.process(&vec![0.0f32; 300]).is_empty());
    }

    #[test]
    fn canonical_frame_passes_through_unchanged() {
        let mut resampler = FrameResampler::new();
        let samples: Vec<i16> = (0..320).map(|i| i as i16 * 3).collect();
        let frame = AudioFrame::from_i16(&samples, 16_000, 1);
        let out = resampler.normalize(&frame).expect("canonical frame");
        assert_eq!(out.samples().collect::<Vec<_>>(), samples);
    }

    #[test]
    fn stereo_is_averaged_to_mono() {
        let mut resampler = FrameResampler::new();
        // L=1000, R=3000 → mono 2000 (within quantisation error)
        let interleaved: Vec<f32> = (0..320)
            .flat_map(|_| [1000.0 / 32768.0, 3000.0 / 32768.0])
            .collect();
        let frame = AudioFrame::from_f32(&interleaved, 16_000, 2);
        let out = resampler.normalize(&frame).expect("stereo frame");
        assert_eq!(out.sample_count(), 320);
        assert!(out.samples().all(|s| (s - 2000).abs() <= 1));
    }

    #[test]
    fn downsamples_48k_stereo_to_canonical_rate() {
        let mut resampler = FrameResampler::new();
        // 20 ms at 48 kHz stereo
        let frame = AudioFrame::from_i16(&vec![0i16; 960 * 2], 48_000, 2);
        let out = resampler.normalize(&frame).expect("two 10 ms blocks ready");
        assert!((out.sample_count() as isize - 320).unsigned_abs() <= 10);
    }

    #[test]
    fn malformed_frames_are_dropped() {
        let mut resampler = FrameResampler::new();
        let empty = AudioFrame::new(Vec::new(), 16_000, 1, SampleFormat::S16);
        let zero_rate = AudioFrame::new(vec![0; 4], 0, 1, SampleFormat::S16);
        let zero_channels = AudioFrame::new(vec![0; 4], 16_000, 0, SampleFormat::S16);
        let ragged = AudioFrame::new(vec![0; 6], 16_000, 1, SampleFormat::F32);
        for frame in [empty, zero_rate, zero_channels, ragged] {
            assert!(matches!(
                resampler.try_normalize(&frame),
                Err(ParleyError::MalformedFrame(_))
            ));
            assert!(resampler.normalize(&frame).is_none());
        }
    }

    #[test]
    fn rate_change_rebuilds_converter() {
        let mut resampler = FrameResampler::new();
        let a = AudioFrame::from_i16(&vec![0i16; 480], 48_000, 1);
        assert!(resampler.normalize(&a).is_some());
        let b = AudioFrame::from_i16(&vec![0i16; 80], 8_000, 1);
        assert!(resampler.normalize(&b).is_some());
        assert_eq!(resampler.converter.as_ref().map(|c| c.input_rate()), Some(8_000));
    }

    #[test]
    fn quantize_clamps_out_of_range() {
        assert_eq!(quantize(2.0), i16::MAX);
        assert_eq!(quantize(-2.0), i16::MIN);
        assert_eq!(quantize(0.0), 0);
    }
}
