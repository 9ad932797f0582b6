//! Energy-based VAD using RMS threshold + hangover counter.
//!
//! ## Algorithm
//!
//! 1. Compute normalised RMS of the frame's s16 samples.
//! 2. If RMS ≥ `threshold` → `Speech`, reload the hangover counter.
//! 3. If RMS < `threshold` and hangover counter > 0 → `Speech`, decrement.
//! 4. Otherwise → `Silence`.

use super::{VadDecision, VoiceActivityDetector};
use crate::audio::FixedFrame;

/// A simple energy-based voice activity detector.
#[derive(Debug, Clone)]
pub struct EnergyVad {
    /// Normalised RMS threshold in [0, 1]. Typical range 0.01–0.05.
    threshold: f32,
    /// Silent frames still reported as speech after real speech ends.
    hangover_frames: u32,
    hangover_counter: u32,
}

impl EnergyVad {
    /// # Parameters
    /// - `threshold`: RMS above which a frame is speech. Default `0.02`.
    /// - `hangover_frames`: silent frames that extend speech. Default `4`
    ///   (80 ms at 20 ms frames).
    pub fn new(threshold: f32, hangover_frames: u32) -> Self {
        Self {
            threshold,
            hangover_frames,
            hangover_counter: 0,
        }
    }

    /// Root-mean-square of a frame, normalised to [0, 1].
    pub fn rms(frame: &FixedFrame) -> f32 {
        let mut sum_sq = 0f64;
        let mut n = 0usize;
        for s in frame.samples() {
            let v = s as f64 / 32768.0;
            sum_sq += v * v;
            n += 1;
        }
        if n == 0 {
            return 0.0;
        }
        (sum_sq / n as f64).sqrt() as f32
    }
}

impl Default for EnergyVad {
    fn default() -> Self {
        Self::new(0.02, 4)
    }
}

impl VoiceActivityDetector for EnergyVad {
    fn classify(&mut self, frame: &FixedFrame) -> VadDecision {
        if Self::rms(frame) >= self.threshold {
            self.hangover_counter = self.hangover_frames;
            VadDecision::Speech
        } else if self.hangover_counter > 0 {
            self.hangover_counter -= 1;
            VadDecision::Speech
        } else {
            VadDecision::Silence
        }
    }

    fn reset(&mut self) {
        self.hangover_counter = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::FrameDuration;
    use approx::assert_abs_diff_eq;

    fn silent() -> FixedFrame {
        FixedFrame::silent(FrameDuration::Ms20)
    }

    fn loud() -> FixedFrame {
        FixedFrame::filled(FrameDuration::Ms20, 16_384)
    }

    #[test]
    fn silence_below_threshold() {
        let mut vad = EnergyVad::new(0.02, 0);
        assert_eq!(vad.classify(&silent()), VadDecision::Silence);
    }

    #[test]
    fn speech_above_threshold() {
        let mut vad = EnergyVad::new(0.02, 0);
        assert_eq!(vad.classify(&loud()), VadDecision::Speech);
    }

    #[test]
    fn hangover_extends_speech() {
        let mut vad = EnergyVad::new(0.02, 2);
        assert_eq!(vad.classify(&loud()), VadDecision::Speech);
        assert_eq!(vad.classify(&silent()), VadDecision::Speech);
        assert_eq!(vad.classify(&silent()), VadDecision::Speech);
        assert_eq!(vad.classify(&silent()), VadDecision::Silence);
    }

    #[test]
    fn reset_clears_hangover() {
        let mut vad = EnergyVad::new(0.02, 5);
        vad.classify(&loud());
        vad.reset();
        assert_eq!(vad.classify(&silent()), VadDecision::Silence);
    }

    #[test]
    fn rms_of_constant_half_scale_frame() {
        assert_abs_diff_eq!(EnergyVad::rms(&loud()), 0.5, epsilon = 1e-4);
        assert_abs_diff_eq!(EnergyVad::rms(&silent()), 0.0);
    }
}
