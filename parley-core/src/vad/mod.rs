//! Voice Activity Detection (VAD) abstraction and utterance segmentation.
//!
//! The `VoiceActivityDetector` trait is the extensibility point: swap in
//! `EnergyVad` (bundled) or a WebRTC/neural detector without touching the
//! segmenter or the pipeline.

pub mod energy;
pub mod segmenter;

pub use energy::EnergyVad;
pub use segmenter::{SegmenterConfig, SegmenterState, VoiceActivitySegmenter};

use crate::audio::FixedFrame;

/// Whether a given frame contains speech or silence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VadDecision {
    Speech,
    Silence,
}

impl VadDecision {
    pub fn is_speech(self) -> bool {
        self == VadDecision::Speech
    }
}

impl From<bool> for VadDecision {
    fn from(speech: bool) -> Self {
        if speech {
            VadDecision::Speech
        } else {
            VadDecision::Silence
        }
    }
}

/// Trait for all VAD implementations.
///
/// Implementors may be stateful (hangover counters, RNN hidden states, etc.).
/// One detector instance belongs to exactly one session.
pub trait VoiceActivityDetector: Send + 'static {
    /// Classify one canonical 10/20/30 ms frame.
    fn classify(&mut self, frame: &FixedFrame) -> VadDecision;

    /// Reset any internal state between utterances.
    fn reset(&mut self) {}
}
