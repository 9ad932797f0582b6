//! Accumulates voiced frames into bounded chunks for recognition.
//!
//! ```text
//!            voiced, len < min                 voiced, len ≥ min → emit(false)
//!   Idle ─────────────────────► Accumulating ─────────────────────────────► Idle
//!    ▲  unvoiced: dropped           │  unvoiced → emit(true)
//!    └──────────────────────────────┘  len ≥ max → emit(true)
//! ```
//!
//! Chunks are flushed as soon as they reach `min_frames`, without waiting for
//! silence. Silence closes a shorter run immediately with `end_of_utterance`.

use tracing::debug;

use super::{VadDecision, VoiceActivityDetector};
use crate::audio::FixedFrame;
use crate::buffering::chunk::VoicedChunk;
use crate::error::{ParleyError, Result};

/// Chunk size bounds, in frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SegmenterConfig {
    pub min_frames: usize,
    /// Hard ceiling. Only reachable when `min_frames > max_frames`; such a
    /// window is flushed with `end_of_utterance` set.
    pub max_frames: usize,
}

impl SegmenterConfig {
    /// # Errors
    /// `ParleyError::InvalidConfig` if either bound is zero.
    pub fn new(min_frames: usize, max_frames: usize) -> Result<Self> {
        if min_frames == 0 || max_frames == 0 {
            return Err(ParleyError::InvalidConfig(format!(
                "chunk frame bounds must be ≥ 1 (min={min_frames}, max={max_frames})"
            )));
        }
        Ok(Self {
            min_frames,
            max_frames,
        })
    }

    /// Convert millisecond bounds at a given frame duration, rounding down and
    /// never below one frame.
    pub fn from_millis(min_chunk_ms: u32, max_chunk_ms: u32, frame_ms: u32) -> Result<Self> {
        let frame_ms = frame_ms.max(1);
        Self::new(
            (min_chunk_ms / frame_ms).max(1) as usize,
            (max_chunk_ms / frame_ms).max(1) as usize,
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegmenterState {
    Idle,
    Accumulating,
}

/// Per-session segmentation state machine.
pub struct VoiceActivitySegmenter {
    detector: Box<dyn VoiceActivityDetector>,
    config: SegmenterConfig,
    window: Vec<FixedFrame>,
}

impl VoiceActivitySegmenter {
    pub fn new(detector: Box<dyn VoiceActivityDetector>, config: SegmenterConfig) -> Self {
        Self {
            detector,
            config,
            window: Vec::with_capacity(config.min_frames.min(config.max_frames)),
        }
    }

    pub fn state(&self) -> SegmenterState {
        if self.window.is_empty() {
            SegmenterState::Idle
        } else {
            SegmenterState::Accumulating
        }
    }

    pub fn buffered_frames(&self) -> usize {
        self.window.len()
    }

    /// Classify `frame` and advance the state machine, returning a chunk when
    /// one is complete.
    pub fn push(&mut self, frame: FixedFrame) -> Option<VoicedChunk> {
        match self.detector.classify(&frame) {
            VadDecision::Speech => {
                self.window.push(frame);
                if self.window.len() >= self.config.min_frames {
                    Some(self.flush(false))
                } else if self.window.len() >= self.config.max_frames {
                    Some(self.flush(true))
                } else {
                    None
                }
            }
            VadDecision::Silence => {
                if self.window.is_empty() {
                    None
                } else {
                    Some(self.flush(true))
                }
            }
        }
    }

    /// Flush whatever is buffered at end of stream.
    pub fn finish(&mut self) -> Option<VoicedChunk> {
        if self.window.is_empty() {
            None
        } else {
            Some(self.flush(true))
        }
    }

    fn flush(&mut self, end_of_utterance: bool) -> VoicedChunk {
        let chunk = VoicedChunk::from_frames(&self.window, end_of_utterance);
        self.window.clear();
        if end_of_utterance {
            self.detector.reset();
        }
        debug!(
            frames = chunk.frame_count,
            end_of_utterance, "voiced chunk ready"
        );
        chunk
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::FrameDuration;
    use std::collections::VecDeque;
    use std::sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    };

    /// Replays a fixed script of decisions, counting calls.
    struct ScriptedVad {
        script: VecDeque<bool>,
        calls: Arc<AtomicUsize>,
    }

    impl VoiceActivityDetector for ScriptedVad {
        fn classify(&mut self, _frame: &FixedFrame) -> VadDecision {
            self.calls.fetch_add(1, Ordering::Relaxed);
            self.script.pop_front().unwrap_or(false).into()
        }
    }

    fn segmenter(script: &[bool], min: usize, max: usize) -> (VoiceActivitySegmenter, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        let vad = ScriptedVad {
            script: script.iter().copied().collect(),
            calls: Arc::clone(&calls),
        };
        let cfg = SegmenterConfig::new(min, max).unwrap();
        (VoiceActivitySegmenter::new(Box::new(vad), cfg), calls)
    }

    fn frame() -> FixedFrame {
        FixedFrame::filled(FrameDuration::Ms20, 100)
    }

    fn run(seg: &mut VoiceActivitySegmenter, n: usize) -> Vec<VoicedChunk> {
        (0..n).filter_map(|_| seg.push(frame())).collect()
    }

    #[test]
    fn detector_called_once_per_frame() {
        let (mut seg, calls) = segmenter(&[true, false, true, true, false], 3, 6);
        run(&mut seg, 5);
        assert_eq!(calls.load(Ordering::Relaxed), 5);
    }

    #[test]
    fn min_boundary_emits_without_end_of_utterance() {
        let (mut seg, _) = segmenter(&[true, true, true, false], 3, 6);
        let chunks = run(&mut seg, 4);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].frame_count, 3);
        assert!(!chunks[0].end_of_utterance);
        assert_eq!(seg.state(), SegmenterState::Idle);
    }

    #[test]
    fn silence_flushes_short_run_as_end_of_utterance() {
        let (mut seg, _) = segmenter(&[true, true, false], 5, 10);
        let chunks = run(&mut seg, 3);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].frame_count, 2);
        assert!(chunks[0].end_of_utterance);
    }

    #[test]
    fn silence_with_empty_window_is_dropped() {
        let (mut seg, _) = segmenter(&[false, false, false], 2, 4);
        assert!(run(&mut seg, 3).is_empty());
        assert_eq!(seg.state(), SegmenterState::Idle);
    }

    #[test]
    fn ceiling_flushes_with_end_of_utterance_when_below_min() {
        let (mut seg, _) = segmenter(&[true; 7], 10, 3);
        let chunks = run(&mut seg, 7);
        assert_eq!(chunks.len(), 2);
        assert!(chunks.iter().all(|c| c.frame_count == 3 && c.end_of_utterance));
        assert_eq!(seg.buffered_frames(), 1);
    }

    #[test]
    fn equal_bounds_take_the_min_branch() {
        let (mut seg, _) = segmenter(&[true; 4], 2, 2);
        let chunks = run(&mut seg, 4);
        assert_eq!(chunks.len(), 2);
        assert!(chunks.iter().all(|c| c.frame_count == 2 && !c.end_of_utterance));
    }

    #[test]
    fn finish_flushes_partial_window() {
        let (mut seg, _) = segmenter(&[true, true], 5, 10);
        assert!(run(&mut seg, 2).is_empty());
        assert_eq!(seg.state(), SegmenterState::Accumulating);
        let tail = seg.finish().expect("buffered frames");
        assert_eq!(tail.frame_count, 2);
        assert!(tail.end_of_utterance);
        assert!(seg.finish().is_none());
    }

    #[test]
    fn chunk_sizes_stay_within_bounds_for_mixed_input() {
        let script: Vec<bool> = (0..200).map(|i| (i / 7) % 3 != 0).collect();
        let (mut seg, _) = segmenter(&script, 4, 6);
        let mut chunks = run(&mut seg, 200);
        chunks.extend(seg.finish());
        assert!(!chunks.is_empty());
        for c in &chunks {
            assert!(c.frame_count >= 1 && c.frame_count <= 6);
            assert!(c.frame_count >= 4 || c.end_of_utterance);
        }
    }

    #[test]
    fn from_millis_rounds_down_and_floors_at_one() {
        let cfg = SegmenterConfig::from_millis(500, 1000, 20).unwrap();
        assert_eq!((cfg.min_frames, cfg.max_frames), (25, 50));
        let tiny = SegmenterConfig::from_millis(5, 5, 30).unwrap();
        assert_eq!((tiny.min_frames, tiny.max_frames), (1, 1));
    }

    #[test]
    fn zero_bounds_rejected() {
        assert!(SegmenterConfig::new(0, 5).is_err());
        assert!(SegmenterConfig::new(5, 0).is_err());
    }
}
