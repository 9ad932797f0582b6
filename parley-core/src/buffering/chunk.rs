//! Units of work handed between pipeline stages.

use crate::audio::{decode_pcm16, FixedFrame, FrameDuration};

/// Consecutive voiced frames handed to recognition as one unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VoicedChunk {
    /// Concatenated canonical PCM of all frames.
    pub pcm: Vec<u8>,
    pub frame_count: usize,
    pub frame_duration: FrameDuration,
    /// Silence follows (or the length ceiling was hit); the recognizer may
    /// finalise its hypothesis.
    pub end_of_utterance: bool,
}

impl VoicedChunk {
    /// Concatenate `frames`. Callers guarantee at least one frame.
    pub fn from_frames(frames: &[FixedFrame], end_of_utterance: bool) -> Self {
        let frame_duration = frames
            .first()
            .map(|f| f.duration())
            .unwrap_or(FrameDuration::Ms20);
        let mut pcm = Vec::with_capacity(frames.len() * frame_duration.byte_len());
        for frame in frames {
            pcm.extend_from_slice(frame.as_bytes());
        }
        Self {
            pcm,
            frame_count: frames.len(),
            frame_duration,
            end_of_utterance,
        }
    }

    pub fn duration_ms(&self) -> u64 {
        self.frame_count as u64 * self.frame_duration.as_ms() as u64
    }

    pub fn samples(&self) -> impl Iterator<Item = i16> + '_ {
        decode_pcm16(&self.pcm)
    }
}

/// Recognised text in the source language.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranscriptText {
    pub text: String,
    pub source_lang: String,
}

/// Text after translation, tagged with both languages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranslatedText {
    pub text: String,
    pub source_lang: String,
    pub target_lang: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunk_concatenates_frames_in_order() {
        let frames = vec![
            FixedFrame::filled(FrameDuration::Ms10, 1),
            FixedFrame::filled(FrameDuration::Ms10, 2),
        ];
        let chunk = VoicedChunk::from_frames(&frames, true);
        assert_eq!(chunk.frame_count, 2);
        assert_eq!(chunk.pcm.len(), 640);
        assert_eq!(chunk.duration_ms(), 20);
        assert_eq!(chunk.samples().next(), Some(1));
        assert_eq!(chunk.samples().last(), Some(2));
        assert!(chunk.end_of_utterance);
    }
}
