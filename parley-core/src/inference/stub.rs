//! Development bindings that exercise the pipeline without real engines.
//!
//! `StubRecognizer` describes the chunk it received; `ToneSynthesizer` renders
//! a sine tone whose length tracks the text. Together with a
//! [`TranslationRouter`](super::TranslationRouter) they let the whole session
//! run end to end in tests and in the replay tool.

use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use tracing::debug;

use super::{SpeechRecognizer, SpeechSynthesizer};
use crate::audio::CANONICAL_SAMPLE_RATE;
use crate::buffering::chunk::VoicedChunk;
use crate::error::Result;

/// Chunks shorter than this are treated as noise and yield no text.
const MIN_STUB_CHUNK_MS: u64 = 40;

/// Echo-style recognizer.
///
/// For every chunk of at least 40 ms it returns
/// `"[utt <n>: <ms> ms <lang>]"`, appending `"."` when the chunk ends an
/// utterance.
#[derive(Debug, Default)]
pub struct StubRecognizer {
    chunks_seen: AtomicU64,
}

impl StubRecognizer {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SpeechRecognizer for StubRecognizer {
    async fn transcribe(&self, chunk: &VoicedChunk, source_lang: &str) -> Result<String> {
        if chunk.duration_ms() < MIN_STUB_CHUNK_MS {
            return Ok(String::new());
        }
        let n = self.chunks_seen.fetch_add(1, Ordering::Relaxed) + 1;
        let mut text = format!("[utt {n}: {} ms {source_lang}]", chunk.duration_ms());
        if chunk.end_of_utterance {
            text.push('.');
        }
        debug!(chunk = n, "stub transcription");
        Ok(text)
    }
}

/// Renders text as a sine tone: `ms_per_char` of audio per character,
/// bounded to `[min_ms, max_ms]`, delivered in 100 ms pieces.
#[derive(Debug, Clone)]
pub struct ToneSynthesizer {
    pub frequency_hz: f32,
    pub amplitude: f32,
    pub ms_per_char: u32,
    pub min_ms: u32,
    pub max_ms: u32,
}

impl Default for ToneSynthesizer {
    fn default() -> Self {
        Self {
            frequency_hz: 440.0,
            amplitude: 0.25,
            ms_per_char: 50,
            min_ms: 200,
            max_ms: 3_000,
        }
    }
}

const PIECE_MS: u32 = 100;

impl ToneSynthesizer {
    /// Rendered length for `text`, in milliseconds.
    pub fn duration_ms(&self, text: &str) -> u32 {
        let chars = text.chars().count() as u32;
        chars
            .saturating_mul(self.ms_per_char)
            .clamp(self.min_ms, self.max_ms.max(self.min_ms))
    }

    fn render(&self, duration_ms: u32) -> Vec<u8> {
        let samples = (CANONICAL_SAMPLE_RATE as u64 * duration_ms as u64 / 1000) as usize;
        let step = std::f32::consts::TAU * self.frequency_hz / CANONICAL_SAMPLE_RATE as f32;
        (0..samples)
            .map(|i| ((i as f32 * step).sin() * self.amplitude * 32767.0) as i16)
            .flat_map(|s| s.to_le_bytes())
            .collect()
    }
}

impl SpeechSynthesizer for ToneSynthesizer {
    fn synthesize(&self, text: &str, voice: &str) -> BoxStream<'static, Result<Vec<u8>>> {
        if text.trim().is_empty() {
            return stream::empty().boxed();
        }
        let duration_ms = self.duration_ms(text);
        debug!(voice, duration_ms, "stub synthesis");
        let pcm = self.render(duration_ms);
        let piece_bytes = (CANONICAL_SAMPLE_RATE * PIECE_MS / 1000) as usize * 2;
        let pieces: Vec<Result<Vec<u8>>> = pcm
            .chunks(piece_bytes)
            .map(|p| Ok(p.to_vec()))
            .collect();
        stream::iter(pieces).boxed()
    }
}
