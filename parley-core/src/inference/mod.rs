//! Capability contracts for the external engines.
//!
//! Recognition, translation and synthesis engines are injected into a session
//! as `Arc<dyn Trait>` objects. They are shared across calls and may be shared
//! across sessions, so methods take `&self`; engines with mutable decoder state
//! serialise it internally.
//!
//! Engines that block (CPU inference) should hop onto
//! `tokio::task::spawn_blocking` inside their implementation so one slow call
//! never stalls other sessions' stages.

pub mod router;
pub mod stub;

pub use router::TranslationRouter;
pub use stub::{StubRecognizer, ToneSynthesizer};

use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::BoxStream;

use crate::buffering::chunk::VoicedChunk;
use crate::error::Result;

/// Speech-to-text.
#[async_trait]
pub trait SpeechRecognizer: Send + Sync + 'static {
    /// Transcribe one voiced chunk. An empty string means nothing was heard.
    async fn transcribe(&self, chunk: &VoicedChunk, source_lang: &str) -> Result<String>;
}

/// Text-to-text translation.
///
/// Implementations must pass the input through unchanged for language pairs
/// they cannot handle rather than failing.
#[async_trait]
pub trait MachineTranslator: Send + Sync + 'static {
    async fn translate(&self, text: &str, source_lang: &str, target_lang: &str) -> Result<String>;
}

/// Text-to-speech.
pub trait SpeechSynthesizer: Send + Sync + 'static {
    /// Start synthesising `text`. The stream yields 16 kHz mono s16le chunks of
    /// arbitrary length and ends when the utterance is complete. Each call
    /// produces a fresh stream.
    fn synthesize(&self, text: &str, voice: &str) -> BoxStream<'static, Result<Vec<u8>>>;
}

/// The engines bound to one session.
#[derive(Clone)]
pub struct Capabilities {
    pub recognizer: Arc<dyn SpeechRecognizer>,
    pub translator: Arc<dyn MachineTranslator>,
    pub synthesizer: Arc<dyn SpeechSynthesizer>,
}

impl Capabilities {
    pub fn new(
        recognizer: Arc<dyn SpeechRecognizer>,
        translator: Arc<dyn MachineTranslator>,
        synthesizer: Arc<dyn SpeechSynthesizer>,
    ) -> Self {
        Self {
            recognizer,
            translator,
            synthesizer,
        }
    }
}

impl std::fmt::Debug for Capabilities {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Capabilities").finish_non_exhaustive()
    }
}

/// Result of one capability call as seen by a stage loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StageOutcome {
    /// Non-empty output to forward downstream.
    Produced(String),
    /// The call succeeded but had nothing to say.
    Empty,
    /// The call failed or timed out; the unit is dropped.
    Failed(String),
}

impl StageOutcome {
    pub fn is_produced(&self) -> bool {
        matches!(self, StageOutcome::Produced(_))
    }
}

impl From<Result<String>> for StageOutcome {
    fn from(result: Result<String>) -> Self {
        match result {
            Ok(text) => {
                let trimmed = text.trim();
                if trimmed.is_empty() {
                    StageOutcome::Empty
                } else {
                    StageOutcome::Produced(trimmed.to_string())
                }
            }
            Err(e) => StageOutcome::Failed(e.to_string()),
        }
    }
}
