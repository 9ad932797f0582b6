//! # parley-core
//!
//! Streaming speech-to-speech translation pipeline.
//!
//! ## Architecture
//!
//! ```text
//! transport ─► FrameResampler ─► [pcm] ─► segment stage (FrameSplitter + VoiceActivitySegmenter)
//!                                              │
//!                                        [voiced chunks]
//!                                              │
//!                                   SpeechRecognizer::transcribe
//!                                              │
//!                                           [text]
//!                                              │
//!                                   MachineTranslator::translate
//!                                              │
//!                                      [translated text]
//!                                              │
//!                       SpeechSynthesizer::synthesize ─► OutputFramer ─► [output] ─► transport
//! ```
//!
//! Every queue is a bounded SPSC ring. Producers never wait: a full queue drops
//! the newest item so a slow stage turns into gaps in the output, not latency.

#![forbid(unsafe_code)]
#![warn(clippy::all)]

pub mod audio;
pub mod buffering;
pub mod engine;
pub mod error;
pub mod events;
pub mod inference;
pub mod vad;

// Convenience re-exports for downstream crates
pub use audio::{AudioFrame, FixedFrame, FrameDuration, Pcm16Buffer, SampleFormat};
pub use buffering::chunk::{TranscriptText, TranslatedText, VoicedChunk};
pub use engine::{DiagnosticsSnapshot, SessionConfig, TranslationSession};
pub use error::{ParleyError, Result};
pub use events::{SessionStatus, SessionStatusEvent};
pub use inference::{
    Capabilities, MachineTranslator, SpeechRecognizer, SpeechSynthesizer, StageOutcome,
};
pub use vad::{VadDecision, VoiceActivityDetector};
