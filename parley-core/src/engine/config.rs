use serde::{Deserialize, Serialize};

use crate::audio::FrameDuration;
use crate::error::{ParleyError, Result};
use crate::vad::SegmenterConfig;

/// Configuration for one `TranslationSession`.
///
/// Deserialises from camelCase JSON; missing fields take their defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[serde(default)]
pub struct SessionConfig {
    /// Language spoken on the inbound stream. Default: `"en"`.
    pub source_lang: String,
    /// Language of the synthesized output. Default: `"es"`.
    pub target_lang: String,
    /// Voice identifier passed to the synthesizer.
    pub voice: String,
    /// VAD frame length: 10, 20 or 30 ms. Default: 20.
    pub frame_ms: u32,
    /// Voiced audio flushed to recognition without waiting for silence.
    /// Default: 500 ms.
    pub min_chunk_ms: u32,
    /// Hard ceiling for one chunk. Default: 1000 ms.
    pub max_chunk_ms: u32,
    /// Output frame length: 10, 20 or 30 ms. Default: 20.
    pub output_frame_ms: u32,
    pub pcm_queue_capacity: usize,
    pub chunk_queue_capacity: usize,
    pub text_queue_capacity: usize,
    pub translated_queue_capacity: usize,
    pub output_queue_capacity: usize,
    /// Upper bound on a single recognition/translation call, and on the wait
    /// for each synthesized chunk. Default: 10 000 ms.
    pub capability_timeout_ms: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            source_lang: "en".into(),
            target_lang: "es".into(),
            voice: "default".into(),
            frame_ms: 20,
            min_chunk_ms: 500,
            max_chunk_ms: 1_000,
            output_frame_ms: 20,
            pcm_queue_capacity: 200,
            chunk_queue_capacity: 50,
            text_queue_capacity: 50,
            translated_queue_capacity: 50,
            output_queue_capacity: 100,
            capability_timeout_ms: 10_000,
        }
    }
}

impl SessionConfig {
    /// Parse from JSON, filling omitted fields with defaults, then validate.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Check every field the pipeline relies on.
    pub fn validate(&self) -> Result<()> {
        FrameDuration::try_from(self.frame_ms)?;
        FrameDuration::try_from(self.output_frame_ms)?;
        self.segmenter()?;

        if self.source_lang.trim().is_empty() || self.target_lang.trim().is_empty() {
            return Err(ParleyError::InvalidConfig(
                "source and target language must be set".into(),
            ));
        }

        let capacities = [
            ("pcmQueueCapacity", self.pcm_queue_capacity),
            ("chunkQueueCapacity", self.chunk_queue_capacity),
            ("textQueueCapacity", self.text_queue_capacity),
            ("translatedQueueCapacity", self.translated_queue_capacity),
            ("outputQueueCapacity", self.output_queue_capacity),
        ];
        if let Some((name, _)) = capacities.iter().find(|(_, cap)| *cap == 0) {
            return Err(ParleyError::InvalidConfig(format!("{name} must be ≥ 1")));
        }

        if self.capability_timeout_ms == 0 {
            return Err(ParleyError::InvalidConfig(
                "capabilityTimeoutMs must be ≥ 1".into(),
            ));
        }
        Ok(())
    }

    /// Chunk bounds in frames, derived from the millisecond settings.
    pub fn segmenter(&self) -> Result<SegmenterConfig> {
        SegmenterConfig::from_millis(self.min_chunk_ms, self.max_chunk_ms, self.frame_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        let cfg = SessionConfig::default();
        cfg.validate().unwrap();
        let seg = cfg.segmenter().unwrap();
        assert_eq!((seg.min_frames, seg.max_frames), (25, 50));
    }

    #[test]
    fn partial_json_fills_defaults() {
        let cfg = SessionConfig::from_json(r#"{"sourceLang":"fr","frameMs":30}"#).unwrap();
        assert_eq!(cfg.source_lang, "fr");
        assert_eq!(cfg.target_lang, "es");
        assert_eq!(cfg.frame_ms, 30);
        assert_eq!(cfg.output_queue_capacity, 100);
    }

    #[test]
    fn rejects_bad_frame_duration() {
        let err = SessionConfig::from_json(r#"{"frameMs":25}"#).unwrap_err();
        assert!(matches!(err, ParleyError::InvalidFrameDuration(25)));
        let cfg = SessionConfig {
            output_frame_ms: 40,
            ..SessionConfig::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn rejects_zero_capacity() {
        let cfg = SessionConfig {
            text_queue_capacity: 0,
            ..SessionConfig::default()
        };
        let err = cfg.validate().unwrap_err();
        assert!(err.to_string().contains("textQueueCapacity"));
    }

    #[test]
    fn rejects_malformed_json() {
        assert!(matches!(
            SessionConfig::from_json("{not json"),
            Err(ParleyError::ConfigParse(_))
        ));
    }
}
