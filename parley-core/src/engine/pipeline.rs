//! The four stage loops and their wiring.
//!
//! ## Stages
//!
//! ```text
//! segment     : [pcm]        → split into frames → VAD segmenter → [chunks]
//! recognize   : [chunks]     → SpeechRecognizer  → [text]
//! translate   : [text]       → MachineTranslator → [translated]
//! synthesize  : [translated] → SpeechSynthesizer → OutputFramer → [output]
//! ```
//!
//! Every loop suspends only on its inbound queue and on its capability call,
//! and races both against the session's cancellation token. A failed, empty
//! or timed-out call drops the unit and the loop moves on. A full outbound
//! queue drops the new item. When the inbound queue closes, the stage flushes
//! and exits, which closes its own outbound queue in turn.

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::{FutureExt, StreamExt};
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn, Instrument, Span};

use super::config::SessionConfig;
use super::output::OutputFramer;
use crate::audio::frame::{FrameAssembler, FrameSplitter};
use crate::audio::{FixedFrame, FrameDuration, Pcm16Buffer};
use crate::buffering::chunk::{TranscriptText, TranslatedText, VoicedChunk};
use crate::buffering::{stage_queue, StageReceiver, StageSender};
use crate::error::{ParleyError, Result};
use crate::inference::{Capabilities, StageOutcome};
use crate::vad::{VoiceActivityDetector, VoiceActivitySegmenter};

/// Counters shared by the ingress and all four stages.
#[derive(Default)]
pub struct PipelineDiagnostics {
    pub frames_in: AtomicUsize,
    pub frames_malformed: AtomicUsize,
    pub pcm_dropped: AtomicUsize,
    pub vad_frames: AtomicUsize,
    pub chunks_emitted: AtomicUsize,
    pub chunks_dropped: AtomicUsize,
    pub transcripts: AtomicUsize,
    pub recognition_empty: AtomicUsize,
    pub recognition_failures: AtomicUsize,
    pub texts_dropped: AtomicUsize,
    pub translations: AtomicUsize,
    pub translation_failures: AtomicUsize,
    pub translated_dropped: AtomicUsize,
    pub syntheses: AtomicUsize,
    pub synthesis_failures: AtomicUsize,
    pub output_frames: AtomicUsize,
    pub output_frames_dropped: AtomicUsize,
}

impl PipelineDiagnostics {
    pub fn snapshot(&self) -> DiagnosticsSnapshot {
        let load = |c: &AtomicUsize| c.load(Ordering::Relaxed);
        DiagnosticsSnapshot {
            frames_in: load(&self.frames_in),
            frames_malformed: load(&self.frames_malformed),
            pcm_dropped: load(&self.pcm_dropped),
            vad_frames: load(&self.vad_frames),
            chunks_emitted: load(&self.chunks_emitted),
            chunks_dropped: load(&self.chunks_dropped),
            transcripts: load(&self.transcripts),
            recognition_empty: load(&self.recognition_empty),
            recognition_failures: load(&self.recognition_failures),
            texts_dropped: load(&self.texts_dropped),
            translations: load(&self.translations),
            translation_failures: load(&self.translation_failures),
            translated_dropped: load(&self.translated_dropped),
            syntheses: load(&self.syntheses),
            synthesis_failures: load(&self.synthesis_failures),
            output_frames: load(&self.output_frames),
            output_frames_dropped: load(&self.output_frames_dropped),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DiagnosticsSnapshot {
    pub frames_in: usize,
    pub frames_malformed: usize,
    pub pcm_dropped: usize,
    pub vad_frames: usize,
    pub chunks_emitted: usize,
    pub chunks_dropped: usize,
    pub transcripts: usize,
    pub recognition_empty: usize,
    pub recognition_failures: usize,
    pub texts_dropped: usize,
    pub translations: usize,
    pub translation_failures: usize,
    pub translated_dropped: usize,
    pub syntheses: usize,
    pub synthesis_failures: usize,
    pub output_frames: usize,
    pub output_frames_dropped: usize,
}

impl DiagnosticsSnapshot {
    /// Units dropped anywhere because a queue was full.
    pub fn overload_drops(&self) -> usize {
        self.pcm_dropped
            + self.chunks_dropped
            + self.texts_dropped
            + self.translated_dropped
            + self.output_frames_dropped
    }
}

/// Everything the stage tasks need, handed over by `TranslationSession::start`.
pub(crate) struct PipelineContext {
    pub config: SessionConfig,
    pub detector: Box<dyn VoiceActivityDetector>,
    pub capabilities: Capabilities,
    pub pcm_rx: StageReceiver<Pcm16Buffer>,
    pub output_tx: StageSender<FixedFrame>,
    pub cancel: CancellationToken,
    pub diagnostics: Arc<PipelineDiagnostics>,
    pub span: Span,
}

/// Build the inner queues and spawn the four stage tasks on the current
/// Tokio runtime.
///
/// # Errors
/// Config errors (frame durations, chunk bounds). Nothing is spawned then.
pub(crate) fn spawn(ctx: PipelineContext) -> Result<Vec<JoinHandle<()>>> {
    let PipelineContext {
        config,
        detector,
        capabilities,
        pcm_rx,
        output_tx,
        cancel,
        diagnostics,
        span,
    } = ctx;

    let assembler = FrameAssembler::new(FrameSplitter::new(config.frame_ms)?);
    let segmenter = VoiceActivitySegmenter::new(detector, config.segmenter()?);
    let output_duration = FrameDuration::try_from(config.output_frame_ms)?;
    if tokio::runtime::Handle::try_current().is_err() {
        return Err(ParleyError::Other(anyhow::anyhow!(
            "start() must be called from within a Tokio runtime"
        )));
    }

    let (chunk_tx, chunk_rx) = stage_queue::<VoicedChunk>(config.chunk_queue_capacity);
    let (text_tx, text_rx) = stage_queue::<TranscriptText>(config.text_queue_capacity);
    let (translated_tx, translated_rx) =
        stage_queue::<TranslatedText>(config.translated_queue_capacity);

    let env = StageEnv {
        cancel,
        diagnostics: Arc::clone(&diagnostics),
        timeout: Duration::from_millis(config.capability_timeout_ms),
    };
    let framer = OutputFramer::new(output_duration, output_tx, diagnostics);

    info!(
        frame_ms = config.frame_ms,
        source_lang = %config.source_lang,
        target_lang = %config.target_lang,
        "spawning pipeline stages"
    );

    Ok(vec![
        tokio::spawn(
            segment_stage(pcm_rx, chunk_tx, assembler, segmenter, env.clone())
                .instrument(span.clone()),
        ),
        tokio::spawn(
            recognize_stage(
                chunk_rx,
                text_tx,
                Arc::clone(&capabilities.recognizer),
                config.source_lang.clone(),
                env.clone(),
            )
            .instrument(span.clone()),
        ),
        tokio::spawn(
            translate_stage(
                text_rx,
                translated_tx,
                Arc::clone(&capabilities.translator),
                config.target_lang.clone(),
                env.clone(),
            )
            .instrument(span.clone()),
        ),
        tokio::spawn(
            synthesize_stage(
                translated_rx,
                framer,
                Arc::clone(&capabilities.synthesizer),
                config.voice.clone(),
                env,
            )
            .instrument(span),
        ),
    ])
}

#[derive(Clone)]
struct StageEnv {
    cancel: CancellationToken,
    diagnostics: Arc<PipelineDiagnostics>,
    timeout: Duration,
}

enum Inbound<T> {
    Unit(T),
    Closed,
    Cancelled,
}

impl StageEnv {
    async fn next<T>(&self, rx: &mut StageReceiver<T>) -> Inbound<T> {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Inbound::Cancelled,
            unit = rx.recv() => match unit {
                Some(unit) => Inbound::Unit(unit),
                None => Inbound::Closed,
            },
        }
    }

    /// Run one capability call under the timeout, converting errors, timeouts
    /// and panics into `StageOutcome::Failed`. `None` means cancelled.
    async fn call<F>(&self, fut: F) -> Option<StageOutcome>
    where
        F: Future<Output = Result<String>>,
    {
        let bounded = tokio::time::timeout(self.timeout, AssertUnwindSafe(fut).catch_unwind());
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => None,
            res = bounded => Some(match res {
                Ok(Ok(result)) => StageOutcome::from(result),
                Ok(Err(_panic)) => StageOutcome::Failed("capability panicked".into()),
                Err(_elapsed) => StageOutcome::Failed(format!(
                    "timed out after {} ms",
                    self.timeout.as_millis()
                )),
            }),
        }
    }

    /// Non-blocking hand-off to the next queue. Nothing is enqueued once
    /// cancellation has been requested.
    fn forward<T>(
        &self,
        tx: &mut StageSender<T>,
        item: T,
        queue: &'static str,
        accepted: &AtomicUsize,
        dropped: &AtomicUsize,
    ) {
        if self.cancel.is_cancelled() {
            return;
        }
        match tx.try_push(item) {
            Ok(()) => {
                accepted.fetch_add(1, Ordering::Relaxed);
            }
            Err(_) => {
                dropped.fetch_add(1, Ordering::Relaxed);
                warn!(queue, capacity = tx.capacity(), "queue full; dropping newest item");
            }
        }
    }
}

async fn segment_stage(
    mut pcm_rx: StageReceiver<Pcm16Buffer>,
    mut chunk_tx: StageSender<VoicedChunk>,
    mut assembler: FrameAssembler,
    mut segmenter: VoiceActivitySegmenter,
    env: StageEnv,
) {
    info!(stage = "segment", "stage started");
    let diag = Arc::clone(&env.diagnostics);

    loop {
        match env.next(&mut pcm_rx).await {
            Inbound::Unit(pcm) => {
                for frame in assembler.push(pcm) {
                    diag.vad_frames.fetch_add(1, Ordering::Relaxed);
                    if let Some(chunk) = segmenter.push(frame) {
                        env.forward(
                            &mut chunk_tx,
                            chunk,
                            "voiced-chunk",
                            &diag.chunks_emitted,
                            &diag.chunks_dropped,
                        );
                    }
                }
            }
            Inbound::Closed => {
                if assembler.pending_bytes() > 0 {
                    debug!(
                        bytes = assembler.pending_bytes(),
                        "discarding partial VAD frame at end of input"
                    );
                    assembler.clear();
                }
                if let Some(chunk) = segmenter.finish() {
                    debug!(frames = chunk.frame_count, "flushing final voiced chunk");
                    env.forward(
                        &mut chunk_tx,
                        chunk,
                        "voiced-chunk",
                        &diag.chunks_emitted,
                        &diag.chunks_dropped,
                    );
                }
                break;
            }
            Inbound::Cancelled => break,
        }
    }

    info!(stage = "segment", "stage stopped");
}

async fn recognize_stage(
    mut chunk_rx: StageReceiver<VoicedChunk>,
    mut text_tx: StageSender<TranscriptText>,
    recognizer: Arc<dyn crate::inference::SpeechRecognizer>,
    source_lang: String,
    env: StageEnv,
) {
    info!(stage = "recognize", "stage started");
    let diag = Arc::clone(&env.diagnostics);

    while let Inbound::Unit(chunk) = env.next(&mut chunk_rx).await {
        let Some(outcome) = env
            .call(recognizer.transcribe(&chunk, &source_lang))
            .await
        else {
            break;
        };
        match outcome {
            StageOutcome::Produced(text) => {
                debug!(
                    frames = chunk.frame_count,
                    end_of_utterance = chunk.end_of_utterance,
                    chars = text.len(),
                    "transcribed chunk"
                );
                let unit = TranscriptText {
                    text,
                    source_lang: source_lang.clone(),
                };
                env.forward(
                    &mut text_tx,
                    unit,
                    "text",
                    &diag.transcripts,
                    &diag.texts_dropped,
                );
            }
            StageOutcome::Empty => {
                diag.recognition_empty.fetch_add(1, Ordering::Relaxed);
            }
            StageOutcome::Failed(reason) => {
                diag.recognition_failures.fetch_add(1, Ordering::Relaxed);
                warn!(%reason, "recognition failed; dropping chunk");
            }
        }
    }

    info!(stage = "recognize", "stage stopped");
}

async fn translate_stage(
    mut text_rx: StageReceiver<TranscriptText>,
    mut translated_tx: StageSender<TranslatedText>,
    translator: Arc<dyn crate::inference::MachineTranslator>,
    target_lang: String,
    env: StageEnv,
) {
    info!(stage = "translate", "stage started");
    let diag = Arc::clone(&env.diagnostics);

    while let Inbound::Unit(unit) = env.next(&mut text_rx).await {
        let Some(outcome) = env
            .call(translator.translate(&unit.text, &unit.source_lang, &target_lang))
            .await
        else {
            break;
        };
        match outcome {
            StageOutcome::Produced(text) => {
                let out = TranslatedText {
                    text,
                    source_lang: unit.source_lang,
                    target_lang: target_lang.clone(),
                };
                env.forward(
                    &mut translated_tx,
                    out,
                    "translated-text",
                    &diag.translations,
                    &diag.translated_dropped,
                );
            }
            StageOutcome::Empty => {
                diag.translation_failures.fetch_add(1, Ordering::Relaxed);
                warn!("translation returned empty text; dropping");
            }
            StageOutcome::Failed(reason) => {
                diag.translation_failures.fetch_add(1, Ordering::Relaxed);
                warn!(%reason, "translation failed; dropping text");
            }
        }
    }

    info!(stage = "translate", "stage stopped");
}

async fn synthesize_stage(
    mut translated_rx: StageReceiver<TranslatedText>,
    mut framer: OutputFramer,
    synthesizer: Arc<dyn crate::inference::SpeechSynthesizer>,
    voice: String,
    env: StageEnv,
) {
    info!(stage = "synthesize", "stage started");
    let diag = Arc::clone(&env.diagnostics);

    'stage: while let Inbound::Unit(unit) = env.next(&mut translated_rx).await {
        diag.syntheses.fetch_add(1, Ordering::Relaxed);
        let started = std::panic::catch_unwind(AssertUnwindSafe(|| {
            synthesizer.synthesize(&unit.text, &voice)
        }));
        let Ok(mut pcm_stream) = started else {
            diag.synthesis_failures.fetch_add(1, Ordering::Relaxed);
            warn!("synthesizer panicked; dropping utterance");
            framer.end_utterance();
            continue;
        };
        let mut frames = 0usize;

        loop {
            let next = tokio::select! {
                biased;
                _ = env.cancel.cancelled() => break 'stage,
                next = tokio::time::timeout(
                    env.timeout,
                    AssertUnwindSafe(pcm_stream.next()).catch_unwind(),
                ) => next,
            };
            match next {
                Ok(Ok(Some(Ok(pcm)))) => {
                    if env.cancel.is_cancelled() {
                        break 'stage;
                    }
                    frames += framer.push_pcm(&pcm);
                }
                Ok(Ok(Some(Err(e)))) => {
                    diag.synthesis_failures.fetch_add(1, Ordering::Relaxed);
                    warn!(error = %e, "synthesis failed; dropping rest of utterance");
                    break;
                }
                Ok(Ok(None)) => break,
                Ok(Err(_panic)) => {
                    diag.synthesis_failures.fetch_add(1, Ordering::Relaxed);
                    warn!("synthesis stream panicked; dropping rest of utterance");
                    break;
                }
                Err(_elapsed) => {
                    diag.synthesis_failures.fetch_add(1, Ordering::Relaxed);
                    warn!(
                        timeout_ms = env.timeout.as_millis() as u64,
                        "synthesis stalled; dropping rest of utterance"
                    );
                    break;
                }
            }
        }

        framer.end_utterance();
        debug!(frames, target_lang = %unit.target_lang, "utterance synthesized");
    }

    info!(stage = "synthesize", "stage stopped");
}
