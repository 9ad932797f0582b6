//! `TranslationSession`: lifecycle controller for one translation stream.
//!
//! ## Lifecycle
//!
//! ```text
//! TranslationSession::new()      → status = Idle, languages/voice still mutable
//!     └─► start()                → four stage tasks spawned, status = Running
//!         ├─► finish_input()     → pcm queue closed, stages drain, status = Draining
//!         └─► stop().await       → token cancelled, tasks joined, status = Stopped
//! ```
//!
//! A session runs once. `start()` after `stop()` fails with
//! `ParleyError::SessionClosed`; build a new session instead.
//!
//! ## Threading
//!
//! `TranslationSession` is `Send + Sync`; wrap it in an `Arc` and hand clones
//! to the inbound transport callback and the outbound sender task. The inbound
//! path (`on_audio_frame`) never awaits and never blocks on the pipeline.

pub mod config;
pub mod output;
pub mod pipeline;

pub use config::SessionConfig;
pub use pipeline::{DiagnosticsSnapshot, PipelineDiagnostics};

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, warn};

use crate::audio::resample::FrameResampler;
use crate::audio::{AudioFrame, FixedFrame, Pcm16Buffer};
use crate::buffering::{stage_queue, StageSender};
use crate::error::{ParleyError, Result};
use crate::events::{SessionStatus, SessionStatusEvent};
use crate::inference::Capabilities;
use crate::vad::VoiceActivityDetector;

use output::OutputTrack;
use pipeline::PipelineContext;

/// Status events buffered for slow subscribers.
const STATUS_BROADCAST_CAP: usize = 32;

static NEXT_SESSION_ID: AtomicU64 = AtomicU64::new(1);

/// Inbound half: the resampler and the producer side of the pcm queue.
struct Ingress {
    resampler: FrameResampler,
    pcm_tx: StageSender<Pcm16Buffer>,
}

/// One live translation stream.
///
/// All methods take `&self`; state lives behind interior mutability.
pub struct TranslationSession {
    id: u64,
    config: Mutex<SessionConfig>,
    capabilities: Capabilities,
    /// Moved into the segment stage by `start()`.
    detector: Mutex<Option<Box<dyn VoiceActivityDetector>>>,
    status: Mutex<SessionStatus>,
    /// Set by `stop()` before anything else; checked on the inbound path.
    closing: AtomicBool,
    cancel: CancellationToken,
    /// `Some` only while running and before `finish_input()`.
    ingress: Mutex<Option<Ingress>>,
    /// Output producer, held until `start()` hands it to the synthesize stage.
    output_tx: Mutex<Option<StageSender<FixedFrame>>>,
    output: OutputTrack,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    status_tx: broadcast::Sender<SessionStatusEvent>,
    diagnostics: Arc<PipelineDiagnostics>,
}

impl TranslationSession {
    /// Create an idle session. Nothing is spawned until [`start`](Self::start).
    pub fn new(
        config: SessionConfig,
        detector: Box<dyn VoiceActivityDetector>,
        capabilities: Capabilities,
    ) -> Self {
        let cancel = CancellationToken::new();
        let (output_tx, output_rx) = stage_queue(config.output_queue_capacity.max(1));
        let (status_tx, _) = broadcast::channel(STATUS_BROADCAST_CAP);

        Self {
            id: NEXT_SESSION_ID.fetch_add(1, Ordering::Relaxed),
            config: Mutex::new(config),
            capabilities,
            detector: Mutex::new(Some(detector)),
            status: Mutex::new(SessionStatus::Idle),
            closing: AtomicBool::new(false),
            output: OutputTrack::new(output_rx, cancel.clone()),
            cancel,
            ingress: Mutex::new(None),
            output_tx: Mutex::new(Some(output_tx)),
            tasks: Mutex::new(Vec::new()),
            status_tx,
            diagnostics: Arc::new(PipelineDiagnostics::default()),
        }
    }

    /// Process-unique id, also recorded on the session's tracing span.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Copy of the current configuration.
    pub fn config(&self) -> SessionConfig {
        self.config.lock().clone()
    }

    /// Change the language pair.
    ///
    /// # Errors
    /// `ParleyError::ConfigLocked` once `start()` has been called.
    pub fn set_languages(&self, source_lang: &str, target_lang: &str) -> Result<()> {
        self.ensure_idle()?;
        let mut config = self.config.lock();
        config.source_lang = source_lang.to_string();
        config.target_lang = target_lang.to_string();
        debug!(session = self.id, source_lang, target_lang, "languages updated");
        Ok(())
    }

    /// Change the synthesis voice.
    ///
    /// # Errors
    /// `ParleyError::ConfigLocked` once `start()` has been called.
    pub fn set_voice(&self, voice: &str) -> Result<()> {
        self.ensure_idle()?;
        self.config.lock().voice = voice.to_string();
        debug!(session = self.id, voice, "voice updated");
        Ok(())
    }

    /// Validate the configuration and spawn the four stage tasks.
    ///
    /// Must be called from within a Tokio runtime.
    ///
    /// # Errors
    /// - `ParleyError::AlreadyRunning` if already started.
    /// - `ParleyError::SessionClosed` after `stop()` or a failed start.
    /// - Config errors from [`SessionConfig::validate`]; the session then
    ///   moves to `SessionStatus::Error`.
    pub fn start(&self) -> Result<()> {
        let mut status = self.status.lock();
        match *status {
            SessionStatus::Idle => {}
            SessionStatus::Running | SessionStatus::Draining => {
                return Err(ParleyError::AlreadyRunning)
            }
            SessionStatus::Stopped | SessionStatus::Error => {
                return Err(ParleyError::SessionClosed)
            }
        }
        if self.closing.load(Ordering::SeqCst) {
            return Err(ParleyError::SessionClosed);
        }

        let config = self.config.lock().clone();
        match self.launch(config) {
            Ok(()) => {
                *status = SessionStatus::Running;
                drop(status);
                self.emit(SessionStatus::Running, None);
                info!(session = self.id, "session started");
                Ok(())
            }
            Err(e) => {
                *status = SessionStatus::Error;
                drop(status);
                error!(session = self.id, error = %e, "session failed to start");
                self.emit(SessionStatus::Error, Some(e.to_string()));
                Err(e)
            }
        }
    }

    fn launch(&self, config: SessionConfig) -> Result<()> {
        config.validate()?;

        let detector = self
            .detector
            .lock()
            .take()
            .ok_or(ParleyError::SessionClosed)?;
        let output_tx = self
            .output_tx
            .lock()
            .take()
            .ok_or(ParleyError::SessionClosed)?;
        let (pcm_tx, pcm_rx) = stage_queue(config.pcm_queue_capacity);

        let handles = pipeline::spawn(PipelineContext {
            config,
            detector,
            capabilities: self.capabilities.clone(),
            pcm_rx,
            output_tx,
            cancel: self.cancel.clone(),
            diagnostics: Arc::clone(&self.diagnostics),
            span: info_span!("session", id = self.id),
        })?;

        *self.tasks.lock() = handles;
        *self.ingress.lock() = Some(Ingress {
            resampler: FrameResampler::new(),
            pcm_tx,
        });
        Ok(())
    }

    /// Stop the session and wait for every stage task to finish.
    ///
    /// Idempotent, and safe on a session that never started. Buffered output
    /// is discarded; `next_output_frame` returns `None` afterwards.
    pub async fn stop(&self) {
        // Taking the status lock waits out a `start()` in progress, so its
        // handles are in `tasks` before they are joined below.
        let already_closing = {
            let _status = self.status.lock();
            self.closing.swap(true, Ordering::SeqCst)
        };
        if already_closing {
            // Second caller still waits for tasks the first one may be joining.
            self.join_tasks().await;
            return;
        }
        info!(session = self.id, "session stop requested");

        self.cancel.cancel();
        self.ingress.lock().take();
        self.output_tx.lock().take();
        self.join_tasks().await;

        let previous = std::mem::replace(&mut *self.status.lock(), SessionStatus::Stopped);
        if previous != SessionStatus::Stopped {
            self.emit(SessionStatus::Stopped, None);
        }
        info!(session = self.id, "session stopped");
    }

    async fn join_tasks(&self) {
        let handles: Vec<JoinHandle<()>> = std::mem::take(&mut *self.tasks.lock());
        for handle in handles {
            if let Err(e) = handle.await {
                if e.is_panic() {
                    error!(session = self.id, error = %e, "stage task panicked");
                } else {
                    warn!(session = self.id, error = %e, "stage task did not complete");
                }
            }
        }
    }

    /// Inbound frame from the transport.
    ///
    /// Discarded before `start()`, after `finish_input()`, and while closing.
    /// Malformed frames and frames arriving at a full pcm queue are dropped
    /// and counted. Never awaits.
    pub fn on_audio_frame(&self, frame: &AudioFrame) {
        if self.closing.load(Ordering::Acquire) {
            return;
        }
        let mut guard = self.ingress.lock();
        let Some(ingress) = guard.as_mut() else {
            return;
        };
        self.diagnostics.frames_in.fetch_add(1, Ordering::Relaxed);

        let pcm = match ingress.resampler.try_normalize(frame) {
            Ok(Some(pcm)) => pcm,
            Ok(None) => return,
            Err(e) => {
                self.diagnostics
                    .frames_malformed
                    .fetch_add(1, Ordering::Relaxed);
                warn!(session = self.id, error = %e, "dropping inbound frame");
                return;
            }
        };
        if ingress.pcm_tx.try_push(pcm).is_err() {
            self.diagnostics.pcm_dropped.fetch_add(1, Ordering::Relaxed);
            warn!(
                session = self.id,
                capacity = ingress.pcm_tx.capacity(),
                "pcm queue full; dropping inbound audio"
            );
        }
    }

    /// End of the inbound stream. The pipeline flushes what it holds, and
    /// `next_output_frame` returns `None` once everything has drained.
    pub fn finish_input(&self) {
        if self.ingress.lock().take().is_none() {
            return;
        }
        let mut status = self.status.lock();
        if *status == SessionStatus::Running {
            *status = SessionStatus::Draining;
            drop(status);
            self.emit(SessionStatus::Draining, Some("input finished".into()));
            info!(session = self.id, "inbound stream finished; draining");
        }
    }

    /// Wait for the next synthesized output frame.
    ///
    /// `None` once the session is stopped, or after `finish_input()` once the
    /// pipeline has drained. Before `start()` this waits for frames to appear.
    pub async fn next_output_frame(&self) -> Option<FixedFrame> {
        self.output.next_frame().await
    }

    /// Non-blocking variant of [`next_output_frame`](Self::next_output_frame).
    pub fn try_next_output_frame(&self) -> Option<FixedFrame> {
        self.output.try_next_frame()
    }

    /// Current lifecycle status.
    pub fn status(&self) -> SessionStatus {
        *self.status.lock()
    }

    /// Subscribe to status change events.
    pub fn subscribe_status(&self) -> broadcast::Receiver<SessionStatusEvent> {
        self.status_tx.subscribe()
    }

    /// Snapshot of pipeline counters.
    pub fn diagnostics(&self) -> DiagnosticsSnapshot {
        self.diagnostics.snapshot()
    }

    // ── Internal helpers ─────────────────────────────────────────────────────

    fn ensure_idle(&self) -> Result<()> {
        if *self.status.lock() == SessionStatus::Idle && !self.closing.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(ParleyError::ConfigLocked)
        }
    }

    fn emit(&self, status: SessionStatus, detail: Option<String>) {
        // No subscribers is fine.
        let _ = self.status_tx.send(SessionStatusEvent { status, detail });
    }
}

impl Drop for TranslationSession {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

impl std::fmt::Debug for TranslationSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TranslationSession")
            .field("id", &self.id)
            .field("status", &self.status())
            .finish_non_exhaustive()
    }
}
