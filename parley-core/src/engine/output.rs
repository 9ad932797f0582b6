//! Output side: re-framing synthesized PCM and the pull interface for the
//! transport.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use tokio::sync::Mutex as AsyncMutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::pipeline::PipelineDiagnostics;
use crate::audio::{FixedFrame, FrameDuration};
use crate::buffering::{StageReceiver, StageSender};

/// Cuts arbitrary-length synthesized PCM into fixed output frames.
///
/// Bytes left over after one chunk are carried into the next chunk of the same
/// utterance; [`end_utterance`](Self::end_utterance) discards whatever is left
/// at the end. Frames are never padded.
pub struct OutputFramer {
    duration: FrameDuration,
    pending: Vec<u8>,
    sink: StageSender<FixedFrame>,
    diagnostics: Arc<PipelineDiagnostics>,
}

impl OutputFramer {
    pub fn new(
        duration: FrameDuration,
        sink: StageSender<FixedFrame>,
        diagnostics: Arc<PipelineDiagnostics>,
    ) -> Self {
        Self {
            duration,
            pending: Vec::with_capacity(duration.byte_len() * 2),
            sink,
            diagnostics,
        }
    }

    /// Append synthesized bytes and queue every complete frame. Returns the
    /// number of frames accepted by the output queue.
    pub fn push_pcm(&mut self, pcm: &[u8]) -> usize {
        self.pending.extend_from_slice(pcm);
        let frame_len = self.duration.byte_len();
        let mut queued = 0;
        while self.pending.len() >= frame_len {
            let bytes: Vec<u8> = self.pending.drain(..frame_len).collect();
            let Ok(frame) = FixedFrame::new(bytes, self.duration) else {
                continue;
            };
            match self.sink.try_push(frame) {
                Ok(()) => {
                    queued += 1;
                    self.diagnostics.output_frames.fetch_add(1, Ordering::Relaxed);
                }
                Err(_) => {
                    self.diagnostics
                        .output_frames_dropped
                        .fetch_add(1, Ordering::Relaxed);
                    warn!("output queue full; dropping synthesized frame");
                }
            }
        }
        queued
    }

    /// Close the current utterance, discarding any partial frame. Returns the
    /// number of bytes discarded.
    pub fn end_utterance(&mut self) -> usize {
        let discarded = self.pending.len();
        if discarded > 0 {
            debug!(bytes = discarded, "discarding partial output frame");
        }
        self.pending.clear();
        discarded
    }

    pub fn pending_bytes(&self) -> usize {
        self.pending.len()
    }
}

/// Pull handle over the output queue.
///
/// The consumer half sits behind an async mutex so any transport task holding
/// a shared reference can await frames.
pub(crate) struct OutputTrack {
    frames: AsyncMutex<StageReceiver<FixedFrame>>,
    cancel: CancellationToken,
}

impl OutputTrack {
    pub(crate) fn new(frames: StageReceiver<FixedFrame>, cancel: CancellationToken) -> Self {
        Self {
            frames: AsyncMutex::new(frames),
            cancel,
        }
    }

    /// Wait for the next frame. `None` once the session is stopped, or once
    /// the pipeline has drained after end of input.
    pub(crate) async fn next_frame(&self) -> Option<FixedFrame> {
        let mut frames = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return None,
            guard = self.frames.lock() => guard,
        };
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => None,
            frame = frames.recv() => frame,
        }
    }

    pub(crate) fn try_next_frame(&self) -> Option<FixedFrame> {
        if self.cancel.is_cancelled() {
            return None;
        }
        self.frames.try_lock().ok()?.try_recv()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffering::stage_queue;

    fn framer(capacity: usize) -> (OutputFramer, StageReceiver<FixedFrame>, Arc<PipelineDiagnostics>) {
        let (tx, rx) = stage_queue(capacity);
        let diag = Arc::new(PipelineDiagnostics::default());
        (
            OutputFramer::new(FrameDuration::Ms20, tx, Arc::clone(&diag)),
            rx,
            diag,
        )
    }

    #[test]
    fn carries_remainder_across_chunks() {
        let (mut framer, mut rx, _) = framer(10);
        assert_eq!(framer.push_pcm(&[1u8; 500]), 0);
        assert_eq!(framer.pending_bytes(), 500);
        assert_eq!(framer.push_pcm(&[2u8; 500]), 1);
        assert_eq!(framer.pending_bytes(), 360);
        let frame = rx.try_recv().expect("one frame");
        assert_eq!(frame.as_bytes().len(), 640);
        assert_eq!(frame.as_bytes()[499], 1);
        assert_eq!(frame.as_bytes()[500], 2);
    }

    #[test]
    fn end_utterance_discards_tail_without_padding() {
        let (mut framer, mut rx, _) = framer(10);
        framer.push_pcm(&[0u8; 700]);
        assert_eq!(framer.end_utterance(), 60);
        assert_eq!(rx.try_recv().map(|f| f.as_bytes().len()), Some(640));
        assert!(rx.try_recv().is_none());
        assert_eq!(framer.pending_bytes(), 0);
    }

    #[test]
    fn full_output_queue_drops_and_counts() {
        let (mut framer, rx, diag) = framer(2);
        assert_eq!(framer.push_pcm(&[0u8; 640 * 5]), 2);
        assert_eq!(rx.len(), 2);
        let snap = diag.snapshot();
        assert_eq!(snap.output_frames, 2);
        assert_eq!(snap.output_frames_dropped, 3);
    }

    #[tokio::test]
    async fn track_returns_none_after_cancel() {
        let (mut tx, rx) = stage_queue(4);
        let cancel = CancellationToken::new();
        let track = OutputTrack::new(rx, cancel.clone());
        tx.try_push(FixedFrame::silent(FrameDuration::Ms20)).unwrap();
        assert!(track.next_frame().await.is_some());
        cancel.cancel();
        tx.try_push(FixedFrame::silent(FrameDuration::Ms20)).unwrap();
        assert!(track.next_frame().await.is_none());
        assert!(track.try_next_frame().is_none());
    }
}
