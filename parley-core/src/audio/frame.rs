//! Fixed-duration framing of canonical PCM.

use super::{FixedFrame, FrameDuration, Pcm16Buffer};
use crate::error::Result;

/// Slices [`Pcm16Buffer`]s into [`FixedFrame`]s of one configured duration.
#[derive(Debug, Clone, Copy)]
pub struct FrameSplitter {
    duration: FrameDuration,
}

impl FrameSplitter {
    /// # Errors
    /// `ParleyError::InvalidFrameDuration` unless `frame_ms` is 10, 20 or 30.
    pub fn new(frame_ms: u32) -> Result<Self> {
        Ok(Self {
            duration: FrameDuration::try_from(frame_ms)?,
        })
    }

    pub fn duration(&self) -> FrameDuration {
        self.duration
    }

    /// Split `buffer` into whole frames. A trailing remainder shorter than one
    /// frame is dropped.
    pub fn split<'a>(&self, buffer: &'a Pcm16Buffer) -> impl Iterator<Item = FixedFrame> + 'a {
        let duration = self.duration;
        buffer
            .as_bytes()
            .chunks_exact(duration.byte_len())
            .filter_map(move |bytes| FixedFrame::new(bytes.to_vec(), duration).ok())
    }
}

/// Rolling framer for a stream of PCM buffers of any length.
///
/// Bytes that do not fill a whole frame are held back and prefixed to the
/// next buffer, so transports delivering frames shorter than the VAD frame
/// (or resampled buffers of uneven length) lose no audio.
#[derive(Debug)]
pub struct FrameAssembler {
    splitter: FrameSplitter,
    pending: Vec<u8>,
}

impl FrameAssembler {
    pub fn new(splitter: FrameSplitter) -> Self {
        Self {
            splitter,
            pending: Vec::with_capacity(splitter.duration().byte_len() * 2),
        }
    }

    /// Append `pcm` and return every frame that is now complete, in order.
    pub fn push(&mut self, pcm: Pcm16Buffer) -> Vec<FixedFrame> {
        if self.pending.is_empty() {
            self.pending = pcm.into_bytes();
        } else {
            self.pending.extend_from_slice(pcm.as_bytes());
        }

        let frame_len = self.splitter.duration().byte_len();
        let whole = self.pending.len() / frame_len * frame_len;
        if whole == 0 {
            return Vec::new();
        }
        let ready = Pcm16Buffer::from_bytes(self.pending.drain(..whole).collect());
        self.splitter.split(&ready).collect()
    }

    /// Bytes held back waiting for the rest of a frame.
    pub fn pending_bytes(&self) -> usize {
        self.pending.len()
    }

    /// Discard the held-back partial frame.
    pub fn clear(&mut self) {
        self.pending.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ParleyError;

    #[test]
    fn rejects_unsupported_durations() {
        assert!(matches!(
            FrameSplitter::new(25),
            Err(ParleyError::InvalidFrameDuration(25))
        ));
        assert!(FrameSplitter::new(10).is_ok());
        assert!(FrameSplitter::new(30).is_ok());
    }

    #[test]
    fn drops_trailing_partial_frame() {
        let splitter = FrameSplitter::new(20).unwrap();
        // 2.5 frames of 320 samples each
        let buffer = Pcm16Buffer::from_samples(&vec![7i16; 800]);
        let frames: Vec<_> = splitter.split(&buffer).collect();
        assert_eq!(frames.len(), 2);
        assert!(frames.iter().all(|f| f.as_bytes().len() == 640));
    }

    #[test]
    fn short_buffer_yields_nothing() {
        let splitter = FrameSplitter::new(30).unwrap();
        let buffer = Pcm16Buffer::from_samples(&vec![1i16; 479]);
        assert_eq!(splitter.split(&buffer).count(), 0);
    }

    #[test]
    fn preserves_sample_order_across_frames() {
        let splitter = FrameSplitter::new(10).unwrap();
        let samples: Vec<i16> = (0..320).collect();
        let buffer = Pcm16Buffer::from_samples(&samples);
        let frames: Vec<_> = splitter.split(&buffer).collect();
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].samples().next(), Some(0));
        assert_eq!(frames[1].samples().next(), Some(160));
        assert_eq!(frames[1].samples().last(), Some(319));
    }

    #[test]
    fn split_is_restartable_per_call() {
        let splitter = FrameSplitter::new(20).unwrap();
        let buffer = Pcm16Buffer::from_samples(&vec![3i16; 640]);
        assert_eq!(splitter.split(&buffer).count(), 2);
        assert_eq!(splitter.split(&buffer).count(), 2);
    }

    #[test]
    fn assembler_joins_short_buffers_into_frames() {
        let mut assembler = FrameAssembler::new(FrameSplitter::new(20).unwrap());
        // 10 ms buffers at 16 kHz: every second one completes a frame.
        let first = assembler.push(Pcm16Buffer::from_samples(&vec![1i16; 160]));
        assert!(first.is_empty());
        assert_eq!(assembler.pending_bytes(), 320);

        let second = assembler.push(Pcm16Buffer::from_samples(&vec![2i16; 160]));
        assert_eq!(second.len(), 1);
        let samples: Vec<i16> = second[0].samples().collect();
        assert_eq!(samples[159], 1);
        assert_eq!(samples[160], 2);
        assert_eq!(assembler.pending_bytes(), 0);
    }

    #[test]
    fn assembler_carries_uneven_remainders() {
        let mut assembler = FrameAssembler::new(FrameSplitter::new(20).unwrap());
        let mut frames = 0;
        // 50 buffers of 441 samples: 22 050 samples, 68 whole frames.
        for _ in 0..50 {
            frames += assembler.push(Pcm16Buffer::from_samples(&vec![5i16; 441])).len();
        }
        assert_eq!(frames, 22_050 / 320);
        assert_eq!(assembler.pending_bytes(), (22_050 % 320) * 2);
        assembler.clear();
        assert_eq!(assembler.pending_bytes(), 0);
    }
}
