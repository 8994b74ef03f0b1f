//! Re-chunking of synthesized audio into fixed-size frames.

use bytes::{Bytes, BytesMut};

/// Accumulates arbitrarily sized network chunks and hands out frames of
/// exactly `frame_bytes`; whatever is left at the end comes out of
/// [`FrameBuffer::finish`].
#[derive(Debug)]
pub struct FrameBuffer {
    frame_bytes: usize,
    pending: BytesMut,
}

impl FrameBuffer {
    pub fn new(frame_bytes: usize) -> Self {
        let frame_bytes = frame_bytes.max(1);
        Self {
            frame_bytes,
            pending: BytesMut::with_capacity(frame_bytes),
        }
    }

    /// Appends `chunk` and returns every frame that is now complete.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<Bytes> {
        self.pending.extend_from_slice(chunk);
        let mut frames = Vec::new();
        while self.pending.len() >= self.frame_bytes {
            frames.push(self.pending.split_to(self.frame_bytes).freeze());
        }
        frames
    }

    /// Returns the trailing partial frame, if any.
    pub fn finish(self) -> Option<Bytes> {
        if self.pending.is_empty() {
            None
        } else {
            Some(self.pending.freeze())
        }
    }
}

/// Splits a complete buffer into `frame_bytes`-sized frames without copying.
pub fn split_frames(audio: &Bytes, frame_bytes: usize) -> Vec<Bytes> {
    let frame_bytes = frame_bytes.max(1);
    (0..audio.len())
        .step_by(frame_bytes)
        .map(|start| audio.slice(start..(start + frame_bytes).min(audio.len())))
        .collect()
}
