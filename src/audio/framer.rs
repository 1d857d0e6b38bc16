use super::{AudioFrame, FRAME_SIZE_SAMPLES};
use tracing::trace;

/// Turns device callbacks of arbitrary size into fixed-size mono [`AudioFrame`]s.
///
/// Interleaved multi-channel input is averaged to mono. Samples that do not
/// fill a whole frame are held until the next call to [`FrameAssembler::push`].
#[derive(Debug)]
pub struct FrameAssembler {
    input_channels: u16,
    frame_size: usize,
    pending_mono: Vec<f32>,
}

impl FrameAssembler {
    pub fn new(input_channels: u16) -> Self {
        Self::with_frame_size(input_channels, FRAME_SIZE_SAMPLES)
    }

    pub fn with_frame_size(input_channels: u16, frame_size: usize) -> Self {
        Self {
            input_channels: input_channels.max(1),
            frame_size: frame_size.max(1),
            pending_mono: Vec::with_capacity(frame_size.max(1) * 2),
        }
    }

    pub fn input_channels(&self) -> u16 {
        self.input_channels
    }

    pub fn pending_len(&self) -> usize {
        self.pending_mono.len()
    }

    /// Mixes `interleaved` down to mono without framing it.
    pub fn downmix(&self, interleaved: &[f32]) -> Vec<f32> {
        let channels = self.input_channels as usize;
        if channels == 1 {
            return interleaved.to_vec();
        }
        interleaved
            .chunks_exact(channels)
            .map(|frame| frame.iter().sum::<f32>() / channels as f32)
            .collect()
    }

    /// Appends an interleaved callback buffer and returns every completed frame, oldest first.
    pub fn push(&mut self, interleaved: &[f32]) -> Vec<AudioFrame> {
        let mono = self.downmix(interleaved);
        self.push_mono(&mono)
    }

    /// Appends samples that are already mono.
    pub fn push_mono(&mut self, mono: &[f32]) -> Vec<AudioFrame> {
        self.pending_mono.extend_from_slice(mono);
        let mut frames = Vec::with_capacity(self.pending_mono.len() / self.frame_size);
        while self.pending_mono.len() >= self.frame_size {
            let frame: Vec<f32> = self.pending_mono.drain(..self.frame_size).collect();
            frames.push(AudioFrame::new(frame));
        }
        if !frames.is_empty() {
            trace!(
                "[FrameAssembler] Emitted {} frame(s); {} sample(s) pending.",
                frames.len(),
                self.pending_mono.len()
            );
        }
        frames
    }

    /// Discards any partial frame.
    pub fn reset(&mut self) {
        self.pending_mono.clear();
    }
}
