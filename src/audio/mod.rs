pub mod capture;
pub mod decoder;
pub mod framer;
pub mod pcm;
pub mod playback;
pub mod utterance;

#[cfg(feature = "audio-resampling")]
pub(crate) mod resample;

use std::time::Duration;

pub use capture::{CaptureDevice, FrameSink};
pub use decoder::{Pcm16Decoder, ReplyFormat, WavDecoder, WaveformDecoder};
pub use framer::FrameAssembler;
pub use playback::{AudioSink, PlaybackQueue, PlaybackScheduler, PlaybackStats};
pub use utterance::{BufferState, UtteranceBuffer};

/// Sample rate (24kHz) of audio exchanged with the realtime session, both directions.
pub const SESSION_SAMPLE_RATE_HZ: u32 = 24000;
/// Number of audio channels (mono) exchanged with the realtime session.
pub const SESSION_CHANNELS: u16 = 1;
/// Samples per captured frame; one frame is sent per capture tick (~170ms at 24kHz).
pub const FRAME_SIZE_SAMPLES: usize = 4096;

fn frames_to_duration(frames: usize, sample_rate: u32) -> Duration {
    Duration::from_nanos((frames as u64 * 1_000_000_000) / sample_rate as u64)
}

/// One capture tick of normalized mono samples at [`SESSION_SAMPLE_RATE_HZ`].
#[derive(Debug, Clone, PartialEq)]
pub struct AudioFrame {
    samples: Vec<f32>,
}

impl AudioFrame {
    pub fn new(samples: Vec<f32>) -> Self {
        Self { samples }
    }

    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn duration(&self) -> Duration {
        frames_to_duration(self.samples.len(), SESSION_SAMPLE_RATE_HZ)
    }
}

/// 16-bit signed samples ready for transmission, one per [`AudioFrame`] sample.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedFrame {
    samples: Vec<i16>,
}

impl EncodedFrame {
    pub fn new(samples: Vec<i16>) -> Self {
        Self { samples }
    }

    pub fn samples(&self) -> &[i16] {
        &self.samples
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Little-endian byte layout used on the wire.
    pub fn to_le_bytes(&self) -> Vec<u8> {
        let mut byte_data = Vec::with_capacity(self.samples.len() * 2);
        for sample_val in &self.samples {
            byte_data.extend_from_slice(&sample_val.to_le_bytes());
        }
        byte_data
    }
}

/// Decoded reply audio. Samples are interleaved when `channels > 1`.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedWaveform {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
    pub channels: u16,
}

impl DecodedWaveform {
    pub fn frames(&self) -> usize {
        if self.channels == 0 {
            return 0;
        }
        self.samples.len() / self.channels as usize
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn duration(&self) -> Duration {
        if self.sample_rate == 0 {
            return Duration::ZERO;
        }
        frames_to_duration(self.frames(), self.sample_rate)
    }
}
