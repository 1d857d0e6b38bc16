use super::pcm::decode_pcm16_le;
use super::{DecodedWaveform, SESSION_CHANNELS, SESSION_SAMPLE_RATE_HZ};
use crate::error::RealtimeError;
use hound::{SampleFormat, WavReader};
use std::io::Cursor;
use std::str::FromStr;

/// Turns a complete reply utterance into a playable waveform.
pub trait WaveformDecoder: Send {
    fn decode(&self, bytes: &[u8]) -> Result<DecodedWaveform, RealtimeError>;
}

/// Headerless 16-bit little-endian PCM, the realtime service's `pcm16` output format.
#[derive(Debug, Clone, Copy)]
pub struct Pcm16Decoder {
    pub sample_rate: u32,
    pub channels: u16,
}

impl Default for Pcm16Decoder {
    fn default() -> Self {
        Self {
            sample_rate: SESSION_SAMPLE_RATE_HZ,
            channels: SESSION_CHANNELS,
        }
    }
}

impl WaveformDecoder for Pcm16Decoder {
    fn decode(&self, bytes: &[u8]) -> Result<DecodedWaveform, RealtimeError> {
        let bytes_per_frame = 2 * self.channels.max(1) as usize;
        if bytes.len() % bytes_per_frame != 0 {
            return Err(RealtimeError::Decode(format!(
                "PCM16 payload of {} bytes is not a whole number of {}-channel frames",
                bytes.len(),
                self.channels
            )));
        }
        Ok(DecodedWaveform {
            samples: decode_pcm16_le(bytes)?,
            sample_rate: self.sample_rate,
            channels: self.channels,
        })
    }
}

/// RIFF/WAVE container with integer or float samples.
#[derive(Debug, Clone, Copy, Default)]
pub struct WavDecoder;

impl WaveformDecoder for WavDecoder {
    fn decode(&self, bytes: &[u8]) -> Result<DecodedWaveform, RealtimeError> {
        let reader = WavReader::new(Cursor::new(bytes))
            .map_err(|e| RealtimeError::Decode(format!("Invalid WAV header: {}", e)))?;
        let spec = reader.spec();

        let samples: Vec<f32> = match spec.sample_format {
            SampleFormat::Float => reader
                .into_samples::<f32>()
                .collect::<Result<Vec<_>, _>>()
                .map_err(|e| RealtimeError::Decode(format!("Truncated WAV data: {}", e)))?,
            SampleFormat::Int => {
                let scale = (1i64 << (spec.bits_per_sample.saturating_sub(1))) as f32;
                reader
                    .into_samples::<i32>()
                    .map(|s| s.map(|v| v as f32 / scale))
                    .collect::<Result<Vec<_>, _>>()
                    .map_err(|e| RealtimeError::Decode(format!("Truncated WAV data: {}", e)))?
            }
        };

        Ok(DecodedWaveform {
            samples,
            sample_rate: spec.sample_rate,
            channels: spec.channels,
        })
    }
}

/// Encoding of reply audio delivered by the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReplyFormat {
    #[default]
    Pcm16,
    Wav,
}

impl ReplyFormat {
    pub fn decoder(self) -> Box<dyn WaveformDecoder> {
        match self {
            ReplyFormat::Pcm16 => Box::new(Pcm16Decoder::default()),
            ReplyFormat::Wav => Box::new(WavDecoder),
        }
    }
}

impl FromStr for ReplyFormat {
    type Err = RealtimeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pcm16" | "pcm" => Ok(ReplyFormat::Pcm16),
            "wav" => Ok(ReplyFormat::Wav),
            other => Err(RealtimeError::Config(format!(
                "Unknown reply format '{}', expected 'pcm16' or 'wav'",
                other
            ))),
        }
    }
}
