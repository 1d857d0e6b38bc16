use super::{AudioFrame, EncodedFrame};
use crate::error::RealtimeError;

/// Scale between normalized float samples and 16-bit PCM.
pub const PCM_SCALE: f32 = i16::MAX as f32;

/// Encodes one sample as `round(clamp(x * 32767, -32768, 32767))`.
///
/// Out-of-range input is clamped rather than rejected; NaN encodes to 0.
#[inline]
pub fn encode_sample(sample: f32) -> i16 {
    (sample * PCM_SCALE)
        .clamp(i16::MIN as f32, i16::MAX as f32)
        .round() as i16
}

pub fn encode_samples(samples: &[f32]) -> EncodedFrame {
    EncodedFrame::new(samples.iter().map(|&s| encode_sample(s)).collect())
}

pub fn encode_frame(frame: &AudioFrame) -> EncodedFrame {
    encode_samples(frame.samples())
}

#[inline]
pub fn decode_sample(sample: i16) -> f32 {
    sample as f32 / PCM_SCALE
}

/// Decodes 16-bit little-endian PCM bytes back into normalized floats.
pub fn decode_pcm16_le(bytes: &[u8]) -> Result<Vec<f32>, RealtimeError> {
    if bytes.len() % 2 != 0 {
        return Err(RealtimeError::Decode(format!(
            "PCM16 payload has odd length {} (incomplete sample)",
            bytes.len()
        )));
    }
    Ok(bytes
        .chunks_exact(2)
        .map(|pair| decode_sample(i16::from_le_bytes([pair[0], pair[1]])))
        .collect())
}
