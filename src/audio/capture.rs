use super::{AudioFrame, FrameAssembler, SESSION_SAMPLE_RATE_HZ};
use crate::error::RealtimeError;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

#[cfg(feature = "audio-resampling")]
use super::resample::StreamResampler;

/// A microphone that delivers samples to a [`FrameSink`] from its own callback.
///
/// Implementations map a refused or unavailable microphone to
/// [`RealtimeError::PermissionDenied`].
pub trait CaptureDevice {
    /// Native sample rate and channel count the device will deliver.
    fn format(&self) -> Result<(u32, u16), RealtimeError>;

    /// Claims the device and starts feeding `sink`.
    fn acquire(&mut self, sink: FrameSink) -> Result<(), RealtimeError>;

    /// Stops the callback and releases the device and its tracks.
    fn release(&mut self);
}

/// Receiving side of the capture callback: reformats raw device buffers into
/// session frames and offers each one to the outbound streamer.
///
/// The frame channel holds at most one frame. A frame that arrives while the
/// previous one is still unconsumed is dropped, never queued.
pub struct FrameSink {
    frames_tx: mpsc::Sender<AudioFrame>,
    attached: Arc<AtomicBool>,
    assembler: FrameAssembler,
    dropped: Arc<AtomicU64>,
    #[cfg(feature = "audio-resampling")]
    resampler: Option<StreamResampler>,
}

impl FrameSink {
    pub fn new(
        frames_tx: mpsc::Sender<AudioFrame>,
        attached: Arc<AtomicBool>,
        device_sample_rate: u32,
        device_channels: u16,
    ) -> Result<Self, RealtimeError> {
        if device_sample_rate != SESSION_SAMPLE_RATE_HZ {
            #[cfg(not(feature = "audio-resampling"))]
            {
                return Err(RealtimeError::Device(format!(
                    "Capture device runs at {}Hz but the session needs {}Hz. Automatic resampling not active or not compiled.",
                    device_sample_rate, SESSION_SAMPLE_RATE_HZ
                )));
            }
        }

        info!(
            "[FrameSink] Capturing {}Hz {}ch -> {}Hz mono frames.",
            device_sample_rate, device_channels, SESSION_SAMPLE_RATE_HZ
        );

        Ok(Self {
            frames_tx,
            attached,
            assembler: FrameAssembler::new(device_channels),
            dropped: Arc::new(AtomicU64::new(0)),
            #[cfg(feature = "audio-resampling")]
            resampler: if device_sample_rate != SESSION_SAMPLE_RATE_HZ {
                Some(StreamResampler::new(device_sample_rate, SESSION_SAMPLE_RATE_HZ)?)
            } else {
                None
            },
        })
    }

    pub fn is_attached(&self) -> bool {
        self.attached.load(Ordering::Acquire)
    }

    /// Shared counter of frames dropped because the streamer was still busy.
    pub fn dropped_counter(&self) -> Arc<AtomicU64> {
        self.dropped.clone()
    }

    /// Handles one interleaved device buffer. Returns `false` once the sink is
    /// detached or the streamer has gone away; callers may stop calling then.
    pub fn push_interleaved(&mut self, data: &[f32]) -> bool {
        if !self.is_attached() {
            return false;
        }
        if data.is_empty() {
            return true;
        }

        #[cfg(feature = "audio-resampling")]
        let frames = match self.resampler.as_mut() {
            Some(resampler) => {
                let mono = self.assembler.downmix(data);
                match resampler.process(&mono) {
                    Ok(resampled) => self.assembler.push_mono(&resampled),
                    Err(e) => {
                        warn!("[FrameSink] Resampling failed, discarding buffer: {}", e);
                        return true;
                    }
                }
            }
            None => self.assembler.push(data),
        };
        #[cfg(not(feature = "audio-resampling"))]
        let frames = self.assembler.push(data);

        for frame in frames {
            match self.frames_tx.try_send(frame) {
                Ok(()) => {}
                Err(mpsc::error::TrySendError::Full(_)) => {
                    let total = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                    warn!(
                        "[FrameSink] Streamer still busy with previous frame; dropped frame ({} total).",
                        total
                    );
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    debug!("[FrameSink] Frame channel closed; detaching.");
                    self.attached.store(false, Ordering::Release);
                    return false;
                }
            }
        }
        true
    }

    /// Convenience for devices delivering 16-bit samples.
    pub fn push_interleaved_i16(&mut self, data: &[i16]) -> bool {
        let converted: Vec<f32> = data
            .iter()
            .map(|&s| s as f32 / (i16::MAX as f32 + 1.0))
            .collect();
        self.push_interleaved(&converted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::FRAME_SIZE_SAMPLES;

    fn sink_with_channel(capacity: usize) -> (FrameSink, mpsc::Receiver<AudioFrame>, Arc<AtomicBool>) {
        let (tx, rx) = mpsc::channel(capacity);
        let attached = Arc::new(AtomicBool::new(true));
        let sink = FrameSink::new(tx, attached.clone(), SESSION_SAMPLE_RATE_HZ, 1).unwrap();
        (sink, rx, attached)
    }

    #[test]
    fn test_full_frame_is_forwarded() {
        let (mut sink, mut rx, _) = sink_with_channel(1);
        assert!(sink.push_interleaved(&vec![0.5; FRAME_SIZE_SAMPLES]));
        let frame = rx.try_recv().unwrap();
        assert_eq!(frame.len(), FRAME_SIZE_SAMPLES);
    }

    #[test]
    fn test_second_frame_dropped_while_first_in_flight() {
        let (mut sink, mut rx, _) = sink_with_channel(1);
        let dropped = sink.dropped_counter();
        sink.push_interleaved(&vec![0.1; FRAME_SIZE_SAMPLES]);
        sink.push_interleaved(&vec![0.2; FRAME_SIZE_SAMPLES]);
        assert_eq!(dropped.load(Ordering::Relaxed), 1);

        let frame = rx.try_recv().unwrap();
        assert_eq!(frame.samples()[0], 0.1);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_detached_sink_forwards_nothing() {
        let (mut sink, mut rx, attached) = sink_with_channel(1);
        attached.store(false, Ordering::Release);
        assert!(!sink.push_interleaved(&vec![0.5; FRAME_SIZE_SAMPLES]));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_closed_channel_detaches() {
        let (mut sink, rx, attached) = sink_with_channel(1);
        drop(rx);
        assert!(!sink.push_interleaved(&vec![0.5; FRAME_SIZE_SAMPLES]));
        assert!(!attached.load(Ordering::Acquire));
    }

    #[test]
    fn test_i16_input_is_normalized() {
        let (mut sink, mut rx, _) = sink_with_channel(1);
        sink.push_interleaved_i16(&vec![16384; FRAME_SIZE_SAMPLES]);
        let frame = rx.try_recv().unwrap();
        assert_eq!(frame.samples()[0], 0.5);
    }

    #[cfg(not(feature = "audio-resampling"))]
    #[test]
    fn test_foreign_rate_needs_resampling() {
        let (tx, _rx) = mpsc::channel(1);
        let result = FrameSink::new(tx, Arc::new(AtomicBool::new(true)), 48000, 1);
        assert!(matches!(result, Err(RealtimeError::Device(_))));
    }
}
