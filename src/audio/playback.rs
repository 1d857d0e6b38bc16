use super::{DecodedWaveform, WaveformDecoder};
use crate::error::RealtimeError;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tracing::{debug, error, info, trace, warn};

/// Destination for decoded reply audio.
pub trait AudioSink: Send + 'static {
    /// Schedules `waveform` to start playing as soon as everything scheduled
    /// before it has played.
    fn schedule(&mut self, waveform: DecodedWaveform) -> Result<(), RealtimeError>;
}

/// Playback counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PlaybackStats {
    pub utterances_queued: u64,
    pub samples_played: u64,
    pub underruns: u64,
}

#[derive(Debug)]
struct QueueState {
    samples: VecDeque<f32>,
    stats: PlaybackStats,
}

/// FIFO of output-device samples shared between the scheduler and the
/// device's output callback.
///
/// Utterances are appended behind whatever is still pending, so replies play
/// strictly one after another without gaps or overlap. The output callback
/// drains the queue with [`PlaybackQueue::fill`].
#[derive(Debug, Clone)]
pub struct PlaybackQueue {
    device_sample_rate: u32,
    device_channels: u16,
    state: Arc<Mutex<QueueState>>,
}

impl PlaybackQueue {
    pub fn new(device_sample_rate: u32, device_channels: u16) -> Self {
        Self {
            device_sample_rate,
            device_channels: device_channels.max(1),
            state: Arc::new(Mutex::new(QueueState {
                samples: VecDeque::new(),
                stats: PlaybackStats::default(),
            })),
        }
    }

    pub fn device_sample_rate(&self) -> u32 {
        self.device_sample_rate
    }

    pub fn device_channels(&self) -> u16 {
        self.device_channels
    }

    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Interleaved samples not yet handed to the device.
    pub fn pending_samples(&self) -> usize {
        self.lock().samples.len()
    }

    pub fn is_idle(&self) -> bool {
        self.lock().samples.is_empty()
    }

    pub fn stats(&self) -> PlaybackStats {
        self.lock().stats
    }

    /// Fills an interleaved device buffer, padding with silence when the
    /// queue runs dry. Returns the number of queued samples written.
    pub fn fill(&self, out: &mut [f32]) -> usize {
        let mut state = self.lock();
        let available = state.samples.len().min(out.len());
        for (slot, sample) in out.iter_mut().zip(state.samples.drain(..available)) {
            *slot = sample;
        }
        for slot in &mut out[available..] {
            *slot = 0.0;
        }
        state.stats.samples_played += available as u64;
        if available > 0 && available < out.len() {
            state.stats.underruns += 1;
            trace!(
                "[PlaybackQueue] Underrun: wrote {} of {} samples.",
                available,
                out.len()
            );
        }
        available
    }

    /// Discards everything not yet played.
    pub fn clear(&self) {
        self.lock().samples.clear();
    }

    fn adapt_channels(&self, waveform: &DecodedWaveform) -> Vec<f32> {
        let source_channels = waveform.channels.max(1) as usize;
        let target_channels = self.device_channels as usize;
        if source_channels == target_channels {
            return waveform.samples.clone();
        }
        let mut adapted = Vec::with_capacity(waveform.frames() * target_channels);
        for frame in waveform.samples.chunks_exact(source_channels) {
            let mono = frame.iter().sum::<f32>() / source_channels as f32;
            if source_channels == 1 || target_channels == 1 {
                adapted.extend(std::iter::repeat_n(mono, target_channels));
            } else {
                for ch in 0..target_channels {
                    adapted.push(frame.get(ch).copied().unwrap_or(mono));
                }
            }
        }
        adapted
    }

    fn match_rate(&self, waveform: DecodedWaveform) -> Result<DecodedWaveform, RealtimeError> {
        if waveform.sample_rate == self.device_sample_rate {
            return Ok(waveform);
        }
        #[cfg(feature = "audio-resampling")]
        {
            super::resample::resample_waveform(&waveform, self.device_sample_rate)
        }
        #[cfg(not(feature = "audio-resampling"))]
        {
            Err(RealtimeError::Device(format!(
                "Reply audio is {}Hz but the output device runs at {}Hz. Automatic resampling not active or not compiled.",
                waveform.sample_rate, self.device_sample_rate
            )))
        }
    }
}

impl AudioSink for PlaybackQueue {
    fn schedule(&mut self, waveform: DecodedWaveform) -> Result<(), RealtimeError> {
        let waveform = self.match_rate(waveform)?;
        let samples = self.adapt_channels(&waveform);
        let mut state = self.lock();
        let queued_before = state.samples.len();
        state.samples.extend(samples);
        state.stats.utterances_queued += 1;
        debug!(
            "[PlaybackQueue] Queued utterance ({:?}) behind {} pending sample(s).",
            waveform.duration(),
            queued_before
        );
        Ok(())
    }
}

/// Decodes completed utterances and hands them to an [`AudioSink`].
pub struct PlaybackScheduler<K: AudioSink> {
    decoder: Box<dyn WaveformDecoder>,
    sink: K,
    played: u64,
    dropped: u64,
}

impl<K: AudioSink> PlaybackScheduler<K> {
    pub fn new(decoder: Box<dyn WaveformDecoder>, sink: K) -> Self {
        Self {
            decoder,
            sink,
            played: 0,
            dropped: 0,
        }
    }

    pub fn sink(&self) -> &K {
        &self.sink
    }

    /// Utterances handed to the sink so far.
    pub fn played(&self) -> u64 {
        self.played
    }

    /// Utterances discarded because they could not be decoded or scheduled.
    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    /// Decodes `bytes` and schedules the result.
    ///
    /// Empty input is treated as silence and returns `Ok(None)` without
    /// touching the decoder. On failure the whole utterance is dropped.
    pub fn play(&mut self, bytes: Vec<u8>) -> Result<Option<Duration>, RealtimeError> {
        if bytes.is_empty() {
            debug!("[Playback] Empty utterance; nothing to play.");
            return Ok(None);
        }

        let waveform = match self.decoder.decode(&bytes) {
            Ok(waveform) => waveform,
            Err(e) => {
                self.dropped += 1;
                error!(
                    "[Playback] Dropping utterance of {} byte(s): {}",
                    bytes.len(),
                    e
                );
                return Err(e);
            }
        };

        if waveform.is_empty() {
            debug!("[Playback] Decoded utterance is empty; skipping.");
            return Ok(None);
        }

        let duration = waveform.duration();
        if let Err(e) = self.sink.schedule(waveform) {
            self.dropped += 1;
            warn!("[Playback] Sink rejected utterance: {}", e);
            return Err(e);
        }
        self.played += 1;
        info!("[Playback] Scheduled utterance of {:?}.", duration);
        Ok(Some(duration))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::decoder::Pcm16Decoder;
    use crate::audio::pcm::encode_samples;

    fn mono(samples: Vec<f32>, sample_rate: u32) -> DecodedWaveform {
        DecodedWaveform {
            samples,
            sample_rate,
            channels: 1,
        }
    }

    #[test]
    fn test_utterances_play_sequentially() {
        let mut queue = PlaybackQueue::new(24000, 1);
        queue.schedule(mono(vec![0.1, 0.2, 0.3], 24000)).unwrap();
        queue.schedule(mono(vec![0.4, 0.5], 24000)).unwrap();
        assert_eq!(queue.pending_samples(), 5);

        let mut out = [9.0f32; 4];
        assert_eq!(queue.fill(&mut out), 4);
        assert_eq!(out, [0.1, 0.2, 0.3, 0.4]);

        let mut out = [9.0f32; 3];
        assert_eq!(queue.fill(&mut out), 1);
        assert_eq!(out, [0.5, 0.0, 0.0]);
        assert!(queue.is_idle());

        let stats = queue.stats();
        assert_eq!(stats.utterances_queued, 2);
        assert_eq!(stats.samples_played, 5);
        assert_eq!(stats.underruns, 1);
    }

    #[test]
    fn test_idle_queue_outputs_silence() {
        let queue = PlaybackQueue::new(24000, 2);
        let mut out = [1.0f32; 8];
        assert_eq!(queue.fill(&mut out), 0);
        assert_eq!(out, [0.0; 8]);
        assert_eq!(queue.stats().underruns, 0);
    }

    #[test]
    fn test_mono_is_duplicated_for_stereo_device() {
        let mut queue = PlaybackQueue::new(24000, 2);
        queue.schedule(mono(vec![0.25, -0.5], 24000)).unwrap();
        let mut out = [0.0f32; 4];
        queue.fill(&mut out);
        assert_eq!(out, [0.25, 0.25, -0.5, -0.5]);
    }

    #[test]
    fn test_stereo_is_averaged_for_mono_device() {
        let mut queue = PlaybackQueue::new(24000, 1);
        queue
            .schedule(DecodedWaveform {
                samples: vec![1.0, 0.0, 0.5, 0.5],
                sample_rate: 24000,
                channels: 2,
            })
            .unwrap();
        let mut out = [0.0f32; 2];
        queue.fill(&mut out);
        assert_eq!(out, [0.5, 0.5]);
    }

    #[cfg(not(feature = "audio-resampling"))]
    #[test]
    fn test_rate_mismatch_is_rejected_without_resampling() {
        let mut queue = PlaybackQueue::new(48000, 1);
        let result = queue.schedule(mono(vec![0.0; 10], 24000));
        assert!(matches!(result, Err(RealtimeError::Device(_))));
        assert!(queue.is_idle());
    }

    #[test]
    fn test_scheduler_skips_empty_utterance() {
        let queue = PlaybackQueue::new(24000, 1);
        let mut scheduler = PlaybackScheduler::new(Box::new(Pcm16Decoder::default()), queue);
        assert_eq!(scheduler.play(Vec::new()).unwrap(), None);
        assert_eq!(scheduler.played(), 0);
        assert!(scheduler.sink().is_idle());
    }

    #[test]
    fn test_scheduler_decodes_and_queues() {
        let queue = PlaybackQueue::new(24000, 1);
        let mut scheduler = PlaybackScheduler::new(Box::new(Pcm16Decoder::default()), queue);
        let bytes = encode_samples(&vec![0.5; 2400]).to_le_bytes();
        let duration = scheduler.play(bytes).unwrap().unwrap();
        assert_eq!(duration, Duration::from_millis(100));
        assert_eq!(scheduler.sink().pending_samples(), 2400);
        assert_eq!(scheduler.played(), 1);
    }

    #[test]
    fn test_scheduler_drops_undecodable_utterance() {
        let queue = PlaybackQueue::new(24000, 1);
        let mut scheduler = PlaybackScheduler::new(Box::new(Pcm16Decoder::default()), queue);
        let result = scheduler.play(vec![1, 2, 3]);
        assert!(matches!(result, Err(RealtimeError::Decode(_))));
        assert_eq!(scheduler.dropped(), 1);
        assert!(scheduler.sink().is_idle());
    }
}
