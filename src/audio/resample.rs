use super::DecodedWaveform;
use crate::error::RealtimeError;
use audioadapter::direct::SequentialSliceOfVecs;
use rubato::{Fft, FixedSync, Indexing, Resampler};
use tracing::{debug, info, trace};

const RESAMPLER_CHUNK_FRAMES: usize = 1024;
const RESAMPLER_SUB_CHUNKS: usize = 2;

/// Streaming mono rate converter for capture callbacks.
///
/// Input is buffered until the resampler has a full chunk; whatever is left
/// over waits for the next call.
pub(crate) struct StreamResampler {
    resampler: Fft<f32>,
    pending_input: Vec<f32>,
    output_buffer_alloc: Vec<Vec<f32>>,
}

impl StreamResampler {
    pub(crate) fn new(input_rate: u32, output_rate: u32) -> Result<Self, RealtimeError> {
        info!(
            "[Resampler] Initializing streaming resampler {}Hz -> {}Hz (mono).",
            input_rate, output_rate
        );
        let resampler = Fft::<f32>::new(
            input_rate as usize,
            output_rate as usize,
            RESAMPLER_CHUNK_FRAMES,
            RESAMPLER_SUB_CHUNKS,
            1,
            FixedSync::Input,
        )
        .map_err(|e| RealtimeError::AudioResampling(format!("Failed to create Fft resampler: {}", e)))?;

        let max_output_frames = resampler.output_frames_max();
        Ok(Self {
            resampler,
            pending_input: Vec::with_capacity(RESAMPLER_CHUNK_FRAMES * 2),
            output_buffer_alloc: vec![vec![0.0f32; max_output_frames.max(1)]; 1],
        })
    }

    /// Resamples as many whole chunks as are available.
    pub(crate) fn process(&mut self, mono: &[f32]) -> Result<Vec<f32>, RealtimeError> {
        self.pending_input.extend_from_slice(mono);
        let mut produced = Vec::new();

        loop {
            let required_input_frames = self.resampler.input_frames_next();
            if self.pending_input.len() < required_input_frames || required_input_frames == 0 {
                break;
            }

            let chunk: Vec<f32> = self.pending_input.drain(..required_input_frames).collect();
            let input_for_adapter = vec![chunk];
            let input_adapter =
                SequentialSliceOfVecs::new(&input_for_adapter, 1, required_input_frames).map_err(
                    |e| RealtimeError::AudioResampling(format!("Input adapter error: {}", e)),
                )?;

            let output_frames_next = self.resampler.output_frames_next();
            self.output_buffer_alloc[0].resize(output_frames_next.max(1), 0.0);
            let mut output_adapter = SequentialSliceOfVecs::new_mut(
                &mut self.output_buffer_alloc,
                1,
                output_frames_next.max(1),
            )
            .map_err(|e| RealtimeError::AudioResampling(format!("Output adapter error: {}", e)))?;

            let (_frames_read, frames_written) = self
                .resampler
                .process_into_buffer(&input_adapter, &mut output_adapter, None)
                .map_err(|e| RealtimeError::AudioResampling(e.to_string()))?;

            produced.extend_from_slice(&self.output_buffer_alloc[0][..frames_written]);
        }

        trace!(
            "[Resampler] Produced {} frame(s); {} input frame(s) pending.",
            produced.len(),
            self.pending_input.len()
        );
        Ok(produced)
    }
}

/// Converts a whole decoded utterance to `target_rate`, keeping its channel
/// layout. The resampler's startup delay is trimmed so the output starts in
/// phase with the input.
pub(crate) fn resample_waveform(
    waveform: &DecodedWaveform,
    target_rate: u32,
) -> Result<DecodedWaveform, RealtimeError> {
    let channels = waveform.channels.max(1) as usize;
    let input_frames = waveform.frames();
    if input_frames == 0 || waveform.sample_rate == target_rate {
        return Ok(DecodedWaveform {
            samples: waveform.samples.clone(),
            sample_rate: target_rate,
            channels: waveform.channels,
        });
    }

    let mut resampler = Fft::<f32>::new(
        waveform.sample_rate as usize,
        target_rate as usize,
        RESAMPLER_CHUNK_FRAMES,
        RESAMPLER_SUB_CHUNKS,
        channels,
        FixedSync::Input,
    )
    .map_err(|e| RealtimeError::AudioResampling(format!("Failed to create Fft resampler: {}", e)))?;

    let mut planar: Vec<Vec<f32>> = vec![Vec::with_capacity(input_frames); channels];
    for frame in waveform.samples.chunks_exact(channels) {
        for (ch, sample) in frame.iter().enumerate() {
            planar[ch].push(*sample);
        }
    }

    let expected_output_frames = (input_frames as u64 * target_rate as u64)
        .div_ceil(waveform.sample_rate as u64) as usize;
    let delay = resampler.output_delay();
    let mut output: Vec<Vec<f32>> = vec![Vec::new(); channels];
    let mut output_buffer_alloc = vec![vec![0.0f32; resampler.output_frames_max().max(1)]; channels];
    let mut consumed = 0usize;

    // Feed full chunks, then the partial tail, then zeros until the delay is drained.
    let max_iterations = input_frames / resampler.input_frames_next().max(1) + 16;
    for _ in 0..max_iterations {
        if output[0].len() >= expected_output_frames + delay {
            break;
        }
        let required = resampler.input_frames_next();
        let available = input_frames.saturating_sub(consumed).min(required);
        let chunk: Vec<Vec<f32>> = planar
            .iter()
            .map(|ch| {
                let mut block = ch[consumed..consumed + available].to_vec();
                block.resize(required, 0.0);
                block
            })
            .collect();
        consumed += available;

        let input_adapter = SequentialSliceOfVecs::new(&chunk, channels, required)
            .map_err(|e| RealtimeError::AudioResampling(format!("Input adapter error: {}", e)))?;

        let output_frames_next = resampler.output_frames_next();
        for buf in output_buffer_alloc.iter_mut() {
            buf.resize(output_frames_next.max(1), 0.0);
        }
        let mut output_adapter = SequentialSliceOfVecs::new_mut(
            &mut output_buffer_alloc,
            channels,
            output_frames_next.max(1),
        )
        .map_err(|e| RealtimeError::AudioResampling(format!("Output adapter error: {}", e)))?;

        let indexing = Indexing {
            input_offset: 0,
            output_offset: 0,
            partial_len: Some(available),
            active_channels_mask: None,
        };
        let (_read, written) = resampler
            .process_into_buffer(&input_adapter, &mut output_adapter, Some(&indexing))
            .map_err(|e| RealtimeError::AudioResampling(e.to_string()))?;

        for (ch, buf) in output_buffer_alloc.iter().enumerate() {
            output[ch].extend_from_slice(&buf[..written]);
        }
    }

    let mut samples = Vec::with_capacity(expected_output_frames * channels);
    for i in 0..expected_output_frames {
        for ch_output in &output {
            samples.push(ch_output.get(delay + i).copied().unwrap_or(0.0));
        }
    }
    debug!(
        "[Resampler] Utterance {}Hz -> {}Hz: {} -> {} frame(s).",
        waveform.sample_rate, target_rate, input_frames, expected_output_frames
    );

    Ok(DecodedWaveform {
        samples,
        sample_rate: target_rate,
        channels: waveform.channels,
    })
}
