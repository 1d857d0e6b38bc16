// demos/voice_chat.rs
use cpal::{
    SampleFormat, SampleRate, StreamConfig, SupportedStreamConfig,
    traits::{DeviceTrait, HostTrait, StreamTrait},
};
use realtime_voice::audio::{CaptureDevice, FrameSink, PlaybackQueue, SESSION_SAMPLE_RATE_HZ};
use realtime_voice::client::HttpSessionProvisioner;
use realtime_voice::{ClientConfig, RealtimeConnector, RealtimeError, StatusEvent, VoiceSession};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{debug, error, info, warn};

const PREFERRED_OUTPUT_SAMPLE_RATE_HZ: u32 = 48000;
const PREFERRED_OUTPUT_CHANNELS_COUNT: u16 = 2;

fn find_supported_config_generic<F, I>(
    mut configs_iterator_fn: F,
    target_sample_rate: u32,
    target_channels: u16,
) -> Result<SupportedStreamConfig, anyhow::Error>
where
    F: FnMut() -> Result<I, cpal::SupportedStreamConfigsError>,
    I: Iterator<Item = cpal::SupportedStreamConfigRange>,
{
    let mut best_config: Option<SupportedStreamConfig> = None;
    let mut min_rate_diff = u32::MAX;

    for config_range in configs_iterator_fn()? {
        if config_range.channels() != target_channels {
            continue;
        }
        if !matches!(config_range.sample_format(), SampleFormat::F32 | SampleFormat::I16) {
            continue;
        }
        let current_min_rate = config_range.min_sample_rate().0;
        let current_max_rate = config_range.max_sample_rate().0;
        let rate_to_check = target_sample_rate.clamp(current_min_rate, current_max_rate);
        let rate_diff = rate_to_check.abs_diff(target_sample_rate);
        if best_config.is_none() || rate_diff < min_rate_diff {
            min_rate_diff = rate_diff;
            best_config = Some(config_range.with_sample_rate(SampleRate(rate_to_check)));
        }
        if rate_diff == 0 {
            break;
        }
    }
    best_config.ok_or_else(|| {
        anyhow::anyhow!(
            "No f32/i16 config for ~{}Hz {}ch",
            target_sample_rate,
            target_channels
        )
    })
}

/// Default input device, opened on `acquire` and closed on `release`.
struct CpalMicrophone {
    stream: Option<cpal::Stream>,
}

impl CpalMicrophone {
    fn new() -> Self {
        Self { stream: None }
    }

    fn device() -> Result<cpal::Device, RealtimeError> {
        cpal::default_host()
            .default_input_device()
            .ok_or_else(|| RealtimeError::PermissionDenied("no input device available".to_string()))
    }

    fn select_config(device: &cpal::Device) -> Result<SupportedStreamConfig, RealtimeError> {
        find_supported_config_generic(|| device.supported_input_configs(), SESSION_SAMPLE_RATE_HZ, 1)
            .or_else(|e| {
                warn!(
                    "[AudioInput] No {}Hz mono input ({}). Trying 48kHz mono.",
                    SESSION_SAMPLE_RATE_HZ, e
                );
                find_supported_config_generic(|| device.supported_input_configs(), 48000, 1)
            })
            .or_else(|e| {
                warn!("[AudioInput] No 48kHz mono input ({}). Trying 48kHz stereo.", e);
                find_supported_config_generic(|| device.supported_input_configs(), 48000, 2)
            })
            .map_err(|e| RealtimeError::Device(e.to_string()))
    }
}

fn map_build_error(err: cpal::BuildStreamError) -> RealtimeError {
    match err {
        cpal::BuildStreamError::DeviceNotAvailable => {
            RealtimeError::PermissionDenied("input device not available".to_string())
        }
        other => RealtimeError::Device(other.to_string()),
    }
}

impl CaptureDevice for CpalMicrophone {
    fn format(&self) -> Result<(u32, u16), RealtimeError> {
        let device = Self::device()?;
        let config: StreamConfig = Self::select_config(&device)?.into();
        Ok((config.sample_rate.0, config.channels))
    }

    fn acquire(&mut self, mut sink: FrameSink) -> Result<(), RealtimeError> {
        let device = Self::device()?;
        if let Ok(name) = device.name() {
            info!("[AudioInput] Using input: {}", name);
        }
        let supported_config = Self::select_config(&device)?;
        let sample_format = supported_config.sample_format();
        let config: StreamConfig = supported_config.into();
        info!(
            "[AudioInput] CPAL selected input: {} Hz, {} ch, {:?}",
            config.sample_rate.0, config.channels, sample_format
        );

        let stream = match sample_format {
            SampleFormat::F32 => device.build_input_stream(
                &config,
                move |data: &[f32], _: &cpal::InputCallbackInfo| {
                    sink.push_interleaved(data);
                },
                |err| error!("[AudioInput] CPAL Error: {}", err),
                None,
            ),
            SampleFormat::I16 => device.build_input_stream(
                &config,
                move |data: &[i16], _: &cpal::InputCallbackInfo| {
                    sink.push_interleaved_i16(data);
                },
                |err| error!("[AudioInput] CPAL Error: {}", err),
                None,
            ),
            other => {
                return Err(RealtimeError::Device(format!(
                    "unsupported input sample format {:?}",
                    other
                )));
            }
        }
        .map_err(map_build_error)?;

        stream
            .play()
            .map_err(|e| RealtimeError::PermissionDenied(e.to_string()))?;
        self.stream = Some(stream);
        Ok(())
    }

    fn release(&mut self) {
        if let Some(stream) = self.stream.take() {
            if let Err(e) = stream.pause() {
                debug!("[AudioInput] Pause on release failed: {}", e);
            }
            info!("[AudioInput] Microphone released.");
        }
    }
}

fn setup_audio_output() -> Result<(cpal::Stream, PlaybackQueue), anyhow::Error> {
    let host = cpal::default_host();
    let device = host
        .default_output_device()
        .ok_or_else(|| anyhow::anyhow!("No output device"))?;
    info!("[AudioOutput] Using output: {}", device.name()?);

    let supported_config = find_supported_config_generic(
        || device.supported_output_configs(),
        SESSION_SAMPLE_RATE_HZ,
        1,
    )
    .or_else(|e| {
        warn!(
            "Could not find {}Hz mono output: {}. Trying {}Hz {}ch.",
            SESSION_SAMPLE_RATE_HZ, e, PREFERRED_OUTPUT_SAMPLE_RATE_HZ, PREFERRED_OUTPUT_CHANNELS_COUNT
        );
        find_supported_config_generic(
            || device.supported_output_configs(),
            PREFERRED_OUTPUT_SAMPLE_RATE_HZ,
            PREFERRED_OUTPUT_CHANNELS_COUNT,
        )
    })?;

    let sample_format = supported_config.sample_format();
    let config: StreamConfig = supported_config.into();
    info!(
        "[AudioOutput] CPAL selected output: {} Hz, {} ch, {:?}",
        config.sample_rate.0, config.channels, sample_format
    );

    let queue = PlaybackQueue::new(config.sample_rate.0, config.channels);
    let callback_queue = queue.clone();
    let stream = match sample_format {
        SampleFormat::F32 => device.build_output_stream(
            &config,
            move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                callback_queue.fill(data);
            },
            |err| error!("[AudioOutput] CPAL Error: {}", err),
            None,
        )?,
        SampleFormat::I16 => {
            let mut scratch: Vec<f32> = Vec::new();
            device.build_output_stream(
                &config,
                move |data: &mut [i16], _: &cpal::OutputCallbackInfo| {
                    scratch.resize(data.len(), 0.0);
                    callback_queue.fill(&mut scratch);
                    for (out, sample) in data.iter_mut().zip(&scratch) {
                        *out = realtime_voice::audio::pcm::encode_sample(*sample);
                    }
                },
                |err| error!("[AudioOutput] CPAL Error: {}", err),
                None,
            )?
        }
        other => anyhow::bail!("Unsupported output sample format {:?}", other),
    };
    stream.play()?;
    Ok((stream, queue))
}

fn print_status(event: &StatusEvent) {
    match event {
        StatusEvent::Controls(state) => info!(
            "[Status] start {} / stop {}",
            if state.start_enabled { "enabled" } else { "disabled" },
            if state.stop_enabled { "enabled" } else { "disabled" }
        ),
        StatusEvent::Transcript(text) => println!("you: {}", text),
        StatusEvent::TextDelta(delta) => debug!("[Status] reply text: {}", delta),
        StatusEvent::UtteranceQueued { duration } => {
            info!("[Status] Reply of {:?} queued for playback.", duration)
        }
        StatusEvent::Failed { kind, message } => {
            eprintln!("error ({:?}): {}", kind, message)
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), anyhow::Error> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();
    info!("App start. Logger initialized.");

    dotenv::dotenv().ok();
    let config = ClientConfig::from_env()?;
    info!(
        "[Main] Session endpoint {}, realtime URL {}.",
        config.session_endpoint, config.realtime_url
    );

    let (_output_stream, playback_queue) = setup_audio_output()?;
    let (mut voice, mut status_rx) = VoiceSession::new(
        HttpSessionProvisioner::from_config(&config),
        RealtimeConnector::from_config(&config),
        CpalMicrophone::new(),
        playback_queue.clone(),
        config.reply_format,
    );

    println!("Commands: start | stop | quit");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                match line.trim() {
                    "start" => {
                        if let Err(e) = voice.start().await {
                            warn!("[Main] Could not start: {}", e);
                        }
                    }
                    "stop" => voice.stop(),
                    "quit" | "exit" => break,
                    "" => {}
                    other => println!("Unknown command '{}'.", other),
                }
            }
            Some(event) = status_rx.recv() => {
                print_status(&event);
                if voice.reap_ended_session() {
                    println!("Session ended by the service. Type 'start' to reconnect.");
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("[MainLoop] Ctrl+C. Shutting down...");
                break;
            }
        }
    }

    voice.stop();
    let stats = playback_queue.stats();
    info!(
        "[Main] Played {} utterance(s), {} underrun(s).",
        stats.utterances_queued, stats.underruns
    );
    Ok(())
}
