//! ALSA backend: a capture thread feeding the microphone sink and a
//! playback thread rendering the output timeline.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;

use alsa::pcm::{Access, Format, HwParams, PCM};
use alsa::{Direction, ValueOr};
use anyhow::{Context, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::oneshot;

use super::codec::{f32_to_i16, interleaved_i16_to_mono};
use super::device::{AudioBackend, MicTrack, OutputPipeline, SampleSink};
use super::timeline::Timeline;
use crate::config::Config;
use crate::error::AudioError;

const EPERM: i32 = 1;
const EACCES: i32 = 13;
const MAX_RECOVERY_RETRIES: u32 = 3;

/// Parameters negotiated with the ALSA hardware.
#[derive(Debug, Clone)]
pub struct AlsaParams {
    /// Actual sample rate after negotiation
    pub sample_rate: u32,
    /// Actual number of channels
    pub channels: u32,
    /// Period size in frames
    pub period_size: usize,
}

fn open_pcm(
    device: &str,
    direction: Direction,
    sample_rate: u32,
    channels: u32,
    period_size: Option<usize>,
) -> Result<(PCM, AlsaParams)> {
    let dir_name = match direction {
        Direction::Capture => "Capture",
        Direction::Playback => "Playback",
    };
    let pcm = PCM::new(device, direction, false)
        .with_context(|| format!("Failed to open PCM device '{}' for {}", device, dir_name))?;

    {
        let hwp = HwParams::any(&pcm).with_context(|| "Failed to initialize HwParams")?;
        hwp.set_access(Access::RWInterleaved)?;
        hwp.set_format(Format::S16LE)?;
        hwp.set_channels(channels)?;
        hwp.set_rate_near(sample_rate, ValueOr::Nearest)?;
        if let Some(ps) = period_size {
            hwp.set_period_size_near(ps as alsa::pcm::Frames, ValueOr::Nearest)?;
        }
        pcm.hw_params(&hwp)?;
    }

    // 读取实际协商得到的参数
    let params = {
        let hwp = pcm.hw_params_current()?;
        AlsaParams {
            sample_rate: hwp.get_rate()?,
            channels: hwp.get_channels()?,
            period_size: hwp.get_period_size()? as usize,
        }
    };

    log::info!(
        "ALSA {}: device={}, rate={}, channels={}, period_size={}",
        dir_name,
        device,
        params.sample_rate,
        params.channels,
        params.period_size,
    );

    Ok((pcm, params))
}

/// Permission problems get their own class so the session can report them.
fn to_audio_error(e: anyhow::Error) -> AudioError {
    match e.downcast_ref::<alsa::Error>().map(|a| a.errno()) {
        Some(EPERM) | Some(EACCES) => AudioError::PermissionDenied(format!("{:#}", e)),
        _ => AudioError::device(format!("{:#}", e)),
    }
}

/// Sound card access through ALSA.
pub struct AlsaBackend {
    capture_device: String,
    capture_rate: u32,
    playback_device: String,
    playback_rate: u32,
    playback_channels: u32,
    playback_period_size: usize,
}

impl AlsaBackend {
    pub fn new(config: &Config) -> Self {
        Self {
            capture_device: config.capture_device.clone(),
            capture_rate: config.input_sample_rate,
            playback_device: config.playback_device.clone(),
            playback_rate: config.playback_sample_rate,
            playback_channels: config.playback_channels as u32,
            playback_period_size: config.playback_period_size,
        }
    }
}

#[async_trait]
impl AudioBackend for AlsaBackend {
    async fn acquire_microphone(&self) -> Result<Box<dyn MicTrack>, AudioError> {
        let running = Arc::new(AtomicBool::new(true));
        let sink: Arc<Mutex<Option<SampleSink>>> = Arc::new(Mutex::new(None));
        let (ready_tx, ready_rx) = oneshot::channel();

        let device = self.capture_device.clone();
        let rate = self.capture_rate;
        let thread_running = running.clone();
        let thread_sink = sink.clone();
        thread::Builder::new()
            .name("audio-record".into())
            .spawn(move || record_thread(&device, rate, ready_tx, thread_sink, &thread_running))
            .map_err(|e| AudioError::device(format!("failed to spawn record thread: {}", e)))?;

        let sample_rate = ready_rx
            .await
            .map_err(|_| AudioError::device("record thread exited during open"))??;

        Ok(Box::new(AlsaMicTrack {
            sample_rate,
            running,
            sink,
        }))
    }

    fn open_output(&self) -> Result<Arc<dyn OutputPipeline>, AudioError> {
        let (ready_tx, ready_rx) = std::sync::mpsc::sync_channel(1);
        let device = self.playback_device.clone();
        let (rate, channels) = (self.playback_rate, self.playback_channels);
        let period_size = (self.playback_period_size > 0).then_some(self.playback_period_size);

        thread::Builder::new()
            .name("audio-play".into())
            .spawn(move || play_thread(&device, rate, channels, period_size, ready_tx))
            .map_err(|e| AudioError::device(format!("failed to spawn play thread: {}", e)))?;

        let timeline = ready_rx
            .recv()
            .map_err(|_| AudioError::device("play thread exited during open"))??;
        Ok(timeline)
    }
}

/// Microphone track backed by the `audio-record` thread.
struct AlsaMicTrack {
    sample_rate: u32,
    running: Arc<AtomicBool>,
    sink: Arc<Mutex<Option<SampleSink>>>,
}

impl MicTrack for AlsaMicTrack {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn start(&mut self, sink: SampleSink) -> Result<(), AudioError> {
        if !self.running.load(Ordering::Relaxed) {
            return Err(AudioError::device("microphone already released"));
        }
        *self.sink.lock() = Some(sink);
        Ok(())
    }

    fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        self.sink.lock().take();
    }
}

impl Drop for AlsaMicTrack {
    fn drop(&mut self) {
        self.stop();
    }
}

fn record_thread(
    device: &str,
    sample_rate: u32,
    ready: oneshot::Sender<Result<u32, AudioError>>,
    sink: Arc<Mutex<Option<SampleSink>>>,
    running: &AtomicBool,
) {
    // 1. 打开采集设备，单声道优先
    let (pcm, params) = match open_pcm(device, Direction::Capture, sample_rate, 1, None) {
        Ok(opened) => opened,
        Err(e) => {
            let _ = ready.send(Err(to_audio_error(e)));
            return;
        }
    };
    let io = match pcm.io_i16() {
        Ok(io) => io,
        Err(e) => {
            let _ = ready.send(Err(AudioError::device(e.to_string())));
            return;
        }
    };
    if ready.send(Ok(params.sample_rate)).is_err() {
        return;
    }

    let channels = params.channels as usize;
    let mut read_buf = vec![0i16; params.period_size * channels];

    while running.load(Ordering::Relaxed) {
        match io.readi(&mut read_buf) {
            Ok(frames) => {
                let mono = interleaved_i16_to_mono(&read_buf[..frames * channels], channels);
                // 未启动前读到的数据直接丢弃
                if let Some(sink) = sink.lock().as_mut() {
                    sink(&mono);
                }
            }
            Err(e) => {
                log::warn!("ALSA capture error: {}, recovering...", e);
                if let Err(e2) = pcm.prepare() {
                    log::error!("Failed to recover PCM capture: {}", e2);
                    break;
                }
            }
        }
    }

    log::info!("Recording stopped");
}

fn play_thread(
    device: &str,
    sample_rate: u32,
    channels: u32,
    period_size: Option<usize>,
    ready: std::sync::mpsc::SyncSender<Result<Arc<dyn OutputPipeline>, AudioError>>,
) {
    let (pcm, params) = match open_pcm(device, Direction::Playback, sample_rate, channels, period_size) {
        Ok(opened) => opened,
        Err(e) => {
            let _ = ready.send(Err(to_audio_error(e)));
            return;
        }
    };
    let io = match pcm.io_i16() {
        Ok(io) => io,
        Err(e) => {
            let _ = ready.send(Err(AudioError::device(e.to_string())));
            return;
        }
    };

    // 时间线按硬件实际参数创建，时钟由本线程的写入节奏驱动
    let timeline = Arc::new(Timeline::new(params.sample_rate, params.channels as usize));
    let output: Arc<dyn OutputPipeline> = timeline.clone();
    if ready.send(Ok(output)).is_err() {
        return;
    }

    let ch = params.channels as usize;
    let mut mix = vec![0f32; params.period_size.max(1) * ch];
    let mut pcm_data = vec![0i16; mix.len()];

    log::info!(
        "Playback started: rate={}, ch={}, period={}",
        params.sample_rate,
        params.channels,
        params.period_size,
    );

    loop {
        let frames = timeline.render(&mut mix);
        if frames == 0 {
            // closed
            break;
        }
        for (out, sample) in pcm_data.iter_mut().zip(&mix) {
            *out = f32_to_i16(*sample);
        }

        // Write with a retry loop to handle short writes and XRUN recovery
        let mut frames_written = 0;
        let mut retry_count = 0u32;
        while frames_written < frames {
            match io.writei(&pcm_data[frames_written * ch..frames * ch]) {
                Ok(n) => {
                    frames_written += n;
                    retry_count = 0; // 成功写入，重置重试计数
                }
                Err(e) => {
                    log::warn!("ALSA XRUN or error: {}, recovering...", e);
                    retry_count += 1;

                    // 触发 ALSA 硬件恢复状态机
                    if let Err(e2) = pcm.prepare() {
                        log::error!("Failed to recover PCM playback: {}", e2);
                        timeline.close();
                        return;
                    }

                    // 熔断器：底层持续跟不上写入速度时，丢弃剩余帧防止死循环
                    if retry_count >= MAX_RECOVERY_RETRIES {
                        log::error!(
                            "Max recovery retries ({}) reached. Dropping {} unwritten frames.",
                            retry_count,
                            frames - frames_written
                        );
                        break;
                    }
                }
            }
        }
    }

    let _ = pcm.drain();
    log::info!("Playback stopped");
}
