//! Microphone → fixed-size PCM16 frames → transport.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use super::codec::{TransportChunk, encode_samples, resample_linear};
use super::device::MicTrack;
use crate::error::AudioError;

/// Receives one encoded frame per block. Runs on the audio thread.
pub type FrameCallback = Box<dyn FnMut(TransportChunk) + Send>;

#[derive(Debug, Clone, Copy)]
pub struct CaptureConfig {
    /// Samples per emitted frame at `target_rate`.
    pub frame_size: usize,
    /// Rate announced in the mime type and sent on the wire.
    pub target_rate: u32,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            frame_size: 4096,
            target_rate: 16000,
        }
    }
}

/// Accumulates device-rate samples and emits wire-rate blocks.
pub struct FrameAccumulator {
    input_rate: u32,
    target_rate: u32,
    frame_size: usize,
    input_block: usize,
    accum_buf: Vec<f32>,
}

impl FrameAccumulator {
    pub fn new(input_rate: u32, config: CaptureConfig) -> Self {
        let frame_size = config.frame_size.max(1);
        let input_block = if input_rate == config.target_rate || input_rate == 0 {
            frame_size
        } else {
            ((frame_size as f64) * input_rate as f64 / config.target_rate as f64).round() as usize
        };
        Self {
            input_rate,
            target_rate: config.target_rate,
            frame_size,
            input_block: input_block.max(1),
            accum_buf: Vec::with_capacity(input_block * 2),
        }
    }

    /// Feed samples; `emit` is called once per complete block.
    pub fn push(&mut self, samples: &[f32], mut emit: impl FnMut(&[f32])) {
        self.accum_buf.extend_from_slice(samples);
        while self.accum_buf.len() >= self.input_block {
            if self.input_rate == self.target_rate || self.input_rate == 0 {
                emit(&self.accum_buf[..self.frame_size]);
            } else {
                let mut block =
                    resample_linear(&self.accum_buf[..self.input_block], self.input_rate, self.target_rate);
                block.resize(self.frame_size, 0.0);
                emit(&block);
            }
            // Remove the consumed frame from the accumulation buffer
            self.accum_buf.drain(..self.input_block);
        }
    }

    pub fn buffered(&self) -> usize {
        self.accum_buf.len()
    }
}

/// A running capture: owns the microphone track until stopped.
pub struct CapturePipeline {
    track: Option<Box<dyn MicTrack>>,
    running: Arc<AtomicBool>,
}

impl CapturePipeline {
    /// Hook the framing stage up to `track` and start it.
    pub fn start(
        mut track: Box<dyn MicTrack>,
        config: CaptureConfig,
        mut on_frame: FrameCallback,
    ) -> Result<Self, AudioError> {
        let running = Arc::new(AtomicBool::new(true));
        let mut accumulator = FrameAccumulator::new(track.sample_rate(), config);

        log::info!(
            "Capture started: device_rate={}, wire_rate={}, frame_size={}",
            track.sample_rate(),
            config.target_rate,
            config.frame_size,
        );

        let live = running.clone();
        let target_rate = config.target_rate;
        let started = track.start(Box::new(move |samples| {
            if !live.load(Ordering::Relaxed) {
                return;
            }
            accumulator.push(samples, |block| {
                on_frame(TransportChunk::pcm(encode_samples(block), target_rate));
            });
        }));

        if let Err(e) = started {
            running.store(false, Ordering::SeqCst);
            track.stop();
            return Err(e);
        }

        Ok(Self {
            track: Some(track),
            running,
        })
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Relaxed)
    }

    /// Disconnect the framing stage and release the microphone. Idempotent.
    pub fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(mut track) = self.track.take() {
            track.stop();
            log::info!("Capture stopped");
        }
    }
}

impl Drop for CapturePipeline {
    fn drop(&mut self) {
        self.stop();
    }
}
