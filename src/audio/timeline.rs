//! Sample-accurate output mixer with a frame-counting clock.
//!
//! Sources are resampled and channel-mapped to the device format when they
//! are scheduled, then mixed into whatever window `render` is asked for.
//! The clock only advances when frames are rendered, so whoever drives
//! `render` (an ALSA thread, a tokio ticker, a test) owns time.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::JoinHandle;

use super::codec::{AudioChunk, map_channels, resample_linear};
use super::device::{EndedCallback, OutputPipeline, ScheduledSource, SourceId};
use crate::error::AudioError;

struct Source {
    id: SourceId,
    start_frame: u64,
    /// Planar samples at the timeline rate and channel count.
    samples: Vec<Vec<f32>>,
    on_ended: Option<EndedCallback>,
}

impl Source {
    fn len(&self) -> u64 {
        self.samples.first().map_or(0, |c| c.len() as u64)
    }

    fn end_frame(&self) -> u64 {
        self.start_frame + self.len()
    }
}

struct TimelineState {
    frames_rendered: u64,
    next_id: SourceId,
    sources: Vec<Source>,
    closed: bool,
}

pub struct Timeline {
    sample_rate: u32,
    channels: usize,
    state: Mutex<TimelineState>,
}

impl Timeline {
    pub fn new(sample_rate: u32, channels: usize) -> Self {
        Self {
            sample_rate: sample_rate.max(1),
            channels: channels.max(1),
            state: Mutex::new(TimelineState {
                frames_rendered: 0,
                next_id: 1,
                sources: Vec::new(),
                closed: false,
            }),
        }
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn channels(&self) -> usize {
        self.channels
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    /// Number of sources that have not yet finished.
    pub fn pending_sources(&self) -> usize {
        self.state.lock().sources.len()
    }

    /// Start frame of a scheduled source, if it is still pending.
    pub fn source_start_frame(&self, id: SourceId) -> Option<u64> {
        self.state
            .lock()
            .sources
            .iter()
            .find(|s| s.id == id)
            .map(|s| s.start_frame)
    }

    /// `(id, start_frame, end_frame)` of every pending source, oldest first.
    pub fn scheduled(&self) -> Vec<(SourceId, u64, u64)> {
        let mut spans: Vec<_> = self
            .state
            .lock()
            .sources
            .iter()
            .map(|s| (s.id, s.start_frame, s.end_frame()))
            .collect();
        spans.sort_by_key(|&(id, _, _)| id);
        spans
    }

    /// Mix the next `out.len() / channels` frames into `out` (interleaved)
    /// and advance the clock. Returns the number of frames rendered.
    pub fn render(&self, out: &mut [f32]) -> usize {
        out.iter_mut().for_each(|s| *s = 0.0);
        let frames = out.len() / self.channels;

        let finished: Vec<(SourceId, EndedCallback)> = {
            let mut state = self.state.lock();
            if state.closed {
                return 0;
            }
            let window_start = state.frames_rendered;
            let window_end = window_start + frames as u64;

            for source in &state.sources {
                let from = source.start_frame.max(window_start);
                let to = source.end_frame().min(window_end);
                for frame in from..to {
                    let src_idx = (frame - source.start_frame) as usize;
                    let out_idx = (frame - window_start) as usize * self.channels;
                    for (ch, samples) in source.samples.iter().enumerate() {
                        out[out_idx + ch] += samples[src_idx];
                    }
                }
            }

            state.frames_rendered = window_end;
            take_finished(&mut state.sources, |s| s.end_frame() <= window_end)
        };

        for (id, callback) in finished {
            callback(id);
        }
        frames
    }

    /// Render and discard `frames` frames.
    pub fn advance(&self, frames: usize) {
        let mut scratch = vec![0.0; frames * self.channels];
        self.render(&mut scratch);
    }
}

fn take_finished(
    sources: &mut Vec<Source>,
    done: impl Fn(&Source) -> bool,
) -> Vec<(SourceId, EndedCallback)> {
    let mut finished = Vec::new();
    let mut i = 0;
    while i < sources.len() {
        if done(&sources[i]) {
            let mut source = sources.swap_remove(i);
            if let Some(cb) = source.on_ended.take() {
                finished.push((source.id, cb));
            }
        } else {
            i += 1;
        }
    }
    finished
}

impl OutputPipeline for Timeline {
    fn current_time(&self) -> f64 {
        self.state.lock().frames_rendered as f64 / self.sample_rate as f64
    }

    fn start_source(
        &self,
        chunk: Arc<AudioChunk>,
        when: f64,
        on_ended: EndedCallback,
    ) -> Result<ScheduledSource, AudioError> {
        let resampled: Vec<Vec<f32>> = chunk
            .channels()
            .iter()
            .map(|c| resample_linear(c, chunk.sample_rate(), self.sample_rate))
            .collect();
        let mut samples = map_channels(&resampled, self.channels);

        let rate = self.sample_rate as f64;
        let mut state = self.state.lock();
        if state.closed {
            return Err(AudioError::PipelineClosed);
        }
        // Clamp against the clock under the same lock the render side takes.
        let when = when.max(0.0);
        let requested = (when * rate).round() as u64;
        let (start_frame, start) = if requested >= state.frames_rendered {
            (requested, when)
        } else {
            (state.frames_rendered, state.frames_rendered as f64 / rate)
        };

        // Length comes from the rounded end so a follower starting at
        // `start + duration` begins exactly where this one stops.
        let end_frame = ((start + chunk.duration()) * rate).round() as u64;
        let len = end_frame.saturating_sub(start_frame) as usize;
        for channel in &mut samples {
            let pad = channel.last().copied().unwrap_or(0.0);
            channel.resize(len, pad);
        }

        let id = state.next_id;
        state.next_id += 1;
        state.sources.push(Source {
            id,
            start_frame,
            samples,
            on_ended: Some(on_ended),
        });
        Ok(ScheduledSource { id, start })
    }

    fn stop_source(&self, id: SourceId) {
        let finished = take_finished(&mut self.state.lock().sources, |s| s.id == id);
        for (id, callback) in finished {
            callback(id);
        }
    }

    fn close(&self) {
        let finished = {
            let mut state = self.state.lock();
            state.closed = true;
            take_finished(&mut state.sources, |_| true)
        };
        for (id, callback) in finished {
            callback(id);
        }
    }
}

/// Drive a timeline from a tokio ticker until it is closed.
pub fn spawn_clock_driver(timeline: Arc<Timeline>, tick: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let frames = (timeline.sample_rate() as u128 * tick.as_millis() / 1000).max(1) as usize;
        let mut buf = vec![0.0f32; frames * timeline.channels()];
        let mut interval = tokio::time::interval(tick);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        while !timeline.is_closed() {
            interval.tick().await;
            timeline.render(&mut buf);
        }
        log::debug!("Software output clock stopped");
    })
}
