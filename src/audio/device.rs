//! Seams between the pipelines and whatever hardware is driving them.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use super::codec::AudioChunk;
use super::timeline::{Timeline, spawn_clock_driver};
use crate::error::AudioError;

/// Identifier of one scheduled playback source.
pub type SourceId = u64;

/// Where a source landed on the output clock.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScheduledSource {
    pub id: SourceId,
    /// Start in seconds; never earlier than the clock at scheduling time.
    pub start: f64,
}

/// Fired exactly once when a source finishes or is stopped.
pub type EndedCallback = Box<dyn FnOnce(SourceId) + Send>;

/// Receives raw mono samples on the host audio thread. Must not block.
pub type SampleSink = Box<dyn FnMut(&[f32]) + Send>;

/// An output graph with its own clock.
///
/// Implementations must never invoke an [`EndedCallback`] from inside
/// `start_source`; completions are reported from the render side or from
/// `stop_source`/`close`.
pub trait OutputPipeline: Send + Sync {
    /// Current position of the output clock in seconds.
    fn current_time(&self) -> f64;

    /// Schedule `chunk` to start at `when` seconds on the output clock.
    /// A `when` the clock has already passed is moved up to the clock; the
    /// returned start is the one actually used.
    fn start_source(
        &self,
        chunk: Arc<AudioChunk>,
        when: f64,
        on_ended: EndedCallback,
    ) -> Result<ScheduledSource, AudioError>;

    /// Stop a source immediately. Unknown ids are ignored.
    fn stop_source(&self, id: SourceId);

    /// Stop everything and release the device. Idempotent.
    fn close(&self);
}

/// An acquired microphone track.
pub trait MicTrack: Send {
    /// Rate of the samples handed to the sink.
    fn sample_rate(&self) -> u32;

    /// Begin delivering samples to `sink`.
    fn start(&mut self, sink: SampleSink) -> Result<(), AudioError>;

    /// Release the track. Must be idempotent and never panic.
    fn stop(&mut self);
}

/// Source of microphones and output pipelines for a live session.
#[async_trait]
pub trait AudioBackend: Send + Sync {
    /// Ask the host for the microphone. Permission problems map to
    /// [`AudioError::PermissionDenied`].
    async fn acquire_microphone(&self) -> Result<Box<dyn MicTrack>, AudioError>;

    /// Create a fresh output pipeline for one session.
    fn open_output(&self) -> Result<Arc<dyn OutputPipeline>, AudioError>;
}

/// Backend used when no sound hardware support is compiled in.
///
/// Output runs on a software clock so playback scheduling still behaves;
/// there is no microphone.
pub struct HeadlessBackend {
    sample_rate: u32,
    channels: usize,
}

impl HeadlessBackend {
    pub fn new(sample_rate: u32, channels: usize) -> Self {
        Self { sample_rate, channels }
    }
}

#[async_trait]
impl AudioBackend for HeadlessBackend {
    async fn acquire_microphone(&self) -> Result<Box<dyn MicTrack>, AudioError> {
        Err(AudioError::device(
            "no capture device available (build with --features alsa)",
        ))
    }

    fn open_output(&self) -> Result<Arc<dyn OutputPipeline>, AudioError> {
        let timeline = Arc::new(Timeline::new(self.sample_rate, self.channels));
        spawn_clock_driver(timeline.clone(), Duration::from_millis(20));
        Ok(timeline)
    }
}
