//! audio - capture, playback scheduling and the PCM wire codec
//!
//! The live session talks to hardware only through [`device::AudioBackend`].
//! With the `alsa` feature the backend drives the sound card directly;
//! otherwise output runs on a software clock and there is no microphone.

#[cfg(feature = "alsa")]
mod alsa_device;
pub mod capture;
pub mod codec;
pub mod device;
pub mod playback;
pub mod timeline;

use std::sync::Arc;

use crate::config::Config;

#[cfg(feature = "alsa")]
pub use alsa_device::AlsaBackend;
pub use capture::{CaptureConfig, CapturePipeline};
pub use codec::{AudioChunk, TransportChunk};
pub use device::{AudioBackend, HeadlessBackend, MicTrack, OutputPipeline, ScheduledSource};
pub use playback::PlaybackScheduler;
pub use timeline::Timeline;

/// The backend compiled into this build.
pub fn default_backend(config: &Config) -> Arc<dyn AudioBackend> {
    #[cfg(feature = "alsa")]
    {
        Arc::new(AlsaBackend::new(config))
    }
    #[cfg(not(feature = "alsa"))]
    {
        log::warn!("Built without the alsa feature, live sessions have no microphone");
        Arc::new(HeadlessBackend::new(
            config.playback_sample_rate,
            config.playback_channels as usize,
        ))
    }
}
