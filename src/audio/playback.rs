//! Gapless, interruption-aware scheduling of decoded chunks.

use std::collections::HashSet;
use std::sync::Arc;

use parking_lot::Mutex;

use super::codec::AudioChunk;
use super::device::{OutputPipeline, SourceId};
use crate::error::AudioError;

/// Schedules chunks back-to-back on an [`OutputPipeline`] in arrival order.
///
/// Each chunk starts at `max(next_start_time, clock)`; the cursor then
/// moves forward by the chunk's duration. Handles are tracked until they
/// finish or are stopped.
pub struct PlaybackScheduler {
    pipeline: Arc<dyn OutputPipeline>,
    next_start_time: f64,
    active: Arc<Mutex<HashSet<SourceId>>>,
    released: bool,
}

impl PlaybackScheduler {
    pub fn new(pipeline: Arc<dyn OutputPipeline>) -> Self {
        Self {
            pipeline,
            next_start_time: 0.0,
            active: Arc::new(Mutex::new(HashSet::new())),
            released: false,
        }
    }

    /// Schedule `chunk` right after everything already queued.
    /// Returns the start time it was given on the output clock.
    pub fn enqueue(&mut self, chunk: AudioChunk) -> Result<f64, AudioError> {
        if self.released {
            return Err(AudioError::PipelineClosed);
        }
        let start = self.next_start_time.max(self.pipeline.current_time());
        let duration = chunk.duration();

        // Held across start_source so a completion racing in from the render
        // thread cannot run before the id is registered.
        let mut active = self.active.lock();
        let registry = Arc::downgrade(&self.active);
        let scheduled = self.pipeline.start_source(
            Arc::new(chunk),
            start,
            Box::new(move |id| {
                if let Some(registry) = registry.upgrade() {
                    registry.lock().remove(&id);
                }
            }),
        )?;
        active.insert(scheduled.id);
        drop(active);

        // The clock may have moved since `start` was read.
        self.next_start_time = scheduled.start + duration;
        Ok(scheduled.start)
    }

    /// Barge-in: stop everything that is playing or queued and restart the
    /// cursor so the next chunk lines up with the current clock.
    pub fn interrupt(&mut self) {
        let stopped = self.stop_all();
        self.next_start_time = 0.0;
        if stopped > 0 {
            log::info!("Playback interrupted, {} source(s) flushed", stopped);
        }
    }

    /// Stop everything and release the output pipeline. Idempotent.
    pub fn teardown(&mut self) {
        if self.released {
            return;
        }
        self.stop_all();
        self.next_start_time = 0.0;
        self.pipeline.close();
        self.released = true;
        log::info!("Playback pipeline released");
    }

    pub fn active_count(&self) -> usize {
        self.active.lock().len()
    }

    pub fn active_ids(&self) -> Vec<SourceId> {
        self.active.lock().iter().copied().collect()
    }

    pub fn next_start_time(&self) -> f64 {
        self.next_start_time
    }

    pub fn current_time(&self) -> f64 {
        self.pipeline.current_time()
    }

    fn stop_all(&mut self) -> usize {
        let ids: Vec<SourceId> = self.active.lock().drain().collect();
        for &id in &ids {
            self.pipeline.stop_source(id);
        }
        ids.len()
    }
}

impl Drop for PlaybackScheduler {
    fn drop(&mut self) {
        self.teardown();
    }
}
