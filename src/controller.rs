//! Live session manager: owns the single active session and wires
//! microphone → transport → playback.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::audio::capture::{CaptureConfig, CapturePipeline};
use crate::audio::codec::{decode_transport, pcm_to_chunk};
use crate::audio::device::{AudioBackend, MicTrack};
use crate::audio::playback::PlaybackScheduler;
use crate::config::Config;
use crate::credentials::KeySelector;
use crate::error::{AudioError, LiveError, LiveResult, TransportError};
use crate::net_link::{Connection, Connector, Link, NetEvent};
use crate::protocol::ServerMessage;
use crate::retry::{ErrorClass, RetryPolicy};

/// What the caller of [`LiveSessionManager::start`] gets told.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LiveStatus {
    /// No session. Reported once a session has been stopped.
    Idle,
    Connecting,
    /// Audio flows both ways.
    Connected,
    /// Unrecoverable; the session has already been torn down.
    Error,
    /// The remote side ended the session.
    Disconnected,
}

pub type StatusCallback = Arc<dyn Fn(LiveStatus) + Send + Sync>;

/// Everything one session holds. Any field may still be empty when the
/// session is torn down part way through `start`.
struct ActiveSession {
    id: u64,
    tag: Uuid,
    on_status: StatusCallback,
    mic: Option<Box<dyn MicTrack>>,
    capture: Option<CapturePipeline>,
    playback: Option<Arc<Mutex<PlaybackScheduler>>>,
    link: Option<Arc<dyn Link>>,
    task: Option<JoinHandle<()>>,
}

impl ActiveSession {
    fn new(id: u64, on_status: StatusCallback) -> Self {
        Self {
            id,
            tag: Uuid::new_v4(),
            on_status,
            mic: None,
            capture: None,
            playback: None,
            link: None,
            task: None,
        }
    }

    /// Release everything in dependency order. Hands back the coordination
    /// task so the caller decides whether to abort it.
    fn teardown(mut self) -> Option<JoinHandle<()>> {
        if let Some(mut capture) = self.capture.take() {
            capture.stop();
        }
        if let Some(mut mic) = self.mic.take() {
            mic.stop();
        }
        if let Some(playback) = self.playback.take() {
            playback.lock().teardown();
        }
        if let Some(link) = self.link.take() {
            link.close();
        }
        log::info!("Live session {} torn down", self.tag);
        self.task.take()
    }
}

struct Slot {
    next_id: u64,
    active: Option<ActiveSession>,
}

impl Slot {
    fn take_if(&mut self, id: u64) -> Option<ActiveSession> {
        if self.active.as_ref().is_some_and(|s| s.id == id) {
            self.active.take()
        } else {
            None
        }
    }
}

struct Inner {
    config: Mutex<Config>,
    backend: Arc<dyn AudioBackend>,
    connector: Arc<dyn Connector>,
    key_selector: Option<Arc<dyn KeySelector>>,
    slot: Mutex<Slot>,
}

/// Owns at most one live session at a time.
///
/// `start` replaces whatever session is running; `stop` tears it down. Both
/// are safe to call in any order and any number of times. Dropping the
/// manager tears down the running session as well.
pub struct LiveSessionManager {
    inner: Arc<Inner>,
}

fn emit(tag: &Uuid, on_status: &StatusCallback, status: LiveStatus) {
    log::info!("Live session {}: {:?}", tag, status);
    on_status(status);
}

impl LiveSessionManager {
    pub fn new(
        config: Config,
        backend: Arc<dyn AudioBackend>,
        connector: Arc<dyn Connector>,
        key_selector: Option<Arc<dyn KeySelector>>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                config: Mutex::new(config),
                backend,
                connector,
                key_selector,
                slot: Mutex::new(Slot {
                    next_id: 0,
                    active: None,
                }),
            }),
        }
    }

    /// Start a new session, replacing any running one.
    ///
    /// Failures never escape: they are reported as [`LiveStatus::Error`]
    /// through `on_status` and the partial session is torn down.
    pub async fn start<F>(&self, on_status: F)
    where
        F: Fn(LiveStatus) + Send + Sync + 'static,
    {
        self.stop().await;

        let on_status: StatusCallback = Arc::new(on_status);
        let session = {
            let mut slot = self.inner.slot.lock();
            slot.next_id += 1;
            let session = ActiveSession::new(slot.next_id, on_status.clone());
            let (id, tag) = (session.id, session.tag);
            // a concurrent start may have slipped in since stop()
            let previous = slot.active.replace(session);
            (id, tag, previous)
        };
        let (id, tag, previous) = session;
        if let Some(previous) = previous {
            retire(previous).await;
        }
        emit(&tag, &on_status, LiveStatus::Connecting);

        match self.inner.setup(id).await {
            Ok(()) => {}
            Err(LiveError::Superseded) => {
                log::info!("Live session {} superseded during start", tag);
            }
            Err(e) => {
                log::error!("Live session {} failed to start: {}", tag, e);
                self.inner.finish(id, LiveStatus::Error);
            }
        }
    }

    /// Tear down the active session, if any. Idempotent.
    pub async fn stop(&self) {
        let session = self.inner.slot.lock().active.take();
        if let Some(session) = session {
            retire(session).await;
        }
    }

    pub fn is_active(&self) -> bool {
        self.inner.slot.lock().active.is_some()
    }

    /// Log tag of the active session.
    pub fn session_tag(&self) -> Option<Uuid> {
        self.inner.slot.lock().active.as_ref().map(|s| s.tag)
    }
}

impl Drop for LiveSessionManager {
    fn drop(&mut self) {
        // 协调任务持有 Inner，会话必须在这里收掉，否则麦克风和连接会一直占着
        let session = self.inner.slot.lock().active.take();
        if let Some(session) = session {
            let tag = session.tag;
            let on_status = session.on_status.clone();
            if let Some(task) = session.teardown() {
                task.abort();
            }
            emit(&tag, &on_status, LiveStatus::Idle);
        }
    }
}

/// Tear down a session that was removed from the slot and report `Idle`.
async fn retire(session: ActiveSession) {
    let tag = session.tag;
    let on_status = session.on_status.clone();
    if let Some(task) = session.teardown() {
        task.abort();
        let _ = task.await;
    }
    emit(&tag, &on_status, LiveStatus::Idle);
}

impl Inner {
    /// Run `f` on the session if `id` is still the active one.
    fn with_current<R>(&self, id: u64, f: impl FnOnce(&mut ActiveSession) -> R) -> Option<R> {
        let mut slot = self.slot.lock();
        slot.active.as_mut().filter(|s| s.id == id).map(f)
    }

    fn ensure_current(&self, id: u64) -> LiveResult<()> {
        self.with_current(id, |_| ()).ok_or(LiveError::Superseded)
    }

    fn refreshed_config(&self) -> Config {
        let mut config = self.config.lock();
        if !config.refresh_credentials() {
            log::warn!("No API credential available");
        }
        config.clone()
    }

    /// Report `status` to the session's owner if it is still current.
    fn report(&self, id: u64, status: LiveStatus) -> LiveResult<()> {
        let (tag, on_status) = self
            .with_current(id, |s| (s.tag, s.on_status.clone()))
            .ok_or(LiveError::Superseded)?;
        emit(&tag, &on_status, status);
        Ok(())
    }

    /// Remove the session, tear it down and report `status`.
    /// Does nothing if `id` has already been replaced or stopped.
    fn finish(&self, id: u64, status: LiveStatus) {
        let session = self.slot.lock().take_if(id);
        if let Some(session) = session {
            let tag = session.tag;
            let on_status = session.on_status.clone();
            // From inside the coordination task this is our own handle; dropping it only detaches.
            drop(session.teardown());
            emit(&tag, &on_status, status);
        }
    }

    async fn select_key_if_needed(&self) -> LiveResult<()> {
        let Some(selector) = &self.key_selector else {
            return Ok(());
        };
        if !selector.has_selected_key().await {
            log::info!("No API key selected, opening key selection");
            selector
                .open_select_key()
                .await
                .map_err(LiveError::CredentialSelection)?;
        }
        Ok(())
    }

    async fn setup(self: &Arc<Self>, id: u64) -> LiveResult<()> {
        // 1. 凭证
        self.select_key_if_needed().await?;
        self.ensure_current(id)?;
        let config = self.refreshed_config();

        // 2. 输出
        let output = self.backend.open_output()?;
        let playback = Arc::new(Mutex::new(PlaybackScheduler::new(output)));
        if self
            .with_current(id, |s| s.playback = Some(playback.clone()))
            .is_none()
        {
            playback.lock().teardown();
            return Err(LiveError::Superseded);
        }

        // 3. 麦克风
        let mut mic = Some(self.backend.acquire_microphone().await?);
        if self.with_current(id, |s| s.mic = mic.take()).is_none() {
            if let Some(mut mic) = mic {
                mic.stop();
            }
            return Err(LiveError::Superseded);
        }

        // 4. 连接
        let has_selector = self.key_selector.is_some();
        let (link, events) = RetryPolicy::once()
            .run(
                |attempt| self.connect_attempt(id, attempt),
                |e| match e {
                    LiveError::Transport(TransportError::Auth(_)) if has_selector => {
                        ErrorClass::Retryable
                    }
                    _ => ErrorClass::Fatal,
                },
            )
            .await?;

        // 5. 采集
        let capture_config = CaptureConfig {
            frame_size: config.frame_size,
            target_rate: config.input_sample_rate,
        };
        let mic = self
            .with_current(id, |s| s.mic.take())
            .ok_or(LiveError::Superseded)?
            .ok_or_else(|| AudioError::device("microphone released before capture"))?;
        let sender = link.clone();
        let mut capture = Some(CapturePipeline::start(
            mic,
            capture_config,
            Box::new(move |chunk| sender.send(chunk)),
        )?);
        if self.with_current(id, |s| s.capture = capture.take()).is_none() {
            if let Some(mut capture) = capture {
                capture.stop();
            }
            return Err(LiveError::Superseded);
        }
        self.report(id, LiveStatus::Connected)?;

        // 6. 协调任务
        let mut task = Some(tokio::spawn(self.clone().coordinate(
            id,
            events,
            playback,
            config.output_sample_rate,
        )));
        if self.with_current(id, |s| s.task = task.take()).is_none() {
            if let Some(task) = task {
                task.abort();
            }
            return Err(LiveError::Superseded);
        }
        Ok(())
    }

    /// One connect attempt, resolved once the transport reports `Open`.
    /// Attempts after the first re-open key selection.
    async fn connect_attempt(
        &self,
        id: u64,
        attempt: u32,
    ) -> LiveResult<(Arc<dyn Link>, mpsc::Receiver<NetEvent>)> {
        if attempt > 1 {
            if let Some(selector) = &self.key_selector {
                log::info!("Credential rejected, reopening key selection");
                selector
                    .open_select_key()
                    .await
                    .map_err(LiveError::CredentialSelection)?;
            }
            self.ensure_current(id)?;
        }

        let config = self.refreshed_config();
        let Connection { link, mut events } = self.connector.connect(&config)?;
        match self.with_current(id, |s| s.link.replace(link.clone())) {
            Some(Some(stale)) => stale.close(),
            Some(None) => {}
            None => {
                link.close();
                return Err(LiveError::Superseded);
            }
        }

        loop {
            match events.recv().await {
                Some(NetEvent::Open) => {
                    self.ensure_current(id)?;
                    return Ok((link, events));
                }
                Some(NetEvent::Message(_)) => log::debug!("Ignoring message before open"),
                Some(NetEvent::Closed(reason)) => {
                    return Err(TransportError::Rejected(
                        reason.unwrap_or_else(|| "closed before open".into()),
                    )
                    .into());
                }
                Some(NetEvent::Error(e)) => return Err(e.into()),
                None => {
                    self.ensure_current(id)?;
                    return Err(TransportError::Connection("transport ended before open".into()).into());
                }
            }
        }
    }

    /// Consume transport events for one session until it ends.
    async fn coordinate(
        self: Arc<Self>,
        id: u64,
        mut events: mpsc::Receiver<NetEvent>,
        playback: Arc<Mutex<PlaybackScheduler>>,
        default_rate: u32,
    ) {
        while let Some(event) = events.recv().await {
            match event {
                NetEvent::Open => log::debug!("Duplicate open event ignored"),
                NetEvent::Message(msg) => {
                    route_message(&playback, &msg, default_rate);
                }
                NetEvent::Closed(reason) => {
                    log::info!("Remote closed the live session: {:?}", reason);
                    self.finish(id, LiveStatus::Disconnected);
                    return;
                }
                NetEvent::Error(e) => {
                    log::error!("Live session transport error: {}", e);
                    self.finish(id, LiveStatus::Error);
                    return;
                }
            }
        }
        self.finish(id, LiveStatus::Disconnected);
    }
}

/// Apply one inbound message to playback: schedule its audio in order, then
/// honour `interrupted`. Returns how many chunks were scheduled.
///
/// A payload that fails to decode is dropped on its own; the session goes on.
pub fn route_message(
    playback: &Mutex<PlaybackScheduler>,
    msg: &ServerMessage,
    default_rate: u32,
) -> usize {
    let mut scheduled = 0;
    for payload in msg.audio_payloads() {
        let rate = payload.sample_rate().unwrap_or(default_rate);
        let chunk = match decode_transport(&payload.data).and_then(|bytes| pcm_to_chunk(&bytes, rate, 1)) {
            Ok(chunk) => chunk,
            Err(e) => {
                log::warn!("Dropping undecodable audio payload: {}", e);
                continue;
            }
        };
        match playback.lock().enqueue(chunk) {
            Ok(_) => scheduled += 1,
            Err(e) => log::debug!("Audio chunk not scheduled: {}", e),
        }
    }

    if msg.is_interrupted() {
        playback.lock().interrupt();
    }

    for text in msg.texts() {
        log::info!("Model: {}", text);
    }
    if msg.is_turn_complete() {
        log::debug!("Model turn complete");
    }
    if let Some(go_away) = &msg.go_away {
        log::warn!("Server going away, time left: {:?}", go_away.time_left);
    }
    if let Some(usage) = &msg.usage_metadata {
        log::debug!("Usage: {}", usage);
    }
    scheduled
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::codec::encode_samples;
    use crate::audio::timeline::Timeline;

    fn audio_message(frames: usize, interrupted: bool) -> ServerMessage {
        let data = encode_samples(&vec![0.25; frames]);
        ServerMessage::parse(&format!(
            r#"{{"serverContent":{{"interrupted":{},"modelTurn":{{"parts":[
                {{"inlineData":{{"mimeType":"audio/pcm;rate=1000","data":"{}"}}}}]}}}}}}"#,
            interrupted, data
        ))
        .unwrap()
    }

    fn playback() -> (Arc<Timeline>, Mutex<PlaybackScheduler>) {
        let timeline = Arc::new(Timeline::new(1000, 1));
        let scheduler = PlaybackScheduler::new(timeline.clone());
        (timeline, Mutex::new(scheduler))
    }

    #[test]
    fn audio_is_scheduled_in_arrival_order() {
        let (timeline, playback) = playback();
        for frames in [100, 50, 200] {
            assert_eq!(route_message(&playback, &audio_message(frames, false), 24000), 1);
        }
        let spans = timeline.scheduled();
        assert_eq!(spans.len(), 3);
        assert_eq!(spans[0].1, 0);
        assert_eq!(spans[1].1, spans[0].2);
        assert_eq!(spans[2].1, spans[1].2);
    }

    #[test]
    fn interrupt_wins_over_audio_in_the_same_message() {
        let (timeline, playback) = playback();
        route_message(&playback, &audio_message(100, false), 24000);
        route_message(&playback, &audio_message(100, true), 24000);
        assert_eq!(playback.lock().active_count(), 0);
        assert_eq!(timeline.pending_sources(), 0);
    }

    #[test]
    fn bad_payload_is_dropped_alone() {
        let (timeline, playback) = playback();
        let good = encode_samples(&[0.1; 10]);
        let msg = ServerMessage::parse(&format!(
            r#"{{"serverContent":{{"modelTurn":{{"parts":[
                {{"inlineData":{{"mimeType":"audio/pcm","data":"!!not base64!!"}}}},
                {{"inlineData":{{"mimeType":"audio/pcm","data":"AAAA"}}}},
                {{"inlineData":{{"mimeType":"audio/pcm","data":"{}"}}}}]}}}}}}"#,
            good
        ))
        .unwrap();
        assert_eq!(route_message(&playback, &msg, 1000), 1);
        assert_eq!(timeline.pending_sources(), 1);
    }

    #[test]
    fn missing_rate_falls_back_to_default() {
        let (timeline, playback) = playback();
        let data = encode_samples(&[0.1; 2000]);
        let msg = ServerMessage::parse(&format!(
            r#"{{"serverContent":{{"modelTurn":{{"parts":[{{"inlineData":{{"data":"{}"}}}}]}}}}}}"#,
            data
        ))
        .unwrap();
        route_message(&playback, &msg, 2000);
        // 2000 frames at 2 kHz resampled onto a 1 kHz timeline
        let spans = timeline.scheduled();
        assert_eq!(spans[0].2 - spans[0].1, 1000);
    }
}
