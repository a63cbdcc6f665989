use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::{self, protocol::Message};
use tokio_tungstenite::connect_async;
use url::Url;

use crate::audio::codec::TransportChunk;
use crate::config::Config;
use crate::error::TransportError;
use crate::protocol::{ClientMessage, ServerMessage};
use crate::retry::{ErrorClass, RetryPolicy};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const SETUP_TIMEOUT: Duration = Duration::from_secs(15);

/// Lifecycle of one realtime connection. `Closed` and `Error` are terminal.
/// A link only exists once `connect` has been called, so it starts in
/// `Connecting`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportState {
    Connecting,
    Open,
    Closed,
    Error,
}

impl TransportState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Closed | Self::Error)
    }
}

/// Everything the transport reports to its single consumer.
#[derive(Debug)]
pub enum NetEvent {
    Open,
    Message(ServerMessage),
    /// The remote side ended the session cleanly.
    Closed(Option<String>),
    Error(TransportError),
}

#[derive(Debug)]
enum NetCommand {
    SendAudio(TransportChunk),
}

/// Handle to a connection, usable from any thread.
pub trait Link: Send + Sync {
    fn state(&self) -> TransportState;

    /// Forward one frame. Silently dropped unless the link is open.
    /// Never blocks.
    fn send(&self, chunk: TransportChunk);

    /// Terminate from any state, including while still connecting.
    fn close(&self);
}

pub struct Connection {
    pub link: Arc<dyn Link>,
    pub events: mpsc::Receiver<NetEvent>,
}

/// Opens links to the realtime endpoint.
pub trait Connector: Send + Sync {
    /// Begin connecting. Returns immediately in `Connecting`; the outcome
    /// arrives on `events` as `Open` or `Error`.
    fn connect(&self, config: &Config) -> Result<Connection, TransportError>;
}

/// Only accepts transitions out of non-terminal states.
fn transition(state: &watch::Sender<TransportState>, to: TransportState) -> bool {
    state.send_if_modified(|current| {
        if current.is_terminal() || *current == to {
            false
        } else {
            *current = to;
            true
        }
    })
}

/// WebSocket link handle. The socket itself lives in a spawned task.
pub struct NetLink {
    state: Arc<watch::Sender<TransportState>>,
    cmd_tx: mpsc::Sender<NetCommand>,
    shutdown: watch::Sender<bool>,
}

impl NetLink {
    pub fn subscribe_state(&self) -> watch::Receiver<TransportState> {
        self.state.subscribe()
    }
}

impl Link for NetLink {
    fn state(&self) -> TransportState {
        *self.state.borrow()
    }

    fn send(&self, chunk: TransportChunk) {
        if self.state() != TransportState::Open {
            log::debug!("Transport not open, dropping audio frame");
            return;
        }
        match self.cmd_tx.try_send(NetCommand::SendAudio(chunk)) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                log::warn!("Outbound queue full, dropping audio frame");
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                log::debug!("Transport task gone, dropping audio frame");
            }
        }
    }

    fn close(&self) {
        self.shutdown.send_replace(true);
        if transition(&self.state, TransportState::Closed) {
            log::info!("Transport closed locally");
        }
    }
}

impl Drop for NetLink {
    fn drop(&mut self) {
        self.close();
    }
}

/// Connector for the hosted realtime WebSocket endpoint.
#[derive(Debug, Default, Clone)]
pub struct WsConnector;

impl Connector for WsConnector {
    fn connect(&self, config: &Config) -> Result<Connection, TransportError> {
        let api_key = config
            .api_key
            .clone()
            .ok_or_else(|| TransportError::Auth("no API key configured".into()))?;
        let endpoint = build_endpoint(&config.ws_url, &api_key)?;

        let (state_tx, _) = watch::channel(TransportState::Connecting);
        let state = Arc::new(state_tx);
        let (cmd_tx, cmd_rx) = mpsc::channel(config.outbound_queue.max(1));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (event_tx, event_rx) = mpsc::channel(100);

        let task = LinkTask {
            endpoint,
            model: config.model.clone(),
            voice: config.voice.clone(),
            system_instruction: config.system_instruction.clone(),
            retry: config.retry_policy(),
            state: state.clone(),
            cmd_rx,
            shutdown: shutdown_rx,
            events: event_tx,
        };
        tokio::spawn(task.run());

        let link = NetLink {
            state,
            cmd_tx,
            shutdown: shutdown_tx,
        };
        Ok(Connection {
            link: Arc::new(link),
            events: event_rx,
        })
    }
}

fn build_endpoint(ws_url: &str, api_key: &str) -> Result<Url, TransportError> {
    let mut url = Url::parse(ws_url).map_err(|e| TransportError::InvalidEndpoint(e.to_string()))?;
    if !matches!(url.scheme(), "ws" | "wss") {
        return Err(TransportError::InvalidEndpoint(format!(
            "unsupported scheme '{}'",
            url.scheme()
        )));
    }
    url.query_pairs_mut().append_pair("key", api_key);
    Ok(url)
}

/// Map a handshake failure onto the transport taxonomy.
fn classify_ws_error(e: tungstenite::Error) -> TransportError {
    match e {
        tungstenite::Error::Http(ref response) => {
            let status = response.status();
            if status.as_u16() == 401 || status.as_u16() == 403 {
                TransportError::Auth(format!("HTTP {}", status))
            } else if status.is_client_error() {
                TransportError::Rejected(format!("HTTP {}", status))
            } else {
                TransportError::Connection(format!("HTTP {}", status))
            }
        }
        other => TransportError::Connection(other.to_string()),
    }
}

/// The endpoint reports a bad key by closing the socket during setup.
fn setup_rejection(reason: Option<String>) -> TransportError {
    let reason = reason.unwrap_or_else(|| "closed during setup".into());
    let lower = reason.to_lowercase();
    if lower.contains("api key") || lower.contains("permission") || lower.contains("unauthorized") {
        TransportError::Auth(reason)
    } else {
        TransportError::Rejected(reason)
    }
}

pub fn retry_class(e: &TransportError) -> ErrorClass {
    match e {
        TransportError::Connection(_) => ErrorClass::Retryable,
        _ => ErrorClass::Fatal,
    }
}

/// How the socket loop ended without an error.
enum LinkExit {
    Local,
    Remote(Option<String>),
}

struct LinkTask {
    endpoint: Url,
    model: String,
    voice: String,
    system_instruction: String,
    retry: RetryPolicy,
    state: Arc<watch::Sender<TransportState>>,
    cmd_rx: mpsc::Receiver<NetCommand>,
    shutdown: watch::Receiver<bool>,
    events: mpsc::Sender<NetEvent>,
}

async fn shutdown_requested(rx: &mut watch::Receiver<bool>) {
    loop {
        if *rx.borrow_and_update() {
            return;
        }
        if rx.changed().await.is_err() {
            return;
        }
    }
}

impl LinkTask {
    async fn run(mut self) {
        let outcome = self.connect_and_loop().await;
        match outcome {
            Ok(LinkExit::Local) => {
                transition(&self.state, TransportState::Closed);
            }
            Ok(LinkExit::Remote(reason)) => {
                if transition(&self.state, TransportState::Closed) {
                    log::info!("Server closed connection: {:?}", reason);
                    let _ = self.events.send(NetEvent::Closed(reason)).await;
                }
            }
            Err(e) => {
                if transition(&self.state, TransportState::Error) {
                    log::error!("Transport error: {}", e);
                    let _ = self.events.send(NetEvent::Error(e)).await;
                }
            }
        }
    }

    async fn dial(&self) -> Result<WsStream, TransportError> {
        let endpoint = self.endpoint.clone();
        self.retry
            .run(
                |attempt| {
                    let endpoint = endpoint.clone();
                    async move {
                        log::info!(
                            "Connecting to {}://{}{} (attempt {})...",
                            endpoint.scheme(),
                            endpoint.host_str().unwrap_or_default(),
                            endpoint.path(),
                            attempt
                        );
                        let request = endpoint
                            .as_str()
                            .into_client_request()
                            .map_err(|e| TransportError::InvalidEndpoint(e.to_string()))?;
                        match tokio::time::timeout(CONNECT_TIMEOUT, connect_async(request)).await {
                            Ok(Ok((ws_stream, _))) => Ok(ws_stream),
                            Ok(Err(e)) => Err(classify_ws_error(e)),
                            Err(_) => Err(TransportError::Connection("connect timed out".into())),
                        }
                    }
                },
                retry_class,
            )
            .await
    }

    async fn connect_and_loop(&mut self) -> Result<LinkExit, TransportError> {
        let mut shutdown = self.shutdown.clone();
        let ws_stream = tokio::select! {
            res = self.dial() => res?,
            _ = shutdown_requested(&mut shutdown) => return Ok(LinkExit::Local),
        };
        log::info!("Connected!");

        let (mut write, mut read) = ws_stream.split();

        let setup = ClientMessage::setup(&self.model, &self.voice, &self.system_instruction);
        let setup_json = serde_json::to_string(&setup)?;
        log::debug!("Sending setup: {}", setup_json);
        write
            .send(Message::Text(setup_json.into()))
            .await
            .map_err(|e| TransportError::Connection(e.to_string()))?;

        // 等待 setupComplete 后才算真正打开
        let closed_early = tokio::select! {
            res = tokio::time::timeout(SETUP_TIMEOUT, wait_setup_complete(&mut read)) => {
                res.map_err(|_| TransportError::Rejected("no setupComplete from server".into()))??
            }
            _ = shutdown_requested(&mut shutdown) => {
                let _ = write.send(Message::Close(None)).await;
                return Ok(LinkExit::Local);
            }
        };
        if let Some(reason) = closed_early {
            return Err(setup_rejection(reason));
        }

        if !transition(&self.state, TransportState::Open) {
            // closed locally while the handshake finished
            let _ = write.send(Message::Close(None)).await;
            return Ok(LinkExit::Local);
        }
        log::info!("Session open");
        if self.events.send(NetEvent::Open).await.is_err() {
            return Ok(LinkExit::Local);
        }

        // 主循环，处理读取和写入
        loop {
            tokio::select! {
                msg = read.next() => {
                    match msg {
                        Some(Ok(msg)) => match frame_text(msg)? {
                            FrameText::Text(text) => match ServerMessage::parse(&text) {
                                Ok(parsed) => {
                                    if self.events.send(NetEvent::Message(parsed)).await.is_err() {
                                        return Ok(LinkExit::Local);
                                    }
                                }
                                Err(e) => log::warn!("Dropping unparseable server frame: {}", e),
                            },
                            FrameText::Close(reason) => return Ok(LinkExit::Remote(reason)),
                            FrameText::Skip => {}
                        },
                        Some(Err(e)) => return Err(TransportError::Connection(e.to_string())),
                        None => return Ok(LinkExit::Remote(None)),
                    }
                }
                Some(cmd) = self.cmd_rx.recv() => {
                    match cmd {
                        NetCommand::SendAudio(chunk) => {
                            let json = serde_json::to_string(&ClientMessage::audio(chunk))?;
                            write
                                .send(Message::Text(json.into()))
                                .await
                                .map_err(|e| TransportError::Connection(e.to_string()))?;
                        }
                    }
                }
                _ = shutdown_requested(&mut shutdown) => {
                    let _ = write.send(Message::Close(None)).await;
                    return Ok(LinkExit::Local);
                }
            }
        }
    }
}

type WsStream =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;
type WsSource = futures_util::stream::SplitStream<WsStream>;

/// Read until `setupComplete`. `Some(reason)` means the server hung up first.
async fn wait_setup_complete(read: &mut WsSource) -> Result<Option<Option<String>>, TransportError> {
    loop {
        match read.next().await {
            Some(Ok(msg)) => match frame_text(msg)? {
                FrameText::Text(text) => match ServerMessage::parse(&text) {
                    Ok(msg) if msg.is_setup_complete() => return Ok(None),
                    Ok(_) => log::debug!("Ignoring frame before setupComplete"),
                    Err(e) => log::warn!("Unparseable frame during setup: {}", e),
                },
                FrameText::Close(reason) => return Ok(Some(reason)),
                FrameText::Skip => {}
            },
            Some(Err(e)) => return Err(TransportError::Connection(e.to_string())),
            None => return Ok(Some(None)),
        }
    }
}

enum FrameText {
    Text(String),
    Close(Option<String>),
    Skip,
}

/// The endpoint sends JSON both as text and as binary frames.
fn frame_text(msg: Message) -> Result<FrameText, TransportError> {
    match msg {
        Message::Text(text) => Ok(FrameText::Text(text.to_string())),
        Message::Binary(data) => String::from_utf8(data.to_vec())
            .map(FrameText::Text)
            .map_err(|e| TransportError::Protocol(format!("invalid UTF-8 in binary frame: {}", e))),
        Message::Close(frame) => Ok(FrameText::Close(
            frame.map(|f| f.reason.to_string()).filter(|r| !r.is_empty()),
        )),
        _ => Ok(FrameText::Skip),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_carries_key() {
        let url = build_endpoint("wss://example.com/ws/live", "abc 123").unwrap();
        assert_eq!(url.as_str(), "wss://example.com/ws/live?key=abc+123");
        assert!(build_endpoint("https://example.com", "k").is_err());
        assert!(build_endpoint("not a url", "k").is_err());
    }

    #[test]
    fn terminal_states_are_sticky() {
        let (tx, _rx) = watch::channel(TransportState::Connecting);
        assert!(transition(&tx, TransportState::Open));
        assert!(transition(&tx, TransportState::Closed));
        assert!(!transition(&tx, TransportState::Error));
        assert_eq!(*tx.borrow(), TransportState::Closed);
    }

    #[test]
    fn only_connection_errors_are_retried() {
        assert_eq!(retry_class(&TransportError::Connection("reset".into())), ErrorClass::Retryable);
        assert_eq!(retry_class(&TransportError::Auth("401".into())), ErrorClass::Fatal);
        assert_eq!(retry_class(&TransportError::Rejected("400".into())), ErrorClass::Fatal);
    }

    #[test]
    fn setup_close_reason_is_classified() {
        assert!(matches!(
            setup_rejection(Some("API key not valid. Please pass a valid API key.".into())),
            TransportError::Auth(_)
        ));
        assert!(matches!(setup_rejection(None), TransportError::Rejected(_)));
    }

    #[tokio::test]
    async fn missing_key_fails_fast() {
        let mut config = Config::new().unwrap();
        config.api_key = None;
        let err = WsConnector.connect(&config).err().unwrap();
        assert!(matches!(err, TransportError::Auth(_)));
    }

    #[tokio::test]
    async fn close_while_connecting_is_clean() {
        let mut config = Config::new().unwrap();
        config.api_key = Some("test".into());
        // Unroutable address keeps the dial pending.
        config.ws_url = "ws://10.255.255.1:9/live".into();
        let Connection { link, mut events } = WsConnector.connect(&config).unwrap();
        assert_eq!(link.state(), TransportState::Connecting);

        link.close();
        assert_eq!(link.state(), TransportState::Closed);
        link.send(TransportChunk::pcm("AAAA".into(), 16000));

        // The task exits without reporting an error.
        let next = tokio::time::timeout(Duration::from_secs(2), events.recv()).await;
        assert!(matches!(next, Ok(None)));
    }
}
