//! Error types for the live session and the image viewport.

use thiserror::Error;

/// Errors from the audio codec, devices and pipelines.
#[derive(Error, Debug)]
pub enum AudioError {
    /// The host refused access to the microphone.
    #[error("microphone permission denied: {0}")]
    PermissionDenied(String),

    /// No usable input or output device.
    #[error("audio device error: {0}")]
    Device(String),

    /// An inbound payload could not be turned into an audio chunk.
    #[error("audio decode error: {0}")]
    Decode(String),

    /// The output pipeline has already been released.
    #[error("output pipeline closed")]
    PipelineClosed,
}

impl AudioError {
    pub fn decode<S: Into<String>>(msg: S) -> Self {
        Self::Decode(msg.into())
    }

    pub fn device<S: Into<String>>(msg: S) -> Self {
        Self::Device(msg.into())
    }
}

/// Errors from the realtime transport.
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("invalid endpoint: {0}")]
    InvalidEndpoint(String),

    /// The endpoint refused the handshake (HTTP status or setup rejection).
    #[error("handshake rejected: {0}")]
    Rejected(String),

    /// Credential missing or refused by the endpoint.
    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("connection error: {0}")]
    Connection(String),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Failures surfaced by the live session manager.
#[derive(Error, Debug)]
pub enum LiveError {
    #[error("credential selection failed: {0}")]
    CredentialSelection(String),

    #[error(transparent)]
    Audio(#[from] AudioError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    /// `start()` was overtaken by a newer `start()` or a `stop()`.
    #[error("session superseded")]
    Superseded,
}

/// Errors from the viewport commit/export path.
#[derive(Error, Debug)]
pub enum ViewportError {
    /// Crop and compare are mutually exclusive.
    #[error("another viewport mode is active: {0}")]
    ModeBusy(&'static str),

    #[error("not in crop mode")]
    NotCropping,

    #[error("invalid image source: {0}")]
    InvalidSource(String),

    #[error("image has no pixels")]
    EmptyImage,

    #[error("image encode error: {0}")]
    Encode(String),

    #[error("image decode error: {0}")]
    Decode(#[from] image::ImageError),
}

pub type LiveResult<T> = std::result::Result<T, LiveError>;
