pub mod audio;
pub mod config;
pub mod controller;
pub mod credentials;
pub mod error;
pub mod net_link;
pub mod protocol;
pub mod retry;
pub mod viewport;

pub use config::Config;
pub use controller::{LiveSessionManager, LiveStatus};
pub use error::{AudioError, LiveError, TransportError, ViewportError};
