//! Transport hook contract.
//!
//! A transport moves raw payloads tagged with a channel name. Ingress is the
//! transport's job too: whenever bytes arrive for a channel it must call
//! [`Messenger::register_incoming_message`](crate::Messenger::register_incoming_message).

use async_trait::async_trait;
use thiserror::Error;

use crate::BoxError;

/// Failure reported by a transport hook.
#[derive(Debug, Error)]
#[error("{message}")]
pub struct TransportError {
    message: String,
    #[source]
    source: Option<BoxError>,
}

impl TransportError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            source: None,
        }
    }

    pub fn with_source(message: impl Into<String>, source: impl Into<BoxError>) -> Self {
        Self {
            message: message.into(),
            source: Some(source.into()),
        }
    }
}

/// Bridge between the messaging core and a concrete wire mechanism.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Best-effort send of `payload` on `channel`.
    async fn send(&self, channel: &str, payload: Vec<u8>) -> Result<(), TransportError>;

    /// Start delivering inbound payloads for `channel`. Called once per channel.
    fn subscribe(&self, channel: &str) -> Result<(), TransportError>;

    /// Stop delivering inbound payloads for `channel`.
    fn unsubscribe(&self, channel: &str) -> Result<(), TransportError>;
}
