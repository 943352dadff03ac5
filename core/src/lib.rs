// Courier Core Library
// Typed pub/sub channels and request/reply conversations over any byte transport

pub mod codec;
pub mod config;
pub mod conversation;
pub mod messaging;
pub mod reqresp;
pub mod telemetry;

// Export core types
pub use codec::{Codec, EncodingError, JsonCodec, RawCodec, Utf8Codec};
pub use config::MessengerConfig;
pub use conversation::{
    reply_listener, reply_listener_with_timeout, ConversationChannel, ConversationChannelAgent,
    ConversationChannelListener, ConversationId, ConversationMessage, ConversationReply,
    ConversationReplyListener, RegistrationAction,
};
pub use messaging::{
    Channel, ChannelAgent, ChannelListener, ChannelPublisher, ChannelStats, ListenerId,
    Messenger, Transport, TransportError,
};
pub use reqresp::{ReqRespChannel, ReqRespMessage};

// Error types
use thiserror::Error;

/// Boxed error used where user callbacks report failures of their own type.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

#[derive(Error, Debug)]
pub enum CourierError {
    #[error("Encoding error: {0}")]
    Encoding(#[from] EncodingError),

    #[error("Transport error on channel {channel}: {source}")]
    Transport {
        channel: String,
        #[source]
        source: TransportError,
    },

    #[error("Request timed out: {0}")]
    Timeout(ConversationId),

    #[error("Listener error: {0}")]
    Listener(String),

    #[error("Invalid channel name: {0:?}")]
    InvalidChannelName(String),

    #[error("Channel {name} already registered with type {existing}, requested {requested}")]
    ChannelTypeMismatch {
        name: String,
        existing: &'static str,
        requested: &'static str,
    },

    #[error("Agent is closed")]
    AgentClosed,

    #[error("Channel closed: {0}")]
    ChannelClosed(String),

    #[error("Messenger is closed")]
    MessengerClosed,

    #[error("Conversation already awaiting replies: {0}")]
    ConversationInUse(ConversationId),

    #[error("Message carries no conversation id")]
    MissingConversationId,
}

impl From<serde_json::Error> for CourierError {
    fn from(err: serde_json::Error) -> Self {
        CourierError::Encoding(EncodingError::new(err))
    }
}

pub type Result<T> = std::result::Result<T, CourierError>;
