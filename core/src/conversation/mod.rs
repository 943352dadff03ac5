//! Conversations: request/reply correlation on top of plain channels.
//!
//! A [`ConversationChannel`] pairs an outgoing request channel with a reply
//! channel. Every outgoing request carries a [`ConversationId`]; replies carrying
//! the same id are routed to the listener registered for that request until it
//! stops listening or its timeout fires.

mod agent;
mod channel;
mod pending;
mod reply;

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub use agent::{ConversationChannelAgent, ConversationChannelListener};
pub use channel::ConversationChannel;
pub use reply::{
    reply_listener, reply_listener_with_timeout, ConversationReply, ConversationReplyListener,
    RegistrationAction,
};

/// Correlation token linking replies to the request that caused them (random 128-bit).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConversationId(Uuid);

impl ConversationId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for ConversationId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<Uuid> for ConversationId {
    fn from(id: Uuid) -> Self {
        Self(id)
    }
}

impl FromStr for ConversationId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

impl fmt::Display for ConversationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// A message that can take part in a conversation.
pub trait ConversationMessage: Send + Sync + 'static {
    fn conversation_id(&self) -> Option<ConversationId>;

    fn set_conversation_id(&mut self, id: ConversationId);
}
