use tracing::debug;

use super::channel::ConversationChannel;
use super::reply::ConversationReply;
use super::ConversationMessage;
use crate::messaging::{ChannelAgent, ChannelListener, ListenerId};
use crate::{CourierError, Result};

/// Handles requests arriving on a conversation's outgoing channel.
///
/// The returned [`ConversationReply`] decides whether, and when, a reply is sent
/// back under the request's conversation id.
pub trait ConversationChannelListener<T, R>: Send + Sync + 'static {
    fn on_message(&self, agent: &ConversationChannelAgent<T, R>, message: &T) -> ConversationReply<R>;
}

struct FnConversationListener<F>(F);

impl<T, R, F> ConversationChannelListener<T, R> for FnConversationListener<F>
where
    F: Fn(&ConversationChannelAgent<T, R>, &T) -> ConversationReply<R> + Send + Sync + 'static,
{
    fn on_message(&self, agent: &ConversationChannelAgent<T, R>, message: &T) -> ConversationReply<R> {
        (self.0)(agent, message)
    }
}

/// Adapts a conversation listener to the plain channel it listens on.
struct Responder<T, R, L> {
    conversation: ConversationChannel<T, R>,
    agent_id: u64,
    listener: L,
}

impl<T, R, L> ChannelListener<T> for Responder<T, R, L>
where
    T: ConversationMessage,
    R: ConversationMessage + Clone,
    L: ConversationChannelListener<T, R>,
{
    fn on_message(&self, agent: &ChannelAgent<T>, message: &T) -> Result<()> {
        let id = message
            .conversation_id()
            .ok_or(CourierError::MissingConversationId)?;
        let agent = ConversationChannelAgent::from_parts(self.conversation.clone(), agent.clone(), self.agent_id);
        let reply = self.listener.on_message(&agent, message);
        self.conversation.dispatch_reply(id, reply);
        Ok(())
    }
}

/// Responder-side handle: a set of request listeners on one conversation.
///
/// Like [`ChannelAgent`], clones share state and dropping does not close.
pub struct ConversationChannelAgent<T, R> {
    conversation: ConversationChannel<T, R>,
    delegate: ChannelAgent<T>,
    id: u64,
}

impl<T, R> Clone for ConversationChannelAgent<T, R> {
    fn clone(&self) -> Self {
        Self {
            conversation: self.conversation.clone(),
            delegate: self.delegate.clone(),
            id: self.id,
        }
    }
}

impl<T, R> ConversationChannelAgent<T, R>
where
    T: ConversationMessage,
    R: ConversationMessage + Clone,
{
    pub(crate) fn from_parts(conversation: ConversationChannel<T, R>, delegate: ChannelAgent<T>, id: u64) -> Self {
        Self {
            conversation,
            delegate,
            id,
        }
    }

    pub fn conversation(&self) -> &ConversationChannel<T, R> {
        &self.conversation
    }

    pub fn add_listener<L>(&self, listener: L) -> Result<ListenerId>
    where
        L: ConversationChannelListener<T, R>,
    {
        self.delegate.add_listener(Responder {
            conversation: self.conversation.clone(),
            agent_id: self.id,
            listener,
        })
    }

    pub fn add_listener_fn<F>(&self, listener: F) -> Result<ListenerId>
    where
        F: Fn(&ConversationChannelAgent<T, R>, &T) -> ConversationReply<R> + Send + Sync + 'static,
    {
        self.add_listener(FnConversationListener(listener))
    }

    pub fn remove_listener(&self, id: ListenerId) -> bool {
        self.delegate.remove_listener(id)
    }

    pub fn listeners(&self) -> Vec<ListenerId> {
        self.delegate.listeners()
    }

    pub fn has_listeners(&self) -> bool {
        self.delegate.has_listeners()
    }

    pub fn is_closed(&self) -> bool {
        self.delegate.is_closed()
    }

    /// Stops handling requests. Idempotent.
    pub fn close(&self) {
        if !self.delegate.close() {
            return;
        }
        self.conversation.forget_agent(self.id);
        debug!(target: "conversation", conversation = %self.conversation.name(), agent = self.id, "Responder agent closed");
    }
}
