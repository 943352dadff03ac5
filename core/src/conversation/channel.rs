use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::{de::DeserializeOwned, Serialize};
use tracing::{debug, info, warn};

use super::agent::{ConversationChannelAgent, ConversationChannelListener};
use super::pending::{deadline_after, expire_at, remove_record, Offer, PendingReply, PendingTable};
use super::reply::{ConversationReply, ConversationReplyListener};
use super::{ConversationId, ConversationMessage};
use crate::messaging::{Channel, ChannelAgent, ChannelListener, Messenger};
use crate::{CourierError, Result};

/// Request/reply conversations over a pair of channels.
///
/// Requests of type `T` go out on `<name><outgoing suffix>` and replies of type
/// `R` come back on `<name><reply suffix>` (`-o` and `-r` by default). Replies are
/// routed by [`ConversationId`] to the listener registered for the matching
/// request, never broadcast.
///
/// Responder agents keep the conversation alive; call [`ConversationChannel::close`]
/// when done with it.
pub struct ConversationChannel<T, R> {
    inner: Arc<ConversationInner<T, R>>,
}

impl<T, R> Clone for ConversationChannel<T, R> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

struct ConversationInner<T, R> {
    name: String,
    outgoing: Channel<T>,
    replies: Channel<R>,
    reply_agent: ChannelAgent<R>,
    pending: Arc<PendingTable<R>>,
    // responder agents by id
    agents: DashMap<u64, ChannelAgent<T>>,
    next_agent_id: AtomicU64,
    closed: AtomicBool,
}

/// Routes each reply to the pending record for its conversation id.
struct ReplyRouter<R> {
    pending: Arc<PendingTable<R>>,
}

impl<R> ChannelListener<R> for ReplyRouter<R>
where
    R: ConversationMessage + Clone,
{
    fn on_message(&self, agent: &ChannelAgent<R>, reply: &R) -> Result<()> {
        let Some(id) = reply.conversation_id() else {
            warn!(target: "conversation", channel = %agent.channel().name(), "Dropping reply without conversation id");
            return Ok(());
        };
        // clone out so the table guard is not held while the listener runs
        let record = match self.pending.get(&id) {
            Some(entry) => Arc::clone(entry.value()),
            None => {
                debug!(target: "conversation", conversation_id = %id, "No pending request for reply");
                return Ok(());
            }
        };

        match record.offer(reply.clone()) {
            Offer::Settled => {
                remove_record(&self.pending, &id, &record);
                debug!(target: "conversation", conversation_id = %id, "Conversation completed");
            }
            Offer::TimedOut => {
                remove_record(&self.pending, &id, &record);
            }
            Offer::Continue => {}
            Offer::Ignored => {
                debug!(target: "conversation", conversation_id = %id, "Late reply ignored");
            }
        }
        Ok(())
    }
}

impl<T, R> ConversationChannel<T, R>
where
    T: ConversationMessage + Serialize + DeserializeOwned,
    R: ConversationMessage + Serialize + DeserializeOwned + Clone,
{
    /// JSON-encoded conversation named `name`, channel names taken from the
    /// messenger's config.
    pub fn new(messenger: &Messenger, name: &str) -> Result<Self> {
        let config = messenger.config();
        let outgoing = messenger.channel::<T>(&config.outgoing_channel_name(name))?;
        let replies = messenger.channel::<R>(&config.reply_channel_name(name))?;
        Self::with_channels(name, outgoing, replies)
    }
}

impl Messenger {
    /// Shorthand for [`ConversationChannel::new`].
    pub fn conversation_channel<T, R>(&self, name: &str) -> Result<ConversationChannel<T, R>>
    where
        T: ConversationMessage + Serialize + DeserializeOwned,
        R: ConversationMessage + Serialize + DeserializeOwned + Clone,
    {
        ConversationChannel::new(self, name)
    }
}

impl<T, R> ConversationChannel<T, R>
where
    T: ConversationMessage,
    R: ConversationMessage + Clone,
{
    /// Builds a conversation over existing channels, e.g. ones created with a
    /// custom codec.
    pub fn with_channels(name: &str, outgoing: Channel<T>, replies: Channel<R>) -> Result<Self> {
        let pending: Arc<PendingTable<R>> = Arc::new(DashMap::new());
        let reply_agent = replies.new_agent_with(ReplyRouter {
            pending: Arc::clone(&pending),
        })?;

        info!(
            target: "conversation",
            conversation = %name,
            outgoing = %outgoing.name(),
            replies = %replies.name(),
            "Conversation channel ready"
        );
        Ok(Self {
            inner: Arc::new(ConversationInner {
                name: name.to_string(),
                outgoing,
                replies,
                reply_agent,
                pending,
                agents: DashMap::new(),
                next_agent_id: AtomicU64::new(1),
                closed: AtomicBool::new(false),
            }),
        })
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn outgoing_channel(&self) -> &Channel<T> {
        &self.inner.outgoing
    }

    pub fn reply_channel(&self) -> &Channel<R> {
        &self.inner.replies
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    /// Requests still awaiting a terminating reply or their timeout.
    pub fn pending_count(&self) -> usize {
        self.inner.pending.len()
    }

    /// Sends `message` and routes its replies to `listener` until the listener
    /// stops listening or `timeout` elapses.
    ///
    /// A fresh id is attached if the message has none. Completes once the request
    /// has been handed to the transport; encoding and transport failures are
    /// returned and no timeout is armed for them.
    pub async fn send_message<L>(
        &self,
        mut message: T,
        listener: L,
        timeout: Duration,
    ) -> Result<ConversationId>
    where
        L: ConversationReplyListener<R>,
    {
        if self.is_closed() {
            return Err(CourierError::ChannelClosed(self.inner.name.clone()));
        }
        let id = match message.conversation_id() {
            Some(id) => id,
            None => {
                let id = ConversationId::new();
                message.set_conversation_id(id);
                id
            }
        };

        let record = Arc::new(PendingReply::new(id, Box::new(listener), deadline_after(timeout)));
        match self.inner.pending.entry(id) {
            Entry::Occupied(mut entry) => {
                if !entry.get().is_settled() {
                    return Err(CourierError::ConversationInUse(id));
                }
                entry.insert(Arc::clone(&record));
            }
            Entry::Vacant(entry) => {
                entry.insert(Arc::clone(&record));
            }
        }

        // raced with close()
        if self.is_closed() {
            record.cancel();
            remove_record(&self.inner.pending, &id, &record);
            return Err(CourierError::ChannelClosed(self.inner.name.clone()));
        }

        let timer = self.inner.outgoing.runtime().spawn(expire_at(
            Arc::clone(&self.inner.pending),
            id,
            Arc::clone(&record),
        ));
        record.arm(timer);

        debug!(
            target: "conversation",
            conversation = %self.inner.name,
            conversation_id = %id,
            timeout = ?timeout,
            "Sending request"
        );
        if let Err(err) = self.inner.outgoing.send(&message).await {
            record.cancel();
            remove_record(&self.inner.pending, &id, &record);
            return Err(err);
        }
        Ok(id)
    }

    /// Creates a responder agent listening for requests on the outgoing channel.
    pub fn new_agent(&self) -> Result<ConversationChannelAgent<T, R>> {
        if self.is_closed() {
            return Err(CourierError::ChannelClosed(self.inner.name.clone()));
        }
        let delegate = self.inner.outgoing.new_agent()?;
        let id = self.inner.next_agent_id.fetch_add(1, Ordering::Relaxed);
        self.inner.agents.insert(id, delegate.clone());
        Ok(ConversationChannelAgent::from_parts(self.clone(), delegate, id))
    }

    /// Creates a responder agent and registers `listener` on it.
    pub fn new_agent_with<L>(&self, listener: L) -> Result<ConversationChannelAgent<T, R>>
    where
        L: ConversationChannelListener<T, R>,
    {
        let agent = self.new_agent()?;
        if let Err(err) = agent.add_listener(listener) {
            agent.close();
            return Err(err);
        }
        Ok(agent)
    }

    /// Closes the reply router and every responder agent, and drops all pending
    /// requests without calling their timeout handlers. Idempotent.
    pub fn close(&self) {
        if self.inner.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.inner.reply_agent.close();

        let agents: Vec<ChannelAgent<T>> =
            self.inner.agents.iter().map(|e| e.value().clone()).collect();
        self.inner.agents.clear();
        for agent in agents {
            agent.close();
        }

        let records: Vec<Arc<PendingReply<R>>> =
            self.inner.pending.iter().map(|e| Arc::clone(e.value())).collect();
        self.inner.pending.clear();
        let dropped = records.into_iter().filter(|record| record.cancel()).count();
        info!(target: "conversation", conversation = %self.inner.name, dropped, "Conversation channel closed");
    }

    pub(crate) fn forget_agent(&self, id: u64) {
        self.inner.agents.remove(&id);
    }

    /// Sends a responder's reply for conversation `id` on the reply channel.
    pub(crate) fn dispatch_reply(&self, id: ConversationId, reply: ConversationReply<R>) {
        let replies = self.inner.replies.clone();
        match reply {
            ConversationReply::NoReply => {
                debug!(target: "conversation", conversation_id = %id, "Responder declined to reply");
            }
            ConversationReply::Value(mut value) => {
                value.set_conversation_id(id);
                self.inner.outgoing.runtime().spawn(async move {
                    send_reply(&replies, id, &value).await;
                });
            }
            ConversationReply::Deferred(future) => {
                self.inner.outgoing.runtime().spawn(async move {
                    match future.await {
                        Ok(Some(mut value)) => {
                            value.set_conversation_id(id);
                            send_reply(&replies, id, &value).await;
                        }
                        Ok(None) => {
                            debug!(target: "conversation", conversation_id = %id, "Deferred reply resolved empty");
                        }
                        // the requester only sees this as a timeout
                        Err(err) => {
                            warn!(target: "conversation", conversation_id = %id, error = %err, "Deferred reply failed");
                        }
                    }
                });
            }
        }
    }
}

async fn send_reply<R: Send + Sync + 'static>(replies: &Channel<R>, id: ConversationId, reply: &R) {
    if let Err(err) = replies.send(reply).await {
        warn!(target: "conversation", conversation_id = %id, error = %err, "Failed to send reply");
    }
}
