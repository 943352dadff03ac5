use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use tracing::{debug, error, warn};

use super::channel::Channel;
use crate::{CourierError, Result};

static NEXT_LISTENER_ID: AtomicU64 = AtomicU64::new(1);

/// Identity of a listener registered on a [`ChannelAgent`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerId(u64);

impl ListenerId {
    fn next() -> Self {
        Self(NEXT_LISTENER_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for ListenerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "listener-{}", self.0)
    }
}

/// Receives decoded messages forwarded by an agent.
///
/// Called on the thread that delivered the payload to the messenger. Errors and
/// panics are logged and never reach sibling listeners.
pub trait ChannelListener<T>: Send + Sync + 'static {
    fn on_message(&self, agent: &ChannelAgent<T>, message: &T) -> Result<()>;
}

struct FnListener<F>(F);

impl<T, F> ChannelListener<T> for FnListener<F>
where
    F: Fn(&ChannelAgent<T>, &T) -> Result<()> + Send + Sync + 'static,
{
    fn on_message(&self, agent: &ChannelAgent<T>, message: &T) -> Result<()> {
        (self.0)(agent, message)
    }
}

pub(crate) struct AgentInner<T> {
    pub(crate) id: u64,
    listeners: DashMap<ListenerId, Arc<dyn ChannelListener<T>>>,
    closed: AtomicBool,
}

impl<T> AgentInner<T> {
    pub(crate) fn new(id: u64) -> Self {
        Self {
            id,
            listeners: DashMap::new(),
            closed: AtomicBool::new(false),
        }
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Marks the agent closed and drops its listeners. Returns false if it already was.
    pub(crate) fn shut(&self) -> bool {
        if self.closed.swap(true, Ordering::AcqRel) {
            return false;
        }
        self.listeners.clear();
        true
    }
}

/// Subscription handle owning a set of listeners on one channel.
///
/// Handles are cheap to clone and all clones refer to the same agent. Dropping a
/// handle does not close the agent; call [`ChannelAgent::close`].
pub struct ChannelAgent<T> {
    channel: Channel<T>,
    inner: Arc<AgentInner<T>>,
}

impl<T> Clone for ChannelAgent<T> {
    fn clone(&self) -> Self {
        Self {
            channel: self.channel.clone(),
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: Send + Sync + 'static> ChannelAgent<T> {
    pub(crate) fn from_parts(channel: Channel<T>, inner: Arc<AgentInner<T>>) -> Self {
        Self { channel, inner }
    }

    /// The channel this agent listens on.
    pub fn channel(&self) -> &Channel<T> {
        &self.channel
    }

    pub fn add_listener<L>(&self, listener: L) -> Result<ListenerId>
    where
        L: ChannelListener<T>,
    {
        if self.inner.is_closed() {
            return Err(CourierError::AgentClosed);
        }
        let id = ListenerId::next();
        self.inner.listeners.insert(id, Arc::new(listener));

        // lost a race with close(): undo
        if self.inner.is_closed() {
            self.inner.listeners.remove(&id);
            return Err(CourierError::AgentClosed);
        }
        debug!(target: "messenger", channel = %self.channel.name(), listener = %id, "Listener added");
        Ok(id)
    }

    /// Registers a closure as a listener.
    pub fn add_listener_fn<F>(&self, listener: F) -> Result<ListenerId>
    where
        F: Fn(&ChannelAgent<T>, &T) -> Result<()> + Send + Sync + 'static,
    {
        self.add_listener(FnListener(listener))
    }

    /// Returns false if the agent is closed or the listener is unknown.
    pub fn remove_listener(&self, id: ListenerId) -> bool {
        if self.inner.is_closed() {
            return false;
        }
        self.inner.listeners.remove(&id).is_some()
    }

    pub fn listeners(&self) -> Vec<ListenerId> {
        let mut ids: Vec<ListenerId> = self.inner.listeners.iter().map(|e| *e.key()).collect();
        ids.sort();
        ids
    }

    pub fn has_listeners(&self) -> bool {
        !self.inner.listeners.is_empty()
    }

    pub fn listener_count(&self) -> usize {
        self.inner.listeners.len()
    }

    pub fn is_closed(&self) -> bool {
        self.inner.is_closed()
    }

    /// Detaches the agent from its channel and drops its listeners.
    ///
    /// Returns false if the agent was already closed.
    pub fn close(&self) -> bool {
        if !self.inner.shut() {
            return false;
        }
        self.channel.detach_agent(self.inner.id);
        debug!(target: "messenger", channel = %self.channel.name(), agent = self.inner.id, "Agent closed");
        true
    }

    /// Listeners registered right now, in registration order.
    pub(crate) fn snapshot(&self) -> Vec<(ListenerId, Arc<dyn ChannelListener<T>>)> {
        let mut snapshot: Vec<(ListenerId, Arc<dyn ChannelListener<T>>)> = self
            .inner
            .listeners
            .iter()
            .map(|e| (*e.key(), Arc::clone(e.value())))
            .collect();
        snapshot.sort_by_key(|(id, _)| *id);
        snapshot
    }

    /// Invokes the listeners of a snapshot taken before dispatch started.
    ///
    /// Returns (delivered, failed) invocation counts.
    pub(crate) fn deliver(
        &self,
        snapshot: Vec<(ListenerId, Arc<dyn ChannelListener<T>>)>,
        message: &T,
    ) -> (u64, u64) {
        let mut delivered = 0;
        let mut failed = 0;
        for (id, listener) in snapshot {
            if self.inner.is_closed() {
                break;
            }
            // removed while an earlier listener ran
            if !self.inner.listeners.contains_key(&id) {
                continue;
            }
            match catch_unwind(AssertUnwindSafe(|| listener.on_message(self, message))) {
                Ok(Ok(())) => delivered += 1,
                Ok(Err(err)) => {
                    failed += 1;
                    warn!(target: "messenger", channel = %self.channel.name(), listener = %id, error = %err, "Listener failed");
                }
                Err(panic) => {
                    failed += 1;
                    let err = CourierError::Listener(panic_message(panic.as_ref()));
                    error!(target: "messenger", channel = %self.channel.name(), listener = %id, error = %err, "Listener panicked");
                }
            }
        }
        (delivered, failed)
    }
}

pub(crate) fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
