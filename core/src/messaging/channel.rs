use std::any::{Any, TypeId};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use tokio::runtime::Handle;
use tracing::{debug, warn};

use super::agent::{AgentInner, ChannelAgent, ChannelListener};
use super::stats::{ChannelStats, StatsCounters};
use super::transport::Transport;
use crate::codec::Codec;
use crate::{CourierError, Result};

/// Named, typed multicast conduit.
///
/// Obtained from [`Messenger::channel`](crate::Messenger::channel). Handles are cheap
/// to clone and refer to the same channel.
pub struct Channel<T> {
    inner: Arc<ChannelInner<T>>,
}

impl<T> Clone for Channel<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

pub(crate) struct ChannelInner<T> {
    name: String,
    codec: Arc<dyn Codec<T>>,
    transport: Arc<dyn Transport>,
    // agent id -> agent
    agents: DashMap<u64, Arc<AgentInner<T>>>,
    next_agent_id: AtomicU64,
    stats: StatsCounters,
    closed: AtomicBool,
    runtime: Handle,
}

impl<T: Send + Sync + 'static> ChannelInner<T> {
    pub(crate) fn new(
        name: String,
        codec: Arc<dyn Codec<T>>,
        transport: Arc<dyn Transport>,
        runtime: Handle,
    ) -> Self {
        Self {
            name,
            codec,
            transport,
            agents: DashMap::new(),
            next_agent_id: AtomicU64::new(1),
            stats: StatsCounters::default(),
            closed: AtomicBool::new(false),
            runtime,
        }
    }
}

impl<T: Send + Sync + 'static> Channel<T> {
    pub(crate) fn from_inner(inner: Arc<ChannelInner<T>>) -> Self {
        Self { inner }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Rust type name of the channel's messages.
    pub fn type_name(&self) -> &'static str {
        std::any::type_name::<T>()
    }

    pub fn codec(&self) -> Arc<dyn Codec<T>> {
        Arc::clone(&self.inner.codec)
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    pub fn stats(&self) -> ChannelStats {
        self.inner.stats.snapshot(self.inner.agents.len())
    }

    pub fn agent_count(&self) -> usize {
        self.inner.agents.len()
    }

    pub(crate) fn runtime(&self) -> &Handle {
        &self.inner.runtime
    }

    /// Creates an agent with no listeners.
    pub fn new_agent(&self) -> Result<ChannelAgent<T>> {
        if self.is_closed() {
            return Err(CourierError::ChannelClosed(self.inner.name.clone()));
        }
        let id = self.inner.next_agent_id.fetch_add(1, Ordering::Relaxed);
        let agent = Arc::new(AgentInner::new(id));
        self.inner.agents.insert(id, Arc::clone(&agent));

        if self.is_closed() {
            agent.shut();
            self.inner.agents.remove(&id);
            return Err(CourierError::ChannelClosed(self.inner.name.clone()));
        }
        Ok(ChannelAgent::from_parts(self.clone(), agent))
    }

    /// Creates an agent and registers `listener` on it.
    pub fn new_agent_with<L>(&self, listener: L) -> Result<ChannelAgent<T>>
    where
        L: ChannelListener<T>,
    {
        let agent = self.new_agent()?;
        agent.add_listener(listener)?;
        Ok(agent)
    }

    /// Encodes `message` and hands it to the transport.
    ///
    /// Completes when the transport's send hook completes; that is not a delivery
    /// confirmation.
    pub async fn send(&self, message: &T) -> Result<()> {
        if self.is_closed() {
            return Err(CourierError::ChannelClosed(self.inner.name.clone()));
        }
        let payload = self.inner.codec.encode(message).map_err(|err| {
            self.inner.stats.record_send_failure();
            warn!(target: "messenger", channel = %self.inner.name, error = %err, "Failed to encode outgoing message");
            CourierError::Encoding(err)
        })?;

        let len = payload.len();
        match self.inner.transport.send(&self.inner.name, payload).await {
            Ok(()) => {
                self.inner.stats.record_sent();
                debug!(target: "messenger", channel = %self.inner.name, bytes = len, "Message sent");
                Ok(())
            }
            Err(err) => {
                self.inner.stats.record_send_failure();
                warn!(target: "messenger", channel = %self.inner.name, error = %err, "Transport send failed");
                Err(CourierError::Transport {
                    channel: self.inner.name.clone(),
                    source: err,
                })
            }
        }
    }

    /// Decodes once and fans out to every agent registered at the time of the call.
    pub(crate) fn dispatch(&self, payload: &[u8]) {
        let inner = &self.inner;
        if self.is_closed() {
            debug!(target: "messenger", channel = %inner.name, "Dropping payload for closed channel");
            return;
        }
        inner.stats.record_received();

        let message = match inner.codec.decode(payload) {
            Ok(message) => message,
            Err(err) => {
                inner.stats.record_decode_failure();
                warn!(
                    target: "messenger",
                    channel = %inner.name,
                    bytes = payload.len(),
                    error = %CourierError::Encoding(err),
                    "Dropping undecodable payload"
                );
                return;
            }
        };

        let mut agents: Vec<(u64, ChannelAgent<T>)> = inner
            .agents
            .iter()
            .map(|e| (*e.key(), ChannelAgent::from_parts(self.clone(), Arc::clone(e.value()))))
            .collect();
        agents.sort_by_key(|(id, _)| *id);
        // freeze every agent's listener set before any listener runs
        let snapshots: Vec<_> = agents
            .into_iter()
            .map(|(_, agent)| {
                let listeners = agent.snapshot();
                (agent, listeners)
            })
            .collect();

        let mut delivered = 0;
        let mut failed = 0;
        for (agent, listeners) in snapshots {
            if agent.is_closed() {
                continue;
            }
            let (d, f) = agent.deliver(listeners, &message);
            delivered += d;
            failed += f;
        }
        inner.stats.record_dispatch(delivered, failed);
    }

    pub(crate) fn detach_agent(&self, agent_id: u64) {
        self.inner.agents.remove(&agent_id);
    }

    /// Closes every agent and refuses further sends. Returns false if already closed.
    pub(crate) fn close(&self) -> bool {
        if self.inner.closed.swap(true, Ordering::AcqRel) {
            return false;
        }
        let agents: Vec<Arc<AgentInner<T>>> = self
            .inner
            .agents
            .iter()
            .map(|e| Arc::clone(e.value()))
            .collect();
        for agent in agents {
            agent.shut();
        }
        self.inner.agents.clear();
        true
    }
}

/// Type-erased view of a channel held by the messenger registry.
pub(crate) trait ChannelSlot: Send + Sync {
    fn message_type(&self) -> TypeId;

    fn message_type_name(&self) -> &'static str;

    fn deliver(self: Arc<Self>, payload: &[u8]);

    fn close(self: Arc<Self>);

    fn stats(&self) -> ChannelStats;

    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync>;
}

impl<T: Send + Sync + 'static> ChannelSlot for ChannelInner<T> {
    fn message_type(&self) -> TypeId {
        TypeId::of::<T>()
    }

    fn message_type_name(&self) -> &'static str {
        std::any::type_name::<T>()
    }

    fn deliver(self: Arc<Self>, payload: &[u8]) {
        Channel::from_inner(self).dispatch(payload);
    }

    fn close(self: Arc<Self>) {
        Channel::from_inner(self).close();
    }

    fn stats(&self) -> ChannelStats {
        self.stats.snapshot(self.agents.len())
    }

    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }
}
