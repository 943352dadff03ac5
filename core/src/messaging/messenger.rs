// Messenger: the bridge between typed channels and a byte transport
use std::any::{type_name, TypeId};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::{de::DeserializeOwned, Serialize};
use tokio::runtime::Handle;
use tracing::{debug, info, warn};

use super::channel::{Channel, ChannelInner, ChannelSlot};
use super::stats::ChannelStats;
use super::transport::Transport;
use crate::codec::{Codec, JsonCodec};
use crate::config::MessengerConfig;
use crate::{CourierError, Result};

/// Creates channels by name and type, forwards their outgoing payloads to the
/// transport, and is the single ingress point for payloads the transport receives.
///
/// # Examples
///
/// ```no_run
/// use std::sync::Arc;
/// use courier_core::{Messenger, Transport};
///
/// # async fn example(transport: Arc<dyn Transport>) -> courier_core::Result<()> {
/// let messenger = Messenger::new(transport).await?;
/// let channel = messenger.channel::<String>("chat")?;
/// let agent = channel.new_agent()?;
/// agent.add_listener_fn(|_agent, msg| {
///     println!("got {msg}");
///     Ok(())
/// })?;
/// channel.send(&"hello".to_string()).await?;
/// # Ok(())
/// # }
/// ```
pub struct Messenger {
    transport: Arc<dyn Transport>,
    // channel name -> channel
    channels: DashMap<String, Arc<dyn ChannelSlot>>,
    config: MessengerConfig,
    runtime: Handle,
    closed: AtomicBool,
}

impl Messenger {
    pub async fn new(transport: Arc<dyn Transport>) -> Result<Self> {
        Self::with_config(transport, MessengerConfig::default()).await
    }

    pub async fn with_config(transport: Arc<dyn Transport>, config: MessengerConfig) -> Result<Self> {
        Ok(Self::with_runtime(transport, config, Handle::current()))
    }

    /// Builds a messenger outside of an async context. Timers and deferred replies
    /// are spawned on `runtime`.
    pub fn with_runtime(
        transport: Arc<dyn Transport>,
        config: MessengerConfig,
        runtime: Handle,
    ) -> Self {
        Self {
            transport,
            channels: DashMap::new(),
            config,
            runtime,
            closed: AtomicBool::new(false),
        }
    }

    pub fn config(&self) -> &MessengerConfig {
        &self.config
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Gets or creates a JSON-encoded channel.
    pub fn channel<T>(&self, name: &str) -> Result<Channel<T>>
    where
        T: Serialize + DeserializeOwned + Send + Sync + 'static,
    {
        self.channel_with_codec(name, JsonCodec::<T>::new())
    }

    /// Gets or creates a channel using `codec`.
    ///
    /// The transport is subscribed to `name` when the channel is first created. If
    /// the channel already exists the given codec is ignored. Asking for an existing
    /// name with a different message type fails with
    /// [`CourierError::ChannelTypeMismatch`].
    pub fn channel_with_codec<T, C>(&self, name: &str, codec: C) -> Result<Channel<T>>
    where
        T: Send + Sync + 'static,
        C: Codec<T>,
    {
        if self.is_closed() {
            return Err(CourierError::MessengerClosed);
        }
        if name.trim().is_empty() {
            return Err(CourierError::InvalidChannelName(name.to_string()));
        }

        let slot = match self.channels.entry(name.to_string()) {
            Entry::Occupied(entry) => Arc::clone(entry.get()),
            Entry::Vacant(entry) => {
                self.transport
                    .subscribe(name)
                    .map_err(|err| {
                        warn!(target: "messenger", channel = %name, error = %err, "Transport subscribe failed");
                        CourierError::Transport {
                            channel: name.to_string(),
                            source: err,
                        }
                    })?;
                let inner = Arc::new(ChannelInner::<T>::new(
                    name.to_string(),
                    Arc::new(codec),
                    Arc::clone(&self.transport),
                    self.runtime.clone(),
                ));
                let slot = Arc::clone(&inner) as Arc<dyn ChannelSlot>;
                entry.insert(Arc::clone(&slot));

                // lost a race with close(): undo unless close() already took it
                if self.is_closed() {
                    if self
                        .channels
                        .remove_if(name, |_, current| Arc::ptr_eq(current, &slot))
                        .is_some()
                    {
                        slot.close();
                        if let Err(err) = self.transport.unsubscribe(name) {
                            warn!(target: "messenger", channel = %name, error = %err, "Transport unsubscribe failed");
                        }
                    }
                    return Err(CourierError::MessengerClosed);
                }
                info!(target: "messenger", channel = %name, message_type = type_name::<T>(), "Channel created");
                return Ok(Channel::from_inner(inner));
            }
        };

        if slot.message_type() != TypeId::of::<T>() {
            return Err(CourierError::ChannelTypeMismatch {
                name: name.to_string(),
                existing: slot.message_type_name(),
                requested: type_name::<T>(),
            });
        }
        slot.into_any()
            .downcast::<ChannelInner<T>>()
            .map(Channel::from_inner)
            .map_err(|_| CourierError::ChannelTypeMismatch {
                name: name.to_string(),
                existing: "unknown",
                requested: type_name::<T>(),
            })
    }

    /// Ingress for payloads received by the transport on `channel`.
    ///
    /// Unknown channel names are logged and ignored. May be called from any
    /// thread, concurrently.
    pub fn register_incoming_message(&self, channel: &str, payload: &[u8]) {
        if self.is_closed() {
            debug!(target: "messenger", channel = %channel, "Messenger closed; dropping inbound payload");
            return;
        }
        // release the map guard before running listeners
        let slot = match self.channels.get(channel) {
            Some(entry) => Arc::clone(entry.value()),
            None => {
                warn!(target: "messenger", channel = %channel, bytes = payload.len(), "No channel registered for inbound payload");
                return;
            }
        };
        slot.deliver(payload);
    }

    pub fn channel_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.channels.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    pub fn stats(&self, channel: &str) -> Option<ChannelStats> {
        self.channels.get(channel).map(|e| e.value().stats())
    }

    /// Closes every channel and unsubscribes it from the transport. Idempotent.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        let slots: Vec<(String, Arc<dyn ChannelSlot>)> = self
            .channels
            .iter()
            .map(|e| (e.key().clone(), Arc::clone(e.value())))
            .collect();
        self.channels.clear();

        for (name, slot) in slots {
            slot.close();
            if let Err(err) = self.transport.unsubscribe(&name) {
                warn!(target: "messenger", channel = %name, error = %err, "Transport unsubscribe failed");
            }
        }
        info!(target: "messenger", "Messenger closed");
    }
}

impl Drop for Messenger {
    fn drop(&mut self) {
        self.close();
    }
}
