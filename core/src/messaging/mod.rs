//! Messaging layer: typed channels, agents, and the transport bridge.
//!
//! - `Channel`: named, typed multicast conduit
//! - `ChannelAgent`: a set of listeners bound to one channel
//! - `Messenger`: creates channels and bridges them to a `Transport`
//! - `ChannelPublisher`: periodic publishing onto a channel

mod agent;
mod channel;
mod messenger;
mod publisher;
mod stats;
mod transport;

// Re-export key types for ergonomic access
pub use agent::{ChannelAgent, ChannelListener, ListenerId};
pub use channel::Channel;
pub use messenger::Messenger;
pub use publisher::ChannelPublisher;
pub use stats::ChannelStats;
pub use transport::{Transport, TransportError};

pub(crate) use agent::panic_message;
