// Shared helpers for messaging integration tests
#![allow(dead_code)]

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, OnceLock, Weak};

use async_trait::async_trait;
use courier_core::{
    ConversationId, ConversationMessage, Messenger, MessengerConfig, Transport, TransportError,
};
use serde::{Deserialize, Serialize};

/// In-process transport: every sent payload is fed straight back into the
/// messenger it is attached to, as if the wire looped around.
#[derive(Default)]
pub struct LoopbackTransport {
    messenger: OnceLock<Weak<Messenger>>,
    subscribed: Mutex<HashSet<String>>,
    subscribe_calls: Mutex<Vec<String>>,
    unsubscribe_calls: Mutex<Vec<String>>,
    sent: AtomicUsize,
    fail_sends: AtomicBool,
}

impl LoopbackTransport {
    pub fn attach(&self, messenger: &Arc<Messenger>) {
        let _ = self.messenger.set(Arc::downgrade(messenger));
    }

    pub fn fail_sends(&self, fail: bool) {
        self.fail_sends.store(fail, Ordering::SeqCst);
    }

    pub fn sent(&self) -> usize {
        self.sent.load(Ordering::SeqCst)
    }

    pub fn subscribe_calls(&self) -> Vec<String> {
        self.subscribe_calls.lock().unwrap().clone()
    }

    pub fn unsubscribe_calls(&self) -> Vec<String> {
        self.unsubscribe_calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl Transport for LoopbackTransport {
    async fn send(&self, channel: &str, payload: Vec<u8>) -> Result<(), TransportError> {
        if self.fail_sends.load(Ordering::SeqCst) {
            return Err(TransportError::new("loopback send disabled"));
        }
        self.sent.fetch_add(1, Ordering::SeqCst);
        if !self.subscribed.lock().unwrap().contains(channel) {
            return Ok(());
        }
        if let Some(messenger) = self.messenger.get().and_then(Weak::upgrade) {
            messenger.register_incoming_message(channel, &payload);
        }
        Ok(())
    }

    fn subscribe(&self, channel: &str) -> Result<(), TransportError> {
        self.subscribed.lock().unwrap().insert(channel.to_string());
        self.subscribe_calls.lock().unwrap().push(channel.to_string());
        Ok(())
    }

    fn unsubscribe(&self, channel: &str) -> Result<(), TransportError> {
        self.subscribed.lock().unwrap().remove(channel);
        self.unsubscribe_calls.lock().unwrap().push(channel.to_string());
        Ok(())
    }
}

pub async fn loopback() -> (Arc<Messenger>, Arc<LoopbackTransport>) {
    loopback_with_config(MessengerConfig::default()).await
}

pub async fn loopback_with_config(config: MessengerConfig) -> (Arc<Messenger>, Arc<LoopbackTransport>) {
    let transport = Arc::new(LoopbackTransport::default());
    let messenger = Arc::new(
        Messenger::with_config(transport.clone(), config)
            .await
            .expect("messenger"),
    );
    transport.attach(&messenger);
    (messenger, transport)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tick {
    pub seq: u64,
    pub source: String,
}

impl Tick {
    pub fn new(seq: u64) -> Self {
        Self {
            seq,
            source: "test".to_string(),
        }
    }
}

/// Text message usable as both request and reply in conversations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Query {
    pub conversation_id: Option<ConversationId>,
    pub text: String,
}

impl Query {
    pub fn new(text: &str) -> Self {
        Self {
            conversation_id: None,
            text: text.to_string(),
        }
    }
}

impl ConversationMessage for Query {
    fn conversation_id(&self) -> Option<ConversationId> {
        self.conversation_id
    }

    fn set_conversation_id(&mut self, id: ConversationId) {
        self.conversation_id = Some(id);
    }
}
