// HTTP transport: outgoing payloads are POSTed to the peer, one path segment per channel
use async_trait::async_trait;
use dashmap::DashSet;
use reqwest::{Client, Url};
use tracing::{debug, warn};

use courier_core::{Transport, TransportError};

use crate::{BridgeError, HttpBridgeConfig, Result};

pub struct HttpTransport {
    client: Client,
    remote: Url,
    // channels the local server accepts
    subscriptions: DashSet<String>,
}

impl HttpTransport {
    pub fn new(config: &HttpBridgeConfig) -> Result<Self> {
        let remote = Url::parse(&config.remote_url)
            .map_err(|err| BridgeError::InvalidUrl(format!("{}: {err}", config.remote_url)))?;
        if remote.cannot_be_a_base() {
            return Err(BridgeError::InvalidUrl(config.remote_url.clone()));
        }
        let client = Client::builder().timeout(config.request_timeout).build()?;
        Ok(Self {
            client,
            remote,
            subscriptions: DashSet::new(),
        })
    }

    pub fn remote(&self) -> &Url {
        &self.remote
    }

    pub fn is_subscribed(&self, channel: &str) -> bool {
        self.subscriptions.contains(channel)
    }

    pub fn subscriptions(&self) -> Vec<String> {
        let mut names: Vec<String> = self.subscriptions.iter().map(|s| s.key().clone()).collect();
        names.sort();
        names
    }

    /// `<remote>/<channel>` with the channel name percent-encoded as one segment.
    pub fn channel_url(&self, channel: &str) -> std::result::Result<Url, TransportError> {
        let mut url = self.remote.clone();
        {
            let mut segments = url
                .path_segments_mut()
                .map_err(|_| TransportError::new(format!("Remote URL cannot take a path: {}", self.remote)))?;
            segments.pop_if_empty().push(channel);
        }
        Ok(url)
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, channel: &str, payload: Vec<u8>) -> std::result::Result<(), TransportError> {
        let url = self.channel_url(channel)?;
        let bytes = payload.len();
        let response = self
            .client
            .post(url.clone())
            .body(payload)
            .send()
            .await
            .map_err(|err| {
                warn!(target: "http_bridge", channel = %channel, url = %url, error = %err, "POST failed");
                TransportError::with_source(format!("POST {url} failed"), err)
            })?;

        let status = response.status();
        if status.is_client_error() || status.is_server_error() {
            warn!(target: "http_bridge", channel = %channel, url = %url, status = %status, "Peer rejected payload");
            return Err(TransportError::new(format!("POST {url} returned {status}")));
        }
        debug!(target: "http_bridge", channel = %channel, bytes, "Payload posted");
        Ok(())
    }

    fn subscribe(&self, channel: &str) -> std::result::Result<(), TransportError> {
        self.subscriptions.insert(channel.to_string());
        debug!(target: "http_bridge", channel = %channel, "Accepting channel");
        Ok(())
    }

    fn unsubscribe(&self, channel: &str) -> std::result::Result<(), TransportError> {
        self.subscriptions.remove(channel);
        debug!(target: "http_bridge", channel = %channel, "No longer accepting channel");
        Ok(())
    }
}
