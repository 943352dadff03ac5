// HTTP ingress: POST /<channel> feeds the body to the messenger
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, PoisonError};

use axum::{
    body::Bytes,
    extract::{Path, State},
    http::StatusCode,
    routing::post,
    Router,
};
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use courier_core::Messenger;

use crate::{HttpBridgeConfig, HttpTransport, Result};

#[derive(Clone)]
struct IngressState {
    messenger: Arc<Messenger>,
    transport: Arc<HttpTransport>,
}

/// A [`Messenger`] wired to an [`HttpTransport`] and a local ingress server.
pub struct HttpMessenger {
    messenger: Arc<Messenger>,
    transport: Arc<HttpTransport>,
    local_addr: SocketAddr,
    shutdown: Mutex<Option<oneshot::Sender<()>>>,
    server: Mutex<Option<JoinHandle<()>>>,
}

impl HttpMessenger {
    /// Binds `config.bind_addr` and starts serving.
    pub async fn bind(config: HttpBridgeConfig) -> Result<Self> {
        let listener = TcpListener::bind(config.bind_addr).await?;
        Self::serve(listener, config).await
    }

    /// Serves on an already bound listener; `config.bind_addr` is ignored.
    pub async fn serve(listener: TcpListener, config: HttpBridgeConfig) -> Result<Self> {
        let transport = Arc::new(HttpTransport::new(&config)?);
        let messenger =
            Arc::new(Messenger::with_config(transport.clone(), config.messenger.clone()).await?);
        let local_addr = listener.local_addr()?;

        let state = IngressState {
            messenger: Arc::clone(&messenger),
            transport: Arc::clone(&transport),
        };
        let app = Router::new()
            .route("/:channel", post(ingress_handler))
            .with_state(state);

        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let server = tokio::spawn(async move {
            let result = axum::serve(listener, app)
                .with_graceful_shutdown(async {
                    let _ = shutdown_rx.await;
                })
                .await;
            if let Err(err) = result {
                error!(target: "http_bridge", error = %err, "Ingress server failed");
            }
        });

        info!(
            target: "http_bridge",
            addr = %local_addr,
            remote = %transport.remote(),
            "HTTP bridge ready"
        );
        Ok(Self {
            messenger,
            transport,
            local_addr,
            shutdown: Mutex::new(Some(shutdown_tx)),
            server: Mutex::new(Some(server)),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn messenger(&self) -> &Arc<Messenger> {
        &self.messenger
    }

    pub fn transport(&self) -> &Arc<HttpTransport> {
        &self.transport
    }

    /// Closes the messenger and stops the ingress server. Idempotent.
    pub fn close(&self) {
        self.messenger.close();
        if let Some(tx) = self.shutdown.lock().unwrap_or_else(PoisonError::into_inner).take() {
            let _ = tx.send(());
            info!(target: "http_bridge", addr = %self.local_addr, "HTTP bridge shutting down");
        }
    }

    /// Waits for the ingress server to finish, e.g. after [`HttpMessenger::close`].
    pub async fn join(&self) {
        let server = self.server.lock().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(server) = server {
            let _ = server.await;
        }
    }
}

impl Drop for HttpMessenger {
    fn drop(&mut self) {
        self.close();
    }
}

async fn ingress_handler(
    State(state): State<IngressState>,
    Path(channel): Path<String>,
    body: Bytes,
) -> StatusCode {
    if !state.transport.is_subscribed(&channel) {
        debug!(target: "http_bridge", channel = %channel, "Rejecting payload for unknown channel");
        return StatusCode::NOT_FOUND;
    }
    state.messenger.register_incoming_message(&channel, &body);
    StatusCode::OK
}
