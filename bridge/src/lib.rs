//! HTTP bridge for the courier messaging core.
//!
//! Each peer runs an [`HttpMessenger`]: outgoing channel payloads are POSTed to
//! `<remote>/<channel>` and payloads POSTed to the local server are handed to the
//! messenger. Two peers pointed at each other form a full duplex link.

mod config;
mod server;
mod transport;

pub use config::HttpBridgeConfig;
pub use server::HttpMessenger;
pub use transport::HttpTransport;

use courier_core::CourierError;

#[derive(thiserror::Error, Debug)]
pub enum BridgeError {
    #[error("messaging error: {0}")]
    Courier(#[from] CourierError),
    #[error("http client error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid remote url: {0}")]
    InvalidUrl(String),
}

pub type Result<T> = std::result::Result<T, BridgeError>;
