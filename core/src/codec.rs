//! Codecs: conversion between typed messages and the byte payloads a transport carries.

use std::marker::PhantomData;

use serde::{de::DeserializeOwned, Serialize};
use thiserror::Error;

use crate::BoxError;

/// Failure to encode or decode a payload. Wraps the underlying cause.
#[derive(Debug, Error)]
#[error("{source}")]
pub struct EncodingError {
    #[source]
    source: BoxError,
}

impl EncodingError {
    pub fn new(source: impl Into<BoxError>) -> Self {
        Self {
            source: source.into(),
        }
    }
}

/// Bidirectional mapping between `T` and bytes.
pub trait Codec<T>: Send + Sync + 'static {
    fn encode(&self, message: &T) -> Result<Vec<u8>, EncodingError>;

    fn decode(&self, payload: &[u8]) -> Result<T, EncodingError>;
}

/// serde_json codec; the default for any serde type.
pub struct JsonCodec<T> {
    _marker: PhantomData<fn() -> T>,
}

impl<T> JsonCodec<T> {
    pub fn new() -> Self {
        Self {
            _marker: PhantomData,
        }
    }
}

impl<T> Default for JsonCodec<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Codec<T> for JsonCodec<T>
where
    T: Serialize + DeserializeOwned + 'static,
{
    fn encode(&self, message: &T) -> Result<Vec<u8>, EncodingError> {
        serde_json::to_vec(message).map_err(EncodingError::new)
    }

    fn decode(&self, payload: &[u8]) -> Result<T, EncodingError> {
        serde_json::from_slice(payload).map_err(EncodingError::new)
    }
}

/// Plain UTF-8 text payloads.
#[derive(Debug, Default, Clone, Copy)]
pub struct Utf8Codec;

impl Codec<String> for Utf8Codec {
    fn encode(&self, message: &String) -> Result<Vec<u8>, EncodingError> {
        Ok(message.as_bytes().to_vec())
    }

    fn decode(&self, payload: &[u8]) -> Result<String, EncodingError> {
        String::from_utf8(payload.to_vec()).map_err(EncodingError::new)
    }
}

/// Passes bytes through untouched.
#[derive(Debug, Default, Clone, Copy)]
pub struct RawCodec;

impl Codec<Vec<u8>> for RawCodec {
    fn encode(&self, message: &Vec<u8>) -> Result<Vec<u8>, EncodingError> {
        Ok(message.clone())
    }

    fn decode(&self, payload: &[u8]) -> Result<Vec<u8>, EncodingError> {
        Ok(payload.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Ping {
        seq: u32,
        note: String,
    }

    #[test]
    fn test_json_codec_decodes_what_it_encodes() {
        let codec = JsonCodec::<Ping>::new();
        let bytes = codec
            .encode(&Ping {
                seq: 7,
                note: "hi".into(),
            })
            .unwrap();
        assert_eq!(bytes, br#"{"seq":7,"note":"hi"}"#.to_vec());
        assert_eq!(codec.decode(&bytes).unwrap().seq, 7);
    }

    #[test]
    fn test_json_codec_rejects_malformed_payload() {
        let codec = JsonCodec::<Ping>::new();
        let err = codec.decode(b"{not json").unwrap_err();
        assert!(!err.to_string().is_empty());
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn test_json_codec_rejects_wrong_shape() {
        let codec = JsonCodec::<Ping>::new();
        assert!(codec.decode(br#"{"seq":"seven"}"#).is_err());
    }

    #[test]
    fn test_utf8_codec_rejects_invalid_utf8() {
        assert_eq!(Utf8Codec.decode(b"pong").unwrap(), "pong");
        assert!(Utf8Codec.decode(&[0xff, 0xfe, 0xfd]).is_err());
    }

    #[test]
    fn test_raw_codec_passthrough() {
        let payload = vec![0u8, 1, 2, 255];
        assert_eq!(RawCodec.encode(&payload).unwrap(), payload);
        assert_eq!(RawCodec.decode(&payload).unwrap(), payload);
    }
}
