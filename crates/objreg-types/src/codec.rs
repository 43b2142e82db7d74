//! Payload codec.
//!
//! Payloads are self-describing JSON, so any stored record can be decoded
//! without knowing which Rust type wrote it. Decoding is driven by the target
//! type parameter: callers pick the type, the codec fills a fresh instance.

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{TypeError, TypeResult};

/// Serialize an object into payload bytes.
pub fn encode<T: Serialize>(value: &T) -> TypeResult<Vec<u8>> {
    serde_json::to_vec(value).map_err(|e| TypeError::Encode(e.to_string()))
}

/// Deserialize payload bytes into a fresh `T`.
pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> TypeResult<T> {
    serde_json::from_slice(bytes).map_err(|e| TypeError::Decode(e.to_string()))
}
