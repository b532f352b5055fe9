//! Wire messages for the registry and discovery protocols.
//!
//! Every frame carries one message encoded as named `MsgPack`
//! (`rmp_serde::to_vec_named()`), using internally tagged enums so each
//! message is a map with a `type` field.

pub mod discovery;
pub mod fault;
pub mod registry;

pub use discovery::{DiscoveryRequest, DiscoveryResponse, DEFAULT_DISCOVERY_PORT};
pub use fault::{FaultSeverity, RegistryFault, RemoteException, RemoteFault};
pub use registry::{InvokePayload, RegistryRequest, RegistryResponse};

use serde::de::DeserializeOwned;
use serde::Serialize;

/// Error encoding or decoding a wire message.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("failed to encode message: {0}")]
    Encode(#[from] rmp_serde::encode::Error),
    #[error("failed to decode message: {0}")]
    Decode(#[from] rmp_serde::decode::Error),
}

/// Encodes a message as named `MsgPack`.
///
/// # Errors
///
/// Returns [`CodecError::Encode`] if serialization fails.
pub fn encode<T: Serialize>(msg: &T) -> Result<Vec<u8>, CodecError> {
    Ok(rmp_serde::to_vec_named(msg)?)
}

/// Decodes a named `MsgPack` message.
///
/// # Errors
///
/// Returns [`CodecError::Decode`] if the bytes are not a valid `T`.
pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, CodecError> {
    Ok(rmp_serde::from_slice(bytes)?)
}
