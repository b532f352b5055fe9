//! Messages exchanged with a discovery service.
//!
//! A discovery service maps binding names to the stream address of a
//! registry. Clients look a name up, then connect to the returned address.

use serde::{Deserialize, Serialize};

/// Default port a discovery service listens on.
pub const DEFAULT_DISCOVERY_PORT: u16 = 9999;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum DiscoveryRequest {
    #[serde(rename = "LOOKUP")]
    Lookup { name: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum DiscoveryResponse {
    /// `address` is a `host:port` pair the registry accepts connections on.
    #[serde(rename = "BOUND")]
    Bound { name: String, address: String },

    #[serde(rename = "NOT_BOUND")]
    NotBound { name: String },
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::{decode, encode};

    #[test]
    fn not_bound_keeps_name() {
        let msg = DiscoveryResponse::NotBound {
            name: "registry".to_string(),
        };
        let decoded: DiscoveryResponse = decode(&encode(&msg).unwrap()).unwrap();
        assert_eq!(decoded, msg);
    }

    #[test]
    fn request_cannot_decode_as_response() {
        let bytes = encode(&DiscoveryRequest::Lookup {
            name: "registry".to_string(),
        })
        .unwrap();
        assert!(decode::<DiscoveryResponse>(&bytes).is_err());
    }
}
