//! Messages exchanged between a bridge and a registry's stream listener.

use serde::{Deserialize, Serialize};

use super::fault::RemoteFault;
use crate::resource_name::ResourceName;
use crate::types::{PrincipalSet, Value};

/// One remote invocation, as sent by the bridge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InvokePayload {
    pub call_id: u64,
    pub resource: ResourceName,
    pub operation: String,
    pub arguments: Vec<Value>,
    pub signature: Vec<String>,
    /// Identity of the impersonation scope the call was issued from.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub principals: Option<PrincipalSet>,
}

/// Client-to-registry messages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum RegistryRequest {
    /// First message on every connection.
    #[serde(rename = "OPEN")]
    Open { client: String },

    #[serde(rename = "INVOKE")]
    Invoke { payload: InvokePayload },

    /// Ends the session; the registry drops the connection.
    #[serde(rename = "CLOSE")]
    Close,
}

/// Registry-to-client messages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum RegistryResponse {
    #[serde(rename = "OPENED")]
    Opened {
        #[serde(rename = "sessionId")]
        session_id: u64,
    },

    #[serde(rename = "RESULT")]
    Result {
        #[serde(rename = "callId")]
        call_id: u64,
        value: Value,
    },

    #[serde(rename = "FAULT")]
    Fault {
        #[serde(rename = "callId")]
        call_id: u64,
        fault: RemoteFault,
    },
}

impl RegistryResponse {
    /// The call this response answers, if it answers one.
    #[must_use]
    pub fn call_id(&self) -> Option<u64> {
        match self {
            Self::Opened { .. } => None,
            Self::Result { call_id, .. } | Self::Fault { call_id, .. } => Some(*call_id),
        }
    }
}
