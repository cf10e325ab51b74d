//! The message model flowing from listeners through the engine to endpoints.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use uuid::Uuid;

// Well-known metadata keys.
pub const HOSTNAME_KEY: &str = "host";
pub const MESSAGE_ID_KEY: &str = "message:id";
pub const PIPE_URI_KEY: &str = "pipe:uri";
pub const PIPE_TIMESTAMP_KEY: &str = "pipe:received-at";
pub const PIPE_PROTOCOL_KEY: &str = "pipe:protocol";
pub const ENGINE_STARTED_AT_KEY: &str = "engine:started-at";
pub const ENGINE_ENDED_AT_KEY: &str = "engine:ended-at";
pub const ENGINE_OK_KEY: &str = "engine:ok";
pub const ENGINE_ERROR_KEY: &str = "engine:error";
pub const PROFILE_NAME_KEY: &str = "profile:name";
pub const PROFILE_VERSION_KEY: &str = "profile:version";
pub const RUNTIME_VERSION_KEY: &str = "runtime:version";

/// The version of this runtime, stamped into every output message.
pub const RUNTIME_VERSION: &str = env!("CARGO_PKG_VERSION");

/// A message contains a raw payload, a processed output and any metadata collected.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Message {
    /// The raw bytes delivered by the transport.
    pub payload: Vec<u8>,
    /// The engine's structured output, opaque to the core.
    #[serde(default)]
    pub output: serde_json::Value,
    /// The output schema declared by the pipe's profile.
    #[serde(default)]
    pub schema: serde_json::Value,
    /// Open metadata collected along the way.
    #[serde(default)]
    pub metadata: serde_json::Map<String, serde_json::Value>,
    /// Free-form tags attached by the pipe.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub tags: BTreeMap<String, String>,
}

impl Message {
    /// Create a new message from a raw transport payload, stamping receive metadata.
    pub fn from_payload(payload: Vec<u8>, protocol: &str, uri: &str) -> Self {
        let host = hostname::get()
            .ok()
            .and_then(|host| host.into_string().ok())
            .unwrap_or_else(|| "UNKNOWN".to_string());
        let mut metadata = serde_json::Map::new();
        metadata.insert(MESSAGE_ID_KEY.into(), Uuid::new_v4().to_string().into());
        metadata.insert(PIPE_URI_KEY.into(), uri.into());
        metadata.insert(PIPE_PROTOCOL_KEY.into(), protocol.into());
        metadata.insert(PIPE_TIMESTAMP_KEY.into(), now_rfc3339().into());
        metadata.insert(HOSTNAME_KEY.into(), host.into());
        Self {
            payload,
            metadata,
            ..Default::default()
        }
    }
}

/// The current UTC time as an RFC3339 string.
pub fn now_rfc3339() -> String {
    OffsetDateTime::now_utc().format(&Rfc3339).unwrap_or_default()
}
