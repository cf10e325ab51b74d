use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use uuid::Uuid;

/// Encode the given model as JSON bytes for storage.
pub fn encode_model<M: Serialize>(model: &M) -> Result<Vec<u8>> {
    serde_json::to_vec(model).context("error serializing data model")
}

/// Decode an object from the given buffer.
pub fn decode_model<M: DeserializeOwned>(data: &[u8]) -> Result<M> {
    serde_json::from_slice(data).context("error decoding object from storage")
}

/// Derive a stable content-addressed uid from the given model.
///
/// Uses a v5 UUID over the model's canonical JSON encoding, so the same configuration
/// always yields the same uid. Models hashed here must serialize deterministically
/// (ordered maps).
pub fn content_uid<M: Serialize>(model: &M) -> Result<String> {
    let buf = encode_model(model)?;
    Ok(Uuid::new_v5(&Uuid::NAMESPACE_OID, &buf).to_string())
}
