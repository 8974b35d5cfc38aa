use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use shardwork_core::{AppError, AppResult};

/// Serializes one typed document for storage.
pub fn encode_document<T: Serialize>(collection: &str, document: &T) -> AppResult<Value> {
    serde_json::to_value(document).map_err(|error| {
        AppError::Internal(format!(
            "failed to encode document for collection '{collection}': {error}"
        ))
    })
}

/// Deserializes one stored document into its typed form.
pub fn decode_document<T: DeserializeOwned>(collection: &str, document: Value) -> AppResult<T> {
    serde_json::from_value(document).map_err(|error| {
        AppError::Internal(format!(
            "failed to decode document from collection '{collection}': {error}"
        ))
    })
}
