//! Serializer capability consumed by providers and the bus

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::CacheResult;

/// Value codec behind the typed API.
///
/// The trait is object-safe: typed values cross the generic boundary as
/// `serde_json::Value` at the call site, so alternative wire formats
/// (MessagePack, CBOR, ...) can plug in behind the same registry entry.
pub trait Serializer: Send + Sync {
    /// Registered codec name
    fn name(&self) -> &str;

    fn serialize(&self, value: &serde_json::Value) -> CacheResult<Vec<u8>>;

    fn deserialize(&self, bytes: &[u8]) -> CacheResult<serde_json::Value>;
}

/// Encode a typed value through a serializer
pub fn to_payload<T: Serialize>(serializer: &dyn Serializer, value: &T) -> CacheResult<Vec<u8>> {
    let untyped = serde_json::to_value(value)?;
    serializer.serialize(&untyped)
}

/// Decode a typed value through a serializer
pub fn from_payload<T: DeserializeOwned>(
    serializer: &dyn Serializer,
    bytes: &[u8],
) -> CacheResult<T> {
    let untyped = serializer.deserialize(bytes)?;
    Ok(serde_json::from_value(untyped)?)
}

/// JSON codec, the default
#[derive(Debug, Default)]
pub struct JsonSerializer;

impl JsonSerializer {
    pub fn new() -> Self {
        Self
    }
}

impl Serializer for JsonSerializer {
    fn name(&self) -> &str {
        "json"
    }

    fn serialize(&self, value: &serde_json::Value) -> CacheResult<Vec<u8>> {
        Ok(serde_json::to_vec(value)?)
    }

    fn deserialize(&self, bytes: &[u8]) -> CacheResult<serde_json::Value> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Payload {
        id: u32,
        tags: Vec<String>,
    }

    #[test]
    fn typed_values_survive_the_codec() {
        let serializer = JsonSerializer::new();
        let original = Payload {
            id: 7,
            tags: vec!["a".into(), "b".into()],
        };

        let bytes = to_payload(&serializer, &original).unwrap();
        let decoded: Payload = from_payload(&serializer, &bytes).unwrap();
        assert_eq!(decoded, original);
    }

    #[test]
    fn garbage_bytes_report_deserialization() {
        let serializer = JsonSerializer::new();
        let err = serializer.deserialize(b"not json").unwrap_err();
        assert!(matches!(
            err,
            crate::CacheError::Deserialization(_) | crate::CacheError::Serialization(_)
        ));
    }
}
