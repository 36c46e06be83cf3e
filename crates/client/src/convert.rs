//! Mapping between stored bytes and domain objects.

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::marker::PhantomData;

#[derive(Debug, thiserror::Error)]
pub enum ConversionError {
    #[error("encode failed: {0}")]
    Encode(String),
    #[error("decode failed: {0}")]
    Decode(String),
}

/// Bytes to and from a domain type.
pub trait Converter<T>: Send + Sync {
    fn encode(&self, value: &T) -> Result<Vec<u8>, ConversionError>;
    fn decode(&self, bytes: &[u8]) -> Result<T, ConversionError>;
}

/// Objects that carry their own key in a designated field.
pub trait KeyedObject {
    /// The key, if the object has one. An empty string counts as none.
    fn object_key(&self) -> Option<&str>;
}

/// UTF-8 text.
#[derive(Debug, Clone, Copy, Default)]
pub struct StringConverter;

impl Converter<String> for StringConverter {
    fn encode(&self, value: &String) -> Result<Vec<u8>, ConversionError> {
        Ok(value.as_bytes().to_vec())
    }

    fn decode(&self, bytes: &[u8]) -> Result<String, ConversionError> {
        String::from_utf8(bytes.to_vec()).map_err(|e| ConversionError::Decode(e.to_string()))
    }
}

/// Raw bytes, unchanged.
#[derive(Debug, Clone, Copy, Default)]
pub struct BytesConverter;

impl Converter<Vec<u8>> for BytesConverter {
    fn encode(&self, value: &Vec<u8>) -> Result<Vec<u8>, ConversionError> {
        Ok(value.clone())
    }

    fn decode(&self, bytes: &[u8]) -> Result<Vec<u8>, ConversionError> {
        Ok(bytes.to_vec())
    }
}

/// JSON via serde.
pub struct JsonConverter<T> {
    _marker: PhantomData<fn() -> T>,
}

impl<T> JsonConverter<T> {
    pub fn new() -> Self {
        Self {
            _marker: PhantomData,
        }
    }
}

impl<T> Default for JsonConverter<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Clone for JsonConverter<T> {
    fn clone(&self) -> Self {
        Self::new()
    }
}

impl<T> std::fmt::Debug for JsonConverter<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("JsonConverter")
    }
}

impl<T> Converter<T> for JsonConverter<T>
where
    T: Serialize + DeserializeOwned,
{
    fn encode(&self, value: &T) -> Result<Vec<u8>, ConversionError> {
        serde_json::to_vec(value).map_err(|e| ConversionError::Encode(e.to_string()))
    }

    fn decode(&self, bytes: &[u8]) -> Result<T, ConversionError> {
        serde_json::from_slice(bytes).map_err(|e| ConversionError::Decode(e.to_string()))
    }
}
