//! Encoding of cache entries into store records.

use serde::{de::DeserializeOwned, Serialize};
use serde_json::{json, Value};

use super::entry::{CacheEntry, Ttl};
use crate::error::CodecError;
use crate::store::is_sentinel;

/// Turns a `CacheEntry` into a store record and back.
///
/// `decode` validates the entry shape before trusting the payload; anything
/// it rejects is evicted by the cache.
pub trait Codec: Send + Sync {
    fn encode<T: Serialize + ?Sized>(
        &self,
        data: &T,
        timestamp: i64,
        ttl: Ttl,
    ) -> Result<String, CodecError>;

    fn decode<T: DeserializeOwned>(&self, raw: &str) -> Result<CacheEntry<T>, CodecError>;
}

/// `{"data": ..., "timestamp": <ms>, "ttl": <ms>}` as JSON text.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl Codec for JsonCodec {
    fn encode<T: Serialize + ?Sized>(
        &self,
        data: &T,
        timestamp: i64,
        ttl: Ttl,
    ) -> Result<String, CodecError> {
        let data = serde_json::to_value(data).map_err(|e| CodecError::Serialization(e.to_string()))?;
        if data.is_null() {
            return Err(CodecError::Absent);
        }
        let record = json!({
            "data": data,
            "timestamp": timestamp,
            "ttl": ttl.as_millis(),
        });
        Ok(record.to_string())
    }

    fn decode<T: DeserializeOwned>(&self, raw: &str) -> Result<CacheEntry<T>, CodecError> {
        if is_sentinel(raw) {
            return Err(CodecError::Sentinel);
        }
        let value: Value =
            serde_json::from_str(raw).map_err(|e| CodecError::Serialization(e.to_string()))?;
        let Value::Object(mut fields) = value else {
            return Err(CodecError::Shape("entry is not an object"));
        };

        let timestamp = fields
            .get("timestamp")
            .and_then(as_millis)
            .ok_or(CodecError::Shape("missing or non-numeric timestamp"))?;
        let ttl = fields
            .get("ttl")
            .and_then(as_millis)
            .filter(|ttl| *ttl >= 0)
            .ok_or(CodecError::Shape("missing or non-numeric ttl"))?;
        let data = match fields.remove("data") {
            None | Some(Value::Null) => return Err(CodecError::Shape("entry has no data")),
            Some(data) => data,
        };
        let data = serde_json::from_value(data).map_err(|e| CodecError::Serialization(e.to_string()))?;

        Ok(CacheEntry {
            data,
            timestamp,
            ttl,
        })
    }
}

/// Millisecond fields may have been written as floats by older clients.
fn as_millis(value: &Value) -> Option<i64> {
    value.as_i64().or_else(|| {
        value
            .as_f64()
            .filter(|f| f.is_finite())
            .map(|f| f as i64)
    })
}
