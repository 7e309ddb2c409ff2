use anyhow::{Context, Result};
use futures::future::{BoxFuture, FutureExt};
use serde::Serialize;
use serde_json::Value;

/// Field that carries the real payload in an enveloped response.
pub const ENVELOPE_FIELD: &str = "data";

/// Turns whatever a fetch operation returned into the JSON payload to cache.
///
/// Callers pick the decoder that matches their endpoint instead of the
/// orchestrator sniffing the shape of the result.
pub trait Decoder<R>: Send + Sync {
    fn decode(&self, raw: R) -> BoxFuture<'_, Result<Value>>;
}

/// Unwrap exactly one envelope level: `{"data": X, ...}` becomes `X`.
/// Anything else is returned unchanged.
pub fn unwrap_envelope(value: Value) -> Value {
    match value {
        Value::Object(mut object) if object.contains_key(ENVELOPE_FIELD) => object
            .remove(ENVELOPE_FIELD)
            .unwrap_or(Value::Null),
        other => other,
    }
}

/// The raw value already is the payload.
#[derive(Debug, Clone, Copy, Default)]
pub struct Passthrough;

impl<R: Serialize + Send + 'static> Decoder<R> for Passthrough {
    fn decode(&self, raw: R) -> BoxFuture<'_, Result<Value>> {
        async move { serde_json::to_value(raw).context("Failed to encode fetched value as JSON") }
            .boxed()
    }
}

/// The raw value may wrap the payload in a `data` envelope.
#[derive(Debug, Clone, Copy, Default)]
pub struct Enveloped;

impl<R: Serialize + Send + 'static> Decoder<R> for Enveloped {
    fn decode(&self, raw: R) -> BoxFuture<'_, Result<Value>> {
        async move {
            let value =
                serde_json::to_value(raw).context("Failed to encode fetched value as JSON")?;
            Ok(unwrap_envelope(value))
        }
        .boxed()
    }
}

/// True for payloads that do not count as usable cached data.
pub fn is_empty_payload(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Array(items) => items.is_empty(),
        Value::Object(fields) => fields.is_empty(),
        Value::String(s) => s.is_empty(),
        _ => false,
    }
}
