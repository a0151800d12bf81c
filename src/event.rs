//! The common event shape and its wire framing.
//!
//! Every ingress normalizes into an [`Event`]; every sink reads one out.
//! Encoding/decoding of the native wire format (`CATEGORY:\t<json>`) lives
//! here alongside the self-describing "send failed" meta-event, since both
//! are properties of the same framing contract.

use std::rc::Rc;

use indexmap::IndexMap;
use serde_json::Value;
use snafu::{OptionExt, Snafu};

/// Datagrams above this many bytes are rejected by [`crate::client::Logger`]
/// and replaced with a meta-event describing the failure.
pub const DEFAULT_MAX_DATAGRAM_SIZE: usize = 8192;

/// Truncation length applied to `original.message` inside a meta-event.
pub const MAX_TRIMMED_MESSAGE_SIZE: usize = 200;

/// The reserved category under which meta-events are emitted.
pub const META_EVENT_CATEGORY: &str = "udplog";

/// A structured log record: a reference-counted, copy-on-write map of field
/// name to JSON value.
///
/// Cloning an `Event` is cheap (an `Rc` bump); mutating a clone via
/// [`Event::fields_mut`] only deep-copies the underlying map the first time
/// it's needed (`Rc::make_mut`), which is how the RabbitMQ and DataDog sinks
/// stringify/augment a private copy without disturbing any other consumer
/// still holding the original.
#[derive(Debug, Clone, PartialEq)]
pub struct Event(Rc<IndexMap<String, Value>>);

impl Event {
    pub fn new() -> Self {
        Event(Rc::new(IndexMap::new()))
    }

    pub fn from_map(map: IndexMap<String, Value>) -> Self {
        Event(Rc::new(map))
    }

    pub fn fields(&self) -> &IndexMap<String, Value> {
        &self.0
    }

    /// Returns a mutable view of the underlying map, cloning it first if any
    /// other `Event` handle shares this record.
    pub fn fields_mut(&mut self) -> &mut IndexMap<String, Value> {
        Rc::make_mut(&mut self.0)
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(Value::as_str)
    }

    /// Inserts a value, falling back to the value's debug rendering when it
    /// cannot be represented as JSON outright (the encoder's "best-effort"
    /// fallback from spec §4.A).
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.fields_mut().insert(key.into(), value.into());
    }

    pub fn category(&self) -> Option<&str> {
        self.get_str("category")
    }

    pub fn set_category(&mut self, category: impl Into<String>) {
        self.insert("category", Value::String(category.into()));
    }

    pub fn timestamp(&self) -> Option<f64> {
        self.get("timestamp").and_then(Value::as_f64)
    }

    pub fn set_timestamp(&mut self, timestamp: f64) {
        self.insert("timestamp", timestamp);
    }

    pub fn log_level(&self) -> Option<&str> {
        self.get_str("logLevel")
    }

    pub fn message(&self) -> Option<&str> {
        self.get_str("message")
    }

    /// Serializes the event to a JSON object, omitting `category` — this is
    /// the payload shape the Scribe sink sends (category becomes the Scribe
    /// entry category instead of a field) and the wire body every other sink
    /// sends is the full object including `category`.
    pub fn to_json_without_category(&self) -> Value {
        let mut map = self.0.as_ref().clone();
        map.shift_remove("category");
        Value::Object(map.into_iter().collect())
    }

    pub fn to_json(&self) -> Value {
        Value::Object(self.0.as_ref().clone().into_iter().collect())
    }
}

impl Default for Event {
    fn default() -> Self {
        Event::new()
    }
}

/// Errors from decoding a native-format datagram (spec §4.A).
#[derive(Debug, Snafu, PartialEq)]
pub enum DecodeError {
    #[snafu(display("datagram has no category separator"))]
    MalformedFrame,
    #[snafu(display("category payload is not valid JSON: {source}"))]
    MalformedJson { source: MalformedJsonError },
    #[snafu(display("decoded JSON is not an object"))]
    NotAnObject,
}

/// Wraps `serde_json::Error` so it can implement `PartialEq` for tests
/// (the upstream type doesn't).
#[derive(Debug)]
pub struct MalformedJsonError(pub String);

impl std::fmt::Display for MalformedJsonError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::error::Error for MalformedJsonError {}

impl PartialEq for MalformedJsonError {
    fn eq(&self, other: &Self) -> bool {
        self.0 == other.0
    }
}

/// Encodes an event to the native wire frame `CATEGORY:\t<json>`.
///
/// `category` falls back to the empty string if the event has none set.
pub fn encode(event: &Event) -> Vec<u8> {
    let category = event.category().unwrap_or_default();
    let json = serde_json::to_vec(&event.to_json()).unwrap_or_else(|_| b"{}".to_vec());
    let mut out = Vec::with_capacity(category.len() + 2 + json.len());
    out.extend_from_slice(category.as_bytes());
    out.extend_from_slice(b":\t");
    out.extend_from_slice(&json);
    out
}

/// Decodes a native wire frame into an [`Event`], per spec §4.A: split on
/// the first colon, left side is the category, right side must parse as a
/// JSON object.
pub fn decode(frame: &[u8]) -> Result<Event, DecodeError> {
    let text = String::from_utf8_lossy(frame);
    let text = text.trim_end();
    let colon = text.find(':').context(MalformedFrameSnafu)?;
    let (category, rest) = text.split_at(colon);
    let payload = rest[1..].trim_start_matches('\t').trim_start();

    let value: Value = serde_json::from_str(payload).map_err(|e| DecodeError::MalformedJson {
        source: MalformedJsonError(e.to_string()),
    })?;
    let Value::Object(map) = value else {
        return NotAnObjectSnafu.fail();
    };

    let mut event = Event::from_map(map.into_iter().collect());
    event.set_category(category.to_string());
    Ok(event)
}

/// Builds the self-describing meta-event emitted when a datagram could not
/// be sent (oversize or transport failure), per spec §4.A.
pub fn build_meta_event(original: &Event, original_size: usize, reason: &str) -> Event {
    let mut meta = Event::new();
    meta.set_category(META_EVENT_CATEGORY);
    meta.insert("logLevel", "WARNING");
    meta.insert("excType", "OversizeDatagram");
    meta.insert("excValue", reason.to_string());
    meta.insert("excText", reason.to_string());
    meta.insert("original_size", original_size as u64);

    let mut inner = IndexMap::new();
    if let Some(category) = original.category() {
        inner.insert("category".to_string(), Value::String(category.to_string()));
    }
    if let Some(ts) = original.timestamp() {
        inner.insert("timestamp".to_string(), serde_json::json!(ts));
    }
    if let Some(message) = original.message() {
        inner.insert("message".to_string(), Value::String(trim_message(message)));
    }
    for key in [
        "logLevel", "logName", "excText", "excType", "excValue", "lineno", "filename", "funcName",
    ] {
        if let Some(v) = original.get(key) {
            inner.insert(key.to_string(), v.clone());
        }
    }
    meta.insert("original", Value::Object(inner.into_iter().collect()));
    meta
}

fn trim_message(message: &str) -> String {
    if message.chars().count() <= MAX_TRIMMED_MESSAGE_SIZE {
        message.to_string()
    } else {
        let truncated: String = message.chars().take(MAX_TRIMMED_MESSAGE_SIZE).collect();
        format!("{truncated}[..]")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_well_formed_native_frame() {
        let event = decode(b"test_category:\t{\"key\":\"value\"}").unwrap();
        assert_eq!(event.category(), Some("test_category"));
        assert_eq!(event.get_str("key"), Some("value"));
    }

    #[test]
    fn rejects_frame_without_colon() {
        assert_eq!(decode(b"no colon here"), Err(DecodeError::MalformedFrame));
    }

    #[test]
    fn rejects_non_object_json() {
        assert_eq!(decode(b"cat:\t[1,2,3]"), Err(DecodeError::NotAnObject));
    }

    #[test]
    fn rejects_malformed_json() {
        assert!(matches!(
            decode(b"cat:\t{not json}"),
            Err(DecodeError::MalformedJson { .. })
        ));
    }

    #[test]
    fn meta_event_trims_long_message() {
        let mut original = Event::new();
        original.set_category("app");
        original.insert("message", "x".repeat(500));
        let meta = build_meta_event(&original, 9000, "datagram too large");
        assert_eq!(meta.category(), Some(META_EVENT_CATEGORY));
        assert_eq!(meta.log_level(), Some("WARNING"));
        assert_eq!(meta.get("original_size").and_then(Value::as_u64), Some(9000));
        let original_field = meta.get("original").unwrap();
        let message = original_field.get("message").unwrap().as_str().unwrap();
        assert_eq!(message.chars().count(), MAX_TRIMMED_MESSAGE_SIZE + 4);
        assert!(message.ends_with("[..]"));
    }

    #[test]
    fn meta_event_does_not_trim_short_message() {
        let mut original = Event::new();
        original.insert("message", "hello");
        let meta = build_meta_event(&original, 10, "boom");
        let original_field = meta.get("original").unwrap();
        assert_eq!(
            original_field.get("message").unwrap().as_str(),
            Some("hello")
        );
    }
}
