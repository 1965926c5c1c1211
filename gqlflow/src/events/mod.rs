//! Pipeline lifecycle events.
//!
//! Document stores report every send, stage invocation and settlement to an
//! [`EventSink`]. Payloads always carry the document name and an RFC 3339
//! timestamp.

mod sink;

pub use sink::{CollectingEventSink, EventSink, LoggingEventSink, NoOpEventSink};

use chrono::{SecondsFormat, Utc};
use serde_json::{Map, Value};

/// A `send()` call started.
pub const PIPELINE_SEND: &str = "pipeline.send";
/// A stage enter handler was invoked.
pub const STAGE_ENTER: &str = "stage.enter";
/// A stage exit handler was invoked.
pub const STAGE_EXIT: &str = "stage.exit";
/// A stage's throw hook was invoked.
pub const STAGE_THROW: &str = "stage.throw";
/// A chain completed its backward walk.
pub const PIPELINE_RESOLVED: &str = "pipeline.resolved";
/// A chain failed with no stage intercepting the error.
pub const PIPELINE_REJECTED: &str = "pipeline.rejected";
/// A paginated document holding data was sent without a cursor.
pub const PAGINATION_HAZARD: &str = "pagination.hazard";

/// Returns the current time as an RFC 3339 string.
#[must_use]
pub fn timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Builds an event payload for a document.
#[must_use]
pub fn payload(document: &str, fields: impl IntoIterator<Item = (&'static str, Value)>) -> Value {
    let mut map = Map::new();
    map.insert("document".to_string(), Value::String(document.to_string()));
    map.insert("timestamp".to_string(), Value::String(timestamp()));
    for (key, value) in fields {
        map.insert(key.to_string(), value);
    }
    Value::Object(map)
}
