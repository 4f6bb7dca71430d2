//! Event stream subscription
//!
//! `EventStream` owns the socket of one `events_stream` subscription after a
//! successful handshake. Every non-blank line the daemon writes becomes one
//! [`StreamItem`]:
//!
//! ```text
//! {"t":"event","event":{...}}   -> StreamItem::Event
//! {"t":"heartbeat","ts":"..."}  -> StreamItem::Heartbeat
//! {"t":"<anything else>",...}   -> StreamItem::Other
//! ```
//!
//! Lines that are not JSON objects with a string `t` are skipped so a single
//! corrupt line never ends the subscription.
//!
//! The socket lives exactly as long as the `EventStream` (or the boxed stream
//! returned by [`EventStream::into_stream`]); dropping it closes the
//! connection once.

use futures::stream::{self, BoxStream};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::io::AsyncWriteExt;
use tracing::{debug, trace};

use crate::error::ClientError;
use crate::lines::LineReader;
use crate::transport::{DaemonSocket, StreamConnection};
use crate::types::Response;

/// Domain event delivered over the stream
///
/// The daemon defines the event schema; only the common envelope keys are
/// typed here and everything else lands in `extra`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Event {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub ts: String,
    #[serde(default)]
    pub kind: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub group_id: String,
    #[serde(default)]
    pub data: Value,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// One decoded line of an event stream
#[derive(Debug, Clone, PartialEq)]
pub enum StreamItem {
    Event(Event),
    Heartbeat { ts: String },
    /// Item type this client does not know (or a known type with an
    /// unexpected shape); all keys except `t` are kept in `fields`
    Other { t: String, fields: Map<String, Value> },
}

impl StreamItem {
    /// The item's `t` discriminator
    pub fn kind(&self) -> &str {
        match self {
            Self::Event(_) => "event",
            Self::Heartbeat { .. } => "heartbeat",
            Self::Other { t, .. } => t,
        }
    }

    /// Decode a parsed line
    ///
    /// Returns `None` when the value is not an object with a string `t`.
    pub fn from_value(value: Value) -> Option<Self> {
        let Value::Object(mut fields) = value else {
            return None;
        };
        let t = match fields.remove("t") {
            Some(Value::String(t)) => t,
            _ => return None,
        };

        match t.as_str() {
            "event" => {
                if let Some(raw @ Value::Object(_)) = fields.get("event") {
                    if let Ok(event) = serde_json::from_value::<Event>(raw.clone()) {
                        return Some(Self::Event(event));
                    }
                }
            }
            "heartbeat" => {
                if let Some(Value::String(ts)) = fields.get("ts") {
                    return Some(Self::Heartbeat { ts: ts.clone() });
                }
            }
            _ => {}
        }

        Some(Self::Other { t, fields })
    }

    /// Parse one raw stream line
    pub fn parse_line(line: &str) -> Option<Self> {
        match serde_json::from_str::<Value>(line) {
            Ok(value) => Self::from_value(value),
            Err(e) => {
                debug!(error = %e, "Skipping stream line that is not valid JSON");
                None
            }
        }
    }

    /// Render back into the wire shape
    pub fn to_value(&self) -> Value {
        let mut map = Map::new();
        match self {
            Self::Event(event) => {
                map.insert("t".into(), Value::from("event"));
                map.insert(
                    "event".into(),
                    serde_json::to_value(event).unwrap_or(Value::Null),
                );
            }
            Self::Heartbeat { ts } => {
                map.insert("t".into(), Value::from("heartbeat"));
                map.insert("ts".into(), Value::from(ts.as_str()));
            }
            Self::Other { t, fields } => {
                map.insert("t".into(), Value::from(t.as_str()));
                map.extend(fields.clone());
            }
        }
        Value::Object(map)
    }
}

/// Live `events_stream` subscription
pub struct EventStream {
    lines: LineReader<DaemonSocket>,
    handshake: Response,
    skipped: u64,
}

impl std::fmt::Debug for EventStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventStream")
            .field("handshake", &self.handshake)
            .field("buffered", &self.lines.buffered_len())
            .field("skipped", &self.skipped)
            .finish()
    }
}

impl EventStream {
    /// Wrap a connection whose handshake was already accepted
    pub(crate) fn new(connection: StreamConnection) -> Self {
        Self {
            lines: connection.lines,
            handshake: connection.handshake,
            skipped: 0,
        }
    }

    /// The handshake response the daemon sent before the first item
    pub fn handshake(&self) -> &Response {
        &self.handshake
    }

    /// Number of lines dropped so far because they did not decode
    pub fn skipped_lines(&self) -> u64 {
        self.skipped
    }

    /// Wait for the next item
    ///
    /// Returns `Ok(None)` once the daemon closes the connection. Reads have
    /// no timeout; an idle stream simply waits.
    ///
    /// # Errors
    ///
    /// Returns `ClientError::Unavailable` if reading from the socket fails.
    pub async fn next_item(&mut self) -> Result<Option<StreamItem>, ClientError> {
        loop {
            let line = self
                .lines
                .next_line()
                .await
                .map_err(|e| ClientError::unavailable(e.to_string()))?;

            let Some(line) = line else {
                debug!(skipped = self.skipped, "Event stream closed by daemon");
                return Ok(None);
            };

            trace!(bytes = line.len(), "Stream line");

            match StreamItem::parse_line(&line) {
                Some(item) => return Ok(Some(item)),
                None => self.skipped += 1,
            }
        }
    }

    /// Shut down the write side and drop the connection
    pub async fn close(mut self) {
        let _ = self.lines.get_mut().shutdown().await;
    }

    /// Convert into a `futures` stream
    ///
    /// The stream ends after the daemon closes the connection or after the
    /// first read error (which is yielded as the final item).
    pub fn into_stream(self) -> BoxStream<'static, Result<StreamItem, ClientError>> {
        Box::pin(stream::unfold(Some(self), |state| async move {
            let mut events = state?;
            match events.next_item().await {
                Ok(Some(item)) => Some((Ok(item), Some(events))),
                Ok(None) => None,
                Err(e) => Some((Err(e), None)),
            }
        }))
    }
}
