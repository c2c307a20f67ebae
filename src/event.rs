/*!
 * Structured log events
 *
 * An [`Event`] is a JSON object plus two out-of-band parts: the event
 * timestamp (`@timestamp`) and a `@metadata` map that is visible to path
 * templates but never encoded into the delivered bytes.
 *
 * Fields are addressed with Logstash field references: `message` for a
 * top-level field, `[a][b]` for nested ones. `[@metadata][x]` routes into
 * the metadata map.
 */

use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::{Map, Value};
use thiserror::Error;

/// Name of the timestamp field
pub const TIMESTAMP_FIELD: &str = "@timestamp";

/// Name of the metadata root
pub const METADATA_FIELD: &str = "@metadata";

#[derive(Debug, Error)]
pub enum EventError {
    #[error("Invalid event JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Event must be a JSON object, got {0}")]
    NotAnObject(&'static str),

    #[error("Invalid @timestamp '{value}': {reason}")]
    InvalidTimestamp { value: String, reason: String },
}

/// A single structured log record
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    fields: Map<String, Value>,
    metadata: Map<String, Value>,
    timestamp: DateTime<Utc>,
}

impl Event {
    /// Empty event stamped with the current time
    pub fn new() -> Self {
        Self::with_timestamp(Utc::now())
    }

    pub fn with_timestamp(timestamp: DateTime<Utc>) -> Self {
        Self {
            fields: Map::new(),
            metadata: Map::new(),
            timestamp,
        }
    }

    /// Build an event from a JSON object
    ///
    /// A string `@timestamp` (RFC 3339) becomes the event timestamp; a
    /// `@metadata` object becomes the metadata map.
    pub fn from_value(value: Value) -> Result<Self, EventError> {
        let mut fields = match value {
            Value::Object(map) => map,
            Value::Array(_) => return Err(EventError::NotAnObject("array")),
            Value::String(_) => return Err(EventError::NotAnObject("string")),
            Value::Number(_) => return Err(EventError::NotAnObject("number")),
            Value::Bool(_) => return Err(EventError::NotAnObject("bool")),
            Value::Null => return Err(EventError::NotAnObject("null")),
        };

        let timestamp = match fields.remove(TIMESTAMP_FIELD) {
            Some(Value::String(s)) => DateTime::parse_from_rfc3339(&s)
                .map(|t| t.with_timezone(&Utc))
                .map_err(|e| EventError::InvalidTimestamp {
                    value: s.clone(),
                    reason: e.to_string(),
                })?,
            Some(other) => {
                return Err(EventError::InvalidTimestamp {
                    value: other.to_string(),
                    reason: "expected an RFC 3339 string".to_string(),
                })
            }
            None => Utc::now(),
        };

        let metadata = match fields.remove(METADATA_FIELD) {
            Some(Value::Object(map)) => map,
            Some(other) => {
                // Not a map: keep it as an ordinary field
                fields.insert(METADATA_FIELD.to_string(), other);
                Map::new()
            }
            None => Map::new(),
        };

        Ok(Self {
            fields,
            metadata,
            timestamp,
        })
    }

    /// Parse one line of newline-delimited JSON
    pub fn from_json_line(line: &str) -> Result<Self, EventError> {
        let value: Value = serde_json::from_str(line.trim_end_matches(['\r', '\n']))?;
        Self::from_value(value)
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn fields(&self) -> &Map<String, Value> {
        &self.fields
    }

    pub fn metadata(&self) -> &Map<String, Value> {
        &self.metadata
    }

    /// Look up a field reference
    ///
    /// `@timestamp` renders as RFC 3339 with millisecond precision.
    pub fn get(&self, field_ref: &str) -> Option<Value> {
        let segments = parse_field_ref(field_ref);
        let (first, rest) = segments.split_first()?;

        if *first == TIMESTAMP_FIELD && rest.is_empty() {
            return Some(Value::String(self.timestamp_rfc3339()));
        }

        let (root, path) = if *first == METADATA_FIELD {
            (&self.metadata, rest)
        } else {
            (&self.fields, &segments[..])
        };
        let (head, tail) = path.split_first()?;

        let mut value = root.get(*head)?;
        for segment in tail {
            value = value.as_object()?.get(*segment)?;
        }
        Some(value.clone())
    }

    /// Set a field reference, creating intermediate objects
    ///
    /// Intermediate values that are not objects are replaced.
    pub fn set(&mut self, field_ref: &str, value: Value) {
        let segments = parse_field_ref(field_ref);
        let Some((first, rest)) = segments.split_first() else {
            return;
        };

        if *first == TIMESTAMP_FIELD && rest.is_empty() {
            if let Some(t) = value
                .as_str()
                .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            {
                self.timestamp = t.with_timezone(&Utc);
            }
            return;
        }

        let (root, path) = if *first == METADATA_FIELD {
            (&mut self.metadata, rest)
        } else {
            (&mut self.fields, &segments[..])
        };
        let Some((last, parents)) = path.split_last() else {
            return;
        };

        let mut map = root;
        for segment in parents {
            let slot = map
                .entry(segment.to_string())
                .or_insert_with(|| Value::Object(Map::new()));
            if !slot.is_object() {
                *slot = Value::Object(Map::new());
            }
            map = match slot {
                Value::Object(inner) => inner,
                _ => return,
            };
        }
        map.insert(last.to_string(), value);
    }

    /// The event as a JSON object, including `@timestamp` and excluding metadata
    pub fn to_json(&self) -> Value {
        let mut map = Map::with_capacity(self.fields.len() + 1);
        map.insert(
            TIMESTAMP_FIELD.to_string(),
            Value::String(self.timestamp_rfc3339()),
        );
        for (k, v) in &self.fields {
            map.insert(k.clone(), v.clone());
        }
        Value::Object(map)
    }

    fn timestamp_rfc3339(&self) -> String {
        self.timestamp.to_rfc3339_opts(SecondsFormat::Millis, true)
    }
}

impl Default for Event {
    fn default() -> Self {
        Self::new()
    }
}

/// Split a field reference into its path segments
///
/// `message` -> `["message"]`, `[a][b]` -> `["a", "b"]`.
pub fn parse_field_ref(field_ref: &str) -> Vec<&str> {
    let trimmed = field_ref.trim();
    if trimmed.starts_with('[') && trimmed.ends_with(']') {
        trimmed[1..trimmed.len() - 1]
            .split("][")
            .filter(|s| !s.is_empty())
            .collect()
    } else if trimmed.is_empty() {
        Vec::new()
    } else {
        vec![trimmed]
    }
}
