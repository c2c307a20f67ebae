//! Record encoders
//!
//! A [`Codec`] turns one [`Event`] into the bytes appended to its
//! destination. The batcher adds the line separator afterwards, so codecs
//! do not need to terminate their output.

use crate::event::Event;
use crate::template::Template;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("JSON serialization failed: {0}")]
    Json(#[from] serde_json::Error),
}

pub trait Codec: Send + Sync {
    fn encode(&self, event: &Event) -> Result<Vec<u8>, CodecError>;

    /// Codec name for logs
    fn name(&self) -> &'static str;
}

/// One JSON object per event, `@timestamp` included, metadata excluded
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl Codec for JsonCodec {
    fn encode(&self, event: &Event) -> Result<Vec<u8>, CodecError> {
        Ok(serde_json::to_vec(&event.to_json())?)
    }

    fn name(&self) -> &'static str {
        "json"
    }
}

/// Renders a template per event (default `%{message}`)
#[derive(Debug, Clone)]
pub struct LineCodec {
    format: Template,
}

impl LineCodec {
    pub const DEFAULT_FORMAT: &'static str = "%{message}";

    pub fn new(format: &str) -> Self {
        Self {
            format: Template::parse(format),
        }
    }
}

impl Default for LineCodec {
    fn default() -> Self {
        Self::new(Self::DEFAULT_FORMAT)
    }
}

impl Codec for LineCodec {
    fn encode(&self, event: &Event) -> Result<Vec<u8>, CodecError> {
        Ok(self.format.render(event).into_bytes())
    }

    fn name(&self) -> &'static str {
        "line"
    }
}
