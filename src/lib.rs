/*!
 * orbit-adls - batched log delivery to Azure Data Lake Store
 *
 * The write path of a log-shipping output:
 * - Groups each batch of events by destination path
 * - Appends to existing objects, creating them on first write
 * - Retries failed writes with linear, capped backoff
 * - Renews the OAuth access token in the background and swaps the store
 *   handle without interrupting in-flight writes
 *
 * Author: Shane Wall <shaneawall@gmail.com>
 */

pub mod auth;
pub mod backend;
pub mod codec;
pub mod config;
pub mod core;
pub mod error;
pub mod event;
pub mod logging;
pub mod sink;
pub mod template;

// Re-export commonly used types
pub use config::{CodecKind, LogLevel, SinkConfig};
pub use core::{DeliveryReport, PathReport, RetryPolicy};
pub use error::{AdlsError, Result};
pub use event::Event;
pub use sink::AdlsSink;
pub use template::Template;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
