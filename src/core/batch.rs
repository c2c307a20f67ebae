/*!
 * Per-destination batching
 *
 * The [`Batcher`] resolves each event's destination path from the path
 * template, encodes it, terminates it with the line separator and appends
 * it to that path's buffer. The result is a [`DestinationBatch`]: one byte
 * buffer per path, each in event arrival order.
 *
 * With `single_file_per_thread` every event first receives the calling
 * worker's correlation id under `[@metadata][cid]`, so the template can
 * route each worker's output into its own object and concurrent appenders
 * never contend for the same lease.
 */

use crate::codec::Codec;
use crate::error::{AdlsError, Result};
use crate::event::Event;
use crate::template::Template;
use bytes::{Bytes, BytesMut};
use rand::Rng;
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::warn;

/// Field reference the correlation id is stored under
pub const CID_FIELD: &str = "[@metadata][cid]";

/// Placeholder the path template must carry with `single_file_per_thread`
pub const CID_PLACEHOLDER: &str = "%{[@metadata][cid]}";

/// Correlation id source: `<instance value><slot>`
///
/// The instance value is random per sink (10..10000), so two sinks in the
/// same process rarely share ids. A slot is leased for the duration of one
/// delivery call and returned when the [`CorrelationLease`] drops. Calls in
/// flight at the same time hold distinct slots, and a call that starts after
/// others finished reuses the lowest free slot, so a steady set of workers
/// keeps appending to the same objects. Collisions across instances are not
/// fatal; they only make two workers share an object.
#[derive(Debug, Clone)]
pub struct CorrelationIds {
    instance: u32,
    slots: Arc<Mutex<SlotPool>>,
}

#[derive(Debug, Default)]
struct SlotPool {
    free: BTreeSet<u64>,
    issued: u64,
}

fn lock(pool: &Mutex<SlotPool>) -> MutexGuard<'_, SlotPool> {
    pool.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl CorrelationIds {
    pub fn new() -> Self {
        Self::with_instance(rand::rng().random_range(10..10000))
    }

    pub fn with_instance(instance: u32) -> Self {
        Self {
            instance,
            slots: Arc::new(Mutex::new(SlotPool::default())),
        }
    }

    pub fn instance(&self) -> u32 {
        self.instance
    }

    /// Lease a slot for one delivery call
    pub fn lease(&self) -> CorrelationLease {
        let slot = {
            let mut pool = lock(&self.slots);
            match pool.free.pop_first() {
                Some(slot) => slot,
                None => {
                    pool.issued += 1;
                    pool.issued
                }
            }
        };

        CorrelationLease {
            id: format!("{}{}", self.instance, slot),
            slot,
            slots: Arc::clone(&self.slots),
        }
    }

    /// Slots currently leased
    pub fn in_use(&self) -> usize {
        let pool = lock(&self.slots);
        let issued = usize::try_from(pool.issued).unwrap_or(usize::MAX);
        issued.saturating_sub(pool.free.len())
    }
}

impl Default for CorrelationIds {
    fn default() -> Self {
        Self::new()
    }
}

/// Correlation id held by one delivery call; the slot is freed on drop
#[derive(Debug)]
pub struct CorrelationLease {
    id: String,
    slot: u64,
    slots: Arc<Mutex<SlotPool>>,
}

impl CorrelationLease {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn slot(&self) -> u64 {
        self.slot
    }
}

impl Drop for CorrelationLease {
    fn drop(&mut self) {
        lock(&self.slots).free.insert(self.slot);
    }
}

/// Byte buffers keyed by destination path
#[derive(Debug, Default)]
pub struct DestinationBatch {
    buffers: BTreeMap<String, BytesMut>,
    counts: BTreeMap<String, usize>,
    events: usize,
    skipped: usize,
}

impl DestinationBatch {
    fn push(&mut self, path: String, encoded: &[u8], separator: &[u8]) {
        self.counts
            .entry(path.clone())
            .and_modify(|n| *n += 1)
            .or_insert(1);
        let buffer = self.buffers.entry(path).or_default();
        buffer.extend_from_slice(encoded);
        if !encoded.ends_with(separator) {
            buffer.extend_from_slice(separator);
        }
        self.events += 1;
    }

    /// Number of distinct destinations
    pub fn len(&self) -> usize {
        self.buffers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffers.is_empty()
    }

    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.buffers.keys().map(String::as_str)
    }

    pub fn get(&self, path: &str) -> Option<&[u8]> {
        self.buffers.get(path).map(|b| &b[..])
    }

    /// Events routed to `path`
    pub fn event_count(&self, path: &str) -> usize {
        self.counts.get(path).copied().unwrap_or(0)
    }

    /// Events encoded into the batch
    pub fn events(&self) -> usize {
        self.events
    }

    /// Events dropped because they failed to encode
    pub fn skipped(&self) -> usize {
        self.skipped
    }

    /// Consume the batch into `(path, bytes, event count)` entries
    pub fn into_entries(self) -> Vec<(String, Bytes, usize)> {
        let mut counts = self.counts;
        self.buffers
            .into_iter()
            .map(|(path, buffer)| {
                let count = counts.remove(&path).unwrap_or(0);
                (path, buffer.freeze(), count)
            })
            .collect()
    }
}

/// Groups events into per-destination buffers
pub struct Batcher {
    path: Template,
    separator: Vec<u8>,
    single_file_per_thread: bool,
    codec: Arc<dyn Codec>,
}

impl Batcher {
    /// # Errors
    ///
    /// Returns `AdlsError::Config` if `single_file_per_thread` is set and the
    /// path template does not interpolate `[@metadata][cid]`.
    pub fn new(
        path: Template,
        separator: impl Into<Vec<u8>>,
        single_file_per_thread: bool,
        codec: Arc<dyn Codec>,
    ) -> Result<Self> {
        if single_file_per_thread && !path.references(CID_FIELD) {
            return Err(AdlsError::Config(format!(
                "single_file_per_thread is enabled but path '{}' does not contain {}",
                path, CID_PLACEHOLDER
            )));
        }

        Ok(Self {
            path,
            separator: separator.into(),
            single_file_per_thread,
            codec,
        })
    }

    pub fn path_template(&self) -> &Template {
        &self.path
    }

    /// Group a set of events by destination
    ///
    /// `correlation_id` is stamped on every event when
    /// `single_file_per_thread` is enabled. Events that fail to encode are
    /// logged and skipped.
    pub fn group<I>(&self, events: I, correlation_id: &str) -> DestinationBatch
    where
        I: IntoIterator<Item = Event>,
    {
        let mut batch = DestinationBatch::default();

        for mut event in events {
            if self.single_file_per_thread {
                event.set(CID_FIELD, Value::String(correlation_id.to_string()));
            }

            let path = self.path.render(&event);
            match self.codec.encode(&event) {
                Ok(encoded) => batch.push(path, &encoded, &self.separator),
                Err(e) => {
                    warn!(path = %path, codec = self.codec.name(), error = %e, "Dropping event that failed to encode");
                    batch.skipped += 1;
                }
            }
        }

        batch
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{CodecError, LineCodec};
    use serde_json::json;

    fn event(kind: &str, message: &str) -> Event {
        let mut e = Event::new();
        e.set("type", json!(kind));
        e.set("message", json!(message));
        e
    }

    fn line_batcher(path: &str, single_file_per_thread: bool) -> Result<Batcher> {
        Batcher::new(
            Template::parse(path),
            "\n",
            single_file_per_thread,
            Arc::new(LineCodec::default()),
        )
    }

    #[test]
    fn test_groups_by_path_in_arrival_order() {
        let batcher = line_batcher("/logs/%{type}.log", false).unwrap();
        let batch = batcher.group(
            vec![
                event("a", "one"),
                event("b", "two"),
                event("a", "three"),
                event("b", "four"),
            ],
            "unused",
        );

        assert_eq!(batch.len(), 2);
        assert_eq!(batch.get("/logs/a.log").unwrap(), b"one\nthree\n");
        assert_eq!(batch.get("/logs/b.log").unwrap(), b"two\nfour\n");
        assert_eq!(batch.event_count("/logs/a.log"), 2);
        assert_eq!(batch.events(), 4);
    }

    #[test]
    fn test_separator_not_doubled() {
        let batcher = line_batcher("/logs/x.log", false).unwrap();
        let batch = batcher.group(vec![event("a", "done\n"), event("a", "next")], "unused");
        assert_eq!(batch.get("/logs/x.log").unwrap(), b"done\nnext\n");
    }

    #[test]
    fn test_multibyte_separator() {
        let batcher = Batcher::new(
            Template::parse("/x"),
            "\r\n",
            false,
            Arc::new(LineCodec::default()),
        )
        .unwrap();
        let batch = batcher.group(vec![event("a", "1"), event("a", "2\r\n")], "unused");
        assert_eq!(batch.get("/x").unwrap(), b"1\r\n2\r\n");
    }

    #[test]
    fn test_single_file_per_thread_requires_placeholder() {
        let err = line_batcher("/logs/%{type}.log", true).err().unwrap();
        assert!(matches!(err, AdlsError::Config(_)));
        assert!(err.to_string().contains(CID_PLACEHOLDER));

        assert!(line_batcher("/logs/%{type}.log", false).is_ok());
        assert!(line_batcher("/logs/%{type}-%{[@metadata][cid]}.log", true).is_ok());
    }

    #[test]
    fn test_correlation_id_routes_events() {
        let batcher = line_batcher("/logs/%{[@metadata][cid]}.log", true).unwrap();
        let batch = batcher.group(vec![event("a", "x"), event("a", "y")], "77");
        assert_eq!(batch.get("/logs/77.log").unwrap(), b"x\ny\n");
    }

    #[test]
    fn test_empty_input() {
        let batcher = line_batcher("/x", false).unwrap();
        let batch = batcher.group(Vec::new(), "unused");
        assert!(batch.is_empty());
        assert!(batch.into_entries().is_empty());
    }

    struct RejectingCodec;

    impl Codec for RejectingCodec {
        fn encode(&self, event: &Event) -> std::result::Result<Vec<u8>, CodecError> {
            match event.get("message") {
                Some(Value::String(s)) if s == "bad" => {
                    Err(CodecError::Json(serde_json::from_str::<Value>("{").unwrap_err()))
                }
                _ => LineCodec::default().encode(event),
            }
        }

        fn name(&self) -> &'static str {
            "rejecting"
        }
    }

    #[test]
    fn test_encode_failure_skips_event() {
        let batcher =
            Batcher::new(Template::parse("/x"), "\n", false, Arc::new(RejectingCodec)).unwrap();
        let batch = batcher.group(
            vec![event("a", "ok"), event("a", "bad"), event("a", "fine")],
            "unused",
        );
        assert_eq!(batch.get("/x").unwrap(), b"ok\nfine\n");
        assert_eq!(batch.skipped(), 1);
        assert_eq!(batch.events(), 2);
    }

    #[test]
    fn test_concurrent_leases_get_distinct_ids() {
        let ids = CorrelationIds::with_instance(4217);
        let first = ids.lease();
        let second = ids.lease();

        assert_eq!(first.id(), "42171");
        assert_eq!(second.id(), "42172");
        assert_eq!(ids.in_use(), 2);

        drop(first);
        assert_eq!(ids.in_use(), 1);
        let third = ids.lease();
        assert_eq!(third.id(), "42171");
        drop(second);
        drop(third);
        assert_eq!(ids.in_use(), 0);
    }

    #[test]
    fn test_sequential_leases_reuse_slot() {
        let ids = CorrelationIds::with_instance(99);
        for _ in 0..5 {
            let lease = ids.lease();
            assert_eq!(lease.slot(), 1);
        }

        let shared = ids.clone();
        let held = shared.lease();
        assert_eq!(ids.lease().slot(), 2);
        drop(held);
    }

    #[test]
    fn test_random_instance_range() {
        for _ in 0..100 {
            let instance = CorrelationIds::new().instance();
            assert!((10..10000).contains(&instance));
        }
    }
}
