//! Remote store abstraction for append-oriented object stores
//!
//! The connector never speaks the store's wire protocol itself. It talks to a
//! [`RemoteStore`] that offers exactly three operations (existence query,
//! append stream, create stream) and reports a typed not-found error. A
//! [`StoreConnector`] binds a store to a freshly acquired [`Credential`];
//! that is the seam where a vendor SDK client plugs in.
//!
//! Two stores ship with the crate:
//!
//! - [`LocalStore`]: mirrors remote paths under a local directory
//! - [`MemoryStore`]: in-memory objects with fault injection, for tests and
//!   embedders that want to exercise the write path without a network
//!
//! # Example
//!
//! ```no_run
//! use orbit_adls::backend::{LocalStore, RemoteStore};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let store = LocalStore::new("/var/lib/orbit-adls/mirror");
//!     let mut stream = store.create("/logs/app.log", 0o755, true).await?;
//!     stream.write(b"hello\n").await?;
//!     stream.close().await?;
//!     Ok(())
//! }
//! ```

pub mod error;
mod local;
mod memory;

pub use error::{StoreError, StoreResult};
pub use local::{LocalConnector, LocalStore};
pub use memory::{FaultKind, FaultPoint, MemoryConnector, MemoryStore, StoreOp};

use crate::auth::Credential;
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;

/// Writable stream onto a single remote object
///
/// Bytes passed to [`write`](ObjectStream::write) are only guaranteed to be
/// accepted by the store once [`close`](ObjectStream::close) returns `Ok`.
#[async_trait]
pub trait ObjectStream: Send {
    /// Write a chunk of bytes to the object
    async fn write(&mut self, data: &[u8]) -> StoreResult<()>;

    /// Flush and close the stream
    async fn close(self: Box<Self>) -> StoreResult<()>;
}

/// Append-oriented remote object store
///
/// Implementors must be `Send + Sync`; many worker tasks share one store
/// through the current [`RemoteHandle`].
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Check if an object exists at `path`
    async fn exists(&self, path: &str) -> StoreResult<bool>;

    /// Open an append stream on an existing object
    ///
    /// # Errors
    ///
    /// Returns `StoreError::NotFound` if there is no object at `path`.
    /// Returns `StoreError::LeaseConflict` if another writer holds the lease.
    async fn open_append(&self, path: &str) -> StoreResult<Box<dyn ObjectStream>>;

    /// Create an object at `path` and open a stream onto it
    ///
    /// # Arguments
    ///
    /// * `path` - Object path
    /// * `permission` - Unix permission bits for the new object (e.g. `0o755`)
    /// * `overwrite` - Replace an existing object instead of failing
    async fn create(
        &self,
        path: &str,
        permission: u32,
        overwrite: bool,
    ) -> StoreResult<Box<dyn ObjectStream>>;

    /// Store name for logs (e.g. "local", "memory")
    fn name(&self) -> &str;
}

/// Builds a store client bound to one credential
#[async_trait]
pub trait StoreConnector: Send + Sync {
    /// Create a client for the account at `fqdn` authenticated by `credential`
    async fn connect(&self, fqdn: &str, credential: &Credential)
        -> StoreResult<Arc<dyn RemoteStore>>;
}

/// A live store client together with the credential it was built from
///
/// Handles are immutable. Renewal builds a new handle and swaps it in;
/// writers that already hold the previous one keep using it until they
/// drop it.
pub struct RemoteHandle {
    credential: Credential,
    store: Arc<dyn RemoteStore>,
}

impl RemoteHandle {
    pub fn new(credential: Credential, store: Arc<dyn RemoteStore>) -> Self {
        Self { credential, store }
    }

    pub fn credential(&self) -> &Credential {
        &self.credential
    }

    pub fn store(&self) -> &dyn RemoteStore {
        self.store.as_ref()
    }
}

impl fmt::Debug for RemoteHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteHandle")
            .field("credential", &self.credential)
            .field("store", &self.store.name())
            .finish()
    }
}
