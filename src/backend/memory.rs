//! In-memory store with fault injection
//!
//! Objects live in a shared map. Every store handed out by the
//! [`MemoryConnector`] shares that map but is labelled with the access token
//! it was connected with, so the operation log shows which credential
//! served each call. Faults can be queued per operation to drive the retry
//! and fallback paths deterministically.

use super::error::{StoreError, StoreResult};
use super::{ObjectStream, RemoteStore, StoreConnector};
use crate::auth::Credential;
use async_trait::async_trait;
use secrecy::ExposeSecret;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::Semaphore;

/// Operation recorded by a [`MemoryStore`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreOp {
    Exists { path: String },
    OpenAppend { path: String },
    Create { path: String, permission: u32, overwrite: bool },
    Write { path: String, len: usize },
    Close { path: String },
}

impl StoreOp {
    pub fn path(&self) -> &str {
        match self {
            StoreOp::Exists { path }
            | StoreOp::OpenAppend { path }
            | StoreOp::Create { path, .. }
            | StoreOp::Write { path, .. }
            | StoreOp::Close { path } => path,
        }
    }
}

/// Operation a fault can be attached to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FaultPoint {
    Exists,
    Append,
    Create,
    Write,
}

/// Kind of error an injected fault produces
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FaultKind {
    LeaseConflict,
    Remote { status: u16, message: String },
    Io,
}

impl FaultKind {
    fn to_error(&self, path: &str) -> StoreError {
        match self {
            FaultKind::LeaseConflict => StoreError::LeaseConflict {
                path: path.to_string(),
                message: "lease is held by another writer".to_string(),
            },
            FaultKind::Remote { status, message } => StoreError::Remote {
                path: path.to_string(),
                status: Some(*status),
                remote_exception: Some("RemoteException".to_string()),
                remote_message: Some(message.clone()),
                message: format!("operation failed with HTTP {}", status),
            },
            FaultKind::Io => StoreError::Io(std::io::Error::new(
                std::io::ErrorKind::ConnectionReset,
                "connection reset by peer",
            )),
        }
    }
}

#[derive(Default)]
struct Faults {
    once: HashMap<FaultPoint, VecDeque<FaultKind>>,
    always: HashMap<FaultPoint, FaultKind>,
}

impl Faults {
    fn take(&mut self, point: FaultPoint) -> Option<FaultKind> {
        if let Some(kind) = self.once.get_mut(&point).and_then(VecDeque::pop_front) {
            return Some(kind);
        }
        self.always.get(&point).cloned()
    }
}

#[derive(Default)]
struct MemoryState {
    objects: Mutex<HashMap<String, Vec<u8>>>,
    permissions: Mutex<HashMap<String, u32>>,
    faults: Mutex<Faults>,
    log: Mutex<Vec<(String, StoreOp)>>,
    write_gate: Mutex<Option<Arc<Semaphore>>>,
    connects: AtomicUsize,
    connect_failures: AtomicUsize,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// In-memory store
#[derive(Clone)]
pub struct MemoryStore {
    label: String,
    state: Arc<MemoryState>,
}

impl MemoryStore {
    /// Create an empty store labelled "memory"
    pub fn new() -> Self {
        Self {
            label: "memory".to_string(),
            state: Arc::new(MemoryState::default()),
        }
    }

    /// Same objects, different label
    fn relabel(&self, label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            state: Arc::clone(&self.state),
        }
    }

    /// Label of this store (the access token it was connected with)
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Pre-populate an object
    pub fn insert(&self, path: &str, data: &[u8]) {
        lock(&self.state.objects).insert(path.to_string(), data.to_vec());
    }

    /// Current contents of an object
    pub fn contents(&self, path: &str) -> Option<Vec<u8>> {
        lock(&self.state.objects).get(path).cloned()
    }

    /// Current contents of an object as UTF-8
    pub fn contents_string(&self, path: &str) -> Option<String> {
        self.contents(path)
            .map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
    }

    /// Permission an object was created with
    pub fn permission(&self, path: &str) -> Option<u32> {
        lock(&self.state.permissions).get(path).copied()
    }

    /// Sorted list of object paths
    pub fn paths(&self) -> Vec<String> {
        let mut paths: Vec<String> = lock(&self.state.objects).keys().cloned().collect();
        paths.sort();
        paths
    }

    /// Every operation so far, tagged with the label of the store that served it
    pub fn ops(&self) -> Vec<(String, StoreOp)> {
        lock(&self.state.log).clone()
    }

    /// Operations that targeted `path`
    pub fn ops_for(&self, path: &str) -> Vec<(String, StoreOp)> {
        self.ops()
            .into_iter()
            .filter(|(_, op)| op.path() == path)
            .collect()
    }

    /// Fail the next call at `point` with `kind`; queued faults fire in order
    pub fn fail_next(&self, point: FaultPoint, kind: FaultKind) {
        lock(&self.state.faults)
            .once
            .entry(point)
            .or_default()
            .push_back(kind);
    }

    /// Fail every call at `point` with `kind` until cleared
    pub fn fail_always(&self, point: FaultPoint, kind: FaultKind) {
        lock(&self.state.faults).always.insert(point, kind);
    }

    /// Remove every injected fault
    pub fn clear_faults(&self) {
        let mut faults = lock(&self.state.faults);
        faults.once.clear();
        faults.always.clear();
    }

    /// Make stream writes wait for permits on the returned semaphore
    ///
    /// Each write consumes one permit. Call [`open_writes`](Self::open_writes)
    /// to stop gating.
    pub fn gate_writes(&self) -> Arc<Semaphore> {
        let gate = Arc::new(Semaphore::new(0));
        *lock(&self.state.write_gate) = Some(Arc::clone(&gate));
        gate
    }

    pub fn open_writes(&self) {
        if let Some(gate) = lock(&self.state.write_gate).take() {
            gate.add_permits(Semaphore::MAX_PERMITS / 2);
        }
    }

    fn record(&self, op: StoreOp) {
        lock(&self.state.log).push((self.label.clone(), op));
    }

    fn fault(&self, point: FaultPoint, path: &str) -> StoreResult<()> {
        match lock(&self.state.faults).take(point) {
            Some(kind) => Err(kind.to_error(path)),
            None => Ok(()),
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

struct MemoryStream {
    store: MemoryStore,
    path: String,
}

#[async_trait]
impl ObjectStream for MemoryStream {
    async fn write(&mut self, data: &[u8]) -> StoreResult<()> {
        let gate = lock(&self.store.state.write_gate).clone();
        if let Some(gate) = gate {
            if let Ok(permit) = gate.acquire().await {
                permit.forget();
            }
        }

        self.store.record(StoreOp::Write {
            path: self.path.clone(),
            len: data.len(),
        });
        self.store.fault(FaultPoint::Write, &self.path)?;

        lock(&self.store.state.objects)
            .entry(self.path.clone())
            .or_default()
            .extend_from_slice(data);
        Ok(())
    }

    async fn close(self: Box<Self>) -> StoreResult<()> {
        let path = self.path.clone();
        self.store.record(StoreOp::Close { path });
        Ok(())
    }
}

#[async_trait]
impl RemoteStore for MemoryStore {
    async fn exists(&self, path: &str) -> StoreResult<bool> {
        self.record(StoreOp::Exists {
            path: path.to_string(),
        });
        self.fault(FaultPoint::Exists, path)?;
        Ok(lock(&self.state.objects).contains_key(path))
    }

    async fn open_append(&self, path: &str) -> StoreResult<Box<dyn ObjectStream>> {
        self.record(StoreOp::OpenAppend {
            path: path.to_string(),
        });
        self.fault(FaultPoint::Append, path)?;
        if !lock(&self.state.objects).contains_key(path) {
            return Err(StoreError::not_found(path, "memory"));
        }
        Ok(Box::new(MemoryStream {
            store: self.clone(),
            path: path.to_string(),
        }))
    }

    async fn create(
        &self,
        path: &str,
        permission: u32,
        overwrite: bool,
    ) -> StoreResult<Box<dyn ObjectStream>> {
        self.record(StoreOp::Create {
            path: path.to_string(),
            permission,
            overwrite,
        });
        self.fault(FaultPoint::Create, path)?;

        {
            let mut objects = lock(&self.state.objects);
            if objects.contains_key(path) && !overwrite {
                return Err(StoreError::Remote {
                    path: path.to_string(),
                    status: Some(403),
                    remote_exception: Some("FileAlreadyExistsException".to_string()),
                    remote_message: Some(format!("{} already exists", path)),
                    message: "create without overwrite".to_string(),
                });
            }
            objects.insert(path.to_string(), Vec::new());
        }
        lock(&self.state.permissions).insert(path.to_string(), permission);

        Ok(Box::new(MemoryStream {
            store: self.clone(),
            path: path.to_string(),
        }))
    }

    fn name(&self) -> &str {
        "memory"
    }
}

/// Connector handing out [`MemoryStore`] views labelled by access token
#[derive(Clone)]
pub struct MemoryConnector {
    store: MemoryStore,
}

impl MemoryConnector {
    pub fn new(store: MemoryStore) -> Self {
        Self { store }
    }

    /// Number of successful connects so far
    pub fn connects(&self) -> usize {
        self.store.state.connects.load(Ordering::SeqCst)
    }

    /// Fail the next `count` connect attempts
    pub fn fail_connects(&self, count: usize) {
        self.store
            .state
            .connect_failures
            .store(count, Ordering::SeqCst);
    }
}

#[async_trait]
impl StoreConnector for MemoryConnector {
    async fn connect(
        &self,
        fqdn: &str,
        credential: &Credential,
    ) -> StoreResult<Arc<dyn RemoteStore>> {
        let failures = &self.store.state.connect_failures;
        if failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(StoreError::Other {
                store: "memory".to_string(),
                message: format!("cannot reach {}", fqdn),
            });
        }

        self.store.state.connects.fetch_add(1, Ordering::SeqCst);
        let label = credential.access_token().expose_secret().to_string();
        Ok(Arc::new(self.store.relabel(label)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_append_requires_existing_object() {
        let store = MemoryStore::new();
        assert!(store.open_append("/a").await.err().unwrap().is_not_found());

        store.insert("/a", b"x");
        let mut stream = store.open_append("/a").await.unwrap();
        stream.write(b"y").await.unwrap();
        stream.close().await.unwrap();
        assert_eq!(store.contents("/a").unwrap(), b"xy");
    }

    #[tokio::test]
    async fn test_fail_next_fires_once_in_order() {
        let store = MemoryStore::new();
        store.insert("/a", b"");
        store.fail_next(FaultPoint::Append, FaultKind::LeaseConflict);
        store.fail_next(FaultPoint::Append, FaultKind::Io);

        assert!(store.open_append("/a").await.err().unwrap().is_lease_conflict());
        assert!(matches!(
            store.open_append("/a").await.err().unwrap(),
            StoreError::Io(_)
        ));
        assert!(store.open_append("/a").await.is_ok());
    }

    #[tokio::test]
    async fn test_fail_always_until_cleared() {
        let store = MemoryStore::new();
        store.fail_always(
            FaultPoint::Exists,
            FaultKind::Remote {
                status: 401,
                message: "token expired".to_string(),
            },
        );
        for _ in 0..3 {
            let err = store.exists("/probe").await.unwrap_err();
            assert_eq!(err.remote_message(), Some("token expired"));
        }
        store.clear_faults();
        assert!(!store.exists("/probe").await.unwrap());
    }

    #[tokio::test]
    async fn test_create_records_permission() {
        let store = MemoryStore::new();
        let stream = store.create("/a", 0o755, true).await.unwrap();
        stream.close().await.unwrap();
        assert_eq!(store.permission("/a"), Some(0o755));
        assert_eq!(
            store.ops_for("/a")[0].1,
            StoreOp::Create {
                path: "/a".to_string(),
                permission: 0o755,
                overwrite: true
            }
        );
    }
}
