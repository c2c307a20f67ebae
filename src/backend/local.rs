//! Local filesystem store
//!
//! Mirrors remote object paths beneath a root directory using Tokio's async
//! file I/O. The binary uses it as a delivery target when no vendor SDK is
//! linked; it honors the same append-or-not-found contract as a real store.

use super::error::{StoreError, StoreResult};
use super::{ObjectStream, RemoteStore, StoreConnector};
use crate::auth::Credential;
use async_trait::async_trait;
use std::io;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use tokio::fs::{self, File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tracing::debug;

/// Local filesystem store rooted at a directory
#[derive(Debug, Clone)]
pub struct LocalStore {
    root: PathBuf,
}

impl LocalStore {
    /// Create a store rooted at `root`
    ///
    /// All object paths are resolved relative to this root.
    pub fn new<P: Into<PathBuf>>(root: P) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve an object path below the root, refusing `..` escapes
    fn resolve_path(&self, path: &str) -> StoreResult<PathBuf> {
        let relative = Path::new(path.trim_start_matches('/'));
        if relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir))
        {
            return Err(StoreError::PermissionDenied {
                path: path.to_string(),
                message: "path escapes the store root".to_string(),
            });
        }
        Ok(self.root.join(relative))
    }

    fn map_io(path: &str, err: io::Error) -> StoreError {
        match err.kind() {
            io::ErrorKind::NotFound => StoreError::not_found(path, "local"),
            io::ErrorKind::PermissionDenied => StoreError::PermissionDenied {
                path: path.to_string(),
                message: err.to_string(),
            },
            _ => StoreError::Io(err),
        }
    }
}

#[cfg(unix)]
async fn apply_permission(target: &Path, permission: u32) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(target, std::fs::Permissions::from_mode(permission)).await
}

#[cfg(not(unix))]
async fn apply_permission(_target: &Path, _permission: u32) -> io::Result<()> {
    Ok(())
}

struct LocalStream {
    path: String,
    file: File,
}

#[async_trait]
impl ObjectStream for LocalStream {
    async fn write(&mut self, data: &[u8]) -> StoreResult<()> {
        self.file
            .write_all(data)
            .await
            .map_err(|e| LocalStore::map_io(&self.path, e))
    }

    async fn close(mut self: Box<Self>) -> StoreResult<()> {
        self.file
            .flush()
            .await
            .map_err(|e| LocalStore::map_io(&self.path, e))?;
        self.file
            .sync_data()
            .await
            .map_err(|e| LocalStore::map_io(&self.path, e))
    }
}

#[async_trait]
impl RemoteStore for LocalStore {
    async fn exists(&self, path: &str) -> StoreResult<bool> {
        let target = self.resolve_path(path)?;
        fs::try_exists(&target)
            .await
            .map_err(|e| Self::map_io(path, e))
    }

    async fn open_append(&self, path: &str) -> StoreResult<Box<dyn ObjectStream>> {
        let target = self.resolve_path(path)?;
        let file = OpenOptions::new()
            .append(true)
            .open(&target)
            .await
            .map_err(|e| Self::map_io(path, e))?;

        Ok(Box::new(LocalStream {
            path: path.to_string(),
            file,
        }))
    }

    async fn create(
        &self,
        path: &str,
        permission: u32,
        overwrite: bool,
    ) -> StoreResult<Box<dyn ObjectStream>> {
        let target = self.resolve_path(path)?;
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| Self::map_io(path, e))?;
        }

        let mut options = OpenOptions::new();
        options.write(true);
        if overwrite {
            options.create(true).truncate(true);
        } else {
            options.create_new(true);
        }

        let file = options
            .open(&target)
            .await
            .map_err(|e| Self::map_io(path, e))?;
        apply_permission(&target, permission)
            .await
            .map_err(|e| Self::map_io(path, e))?;

        debug!(path = %target.display(), mode = %format_args!("{:o}", permission), "Created local object");

        Ok(Box::new(LocalStream {
            path: path.to_string(),
            file,
        }))
    }

    fn name(&self) -> &str {
        "local"
    }
}

/// Connector that mirrors each account into `<root>/<fqdn>`
///
/// The credential is accepted and ignored; the filesystem needs none.
#[derive(Debug, Clone)]
pub struct LocalConnector {
    root: PathBuf,
}

impl LocalConnector {
    pub fn new<P: Into<PathBuf>>(root: P) -> Self {
        Self { root: root.into() }
    }
}

#[async_trait]
impl StoreConnector for LocalConnector {
    async fn connect(
        &self,
        fqdn: &str,
        credential: &Credential,
    ) -> StoreResult<Arc<dyn RemoteStore>> {
        let account_root = self.root.join(fqdn);
        fs::create_dir_all(&account_root)
            .await
            .map_err(|e| LocalStore::map_io(fqdn, e))?;
        debug!(
            root = %account_root.display(),
            expires_at = %credential.expires_at(),
            "Connected local mirror store"
        );
        Ok(Arc::new(LocalStore::new(account_root)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn write_all(mut stream: Box<dyn ObjectStream>, data: &[u8]) {
        stream.write(data).await.unwrap();
        stream.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_append_missing_object_is_not_found() {
        let dir = TempDir::new().unwrap();
        let store = LocalStore::new(dir.path());

        let result = store.open_append("/logs/missing.log").await;
        assert!(matches!(result, Err(ref e) if e.is_not_found()));
    }

    #[tokio::test]
    async fn test_create_then_append() {
        let dir = TempDir::new().unwrap();
        let store = LocalStore::new(dir.path());

        write_all(store.create("/logs/a.log", 0o755, true).await.unwrap(), b"one\n").await;
        write_all(store.open_append("/logs/a.log").await.unwrap(), b"two\n").await;

        let contents = std::fs::read_to_string(dir.path().join("logs/a.log")).unwrap();
        assert_eq!(contents, "one\ntwo\n");
        assert!(store.exists("/logs/a.log").await.unwrap());
        assert!(!store.exists("/logs/b.log").await.unwrap());
    }

    #[tokio::test]
    async fn test_create_overwrites_existing() {
        let dir = TempDir::new().unwrap();
        let store = LocalStore::new(dir.path());

        write_all(store.create("a.log", 0o644, true).await.unwrap(), b"old contents\n").await;
        write_all(store.create("a.log", 0o644, true).await.unwrap(), b"new\n").await;

        let contents = std::fs::read_to_string(dir.path().join("a.log")).unwrap();
        assert_eq!(contents, "new\n");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_create_applies_permission() {
        use std::os::unix::fs::PermissionsExt;

        let dir = TempDir::new().unwrap();
        let store = LocalStore::new(dir.path());
        write_all(store.create("p.log", 0o750, true).await.unwrap(), b"x").await;

        let mode = std::fs::metadata(dir.path().join("p.log"))
            .unwrap()
            .permissions()
            .mode();
        assert_eq!(mode & 0o777, 0o750);
    }

    #[tokio::test]
    async fn test_path_escape_rejected() {
        let dir = TempDir::new().unwrap();
        let store = LocalStore::new(dir.path());

        let result = store.create("../outside.log", 0o755, true).await;
        assert!(matches!(result, Err(StoreError::PermissionDenied { .. })));
    }
}
