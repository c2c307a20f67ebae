/*!
 * Append-or-create writer
 *
 * Appends a buffer to an existing object, or creates the object and writes
 * the full buffer when the store reports it does not exist. Any error other
 * than not-found is returned unchanged; callers treat every error as
 * "partial state unknown" and retry the whole buffer.
 */

use crate::backend::{ObjectStream, RemoteStore, StoreResult};
use tracing::{debug, info};

/// Write `data` to `path`, creating the object with `permission` if needed
#[tracing::instrument(skip(store, data), fields(backend = store.name(), bytes = data.len()))]
pub async fn write(
    store: &dyn RemoteStore,
    path: &str,
    data: &[u8],
    permission: u32,
) -> StoreResult<()> {
    info!(path, "Trying to write at");

    let appended = match store.open_append(path).await {
        Ok(stream) => write_and_close(stream, data).await,
        Err(e) => Err(e),
    };

    match appended {
        Err(e) if e.is_not_found() => {
            debug!(
                path,
                mode = %format_args!("{:o}", permission),
                "Object does not exist, creating it"
            );
            let stream = store.create(path, permission, true).await?;
            write_and_close(stream, data).await
        }
        other => other,
    }
}

async fn write_and_close(mut stream: Box<dyn ObjectStream>, data: &[u8]) -> StoreResult<()> {
    stream.write(data).await?;
    stream.close().await
}
