//! Real-time room coordination: presence tracking, event fan-out, the
//! WebSocket connection loop, and the file manifest lifecycle.

pub mod blob;
pub mod connection;
pub mod manifest;
pub mod presence;
pub mod router;

use codecrib_types::CoreError;

/// Run blocking database work off the async runtime.
pub(crate) async fn blocking<F, T>(f: F) -> Result<T, CoreError>
where
    F: FnOnce() -> anyhow::Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(anyhow::Error::from)?
        .map_err(CoreError::from)
}
