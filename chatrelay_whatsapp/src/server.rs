use std::net::SocketAddr;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::error::{Error, Result};
use crate::routes::{AppState, build_router};

/// Serve the router on `listen` until `shutdown` is cancelled. In-flight
/// requests are allowed to finish.
pub async fn serve(listen: &str, state: Arc<AppState>, shutdown: CancellationToken) -> Result<()> {
    let addr: SocketAddr = listen
        .parse()
        .map_err(|e| Error::InvalidAddress(listen.to_string(), e))?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| Error::Bind(listen.to_string(), e))?;

    info!("Listening on {addr}");
    axum::serve(listener, build_router(state))
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;
    info!("HTTP server stopped");
    Ok(())
}
