use std::future::Future;
use std::net::SocketAddr;

use beacon_core::error::{BeaconError, Result};

use crate::http;
use crate::pipeline::Pipeline;

/// Serves the span ingest endpoint until `shutdown` resolves.
pub async fn run_ingest_server<F>(pipeline: Pipeline, addr: SocketAddr, shutdown: F) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| BeaconError::Io(format!("failed to bind ingest listener {addr}: {e}")))?;
    let local = listener
        .local_addr()
        .map_err(|e| BeaconError::Io(format!("ingest listener address: {e}")))?;
    tracing::info!(addr = %local, "span ingest listening");

    axum::serve(listener, http::router(pipeline))
        .with_graceful_shutdown(shutdown)
        .await
        .map_err(|e| BeaconError::Io(format!("ingest server failed: {e}")))
}
