//! HTTP surface of the façade: axum router, bearer guard and handlers.

pub mod auth;
pub mod error;
pub mod handlers;
pub mod router;

use std::{future::Future, net::SocketAddr};

use tokio::net::TcpListener;

use tgapi_core::{errors::Error, Result};

pub use router::{build_app, AppState};

/// Bind `addr` and serve until `shutdown` resolves; in-flight requests complete first.
pub async fn serve(
    state: AppState,
    addr: SocketAddr,
    max_body_bytes: usize,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> Result<()> {
    let app = build_app(state, max_body_bytes);
    let listener = TcpListener::bind(addr).await?;
    tracing::info!("listening on http://{addr}");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
        .map_err(|e| Error::External(format!("http server error: {e}")))?;

    tracing::info!("http server stopped");
    Ok(())
}
