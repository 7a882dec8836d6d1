//! Listener setup for the coordinator and agent HTTP surfaces.
//!
//! Plain TCP goes through `axum::serve`; TLS through `axum-server` with rustls.
//! Both stop accepting on the shutdown broadcast and drain in-flight requests.

pub mod tls;

use std::net::SocketAddr;
use std::time::Duration;

use axum::Router;
use tokio::net::TcpListener;
use tokio::sync::broadcast;

use crate::config::ListenerConfig;

const TLS_DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

/// Bind according to `listener` and serve until shutdown.
pub async fn serve(router: Router, listener: ListenerConfig, shutdown: broadcast::Receiver<()>) -> std::io::Result<()> {
    let addr: SocketAddr = listener
        .bind_address
        .parse()
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidInput, format!("{}", e)))?;

    match &listener.tls {
        Some(tls) => {
            let config = tls::load_tls_config(tls).await?;
            let handle = axum_server::Handle::new();
            let drain = handle.clone();
            let mut shutdown = shutdown;
            tokio::spawn(async move {
                let _ = shutdown.recv().await;
                drain.graceful_shutdown(Some(TLS_DRAIN_TIMEOUT));
            });
            tracing::info!(address = %addr, "HTTPS server starting");
            axum_server::bind_rustls(addr, config)
                .handle(handle)
                .serve(router.into_make_service())
                .await?;
        }
        None => {
            let tcp = TcpListener::bind(addr).await?;
            serve_listener(tcp, router, shutdown).await?;
        }
    }
    tracing::info!("HTTP server stopped");
    Ok(())
}

/// Serve on an already bound listener until shutdown.
pub async fn serve_listener(
    listener: TcpListener,
    router: Router,
    mut shutdown: broadcast::Receiver<()>,
) -> std::io::Result<()> {
    tracing::info!(address = %listener.local_addr()?, "HTTP server starting");
    axum::serve(listener, router)
        .with_graceful_shutdown(async move {
            let _ = shutdown.recv().await;
        })
        .await
}
