use crate::api::routes;
use crate::core::TaskManager;
use crate::errors::Error;
use std::future::Future;
use std::net::SocketAddr;
use tracing::info;

/// Starts and runs the HTTP server using Axum web framework
///
/// # Arguments
/// * `manager` - Task manager the handlers operate on
/// * `port` - Port number to listen on for incoming HTTP connections
/// * `shutdown` - Resolves when the server should stop accepting requests
pub async fn launch_server(
    manager: TaskManager,
    port: u16,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> Result<(), Error> {
    let app = routes::app(manager);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));

    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("API listening on {}", addr);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await?;
    Ok(())
}
