//! HTCPCP server implementation.

use std::convert::Infallible;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use hyper_util::server::graceful::GracefulShutdown;
use tokio::net::TcpListener;
use tracing::{debug, info, warn};

use super::service::HtcpcpService;
use crate::brewing::{ClientId, Teapot};
use crate::error::Result;

/// How long in-flight connections get to finish after shutdown is signalled.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// HTTP/1.1 server speaking HTCPCP.
pub struct HtcpcpServer {
    /// Bound listener
    listener: TcpListener,
    /// The teapot shared by every connection
    teapot: Arc<Teapot>,
}

impl HtcpcpServer {
    /// Bind the server to `addr`.
    pub async fn bind(addr: SocketAddr, teapot: Arc<Teapot>) -> Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        Ok(Self { listener, teapot })
    }

    /// Address the server is listening on.
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Serve connections until `signal` resolves, then drain open connections.
    pub async fn serve_with_shutdown<F>(self, signal: F) -> Result<()>
    where
        F: Future<Output = ()> + Send,
    {
        let service = HtcpcpService::new(self.teapot);
        let graceful = GracefulShutdown::new();
        tokio::pin!(signal);

        info!(
            addr = %self.listener.local_addr()?,
            "Starting HTCPCP server with graceful shutdown"
        );

        loop {
            tokio::select! {
                accepted = self.listener.accept() => {
                    let (stream, remote) = match accepted {
                        Ok(accepted) => accepted,
                        Err(e) => {
                            warn!(error = %e, "Failed to accept connection");
                            continue;
                        }
                    };

                    debug!(remote = %remote, "Accepted connection");

                    let service = service.clone();
                    let client = ClientId::from(remote.ip());
                    let handler = service_fn(move |request| {
                        let service = service.clone();
                        let client = client.clone();
                        async move { Ok::<_, Infallible>(service.handle(request, client).await) }
                    });

                    let connection = http1::Builder::new()
                        .serve_connection(TokioIo::new(stream), handler);
                    let connection = graceful.watch(connection);

                    tokio::spawn(async move {
                        if let Err(e) = connection.await {
                            debug!(remote = %remote, error = %e, "Connection closed with error");
                        }
                    });
                }
                _ = &mut signal => {
                    info!("Shutdown signalled, no longer accepting connections");
                    break;
                }
            }
        }

        drop(self.listener);

        tokio::select! {
            _ = graceful.shutdown() => {
                info!("All connections closed");
            }
            _ = tokio::time::sleep(SHUTDOWN_GRACE) => {
                warn!(grace = ?SHUTDOWN_GRACE, "Timed out waiting for connections to close");
            }
        }

        Ok(())
    }
}
