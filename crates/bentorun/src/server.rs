//! # Server
//!
//! Accepts TCP clients and runs one `Connection` task per socket. All
//! connections share the instance registry and the function store.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::net::ToSocketAddrs;
use tracing::debug;
use tracing::info;
use tracing::warn;

use crate::connection::Connection;
use crate::registry::Registry;
use crate::store::FunctionStore;

pub struct Server {
    listener: TcpListener,
    registry: Arc<Registry>,
    store: Arc<dyn FunctionStore>,
}

impl Server {
    pub async fn bind(
        addr: impl ToSocketAddrs,
        registry: Arc<Registry>,
        store: Arc<dyn FunctionStore>,
    ) -> std::io::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        Ok(Self { listener, registry, store })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// Serves until the process is terminated.
    pub async fn serve(self) -> std::io::Result<()> {
        self.serve_until(std::future::pending()).await
    }

    /// Serves until `shutdown` resolves, then kills every instance.
    ///
    /// Connections already accepted are left to run out on their own.
    pub async fn serve_until(self, shutdown: impl Future<Output = ()>) -> std::io::Result<()> {
        tokio::pin!(shutdown);
        info!("listening on {}", self.local_addr()?);

        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                accepted = self.listener.accept() => {
                    let (stream, peer) = match accepted {
                        Ok(accepted) => accepted,
                        Err(e) => {
                            warn!(error = %e, "failed to accept connection");
                            continue;
                        }
                    };
                    if let Err(e) = stream.set_nodelay(true) {
                        debug!(peer = %peer, error = %e, "failed to set TCP_NODELAY");
                    }
                    let conn = Connection::new(stream, peer.to_string(), self.registry.clone(), self.store.clone());
                    tokio::spawn(async move {
                        if let Err(e) = conn.run().await {
                            warn!(peer = %peer, error = %e, "dropping connection");
                        }
                    });
                }
            }
        }

        info!("shutting down");
        self.registry.kill_all().await;
        Ok(())
    }
}
