//! The transport listener.
//!
//! Accepts connections and serves one request frame per connection on its
//! own task, so a slow command body never blocks membership traffic or
//! other inbound calls.

use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tracing::{debug, info};

use super::wire::{read_frame, write_frame, Envelope, Reply};
use crate::error::{Result, RpcError};

/// Decides what inbound envelopes mean.
///
/// Implemented by the cluster layer; the server only moves frames.
#[async_trait]
pub trait InboundHandler: Send + Sync + 'static {
    async fn handle(&self, envelope: Envelope, remote: SocketAddr) -> Reply;
}

/// A bound TCP listener serving inbound cluster traffic.
pub struct TransportServer {
    listener: TcpListener,
    local_addr: SocketAddr,
    shutdown_tx: broadcast::Sender<()>,
}

impl TransportServer {
    /// Bind the listener.
    ///
    /// Failure to bind is a hard startup error; the service never starts
    /// half-connected.
    pub async fn bind(addr: SocketAddr) -> Result<Self> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| RpcError::Transport(format!("cannot bind transport listener on {addr}: {e}")))?;
        let local_addr = listener
            .local_addr()
            .map_err(|e| RpcError::Transport(e.to_string()))?;
        let (shutdown_tx, _) = broadcast::channel(1);
        Ok(TransportServer {
            listener,
            local_addr,
            shutdown_tx,
        })
    }

    /// The address the listener actually bound, with the resolved port.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// A handle that stops the accept loop when signalled.
    pub fn shutdown_handle(&self) -> broadcast::Sender<()> {
        self.shutdown_tx.clone()
    }

    /// Run the accept loop until a shutdown signal arrives.
    ///
    /// Each accepted connection is served by its own task: one request
    /// frame in, one reply frame out.
    pub async fn run(self, handler: Arc<dyn InboundHandler>) {
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        info!(addr = %self.local_addr, "transport listener running");

        loop {
            tokio::select! {
                _ = shutdown_rx.recv() => {
                    info!(addr = %self.local_addr, "transport listener shutting down");
                    return;
                }
                accepted = self.listener.accept() => {
                    match accepted {
                        Ok((stream, remote)) => {
                            let handler = Arc::clone(&handler);
                            tokio::spawn(async move {
                                if let Err(e) = serve_connection(stream, remote, handler).await {
                                    debug!(%remote, error = %e, "inbound connection failed");
                                }
                            });
                        }
                        Err(e) => {
                            debug!(error = %e, "accept failed");
                        }
                    }
                }
            }
        }
    }
}

async fn serve_connection(
    mut stream: TcpStream,
    remote: SocketAddr,
    handler: Arc<dyn InboundHandler>,
) -> std::io::Result<()> {
    let envelope: Envelope = read_frame(&mut stream).await?;
    let reply = handler.handle(envelope, remote).await;
    write_frame(&mut stream, &reply).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::client;
    use std::time::Duration;

    struct Echo;

    #[async_trait]
    impl InboundHandler for Echo {
        async fn handle(&self, envelope: Envelope, _remote: SocketAddr) -> Reply {
            Reply::Error(envelope.cluster().to_string())
        }
    }

    #[tokio::test]
    async fn test_bind_ephemeral_port_and_roundtrip() {
        let server = TransportServer::bind("127.0.0.1:0".parse().unwrap())
            .await
            .unwrap();
        let addr = server.local_addr();
        assert_ne!(addr.port(), 0);

        let shutdown = server.shutdown_handle();
        tokio::spawn(server.run(Arc::new(Echo)));

        let envelope = Envelope::InstallView {
            cluster: "ping".to_string(),
            view: crate::types::MembershipView::empty(),
        };
        let reply = client::call(addr, &envelope, Duration::from_secs(5))
            .await
            .unwrap();
        match reply {
            Reply::Error(cluster) => assert_eq!(cluster, "ping"),
            other => panic!("unexpected reply: {other:?}"),
        }

        let _ = shutdown.send(());
    }

    #[tokio::test]
    async fn test_unreachable_peer_reported_as_such() {
        // Bind and immediately drop to get a port nothing listens on.
        let probe = TransportServer::bind("127.0.0.1:0".parse().unwrap())
            .await
            .unwrap();
        let addr = probe.local_addr();
        drop(probe);

        let envelope = Envelope::InstallView {
            cluster: "x".to_string(),
            view: crate::types::MembershipView::empty(),
        };
        let err = client::call(addr, &envelope, Duration::from_secs(5))
            .await
            .unwrap_err();
        assert!(matches!(err, client::CallError::Unreachable(_)));
    }
}
