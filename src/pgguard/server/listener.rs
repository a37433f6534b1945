//! Accept loop and graceful shutdown (§5), grounded on
//! `riverdb::server::listener::Listener` minus the raw-fd `setsockopt`/`reuseport` tuning
//! this single-listener gateway doesn't need.

use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

use crate::pgguard::dispatcher::Dispatcher;
use crate::pgguard::error::{Error, Result};
use crate::pgguard::server::connection::handle_connection;

pub struct Listener {
    address: String,
    listener: TcpListener,
}

impl Listener {
    pub async fn bind(address: &str) -> Result<Self> {
        let listener = TcpListener::bind(address).await?;
        Ok(Listener { address: address.to_string(), listener })
    }

    pub fn local_address(&self) -> &str {
        &self.address
    }

    /// Accepts connections, spawning one task per connection, until `shutdown_rx` fires.
    /// Returns the spawned connection tasks so the caller can bound how long it waits for
    /// them to finish.
    pub async fn serve(
        self,
        dispatcher: Arc<Dispatcher>,
        mut shutdown_rx: watch::Receiver<()>,
    ) -> Vec<JoinHandle<()>> {
        let mut handles = Vec::new();
        loop {
            tokio::select! {
                accepted = self.listener.accept() => {
                    match accepted {
                        Ok((socket, remote_addr)) => {
                            debug!(%remote_addr, server = %self.address, "accepted connection");
                            let dispatcher = dispatcher.clone();
                            handles.push(tokio::spawn(async move {
                                if let Err(e) = handle_connection(socket, dispatcher).await {
                                    warn!(error = %e, "connection ended with an error");
                                }
                            }));
                        }
                        Err(e) => error!(error = %e, "accept error"),
                    }
                }
                _ = shutdown_rx.changed() => {
                    debug!("listener shutting down, no longer accepting connections");
                    return handles;
                }
            }
        }
    }
}

/// Waits for every spawned connection task to finish, bounded by `deadline`. If the
/// deadline elapses first, returns a cancelled/deadline error without forcibly closing the
/// still-live connections (§5).
pub async fn wait_for_shutdown(handles: Vec<JoinHandle<()>>, deadline: Duration) -> Result<()> {
    let join_all = async {
        for handle in handles {
            let _ = handle.await;
        }
    };
    tokio::time::timeout(deadline, join_all)
        .await
        .map_err(|_| Error::cancelled("shutdown deadline exceeded with connections still live"))
}
