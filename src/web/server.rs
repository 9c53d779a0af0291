//! HTTP server lifecycle.
//!
//! Routes are composed elsewhere; this type binds the listener and spawns the
//! serve task with graceful shutdown.

use std::net::SocketAddr;

use axum::Router;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use crate::error::WebError;

/// Configuration for the HTTP server.
pub struct WebServerConfig {
    /// Address to bind the listener to.
    pub addr: SocketAddr,
}

/// Single HTTP server hosting the pairing API.
pub struct WebServer {
    config: WebServerConfig,
    shutdown_tx: Option<oneshot::Sender<()>>,
    handle: Option<JoinHandle<()>>,
    local_addr: Option<SocketAddr>,
}

impl WebServer {
    pub fn new(config: WebServerConfig) -> Self {
        Self {
            config,
            shutdown_tx: None,
            handle: None,
            local_addr: None,
        }
    }

    /// Bind the listener and spawn the serve task.
    pub async fn start(&mut self, app: Router) -> Result<(), WebError> {
        let listener = tokio::net::TcpListener::bind(self.config.addr)
            .await
            .map_err(|e| WebError::BindFailed {
                addr: self.config.addr.to_string(),
                reason: e.to_string(),
            })?;

        let local_addr = listener.local_addr().map_err(|e| WebError::BindFailed {
            addr: self.config.addr.to_string(),
            reason: e.to_string(),
        })?;
        self.local_addr = Some(local_addr);
        tracing::info!("Pairing API listening on {}", local_addr);

        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        self.shutdown_tx = Some(shutdown_tx);

        let handle = tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, app)
                .with_graceful_shutdown(async {
                    let _ = shutdown_rx.await;
                    tracing::info!("Pairing API shutting down");
                })
                .await
            {
                tracing::error!("Pairing API server error: {}", e);
            }
        });

        self.handle = Some(handle);
        Ok(())
    }

    /// Address actually bound, once started.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    /// Signal graceful shutdown and wait for the serve task to finish.
    pub async fn shutdown(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.await;
        }
    }
}
