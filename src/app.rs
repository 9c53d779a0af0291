//! Service assembly.
//!
//! Wires the credential store, supervisor, queue, dispatcher, and HTTP
//! surface together behind one start/shutdown pair. The protocol connector is
//! injected so deployments (and tests) choose the backend.

use std::sync::Arc;

use tokio::task::JoinHandle;

use crate::config::Config;
use crate::creds::CredentialStore;
use crate::error::{ConfigError, Error};
use crate::pairing::{DispatcherConfig, PairingDispatcher, PairingQueue, PairingService};
use crate::session::SessionConnector;
use crate::status::StatusPublisher;
use crate::supervisor::{ConnectionSupervisor, ReconnectPolicy};
use crate::web::{AppState, WebServer, WebServerConfig, router};

/// The assembled service.
pub struct App {
    supervisor: Arc<ConnectionSupervisor>,
    supervisor_handle: Option<JoinHandle<()>>,
    dispatcher: PairingDispatcher,
    web: WebServer,
    pairing: PairingService,
    publisher: StatusPublisher,
}

impl App {
    pub fn new(config: &Config, connector: Arc<dyn SessionConnector>) -> Result<Self, Error> {
        let addr = config
            .listen_addr()
            .parse()
            .map_err(|e| ConfigError::InvalidValue {
                key: "PAIRCLAW_PORT".to_string(),
                message: format!("{}", e),
            })?;

        let store = CredentialStore::new(&config.creds_path);
        let publisher = StatusPublisher::new();
        let queue = Arc::new(PairingQueue::new());

        let supervisor = ConnectionSupervisor::new(
            connector,
            store,
            publisher.clone(),
            ReconnectPolicy::default(),
            config.ready_message.clone(),
        );

        let dispatcher = PairingDispatcher::new(
            Arc::clone(&queue),
            Arc::clone(&supervisor),
            publisher.clone(),
            DispatcherConfig {
                interval: config.dispatch_interval,
                request_timeout: config.request_timeout,
            },
        );

        let pairing = PairingService::new(queue, publisher.clone());

        Ok(Self {
            supervisor,
            supervisor_handle: None,
            dispatcher,
            web: WebServer::new(WebServerConfig { addr }),
            pairing,
            publisher,
        })
    }

    /// Start supervision, dispatching, and the HTTP listener.
    pub async fn start(&mut self) -> Result<(), Error> {
        self.supervisor_handle = Some(self.supervisor.spawn());
        self.dispatcher.start();

        let state = AppState {
            pairing: self.pairing.clone(),
            supervisor: Arc::clone(&self.supervisor),
        };
        self.web.start(router(state)).await?;
        Ok(())
    }

    /// Stop everything, outermost first: listener, dispatcher, supervisor.
    pub async fn shutdown(&mut self) {
        self.web.shutdown().await;
        self.dispatcher.shutdown().await;
        self.supervisor.shutdown();
        if let Some(handle) = self.supervisor_handle.take() {
            let _ = handle.await;
        }
    }

    pub fn pairing(&self) -> &PairingService {
        &self.pairing
    }

    pub fn publisher(&self) -> &StatusPublisher {
        &self.publisher
    }

    pub fn supervisor(&self) -> &Arc<ConnectionSupervisor> {
        &self.supervisor
    }

    /// Address the HTTP listener actually bound, once started.
    pub fn local_addr(&self) -> Option<std::net::SocketAddr> {
        self.web.local_addr()
    }
}
