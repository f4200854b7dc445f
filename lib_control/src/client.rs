//! # Control Client
//!
//! [`ControlClient`] is the handle applications hold. It is cheap to clone;
//! every clone drives the same connection, tables and registry.
//!
//! This module owns the connection lifecycle:
//!
//! - **connect**: opens a link through the [`Transport`], starts its reader
//!   task, replays bindings on a reconnect, publishes `Connected`, then starts
//!   the keep-alive monitor.
//! - **close**: whoever notices first (transport end, `disconnect`, keep-alive)
//!   cancels the link; the reader task then releases it, rejects in-flight
//!   requests, clears the `subscribed` flags and schedules a reconnect.
//!
//! The request operations (`bind`, `exec`, ...) live in
//! [`core::dispatcher`](crate::core::dispatcher).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;

use crate::configs::ClientConfig;
use crate::core::connection::{ConnectStart, Connection, ConnectionState};
use crate::core::correlation::CorrelationTable;
use crate::core::keepalive;
use crate::core::registry::BindingRegistry;
use crate::core::router::NotificationRouter;
use crate::error::{ControlError, Result};
use crate::protocol::{BindingKey, CommandKind};
use crate::systems::{StatusVariable, Systems};
use crate::transport::{Transport, TransportLink};

/// Handle to one binding client.
#[derive(Clone)]
pub struct ControlClient {
    pub(crate) inner: Arc<ClientCore>,
}

pub(crate) struct ClientCore {
    pub(crate) config: ClientConfig,
    transport: Arc<dyn Transport>,
    pub(crate) connection: Arc<Connection>,
    pub(crate) correlation: Arc<CorrelationTable>,
    pub(crate) registry: Arc<BindingRegistry>,
    router: NotificationRouter,
    systems: Arc<Systems>,
    pub(crate) shutdown: CancellationToken,
    reconnect_pending: AtomicBool,
}

impl ControlClient {
    /// Creates a disconnected client. Nothing happens on the wire until the
    /// first request or an explicit [`ControlClient::connect`].
    pub fn new(config: ClientConfig, transport: Arc<dyn Transport>, systems: Arc<Systems>) -> Self {
        Self::with_correlation(config, transport, systems, CorrelationTable::new())
    }

    pub(crate) fn with_correlation(
        config: ClientConfig,
        transport: Arc<dyn Transport>,
        systems: Arc<Systems>,
        correlation: CorrelationTable,
    ) -> Self {
        let correlation = Arc::new(correlation);
        let registry = Arc::new(BindingRegistry::new());
        let router = NotificationRouter::new(correlation.clone(), registry.clone(), systems.clone());
        let connection = Arc::new(Connection::new(&config.endpoint));
        Self {
            inner: Arc::new(ClientCore {
                config,
                transport,
                connection,
                correlation,
                registry,
                router,
                systems,
                shutdown: CancellationToken::new(),
                reconnect_pending: AtomicBool::new(false),
            }),
        }
    }

    /// Opens the connection.
    ///
    /// Returns [`ControlError::ConnectConflict`] while another attempt is
    /// running and `Ok` when already connected.
    pub async fn connect(&self) -> Result<()> {
        self.inner.connect().await
    }

    /// Closes the current link. Reconnecting follows the usual schedule.
    pub fn disconnect(&self) -> bool {
        log::info!("Disconnect requested for {}", self.inner.connection.endpoint());
        self.inner.connection.close()
    }

    /// Closes the link for good. Later requests fail with [`ControlError::Shutdown`].
    pub fn shutdown(&self) {
        log::info!("Shutting down control client for {}", self.inner.connection.endpoint());
        self.inner.shutdown.cancel();
        self.inner.connection.close();
    }

    pub fn state(&self) -> ConnectionState {
        self.inner.connection.state()
    }

    /// Watch channel of connection state changes.
    pub fn on_connection_state_change(&self) -> watch::Receiver<ConnectionState> {
        self.inner.connection.subscribe()
    }

    /// Re-sends `bind` for every binding. Returns how many were sent.
    pub async fn rebind_all(&self) -> Result<usize> {
        self.inner.ensure_connected().await?;
        Ok(self.inner.replay_bindings())
    }

    pub fn cached_value(&self, key: &BindingKey) -> Option<Value> {
        self.inner.registry.value(key)
    }

    pub fn is_subscribed(&self, key: &BindingKey) -> bool {
        self.inner.registry.is_subscribed(key)
    }

    pub fn binding_count(&self) -> usize {
        self.inner.registry.len()
    }

    /// Attaches a local observer for `key`. Does not bind on the engine.
    pub fn observe(&self, key: &BindingKey) -> Arc<StatusVariable> {
        self.inner
            .systems
            .register(&key.target.system)
            .module(&key.target.module, key.target.index)
            .observe(&key.name)
    }

    pub fn systems(&self) -> &Arc<Systems> {
        &self.inner.systems
    }

    pub fn pending_requests(&self) -> usize {
        self.inner.correlation.len()
    }
}

impl ClientCore {
    pub(crate) async fn connect(self: &Arc<Self>) -> Result<()> {
        if self.shutdown.is_cancelled() {
            return Err(ControlError::Shutdown);
        }
        if self.connection.begin_connect()? == ConnectStart::AlreadyConnected {
            return Ok(());
        }

        // The attempt outlives its caller, so `Connecting` always resolves.
        let attempt = tokio::spawn(Arc::clone(self).attempt_connect());
        match attempt.await {
            Ok(outcome) => outcome,
            Err(e) => {
                log::error!("Connect attempt to {} aborted: {}", self.connection.endpoint(), e);
                self.connection.abort_connect();
                self.schedule_reconnect();
                Err(ControlError::Transport("connect attempt aborted".into()))
            }
        }
    }

    async fn attempt_connect(self: Arc<Self>) -> Result<()> {
        let endpoint = self.connection.endpoint();
        log::info!("Connecting to {}", endpoint);
        let link = match self.transport.connect(endpoint).await {
            Ok(link) => link,
            Err(e) => {
                log::error!("Connection to {} failed: {}", endpoint, e);
                self.connection.abort_connect();
                self.schedule_reconnect();
                return Err(e);
            }
        };
        if self.shutdown.is_cancelled() {
            self.connection.abort_connect();
            return Err(ControlError::Shutdown);
        }
        self.establish(link)
    }

    /// Installs a freshly opened link and brings the client to `Connected`.
    fn establish(self: &Arc<Self>, link: TransportLink) -> Result<()> {
        let TransportLink { outbound, inbound } = link;
        let cancel = self.shutdown.child_token();
        let (generation, reconnect) = self.connection.install(outbound, cancel.clone());

        tokio::spawn(Arc::clone(self).read_loop(generation, inbound, cancel.clone()));

        if reconnect {
            let replayed = self.replay_bindings();
            log::info!("Reconnected to {}. Replayed {} bindings.", self.connection.endpoint(), replayed);
        }

        if !self.connection.mark_connected(generation) {
            return Err(ControlError::Transport("link closed while connecting".into()));
        }
        keepalive::spawn(self.connection.clone(), self.config.keep_alive(), generation, cancel);
        log::info!("Connected to {} (link {})", self.connection.endpoint(), generation);
        Ok(())
    }

    /// Sends a fresh `bind` for every binding on the current link.
    ///
    /// Replies go through the router like any other, which refreshes the
    /// cached values and the `subscribed` flags.
    pub(crate) fn replay_bindings(&self) -> usize {
        let mut sent = 0;
        for key in self.registry.keys() {
            let id = match self.correlation.next_id() {
                Ok(id) => id,
                Err(e) => {
                    log::error!("Cannot replay bindings: {}", e);
                    break;
                }
            };
            match self.issue(id, CommandKind::Bind, &key.target, &key.name, Vec::new()) {
                Ok(reply) => {
                    sent += 1;
                    tokio::spawn(async move {
                        if let Ok(Err(e)) = reply.await {
                            log::warn!("Replayed bind for {} failed: {}", key, e);
                        }
                    });
                }
                Err(e) => {
                    log::warn!("Replaying bind for {} failed: {}", key, e);
                    break;
                }
            }
        }
        sent
    }

    /// The single reader of one link. Frames are routed in arrival order.
    async fn read_loop(
        self: Arc<Self>,
        generation: u64,
        mut inbound: mpsc::UnboundedReceiver<String>,
        cancel: CancellationToken,
    ) {
        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                frame = inbound.recv() => match frame {
                    Some(text) => {
                        self.connection.touch();
                        log::debug!("<< {}", text);
                        self.router.dispatch(&text);
                    }
                    None => break,
                },
            }
        }
        self.handle_close(generation);
    }

    fn handle_close(self: &Arc<Self>, generation: u64) {
        if !self.connection.release(generation) {
            return;
        }
        let rejected = self
            .correlation
            .reject_all(ControlError::Transport("connection closed".into()));
        self.registry.mark_unsubscribed();
        log::warn!(
            "Connection to {} closed. {} in-flight requests rejected.",
            self.connection.endpoint(),
            rejected
        );
        self.schedule_reconnect();
    }

    /// Arms the reconnect timer unless one is already pending.
    fn schedule_reconnect(self: &Arc<Self>) {
        if !self.config.auto_reconnect || self.shutdown.is_cancelled() {
            return;
        }
        if self.reconnect_pending.swap(true, Ordering::SeqCst) {
            return;
        }

        let core = Arc::clone(self);
        let delay = self.config.reconnect_delay();
        log::info!("Reconnecting to {} in {:?}", self.connection.endpoint(), delay);
        tokio::spawn(async move {
            tokio::select! {
                _ = core.shutdown.cancelled() => {
                    core.reconnect_pending.store(false, Ordering::SeqCst);
                    return;
                }
                _ = tokio::time::sleep(delay) => {}
            }
            core.reconnect_pending.store(false, Ordering::SeqCst);
            if core.connection.state() != ConnectionState::Disconnected {
                return;
            }
            match core.connect().await {
                Ok(()) | Err(ControlError::ConnectConflict) => {}
                Err(e) => log::debug!("Reconnect attempt failed: {}", e),
            }
        });
    }
}
