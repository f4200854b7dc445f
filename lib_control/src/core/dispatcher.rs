//! # Request Dispatcher
//!
//! The request side of [`ControlClient`]: every operation allocates an id,
//! waits for a connection (joining an attempt already in progress), registers
//! the pending request, then puts the command on the wire.
//!
//! ```text
//! caller ── send ──► next_id ──► ensure_connected ──► register ──► transmit
//!                                                                    │
//! caller ◄── Result<Value> ◄── oneshot ◄── NotificationRouter ◄─── reply
//! ```
//!
//! `bind` goes through the [`BindingRegistry`](crate::core::registry::BindingRegistry)
//! first, so a status variable is bound on the engine at most once no matter
//! how many callers ask for it.

use std::sync::Arc;

use serde_json::Value;

use crate::client::{ClientCore, ControlClient};
use crate::core::connection::ConnectionState;
use crate::core::correlation::Reply;
use crate::core::registry::{BindStart, BindingRegistry};
use crate::error::{ControlError, Result};
use crate::protocol::{normalize_args, BindingKey, CommandKind, OutboundCommand, Target};

/// Function name used by `debug` requests.
pub const DEBUG_NAME: &str = "debug";
/// Function name used by `ignore` requests.
pub const IGNORE_NAME: &str = "ignore";

impl ControlClient {
    /// Sends one command and waits for its reply.
    ///
    /// `args` may be a list, a single value (sent as a one-element list) or
    /// `None`. Binding bookkeeping only happens through [`ControlClient::bind`]
    /// and [`ControlClient::unbind`].
    pub async fn send(
        &self,
        kind: CommandKind,
        target: &Target,
        name: &str,
        args: Option<Value>,
    ) -> Result<Value> {
        self.inner.send(kind, target, name, normalize_args(args)).await
    }

    /// Subscribes to a status variable and returns its current value.
    ///
    /// A key already bound answers from the cache; a key whose bind is on the
    /// wire waits for that bind instead of sending another.
    pub async fn bind(&self, key: &BindingKey) -> Result<Value> {
        self.inner.bind(key).await
    }

    /// Unsubscribes on the engine. The binding is forgotten once the engine agrees.
    pub async fn unbind(&self, key: &BindingKey) -> Result<Value> {
        self.inner
            .send(CommandKind::Unbind, &key.target, &key.name, Vec::new())
            .await
    }

    /// Calls a function on a module.
    pub async fn exec(&self, target: &Target, function: &str, args: Option<Value>) -> Result<Value> {
        self.inner
            .send(CommandKind::Exec, target, function, normalize_args(args))
            .await
    }

    /// Asks the module to stream its debug output to this client.
    pub async fn debug(&self, target: &Target) -> Result<Value> {
        self.inner
            .send(CommandKind::Debug, target, DEBUG_NAME, Vec::new())
            .await
    }

    /// Stops the debug output requested with [`ControlClient::debug`].
    pub async fn ignore(&self, target: &Target) -> Result<Value> {
        self.inner
            .send(CommandKind::Ignore, target, IGNORE_NAME, Vec::new())
            .await
    }
}

impl ClientCore {
    pub(crate) async fn send(
        self: &Arc<Self>,
        kind: CommandKind,
        target: &Target,
        name: &str,
        args: Vec<Value>,
    ) -> Result<Value> {
        let id = self.correlation.next_id()?;
        self.ensure_connected().await?;
        let reply = self.issue(id, kind, target, name, args)?;
        self.await_reply(id, reply).await
    }

    async fn bind(self: &Arc<Self>, key: &BindingKey) -> Result<Value> {
        match self.registry.begin_bind(key) {
            BindStart::Cached(value) => Ok(value),
            BindStart::Follower(waiter) => waiter
                .await
                .unwrap_or_else(|_| Err(ControlError::Transport("bind abandoned".into()))),
            BindStart::Leader => {
                let mut leader = LeaderGuard {
                    registry: &self.registry,
                    key,
                    finished: false,
                };
                let outcome = self
                    .send(CommandKind::Bind, &key.target, &key.name, Vec::new())
                    .await;
                leader.finished = true;
                // Engine rejections were already settled by the router.
                if let Err(e) = &outcome {
                    if !matches!(e, ControlError::Protocol(_)) {
                        self.registry.complete_bind(key, &outcome);
                    }
                }
                outcome
            }
        }
    }

    /// Waits until connected, starting a connect attempt if nobody else is.
    ///
    /// Callers that find an attempt in progress share its outcome: if it
    /// fails they all fail, and none of them starts another.
    pub(crate) async fn ensure_connected(self: &Arc<Self>) -> Result<()> {
        let mut states = self.connection.subscribe();
        let mut attempt_seen = false;
        loop {
            if self.shutdown.is_cancelled() {
                return Err(ControlError::Shutdown);
            }
            let state = *states.borrow_and_update();
            match state {
                ConnectionState::Connected => return Ok(()),
                ConnectionState::Connecting => {
                    attempt_seen = true;
                    if states.changed().await.is_err() {
                        return Err(ControlError::Transport("connection dropped".into()));
                    }
                }
                ConnectionState::Disconnected if attempt_seen => {
                    return Err(ControlError::Transport("connect attempt failed".into()));
                }
                ConnectionState::Disconnected => match self.connect().await {
                    Ok(()) => return Ok(()),
                    Err(ControlError::ConnectConflict) => continue,
                    Err(e) => return Err(e),
                },
            }
        }
    }

    /// Registers request `id` and hands its frame to the link.
    pub(crate) fn issue(
        &self,
        id: u64,
        kind: CommandKind,
        target: &Target,
        name: &str,
        args: Vec<Value>,
    ) -> Result<Reply> {
        let frame = OutboundCommand::new(id, kind, target, name, args.clone()).encode()?;
        let reply = self.correlation.register(id, kind, target, name, args);
        if let Err(e) = self.connection.transmit(frame.clone()) {
            self.correlation.discard(id);
            log::warn!("{} request({}) for {}.{} not sent: {}", kind, id, target, name, e);
            return Err(e);
        }
        log::debug!(">> {}", frame);
        Ok(reply)
    }

    async fn await_reply(&self, id: u64, reply: Reply) -> Result<Value> {
        let outcome = match self.config.request_timeout() {
            Some(limit) => match tokio::time::timeout(limit, reply).await {
                Ok(outcome) => outcome,
                Err(_) => {
                    self.correlation.discard(id);
                    log::warn!("Request {} timed out after {:?}", id, limit);
                    return Err(ControlError::Timeout(id));
                }
            },
            None => reply.await,
        };
        outcome.unwrap_or_else(|_| Err(ControlError::Transport("request dropped before a reply".into())))
    }
}

/// Fails the followers of a bind whose leader was dropped mid-flight and
/// frees the key for the next caller.
struct LeaderGuard<'a> {
    registry: &'a BindingRegistry,
    key: &'a BindingKey,
    finished: bool,
}

impl Drop for LeaderGuard<'_> {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        log::debug!("Bind for {} abandoned by its caller", self.key);
        self.registry
            .complete_bind(self.key, &Err(ControlError::Transport("bind abandoned".into())));
    }
}
