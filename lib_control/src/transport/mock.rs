//! # Simulated Control Engine
//!
//! An in-process stand-in for the backend control engine. It keeps systems,
//! modules (1-based instance index) and their status values, answers the
//! command set of the real engine, and pushes `notify` messages to links that
//! bound a status variable.
//!
//! Remote state only changes through explicit calls: [`MockEngine::publish`]
//! (or an `exec` that writes a status value) updates the value and emits the
//! notification. Nothing watches the state behind the scenes.
//!
//! Subscriptions belong to a link, like on the real engine: when a link goes
//! away the engine forgets what it was watching.
//!
//! Test hooks let callers inspect sent commands, sever every live link, refuse
//! upcoming connects, and make the engine stop answering.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures_util::future::BoxFuture;
use serde_json::Value;
use tokio::sync::mpsc;

use crate::error::ControlError;
use crate::protocol::{
    BindingKey, CommandKind, InboundMessage, Meta, OutboundCommand, Target, PING, PONG,
};
use crate::transport::{Transport, TransportLink};

/// A function callable through `exec`. `Err` becomes an `error` reply.
pub type MockFunction = Arc<dyn Fn(&[Value]) -> Result<Value, String> + Send + Sync>;

#[derive(Default)]
struct MockModule {
    status: HashMap<String, Value>,
    functions: HashMap<String, MockFunction>,
}

#[derive(Default)]
struct EngineState {
    modules: HashMap<Target, MockModule>,
    links: HashMap<u64, mpsc::UnboundedSender<String>>,
    watching: HashMap<u64, HashSet<BindingKey>>,
    commands: Vec<OutboundCommand>,
    refuse_connects: usize,
    silent: bool,
    connects: usize,
}

/// The simulated engine. Share it between a [`MockTransport`] and the test.
#[derive(Default)]
pub struct MockEngine {
    state: Mutex<EngineState>,
    next_link: AtomicU64,
}

impl MockEngine {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, EngineState> {
        self.state.lock().expect("Mock engine lock poisoned")
    }

    /// Declares a module instance so commands addressed to it are accepted.
    pub fn add_module(&self, target: &Target) {
        self.lock().modules.entry(target.clone()).or_default();
    }

    /// Sets a status value without notifying anyone (initial state).
    pub fn set_status(&self, target: &Target, name: &str, value: Value) {
        self.lock()
            .modules
            .entry(target.clone())
            .or_default()
            .status
            .insert(name.to_string(), value);
    }

    /// Registers a function callable with `exec`.
    pub fn add_function<F>(&self, target: &Target, name: &str, function: F)
    where
        F: Fn(&[Value]) -> Result<Value, String> + Send + Sync + 'static,
    {
        self.lock()
            .modules
            .entry(target.clone())
            .or_default()
            .functions
            .insert(name.to_string(), Arc::new(function));
    }

    /// Changes a status value and notifies every link bound to it.
    pub fn publish(&self, target: &Target, name: &str, value: Value) {
        let mut state = self.lock();
        state
            .modules
            .entry(target.clone())
            .or_default()
            .status
            .insert(name.to_string(), value.clone());
        Self::notify_watchers(&state, &target.key(name), value);
    }

    pub fn status(&self, target: &Target, name: &str) -> Option<Value> {
        self.lock()
            .modules
            .get(target)
            .and_then(|module| module.status.get(name).cloned())
    }

    /// Every command received so far, in arrival order.
    pub fn commands(&self) -> Vec<OutboundCommand> {
        self.lock().commands.clone()
    }

    /// Number of commands of `kind` received for `key`.
    pub fn count(&self, kind: CommandKind, key: &BindingKey) -> usize {
        self.lock()
            .commands
            .iter()
            .filter(|cmd| cmd.cmd == kind && cmd.target() == key.target && cmd.name == key.name)
            .count()
    }

    pub fn is_watching(&self, key: &BindingKey) -> bool {
        self.lock().watching.values().any(|keys| keys.contains(key))
    }

    /// Number of links opened so far.
    pub fn connect_count(&self) -> usize {
        self.lock().connects
    }

    pub fn live_links(&self) -> usize {
        self.lock().links.len()
    }

    /// Severs every live link, as a network failure would.
    pub fn drop_links(&self) {
        let mut state = self.lock();
        state.links.clear();
        state.watching.clear();
    }

    /// Refuses the next `count` connection attempts.
    pub fn refuse_next_connects(&self, count: usize) {
        self.lock().refuse_connects = count;
    }

    /// While silent the engine records commands but sends nothing back.
    pub fn set_silent(&self, silent: bool) {
        self.lock().silent = silent;
    }

    fn open_link(self: &Arc<Self>) -> Result<TransportLink, ControlError> {
        let link_id = self.next_link.fetch_add(1, Ordering::SeqCst);
        let (out_tx, mut out_rx) = mpsc::unbounded_channel::<String>();
        let (in_tx, in_rx) = mpsc::unbounded_channel::<String>();
        {
            let mut state = self.lock();
            if state.refuse_connects > 0 {
                state.refuse_connects -= 1;
                return Err(ControlError::Transport("connection refused".into()));
            }
            state.connects += 1;
            state.links.insert(link_id, in_tx);
            state.watching.insert(link_id, HashSet::new());
        }

        let engine = Arc::clone(self);
        tokio::spawn(async move {
            while let Some(frame) = out_rx.recv().await {
                if !engine.handle_frame(link_id, &frame) {
                    break;
                }
            }
            let mut state = engine.lock();
            state.links.remove(&link_id);
            state.watching.remove(&link_id);
            log::debug!("Mock engine link {} closed", link_id);
        });

        Ok(TransportLink {
            outbound: out_tx,
            inbound: in_rx,
        })
    }

    /// Processes one frame. Returns `false` once the link is gone.
    fn handle_frame(&self, link_id: u64, frame: &str) -> bool {
        let mut state = self.lock();
        let Some(reply_tx) = state.links.get(&link_id).cloned() else {
            return false;
        };

        if frame.trim() == PING {
            if !state.silent {
                let _ = reply_tx.send(PONG.to_string());
            }
            return true;
        }

        let command: OutboundCommand = match serde_json::from_str(frame) {
            Ok(cmd) => cmd,
            Err(e) => {
                log::debug!("Mock engine ignoring frame ({}): {}", e, frame);
                return true;
            }
        };
        state.commands.push(command.clone());
        if state.silent {
            return true;
        }

        if let Some(function) = Self::function_for(&state, &command) {
            // Functions may call back into the engine.
            drop(state);
            let key = command.target().key(command.name.clone());
            let reply = match function(&command.args) {
                Ok(value) => InboundMessage::Success {
                    id: command.id,
                    meta: Some(Meta::from(&key)),
                    value,
                },
                Err(msg) => InboundMessage::Error {
                    id: command.id,
                    meta: Some(Meta::from(&key)),
                    msg: Some(msg),
                },
            };
            Self::send_all(&reply_tx, [reply]);
            return true;
        }

        let (reply, notify) = Self::respond(&mut state, link_id, &command);
        Self::send_all(&reply_tx, std::iter::once(reply).chain(notify));
        true
    }

    fn function_for(state: &EngineState, command: &OutboundCommand) -> Option<MockFunction> {
        if command.cmd != CommandKind::Exec {
            return None;
        }
        state
            .modules
            .get(&command.target())?
            .functions
            .get(&command.name)
            .cloned()
    }

    fn send_all(
        reply_tx: &mpsc::UnboundedSender<String>,
        messages: impl IntoIterator<Item = InboundMessage>,
    ) {
        for message in messages {
            match message.encode() {
                Ok(text) => {
                    let _ = reply_tx.send(text);
                }
                Err(e) => log::error!("Mock engine failed to encode reply: {}", e),
            }
        }
    }

    fn respond(
        state: &mut EngineState,
        link_id: u64,
        command: &OutboundCommand,
    ) -> (InboundMessage, Option<InboundMessage>) {
        let target = command.target();
        let key = target.key(command.name.clone());
        let meta = Some(Meta::from(&key));
        let id = command.id;

        let fail = |msg: String| InboundMessage::Error {
            id,
            meta: Some(Meta::from(&key)),
            msg: Some(msg),
        };

        if !state.modules.contains_key(&target) {
            return (fail(format!("module {} not found", target)), None);
        }

        match command.cmd {
            CommandKind::Bind => {
                let value = state.modules[&target]
                    .status
                    .get(&command.name)
                    .cloned()
                    .unwrap_or(Value::Null);
                if let Some(keys) = state.watching.get_mut(&link_id) {
                    keys.insert(key.clone());
                }
                let notify = InboundMessage::Notify {
                    meta: Meta::from(&key),
                    value: value.clone(),
                };
                (InboundMessage::Success { id, meta, value }, Some(notify))
            }
            CommandKind::Unbind => {
                if let Some(keys) = state.watching.get_mut(&link_id) {
                    keys.remove(&key);
                }
                let value = state.modules[&target]
                    .status
                    .get(&command.name)
                    .cloned()
                    .unwrap_or(Value::Null);
                (InboundMessage::Success { id, meta, value }, None)
            }
            CommandKind::Exec => {
                // No function by that name: treat it as a status write.
                let value = command.args.first().cloned().unwrap_or(Value::Null);
                if let Some(module) = state.modules.get_mut(&target) {
                    module.status.insert(command.name.clone(), value.clone());
                }
                Self::notify_watchers(state, &key, value.clone());
                (InboundMessage::Success { id, meta, value }, None)
            }
            CommandKind::Debug => {
                let value = command.args.first().cloned().unwrap_or(Value::Null);
                (InboundMessage::Success { id, meta, value }, None)
            }
            CommandKind::Ignore => (
                InboundMessage::Success {
                    id,
                    meta,
                    value: Value::Null,
                },
                None,
            ),
        }
    }

    fn notify_watchers(state: &EngineState, key: &BindingKey, value: Value) {
        if state.silent {
            return;
        }
        let message = InboundMessage::Notify {
            meta: Meta::from(key),
            value,
        };
        let text = match message.encode() {
            Ok(text) => text,
            Err(e) => {
                log::error!("Mock engine failed to encode notify: {}", e);
                return;
            }
        };
        for (link_id, keys) in &state.watching {
            if keys.contains(key) {
                if let Some(tx) = state.links.get(link_id) {
                    let _ = tx.send(text.clone());
                }
            }
        }
    }
}

/// [`Transport`] that opens links into a [`MockEngine`].
pub struct MockTransport {
    engine: Arc<MockEngine>,
    connect_delay: Duration,
}

impl MockTransport {
    pub fn new(engine: Arc<MockEngine>) -> Self {
        Self {
            engine,
            connect_delay: Duration::ZERO,
        }
    }

    /// Makes every connect take `delay`, to widen race windows in tests.
    pub fn with_connect_delay(mut self, delay: Duration) -> Self {
        self.connect_delay = delay;
        self
    }

    pub fn engine(&self) -> &Arc<MockEngine> {
        &self.engine
    }
}

impl Transport for MockTransport {
    fn connect<'a>(&'a self, endpoint: &'a str) -> BoxFuture<'a, Result<TransportLink, ControlError>> {
        Box::pin(async move {
            if !self.connect_delay.is_zero() {
                tokio::time::sleep(self.connect_delay).await;
            }
            log::debug!("Mock transport connecting to {}", endpoint);
            self.engine.open_link()
        })
    }
}
