//! # Connection State Machine
//!
//! Owns the current link and the connection state:
//!
//! ```text
//! Disconnected ──► Connecting ──► Connected ──► Disconnected ──► Connecting ...
//!        ▲              │
//!        └── failed ────┘
//! ```
//!
//! The state lives in a `watch` channel so the same value feeds the
//! state-change hook and every caller waiting for a connection. Each installed
//! link gets a generation number; closing is keyed by generation so a reader
//! task of an old link can never tear down its replacement.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;

use crate::error::{ControlError, Result};

/// Externally visible connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

/// Outcome of asking to start a connect attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectStart {
    /// The caller owns the attempt and must finish or abort it.
    Started,
    /// Nothing to do.
    AlreadyConnected,
}

struct ActiveLink {
    generation: u64,
    outbound: mpsc::UnboundedSender<String>,
    cancel: CancellationToken,
}

/// The single owner of the transport link.
pub struct Connection {
    endpoint: String,
    state: watch::Sender<ConnectionState>,
    link: Mutex<Option<ActiveLink>>,
    generation: AtomicU64,
    ever_connected: AtomicBool,
    last_activity: Mutex<Instant>,
}

impl Connection {
    pub fn new(endpoint: &str) -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            endpoint: endpoint.to_string(),
            state,
            link: Mutex::new(None),
            generation: AtomicU64::new(0),
            ever_connected: AtomicBool::new(false),
            last_activity: Mutex::new(Instant::now()),
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    /// `Disconnected → Connecting`, atomically.
    ///
    /// Fails with [`ControlError::ConnectConflict`] while another attempt runs.
    pub fn begin_connect(&self) -> Result<ConnectStart> {
        let mut outcome = Ok(ConnectStart::Started);
        self.state.send_if_modified(|state| match *state {
            ConnectionState::Disconnected => {
                *state = ConnectionState::Connecting;
                true
            }
            ConnectionState::Connecting => {
                outcome = Err(ControlError::ConnectConflict);
                false
            }
            ConnectionState::Connected => {
                outcome = Ok(ConnectStart::AlreadyConnected);
                false
            }
        });
        outcome
    }

    /// `Connecting → Disconnected` after a failed attempt.
    pub fn abort_connect(&self) {
        self.state.send_if_modified(|state| {
            if *state == ConnectionState::Connecting {
                *state = ConnectionState::Disconnected;
                true
            } else {
                false
            }
        });
    }

    /// Stores a freshly opened link. The state stays `Connecting` until
    /// [`Connection::mark_connected`], so frames sent in between (binding
    /// replay) go out before any caller's command.
    ///
    /// Returns the link generation and whether this is a reconnect.
    pub fn install(&self, outbound: mpsc::UnboundedSender<String>, cancel: CancellationToken) -> (u64, bool) {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let reconnect = self.ever_connected.swap(true, Ordering::SeqCst);
        let previous = self.link.lock().expect("Connection link lock poisoned").replace(ActiveLink {
            generation,
            outbound,
            cancel,
        });
        if let Some(stale) = previous {
            stale.cancel.cancel();
        }
        self.touch();
        (generation, reconnect)
    }

    /// `Connecting → Connected`, provided `generation` is still the live link.
    pub fn mark_connected(&self, generation: u64) -> bool {
        let link = self.link.lock().expect("Connection link lock poisoned");
        match link.as_ref() {
            Some(active) if active.generation == generation => {
                self.state.send_replace(ConnectionState::Connected);
                true
            }
            _ => false,
        }
    }

    /// Detaches the link of `generation` and moves to `Disconnected`.
    ///
    /// Returns `false` when that link was already replaced or released.
    pub fn release(&self, generation: u64) -> bool {
        let released = {
            let mut link = self.link.lock().expect("Connection link lock poisoned");
            match link.as_ref() {
                Some(active) if active.generation == generation => link.take(),
                _ => None,
            }
        };
        match released {
            Some(active) => {
                active.cancel.cancel();
                self.state.send_replace(ConnectionState::Disconnected);
                true
            }
            None => false,
        }
    }

    /// Asks the current link to close. The reader task completes the release.
    pub fn close(&self) -> bool {
        match self.link.lock().expect("Connection link lock poisoned").as_ref() {
            Some(active) => {
                active.cancel.cancel();
                true
            }
            None => false,
        }
    }

    /// Closes the link only if it is still `generation`.
    pub fn close_generation(&self, generation: u64) {
        if let Some(active) = self.link.lock().expect("Connection link lock poisoned").as_ref() {
            if active.generation == generation {
                active.cancel.cancel();
            }
        }
    }

    /// Hands a text frame to the transport.
    pub fn transmit(&self, frame: String) -> Result<()> {
        let link = self.link.lock().expect("Connection link lock poisoned");
        match link.as_ref() {
            Some(active) => active
                .outbound
                .send(frame)
                .map_err(|_| ControlError::Transport("link closed while sending".into())),
            None => Err(ControlError::Transport("not connected".into())),
        }
    }

    /// Records liveness evidence from the peer.
    pub fn touch(&self) {
        *self.last_activity.lock().expect("Connection activity lock poisoned") = Instant::now();
    }

    pub fn idle_for(&self) -> Duration {
        self.last_activity
            .lock()
            .expect("Connection activity lock poisoned")
            .elapsed()
    }

    pub fn has_connected(&self) -> bool {
        self.ever_connected.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_connect_attempt_conflicts() {
        let connection = Connection::new("ws://engine/control/websocket");
        assert_eq!(connection.begin_connect(), Ok(ConnectStart::Started));
        assert_eq!(connection.state(), ConnectionState::Connecting);
        assert_eq!(connection.begin_connect(), Err(ControlError::ConnectConflict));

        connection.abort_connect();
        assert_eq!(connection.state(), ConnectionState::Disconnected);
        assert_eq!(connection.begin_connect(), Ok(ConnectStart::Started));
    }

    #[test]
    fn test_install_transmit_release() {
        let connection = Connection::new("mock://");
        let mut states = connection.subscribe();
        connection.begin_connect().unwrap();

        let (tx, mut rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        let (generation, reconnect) = connection.install(tx, cancel.clone());
        assert!(!reconnect);
        assert!(!connection.mark_connected(generation + 1));
        assert!(connection.mark_connected(generation));
        assert_eq!(*states.borrow_and_update(), ConnectionState::Connected);
        assert_eq!(connection.begin_connect(), Ok(ConnectStart::AlreadyConnected));

        connection.transmit("hello".into()).unwrap();
        assert_eq!(rx.try_recv().unwrap(), "hello");

        assert!(!connection.release(generation + 1));
        assert!(connection.release(generation));
        assert!(cancel.is_cancelled());
        assert_eq!(connection.state(), ConnectionState::Disconnected);
        assert!(matches!(connection.transmit("late".into()), Err(ControlError::Transport(_))));
        assert!(!connection.release(generation));
    }

    #[test]
    fn test_second_install_is_a_reconnect() {
        let connection = Connection::new("mock://");
        let (tx, _rx) = mpsc::unbounded_channel();
        let (first, _) = connection.install(tx, CancellationToken::new());
        assert!(connection.release(first));

        let (tx, _rx) = mpsc::unbounded_channel();
        let (second, reconnect) = connection.install(tx, CancellationToken::new());
        assert!(reconnect);
        assert!(second > first);
    }

    #[test]
    fn test_close_generation_ignores_stale_links() {
        let connection = Connection::new("mock://");
        let (tx, _rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        let (generation, _) = connection.install(tx, cancel.clone());

        connection.close_generation(generation + 5);
        assert!(!cancel.is_cancelled());
        connection.close_generation(generation);
        assert!(cancel.is_cancelled());
    }
}
