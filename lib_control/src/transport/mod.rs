//! # Transports
//!
//! A transport turns an endpoint address into a [`TransportLink`]: a pair of
//! channels carrying text frames to and from the control engine. The binding
//! client never touches sockets directly, which keeps the lifecycle logic the
//! same whether frames travel over a WebSocket or stay in-process.
//!
//! The link is considered closed when the inbound channel ends. Dropping the
//! outbound sender tells the transport to close its side.
//!
//! ## Contained Modules:
//! - **`websocket`**: tokio-tungstenite client (feature `websocket`).
//! - **`mock`**: simulated control engine (feature `mock`).

use futures_util::future::BoxFuture;
use tokio::sync::mpsc;

use crate::error::ControlError;

/// Real WebSocket transport.
#[cfg(feature = "websocket")]
pub mod websocket;
/// In-process control engine used for tests and demos.
#[cfg(feature = "mock")]
pub mod mock;

#[cfg(feature = "websocket")]
pub use websocket::WebSocketTransport;
#[cfg(feature = "mock")]
pub use mock::{MockEngine, MockTransport};

/// An open connection, expressed as channels of text frames.
pub struct TransportLink {
    /// Frames to deliver to the engine.
    pub outbound: mpsc::UnboundedSender<String>,
    /// Frames received from the engine. `None` means the link closed.
    pub inbound: mpsc::UnboundedReceiver<String>,
}

/// Opens links to a control engine.
pub trait Transport: Send + Sync + 'static {
    fn connect<'a>(&'a self, endpoint: &'a str) -> BoxFuture<'a, Result<TransportLink, ControlError>>;
}
