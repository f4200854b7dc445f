//! # lib_control
//!
//! Client side of the control engine binding protocol. An application uses a
//! [`ControlClient`] to bind to status variables of remote modules, receive
//! their updates and call module functions, all multiplexed over a single
//! persistent connection that is re-established (and re-bound) automatically.
//!
//! ```text
//!  app ──► ControlClient ──► core::dispatcher ──► Connection ──► Transport ──► engine
//!                                                                    │
//!  observers ◄── systems ◄── core::router ◄── reader task ◄──────────┘
//! ```
//!
//! ## Modules
//! - **`protocol`**: wire message shapes.
//! - **`core`**: correlation, bindings, connection state, routing, keep-alive.
//! - **`client`**: the public handle and the connection lifecycle.
//! - **`systems`**: explicit System → Module → StatusVariable registry.
//! - **`transport`**: WebSocket and in-process mock transports.
//! - **`configs`** / **`loggers`**: settings and log setup for binaries.

pub mod auth;
pub mod client;
pub mod configs;
pub mod core;
pub mod error;
#[cfg(feature = "loggers")]
pub mod loggers;
pub mod protocol;
pub mod systems;
pub mod transport;

// Re-export everything an application normally touches
pub use auth::{StaticToken, TokenSource};
pub use client::ControlClient;
pub use configs::{endpoint_for, ClientConfig, ConfigError};
pub use crate::core::ConnectionState;
pub use error::{ControlError, Result, RouteFailure};
pub use protocol::{BindingKey, CommandKind, Target};
pub use systems::{Module, StatusVariable, System, Systems};
pub use transport::{Transport, TransportLink};
