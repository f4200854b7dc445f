//! # Binding Client Core
//!
//! The protocol machinery behind [`ControlClient`](crate::ControlClient). Each
//! component owns one concern and is shared through `Arc`s held by the client.
//!
//! ## Core Components:
//!
//! - **`correlation`**: the table of in-flight requests keyed by request id.
//!   Ids start at 1 and are never reused.
//!
//! - **`registry`**: bound status variables and their last known values, plus
//!   the binds still on the wire so concurrent callers share one request.
//!
//! - **`connection`**: connection state (`Disconnected`, `Connecting`,
//!   `Connected`) published through a `watch` channel, and the current link
//!   with its generation number.
//!
//! - **`dispatcher`**: the request operations (`bind`, `unbind`, `exec`,
//!   `debug`, `ignore`) and the shared connect-on-demand path.
//!
//! - **`router`**: applies inbound replies and notifications, in arrival order,
//!   to the tables above and to the observers in [`Systems`](crate::systems::Systems).
//!
//! - **`keepalive`**: probes the engine and closes links that went silent.

#![forbid(unsafe_code)]

/// Connection state machine and the current link.
pub mod connection;
/// In-flight request table.
pub mod correlation;
/// Request operations of the client.
pub mod dispatcher;
/// Liveness probing of the current link.
pub mod keepalive;
/// Bound status variables and in-flight binds.
pub mod registry;
/// Delivery of inbound messages.
pub mod router;

// --- Public API Re-exports ---
pub use connection::{Connection, ConnectionState};
pub use correlation::{CorrelationTable, PendingRequest};
pub use keepalive::KeepAliveSettings;
pub use registry::{BindStart, Binding, BindingRegistry};
pub use router::{NotificationRouter, RouteOutcome};
