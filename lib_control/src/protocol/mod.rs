//! # Wire Protocol
//!
//! JSON message shapes exchanged with the control engine, plus the plain-text
//! liveness markers that travel outside the JSON envelope.
//!
//! ## Contained Modules:
//! - **`message`**: outbound commands, inbound replies and notifications, and
//!   frame classification.

/// Message shapes and frame classification.
pub mod message;

pub use message::{
    normalize_args, BindingKey, CommandKind, Frame, InboundMessage, Meta, OutboundCommand, Target,
    PING, PONG,
};
