//! # Error Taxonomy
//!
//! Every failure a caller can observe from the binding client is a
//! [`ControlError`]. The type is `Clone` because a single wire reply can
//! complete several callers at once (all callers attached to one in-flight
//! `bind` receive the same outcome).
//!
//! [`RouteFailure`] is never returned to a caller. It describes an inbound
//! message whose target could not be resolved locally and is only logged.

use thiserror::Error;

/// Errors surfaced by binding client operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ControlError {
    /// The frame could not be sent, or the link closed before a reply arrived.
    #[error("transport error: {0}")]
    Transport(String),

    /// The control engine answered with an `error` message.
    #[error("control engine rejected the request: {0}")]
    Protocol(String),

    /// A connect was requested while another attempt was still running.
    #[error("already attempting to connect to the control engine")]
    ConnectConflict,

    /// The request id counter reached the end of its range.
    #[error("request id space exhausted")]
    IdExhausted,

    /// No reply arrived for the request within the configured timeout.
    #[error("request {0} timed out")]
    Timeout(u64),

    /// An outbound command could not be encoded.
    #[error("serialization failed: {0}")]
    Serialization(String),

    /// The client has been shut down and no longer connects.
    #[error("client is shut down")]
    Shutdown,
}

impl From<serde_json::Error> for ControlError {
    fn from(e: serde_json::Error) -> Self {
        ControlError::Serialization(e.to_string())
    }
}

/// Why an inbound message could not be delivered to an observer.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RouteFailure {
    /// The message carried no metadata block.
    #[error("message has no metadata")]
    Meta,

    /// No system with this id is registered.
    #[error("unknown system '{0}'")]
    System(String),

    /// The module could not be resolved inside the system.
    #[error("unknown module '{module}' ({index}) in system '{system}'")]
    Module {
        /// System id.
        system: String,
        /// Module id.
        module: String,
        /// 1-based instance index.
        index: u32,
    },

    /// Nothing observes this status variable.
    #[error("no binding for '{name}' on {module}_{index} in system '{system}'")]
    Binding {
        /// System id.
        system: String,
        /// Module id.
        module: String,
        /// 1-based instance index.
        index: u32,
        /// Status variable or function name.
        name: String,
    },
}

/// Convenience alias used across the crate.
pub type Result<T, E = ControlError> = std::result::Result<T, E>;
