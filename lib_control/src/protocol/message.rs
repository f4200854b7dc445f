//! # Control Engine Messages
//!
//! Outbound commands are JSON objects of the form
//! `{ id, cmd, sys, mod, index, name, args }`. The engine answers with
//! `success`/`error` replies carrying the same `id`, and pushes `notify`
//! messages for bound status variables. Liveness uses the bare text markers
//! [`PING`] and [`PONG`].

use std::fmt;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::error::ControlError;

/// Liveness probe sent by the client.
pub const PING: &str = "ping";
/// Liveness echo sent by the engine.
pub const PONG: &str = "pong";

/// The command verbs understood by the control engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CommandKind {
    /// Subscribe to a status variable.
    Bind,
    /// Cancel a status variable subscription.
    Unbind,
    /// Call a function on a module.
    Exec,
    /// Start receiving debug output from a module.
    Debug,
    /// Stop receiving debug output from a module.
    Ignore,
}

impl CommandKind {
    /// Wire spelling of the verb.
    pub fn as_str(&self) -> &'static str {
        match self {
            CommandKind::Bind => "bind",
            CommandKind::Unbind => "unbind",
            CommandKind::Exec => "exec",
            CommandKind::Debug => "debug",
            CommandKind::Ignore => "ignore",
        }
    }
}

impl fmt::Display for CommandKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A module instance inside a system: `(system id, module id, 1-based index)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Target {
    pub system: String,
    pub module: String,
    pub index: u32,
}

impl Target {
    pub fn new(system: impl Into<String>, module: impl Into<String>, index: u32) -> Self {
        Self {
            system: system.into(),
            module: module.into(),
            index,
        }
    }

    /// Builds the binding key for a status variable on this module.
    pub fn key(&self, name: impl Into<String>) -> BindingKey {
        BindingKey {
            target: self.clone(),
            name: name.into(),
        }
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}_{}", self.system, self.module, self.index)
    }
}

/// Identity of one status variable subscription.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BindingKey {
    pub target: Target,
    pub name: String,
}

impl BindingKey {
    pub fn new(
        system: impl Into<String>,
        module: impl Into<String>,
        index: u32,
        name: impl Into<String>,
    ) -> Self {
        Target::new(system, module, index).key(name)
    }
}

impl fmt::Display for BindingKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.target, self.name)
    }
}

/// A command as it travels to the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboundCommand {
    pub id: u64,
    pub cmd: CommandKind,
    pub sys: String,
    #[serde(rename = "mod")]
    pub module: String,
    pub index: u32,
    pub name: String,
    #[serde(default)]
    pub args: Vec<Value>,
}

impl OutboundCommand {
    pub fn new(id: u64, cmd: CommandKind, target: &Target, name: &str, args: Vec<Value>) -> Self {
        Self {
            id,
            cmd,
            sys: target.system.clone(),
            module: target.module.clone(),
            index: target.index,
            name: name.to_string(),
            args,
        }
    }

    /// Serializes the command into a text frame.
    pub fn encode(&self) -> Result<String, ControlError> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn target(&self) -> Target {
        Target::new(self.sys.clone(), self.module.clone(), self.index)
    }
}

/// Addressing block attached to replies and notifications.
///
/// The engine may echo the whole request here; unknown fields are ignored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Meta {
    pub sys: String,
    #[serde(rename = "mod")]
    pub module: String,
    pub index: u32,
    pub name: String,
}

impl Meta {
    pub fn key(&self) -> BindingKey {
        BindingKey::new(
            self.sys.clone(),
            self.module.clone(),
            self.index,
            self.name.clone(),
        )
    }
}

impl From<&BindingKey> for Meta {
    fn from(key: &BindingKey) -> Self {
        Self {
            sys: key.target.system.clone(),
            module: key.target.module.clone(),
            index: key.target.index,
            name: key.name.clone(),
        }
    }
}

/// A JSON message received from the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum InboundMessage {
    /// Positive reply to a command.
    Success {
        id: u64,
        #[serde(
            default,
            deserialize_with = "lenient_meta",
            skip_serializing_if = "Option::is_none"
        )]
        meta: Option<Meta>,
        #[serde(default)]
        value: Value,
    },
    /// Negative reply to a command.
    Error {
        id: u64,
        #[serde(
            default,
            deserialize_with = "lenient_meta",
            skip_serializing_if = "Option::is_none"
        )]
        meta: Option<Meta>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        msg: Option<String>,
    },
    /// Unsolicited value update for a bound status variable.
    Notify {
        meta: Meta,
        #[serde(default)]
        value: Value,
    },
}

/// Reads a reply's `meta` block, treating one that does not decode (for
/// example `"index": null` on module-wide commands) as absent. The reply
/// still settles its request by `id`.
fn lenient_meta<'de, D>(deserializer: D) -> Result<Option<Meta>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<Value>::deserialize(deserializer)?;
    Ok(raw.and_then(|value| serde_json::from_value(value).ok()))
}

impl InboundMessage {
    pub fn meta(&self) -> Option<&Meta> {
        match self {
            InboundMessage::Success { meta, .. } | InboundMessage::Error { meta, .. } => {
                meta.as_ref()
            }
            InboundMessage::Notify { meta, .. } => Some(meta),
        }
    }

    /// Correlation id, absent on notifications.
    pub fn id(&self) -> Option<u64> {
        match self {
            InboundMessage::Success { id, .. } | InboundMessage::Error { id, .. } => Some(*id),
            InboundMessage::Notify { .. } => None,
        }
    }

    pub fn encode(&self) -> Result<String, ControlError> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Classification of one inbound text frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    /// The liveness marker (or an empty frame).
    Pong,
    /// A reply or notification.
    Message(InboundMessage),
    /// Debug output from a module the client asked to `debug`.
    Debug(Value),
    /// Anything else. Still counts as proof the peer is alive.
    Unrecognized,
}

impl Frame {
    pub fn parse(text: &str) -> Frame {
        let trimmed = text.trim();
        if trimmed.is_empty() || trimmed == PONG {
            return Frame::Pong;
        }
        let value: Value = match serde_json::from_str(trimmed) {
            Ok(v) => v,
            Err(_) => return Frame::Unrecognized,
        };
        if value.get("type").and_then(Value::as_str) == Some("debug") {
            return Frame::Debug(value);
        }
        match serde_json::from_value::<InboundMessage>(value) {
            Ok(message) => Frame::Message(message),
            Err(_) => Frame::Unrecognized,
        }
    }
}

/// Turns an optional argument into the list the engine expects.
///
/// A JSON array is passed through, any other value becomes a one-element
/// list and `None` becomes an empty list.
pub fn normalize_args(args: Option<Value>) -> Vec<Value> {
    match args {
        None => Vec::new(),
        Some(Value::Array(list)) => list,
        Some(single) => vec![single],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_outbound_command_uses_wire_field_names() {
        let target = Target::new("sys-1", "Display", 2);
        let cmd = OutboundCommand::new(7, CommandKind::Exec, &target, "volume", vec![json!(40)]);
        let encoded: Value = serde_json::from_str(&cmd.encode().unwrap()).unwrap();

        assert_eq!(
            encoded,
            json!({
                "id": 7,
                "cmd": "exec",
                "sys": "sys-1",
                "mod": "Display",
                "index": 2,
                "name": "volume",
                "args": [40]
            })
        );
    }

    #[test]
    fn test_parse_success_ignores_echoed_request_fields() {
        let text = r#"{"id":1,"type":"success","meta":{"id":1,"cmd":"bind","sys":"sys-1","mod":"disp","index":1,"name":"power","args":[]},"value":true}"#;

        match Frame::parse(text) {
            Frame::Message(InboundMessage::Success { id, meta, value }) => {
                assert_eq!(id, 1);
                assert_eq!(meta.unwrap().key(), BindingKey::new("sys-1", "disp", 1, "power"));
                assert_eq!(value, json!(true));
            }
            other => panic!("unexpected frame: {:?}", other),
        }
    }

    #[test]
    fn test_parse_error_and_notify() {
        let error = Frame::parse(r#"{"id":4,"type":"error","msg":"no such module"}"#);
        assert_eq!(
            error,
            Frame::Message(InboundMessage::Error {
                id: 4,
                meta: None,
                msg: Some("no such module".into()),
            })
        );

        let notify = Frame::parse(
            r#"{"type":"notify","meta":{"sys":"s","mod":"m","index":1,"name":"level"},"value":12}"#,
        );
        match notify {
            Frame::Message(msg @ InboundMessage::Notify { .. }) => {
                assert_eq!(msg.id(), None);
                assert_eq!(msg.meta().unwrap().name, "level");
            }
            other => panic!("unexpected frame: {:?}", other),
        }
    }

    #[test]
    fn test_reply_with_unreadable_meta_keeps_its_id() {
        let text = r#"{"id":3,"type":"success","meta":{"sys":"sys-1","mod":"Display","index":null,"name":"ignore"},"value":null}"#;
        assert_eq!(
            Frame::parse(text),
            Frame::Message(InboundMessage::Success {
                id: 3,
                meta: None,
                value: Value::Null,
            })
        );

        let error = Frame::parse(r#"{"id":4,"type":"error","meta":"oops","msg":"denied"}"#);
        assert_eq!(
            error,
            Frame::Message(InboundMessage::Error {
                id: 4,
                meta: None,
                msg: Some("denied".into()),
            })
        );
    }

    #[test]
    fn test_liveness_and_garbage_frames() {
        assert_eq!(Frame::parse("pong"), Frame::Pong);
        assert_eq!(Frame::parse(""), Frame::Pong);
        assert_eq!(Frame::parse("not json"), Frame::Unrecognized);
        assert_eq!(Frame::parse(r#"{"type":"mystery"}"#), Frame::Unrecognized);
        assert!(matches!(
            Frame::parse(r#"{"type":"debug","mod":"Display","msg":"hello"}"#),
            Frame::Debug(_)
        ));
    }

    #[test]
    fn test_normalize_args() {
        assert!(normalize_args(None).is_empty());
        assert_eq!(normalize_args(Some(json!(5))), vec![json!(5)]);
        assert_eq!(normalize_args(Some(json!([1, "a"]))), vec![json!(1), json!("a")]);
        assert_eq!(normalize_args(Some(Value::Null)), vec![Value::Null]);
    }
}
