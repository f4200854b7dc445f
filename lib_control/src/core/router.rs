//! # Notification Router
//!
//! Consumes inbound frames in arrival order. Replies settle their pending
//! request (and the binding bookkeeping tied to it); anything that carries
//! metadata is then delivered to the addressed status variable.
//!
//! Nothing here returns an error to a caller. A reply nobody waits for, or a
//! message addressed to something torn down locally, is logged and dropped.

use std::sync::Arc;

use serde_json::Value;

use crate::core::correlation::CorrelationTable;
use crate::core::registry::BindingRegistry;
use crate::error::{ControlError, Result, RouteFailure};
use crate::protocol::{CommandKind, Frame, InboundMessage};
use crate::systems::Systems;

/// What happened to one inbound frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteOutcome {
    /// Liveness marker or unrecognized frame.
    Liveness,
    /// Module debug output, logged only.
    Debug,
    /// Delivered to an observer. `resolved` tells whether a pending request settled.
    Delivered { resolved: bool },
    /// Could not be delivered to an observer.
    Dropped { resolved: bool, failure: RouteFailure },
}

pub struct NotificationRouter {
    correlation: Arc<CorrelationTable>,
    registry: Arc<BindingRegistry>,
    systems: Arc<Systems>,
}

impl NotificationRouter {
    pub fn new(
        correlation: Arc<CorrelationTable>,
        registry: Arc<BindingRegistry>,
        systems: Arc<Systems>,
    ) -> Self {
        Self {
            correlation,
            registry,
            systems,
        }
    }

    pub fn dispatch(&self, text: &str) -> RouteOutcome {
        match Frame::parse(text) {
            Frame::Pong => RouteOutcome::Liveness,
            Frame::Unrecognized => {
                log::trace!("Ignoring unrecognized frame: {}", text);
                RouteOutcome::Liveness
            }
            Frame::Debug(body) => {
                log::debug!("Debug output: {}", body);
                RouteOutcome::Debug
            }
            Frame::Message(message) => self.handle(message),
        }
    }

    fn handle(&self, message: InboundMessage) -> RouteOutcome {
        let resolved = match &message {
            InboundMessage::Success { id, value, .. } => self.settle(*id, Ok(value.clone())),
            InboundMessage::Error { id, msg, .. } => {
                let reason = msg.clone().unwrap_or_else(|| "unspecified error".to_string());
                self.settle(*id, Err(ControlError::Protocol(reason)))
            }
            InboundMessage::Notify { .. } => false,
        };

        match self.route(&message) {
            Ok(()) => RouteOutcome::Delivered { resolved },
            Err(failure) => {
                log::debug!("Failed({}): {:?}", failure, message);
                RouteOutcome::Dropped { resolved, failure }
            }
        }
    }

    /// Completes the pending request `id`, if any.
    fn settle(&self, id: u64, outcome: Result<Value>) -> bool {
        let Some(request) = self.correlation.take(id) else {
            log::debug!("No pending request {}. Reply dropped.", id);
            return false;
        };

        let key = request.key();
        match request.kind {
            CommandKind::Bind => self.registry.complete_bind(&key, &outcome),
            CommandKind::Unbind if outcome.is_ok() => {
                self.registry.remove(&key);
            }
            _ => {}
        }
        log::debug!(
            "{} request({}) for {} settled after {:?}: {}",
            request.kind,
            id,
            key,
            request.created_at.elapsed(),
            if outcome.is_ok() { "success" } else { "error" }
        );
        request.complete(outcome);
        true
    }

    fn route(&self, message: &InboundMessage) -> Result<(), RouteFailure> {
        let meta = message.meta().ok_or(RouteFailure::Meta)?;

        if let InboundMessage::Notify { value, .. } = message {
            self.registry.update_from_notify(&meta.key(), value.clone());
        }

        let system = self
            .systems
            .system(&meta.sys)
            .ok_or_else(|| RouteFailure::System(meta.sys.clone()))?;
        if meta.module.is_empty() {
            return Err(RouteFailure::Module {
                system: meta.sys.clone(),
                module: meta.module.clone(),
                index: meta.index,
            });
        }
        let module = system.module(&meta.module, meta.index);
        let variable = module
            .variable(&meta.name)
            .ok_or_else(|| RouteFailure::Binding {
                system: meta.sys.clone(),
                module: module.id().to_string(),
                index: module.index(),
                name: meta.name.clone(),
            })?;

        match message {
            InboundMessage::Success { value, .. } | InboundMessage::Notify { value, .. } => {
                variable.apply_value(value.clone());
            }
            InboundMessage::Error { msg, .. } => {
                variable.apply_error(msg.clone().unwrap_or_default());
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::registry::BindStart;
    use crate::protocol::{BindingKey, Target};
    use serde_json::json;

    struct Fixture {
        correlation: Arc<CorrelationTable>,
        registry: Arc<BindingRegistry>,
        systems: Arc<Systems>,
        router: NotificationRouter,
    }

    fn fixture() -> Fixture {
        let correlation = Arc::new(CorrelationTable::new());
        let registry = Arc::new(BindingRegistry::new());
        let systems = Systems::new();
        let router = NotificationRouter::new(correlation.clone(), registry.clone(), systems.clone());
        Fixture {
            correlation,
            registry,
            systems,
            router,
        }
    }

    fn power() -> BindingKey {
        BindingKey::new("sys-1", "disp", 1, "power")
    }

    #[tokio::test]
    async fn test_bind_success_resolves_caches_and_fans_out() {
        let f = fixture();
        let status = f.systems.register("sys-1").module("disp", 1).observe("power");
        let mut observer = status.subscribe();

        assert!(matches!(f.registry.begin_bind(&power()), BindStart::Leader));
        let id = f.correlation.next_id().unwrap();
        let reply = f.correlation.register(id, CommandKind::Bind, &power().target, "power", vec![]);

        let outcome = f.router.dispatch(
            r#"{"id":1,"type":"success","meta":{"sys":"sys-1","mod":"disp","index":1,"name":"power"},"value":true}"#,
        );

        assert_eq!(outcome, RouteOutcome::Delivered { resolved: true });
        assert_eq!(reply.await.unwrap(), Ok(json!(true)));
        assert_eq!(f.registry.value(&power()), Some(json!(true)));
        observer.changed().await.unwrap();
        assert_eq!(*observer.borrow(), Some(json!(true)));
    }

    #[tokio::test]
    async fn test_error_reply_rejects_and_reaches_failure_channel() {
        let f = fixture();
        let status = f.systems.register("sys-1").module("disp", 1).observe("power");
        let mut failures = status.failures();
        let target = Target::new("sys-1", "disp", 1);
        let id = f.correlation.next_id().unwrap();
        let reply = f.correlation.register(id, CommandKind::Exec, &target, "power", vec![]);

        let outcome = f.router.dispatch(
            r#"{"id":1,"type":"error","meta":{"sys":"sys-1","mod":"disp","index":1,"name":"power"},"msg":"not allowed"}"#,
        );

        assert_eq!(outcome, RouteOutcome::Delivered { resolved: true });
        assert_eq!(reply.await.unwrap(), Err(ControlError::Protocol("not allowed".into())));
        assert_eq!(failures.recv().await.unwrap(), "not allowed");
    }

    #[test]
    fn test_unknown_correlation_id_is_dropped_quietly() {
        let f = fixture();
        let outcome = f.router.dispatch(r#"{"id":99,"type":"success","value":1}"#);
        assert_eq!(
            outcome,
            RouteOutcome::Dropped {
                resolved: false,
                failure: RouteFailure::Meta
            }
        );
        assert!(f.correlation.is_empty());
    }

    #[tokio::test]
    async fn test_reply_with_unreadable_meta_still_settles() {
        let f = fixture();
        let target = Target::new("sys-1", "disp", 1);
        let id = f.correlation.next_id().unwrap();
        let reply = f.correlation.register(id, CommandKind::Ignore, &target, "ignore", vec![]);

        let outcome = f.router.dispatch(
            r#"{"id":1,"type":"success","meta":{"sys":"sys-1","mod":"disp","index":null,"name":"ignore"},"value":null}"#,
        );

        assert_eq!(
            outcome,
            RouteOutcome::Dropped {
                resolved: true,
                failure: RouteFailure::Meta
            }
        );
        assert_eq!(reply.await.unwrap(), Ok(Value::Null));
        assert!(f.correlation.is_empty());
    }

    #[test]
    fn test_notify_updates_registry_even_without_observers() {
        let f = fixture();
        f.registry.begin_bind(&power());
        f.registry.complete_bind(&power(), &Ok(json!(false)));

        let notify = r#"{"type":"notify","meta":{"sys":"sys-1","mod":"disp","index":1,"name":"power"},"value":true}"#;
        let outcome = f.router.dispatch(notify);

        assert_eq!(
            outcome,
            RouteOutcome::Dropped {
                resolved: false,
                failure: RouteFailure::System("sys-1".into())
            }
        );
        assert_eq!(f.registry.value(&power()), Some(json!(true)));

        f.systems.register("sys-1");
        assert!(matches!(
            f.router.dispatch(notify),
            RouteOutcome::Dropped { failure: RouteFailure::Binding { .. }, .. }
        ));
    }

    #[tokio::test]
    async fn test_same_notify_twice_is_idempotent() {
        let f = fixture();
        let status = f.systems.register("sys-1").module("disp", 1).observe("power");
        f.registry.begin_bind(&power());
        f.registry.complete_bind(&power(), &Ok(json!(false)));
        let mut observer = status.subscribe();
        observer.borrow_and_update();

        let notify = r#"{"type":"notify","meta":{"sys":"sys-1","mod":"disp","index":1,"name":"power"},"value":42}"#;
        f.router.dispatch(notify);
        f.router.dispatch(notify);

        assert_eq!(f.registry.value(&power()), Some(json!(42)));
        assert_eq!(status.current(), Some(json!(42)));
        assert!(observer.has_changed().unwrap());
        observer.borrow_and_update();
        f.router.dispatch(notify);
        assert!(!observer.has_changed().unwrap());
    }

    #[tokio::test]
    async fn test_unbind_success_removes_binding() {
        let f = fixture();
        f.registry.begin_bind(&power());
        f.registry.complete_bind(&power(), &Ok(json!(true)));
        let id = f.correlation.next_id().unwrap();
        let reply = f.correlation.register(id, CommandKind::Unbind, &power().target, "power", vec![]);

        f.router.dispatch(r#"{"id":1,"type":"success","value":null}"#);

        assert_eq!(reply.await.unwrap(), Ok(serde_json::Value::Null));
        assert!(f.registry.get(&power()).is_none());
    }

    #[test]
    fn test_liveness_and_debug_frames() {
        let f = fixture();
        assert_eq!(f.router.dispatch("pong"), RouteOutcome::Liveness);
        assert_eq!(f.router.dispatch("{garbage"), RouteOutcome::Liveness);
        assert_eq!(
            f.router.dispatch(r#"{"type":"debug","mod":"disp","msg":"tick"}"#),
            RouteOutcome::Debug
        );
    }
}
