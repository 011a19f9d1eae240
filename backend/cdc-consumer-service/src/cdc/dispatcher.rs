//! Per-entity dispatch of classified CDC events.
//!
//! Each entity type gets one [`EntityDispatcher`] holding at most one handler
//! per [`OperationKind`]. Dispatchers are assembled at startup and frozen
//! behind the router's `Arc`; nothing registers handlers once streams run.
//!
//! Handler failures stop here. A handler that returns `Err` or panics is
//! logged with the record's delivery context and raw payload, and `dispatch`
//! still returns so the record's offset can be acknowledged.

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use tracing::{debug, error, info, warn};

use super::models::{DeliveryContext, Entity, Envelope, OperationKind};
use crate::error::{CdcError, Result};

/// Business-logic callback for one (entity, operation kind) pair.
///
/// Handlers run inline on the partition's stream and receive the envelope
/// read-only. They must tolerate redelivery of the same record.
pub type Handler<E> =
    Arc<dyn Fn(&Envelope<E>, &DeliveryContext) -> anyhow::Result<()> + Send + Sync>;

/// What happened to a classified event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// A registered handler (or the log-only default) completed.
    Handled,
    /// Operation marker was not recognized; no handler ran.
    Unrecognized,
    /// The handler returned an error or panicked. The record still counts as processed.
    HandlerFailed,
}

pub struct EntityDispatcher<E: Entity> {
    handlers: HashMap<OperationKind, Handler<E>>,
}

impl<E: Entity> Default for EntityDispatcher<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E: Entity> fmt::Debug for EntityDispatcher<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut kinds: Vec<String> = self.handlers.keys().map(ToString::to_string).collect();
        kinds.sort();
        f.debug_struct("EntityDispatcher")
            .field("entity", &E::ENTITY_TYPE)
            .field("handlers", &kinds)
            .finish()
    }
}

impl<E: Entity> EntityDispatcher<E> {
    /// Dispatcher with no handlers; every kind falls back to the log-only default.
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    /// Register `handler` for `kind`, replacing any previous registration.
    ///
    /// `Unknown` always goes to the unrecognized-operation path and cannot
    /// carry a handler.
    pub fn register_handler<F>(&mut self, kind: OperationKind, handler: F) -> Result<()>
    where
        F: Fn(&Envelope<E>, &DeliveryContext) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        if kind == OperationKind::Unknown {
            return Err(CdcError::config(format!(
                "cannot register a {} handler for the Unknown operation kind",
                E::ENTITY_TYPE
            )));
        }

        debug!(entity = E::ENTITY_TYPE, kind = %kind, "Registering CDC handler");
        if self.handlers.insert(kind, Arc::new(handler)).is_some() {
            warn!(
                entity = E::ENTITY_TYPE,
                kind = %kind,
                "Replacing previously registered CDC handler"
            );
        }
        Ok(())
    }

    /// Builder form of [`EntityDispatcher::register_handler`].
    pub fn on<F>(mut self, kind: OperationKind, handler: F) -> Result<Self>
    where
        F: Fn(&Envelope<E>, &DeliveryContext) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.register_handler(kind, handler)?;
        Ok(self)
    }

    pub fn has_handler(&self, kind: OperationKind) -> bool {
        self.handlers.contains_key(&kind)
    }

    /// Route one classified event to its handler.
    ///
    /// Never propagates handler failures; `payload` is only used for logging.
    pub fn dispatch(
        &self,
        kind: OperationKind,
        envelope: &Envelope<E>,
        ctx: &DeliveryContext,
        payload: &[u8],
    ) -> DispatchOutcome {
        info!(
            topic = %ctx.topic,
            partition = ctx.partition,
            offset = ctx.offset,
            "Received {} event",
            E::ENTITY_TYPE
        );

        if kind == OperationKind::Unknown {
            warn!(
                topic = %ctx.topic,
                partition = ctx.partition,
                offset = ctx.offset,
                operation = envelope.operation().unwrap_or("null"),
                "Unknown operation for {} event",
                E::ENTITY_TYPE
            );
            return DispatchOutcome::Unrecognized;
        }

        info!("{} {}: {}", E::ENTITY_TYPE, kind.verb(), envelope);
        debug!(
            entity = E::ENTITY_TYPE,
            kind = %kind,
            topic = %ctx.topic,
            partition = ctx.partition,
            offset = ctx.offset,
            "Routing CDC event"
        );

        let Some(handler) = self.handlers.get(&kind) else {
            debug!(
                entity = E::ENTITY_TYPE,
                kind = %kind,
                "No handler registered; event logged only"
            );
            return DispatchOutcome::Handled;
        };

        match catch_unwind(AssertUnwindSafe(|| handler(envelope, ctx))) {
            Ok(Ok(())) => DispatchOutcome::Handled,
            Ok(Err(e)) => {
                let err = CdcError::handler(format!("{:#}", e));
                log_handler_failure::<E>(kind, ctx, payload, &err);
                DispatchOutcome::HandlerFailed
            }
            Err(panic) => {
                let err = CdcError::handler(format!(
                    "handler panicked: {}",
                    panic_message(panic.as_ref())
                ));
                log_handler_failure::<E>(kind, ctx, payload, &err);
                DispatchOutcome::HandlerFailed
            }
        }
    }
}

fn log_handler_failure<E: Entity>(
    kind: OperationKind,
    ctx: &DeliveryContext,
    payload: &[u8],
    err: &CdcError,
) {
    error!(
        topic = %ctx.topic,
        partition = ctx.partition,
        offset = ctx.offset,
        kind = %kind,
        payload = %String::from_utf8_lossy(payload),
        "Error processing {} event: {}",
        E::ENTITY_TYPE,
        err
    );
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(msg) = panic.downcast_ref::<&'static str>() {
        msg
    } else if let Some(msg) = panic.downcast_ref::<String>() {
        msg.as_str()
    } else {
        "non-string panic payload"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cdc::models::Customer;
    use std::sync::Mutex;

    fn envelope(op: Option<&str>) -> Envelope<Customer> {
        Envelope::new(
            Customer {
                id: Some(1),
                first_name: Some("Ann".to_string()),
                ..Default::default()
            },
            op.map(str::to_string),
            None,
            None,
            None,
        )
    }

    fn ctx() -> DeliveryContext {
        DeliveryContext::new("mariadb01.appdb.customers", 0, 10)
    }

    #[test]
    fn test_dispatch_invokes_registered_handler() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let dispatcher = EntityDispatcher::<Customer>::new()
            .on(OperationKind::Create, move |env, ctx| {
                sink.lock().unwrap().push((env.entity().id, ctx.offset));
                Ok(())
            })
            .expect("register");

        let outcome = dispatcher.dispatch(OperationKind::Create, &envelope(Some("c")), &ctx(), b"{}");

        assert_eq!(outcome, DispatchOutcome::Handled);
        assert_eq!(*seen.lock().unwrap(), vec![(Some(1), 10)]);
    }

    #[test]
    fn test_dispatch_only_runs_matching_kind() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let create_calls = calls.clone();
        let delete_calls = calls.clone();
        let dispatcher = EntityDispatcher::<Customer>::new()
            .on(OperationKind::Create, move |_, _| {
                create_calls.lock().unwrap().push("create");
                Ok(())
            })
            .and_then(|d| {
                d.on(OperationKind::Delete, move |_, _| {
                    delete_calls.lock().unwrap().push("delete");
                    Ok(())
                })
            })
            .expect("register");

        dispatcher.dispatch(OperationKind::Delete, &envelope(Some("d")), &ctx(), b"{}");

        assert_eq!(*calls.lock().unwrap(), vec!["delete"]);
    }

    #[test]
    fn test_unregistered_kind_uses_log_only_default() {
        let dispatcher = EntityDispatcher::<Customer>::new();

        let outcome = dispatcher.dispatch(OperationKind::Update, &envelope(Some("u")), &ctx(), b"{}");

        assert_eq!(outcome, DispatchOutcome::Handled);
        assert!(!dispatcher.has_handler(OperationKind::Update));
    }

    #[test]
    fn test_unknown_kind_invokes_no_handler() {
        let called = Arc::new(Mutex::new(false));
        let flag = called.clone();
        let mut dispatcher = EntityDispatcher::<Customer>::new();
        for kind in OperationKind::HANDLED {
            let flag = flag.clone();
            dispatcher
                .register_handler(kind, move |_, _| {
                    *flag.lock().unwrap() = true;
                    Ok(())
                })
                .expect("register");
        }

        let outcome =
            dispatcher.dispatch(OperationKind::Unknown, &envelope(Some("x")), &ctx(), b"{}");

        assert_eq!(outcome, DispatchOutcome::Unrecognized);
        assert!(!*called.lock().unwrap());
    }

    #[test]
    fn test_cannot_register_unknown_handler() {
        let result = EntityDispatcher::<Customer>::new().on(OperationKind::Unknown, |_, _| Ok(()));
        assert!(matches!(result, Err(CdcError::Config(_))));
    }

    #[test]
    fn test_handler_error_is_contained() {
        let dispatcher = EntityDispatcher::<Customer>::new()
            .on(OperationKind::Create, |_, _| {
                Err(anyhow::anyhow!("welcome email service unavailable"))
            })
            .expect("register");

        let outcome = dispatcher.dispatch(
            OperationKind::Create,
            &envelope(Some("c")),
            &ctx(),
            br#"{"id":1,"__op":"c"}"#,
        );

        assert_eq!(outcome, DispatchOutcome::HandlerFailed);
    }

    #[test]
    fn test_handler_panic_is_contained() {
        let dispatcher = EntityDispatcher::<Customer>::new()
            .on(OperationKind::Update, |_, _| panic!("index out of range"))
            .expect("register");

        let outcome = dispatcher.dispatch(OperationKind::Update, &envelope(Some("u")), &ctx(), b"{}");

        assert_eq!(outcome, DispatchOutcome::HandlerFailed);
    }

    #[test]
    fn test_register_replaces_previous_handler() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let first = calls.clone();
        let second = calls.clone();
        let mut dispatcher = EntityDispatcher::<Customer>::new();
        dispatcher
            .register_handler(OperationKind::Snapshot, move |_, _| {
                first.lock().unwrap().push(1);
                Ok(())
            })
            .expect("register");
        dispatcher
            .register_handler(OperationKind::Snapshot, move |_, _| {
                second.lock().unwrap().push(2);
                Ok(())
            })
            .expect("register");

        dispatcher.dispatch(OperationKind::Snapshot, &envelope(Some("r")), &ctx(), b"{}");

        assert_eq!(*calls.lock().unwrap(), vec![2]);
    }

    #[test]
    fn test_panic_message_extraction() {
        let boxed: Box<dyn Any + Send> = Box::new("static message");
        assert_eq!(panic_message(boxed.as_ref()), "static message");

        let boxed: Box<dyn Any + Send> = Box::new(String::from("owned message"));
        assert_eq!(panic_message(boxed.as_ref()), "owned message");

        let boxed: Box<dyn Any + Send> = Box::new(42_u8);
        assert_eq!(panic_message(boxed.as_ref()), "non-string panic payload");
    }
}
