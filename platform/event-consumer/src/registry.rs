//! Explicit event-type to handler registry
//!
//! Built and validated once at process start: every registered type must be
//! in the catalog, no type may have two handlers, and every type a service
//! declares as required must have one.

use async_trait::async_trait;
use event_bus::{DomainEvent, EventCatalog, EventEnvelope, EventError};
use std::collections::{BTreeSet, HashMap};
use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;
use thiserror::Error;

/// Delivery metadata passed to every handler invocation
#[derive(Debug, Clone)]
pub struct HandlerContext {
    pub consumer_group: String,
    pub topic: String,
    /// 1-based attempt number within the current retry cycle
    pub attempt: u32,
}

/// Service-owned callback for one or more event types
///
/// Handlers must be safe to invoke more than once for the same `event_id`:
/// a retry after a partial failure re-runs the whole handler.
#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn handle(&self, envelope: &EventEnvelope, ctx: &HandlerContext)
        -> Result<(), EventError>;
}

/// Adapts an async closure over a typed payload into an [`EventHandler`]
///
/// A payload that does not decode into `E` fails with `InvalidPayload`,
/// which is never retried.
pub struct TypedHandler<E, F> {
    func: F,
    _event: PhantomData<fn() -> E>,
}

impl<E, F, Fut> TypedHandler<E, F>
where
    E: DomainEvent,
    F: Fn(E, EventEnvelope) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), EventError>> + Send + 'static,
{
    pub fn new(func: F) -> Self {
        Self {
            func,
            _event: PhantomData,
        }
    }
}

#[async_trait]
impl<E, F, Fut> EventHandler for TypedHandler<E, F>
where
    E: DomainEvent,
    F: Fn(E, EventEnvelope) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), EventError>> + Send + 'static,
{
    async fn handle(
        &self,
        envelope: &EventEnvelope,
        _ctx: &HandlerContext,
    ) -> Result<(), EventError> {
        let event = envelope.payload_as::<E>()?;
        (self.func)(event, envelope.clone()).await
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("more than one handler registered for {0}")]
    DuplicateHandler(String),

    #[error("handler registered for {0}, which is not in the event catalog")]
    UnknownEventType(String),

    #[error("no handler registered for required event type {0}")]
    MissingHandler(String),

    #[error("registry has no handlers")]
    Empty,
}

impl From<RegistryError> for EventError {
    fn from(err: RegistryError) -> Self {
        EventError::Config {
            var: "handler registry".to_string(),
            reason: err.to_string(),
        }
    }
}

/// Immutable mapping from event type to handler
#[derive(Clone)]
pub struct HandlerRegistry {
    catalog: Arc<EventCatalog>,
    handlers: HashMap<String, Arc<dyn EventHandler>>,
}

impl std::fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut types: Vec<_> = self.handlers.keys().collect();
        types.sort();
        f.debug_struct("HandlerRegistry")
            .field("event_types", &types)
            .finish()
    }
}

impl HandlerRegistry {
    pub fn builder(catalog: Arc<EventCatalog>) -> HandlerRegistryBuilder {
        HandlerRegistryBuilder {
            catalog,
            handlers: HashMap::new(),
            duplicates: Vec::new(),
            required: Vec::new(),
        }
    }

    pub fn handler_for(&self, event_type: &str) -> Option<Arc<dyn EventHandler>> {
        self.handlers.get(event_type).cloned()
    }

    pub fn catalog(&self) -> &Arc<EventCatalog> {
        &self.catalog
    }

    pub fn event_types(&self) -> BTreeSet<&str> {
        self.handlers.keys().map(String::as_str).collect()
    }

    /// Topics carrying at least one handled event type
    pub fn topics(&self) -> BTreeSet<String> {
        self.handlers
            .keys()
            .filter_map(|event_type| self.catalog.topic_for(event_type).ok())
            .map(str::to_string)
            .collect()
    }
}

pub struct HandlerRegistryBuilder {
    catalog: Arc<EventCatalog>,
    handlers: HashMap<String, Arc<dyn EventHandler>>,
    duplicates: Vec<String>,
    required: Vec<String>,
}

impl HandlerRegistryBuilder {
    /// Register a handler for an event type by name
    pub fn on(mut self, event_type: &str, handler: Arc<dyn EventHandler>) -> Self {
        if self
            .handlers
            .insert(event_type.to_string(), handler)
            .is_some()
        {
            self.duplicates.push(event_type.to_string());
        }
        self
    }

    /// Register a handler for the typed payload `E`
    pub fn on_event<E: DomainEvent>(self, handler: Arc<dyn EventHandler>) -> Self {
        self.on(E::EVENT_TYPE, handler)
    }

    /// Register an async closure over the decoded payload `E`
    pub fn on_typed<E, F, Fut>(self, func: F) -> Self
    where
        E: DomainEvent,
        F: Fn(E, EventEnvelope) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), EventError>> + Send + 'static,
    {
        self.on(E::EVENT_TYPE, Arc::new(TypedHandler::<E, F>::new(func)))
    }

    /// Register one handler for every event type in the catalog
    pub fn on_all(mut self, handler: Arc<dyn EventHandler>) -> Self {
        let event_types: Vec<String> = self.catalog.event_types().map(str::to_string).collect();
        for event_type in event_types {
            self = self.on(&event_type, handler.clone());
        }
        self
    }

    /// Fail the build unless every listed type has a handler
    pub fn require(mut self, event_types: &[&str]) -> Self {
        self.required
            .extend(event_types.iter().map(|t| t.to_string()));
        self
    }

    pub fn build(self) -> Result<HandlerRegistry, RegistryError> {
        if let Some(duplicate) = self.duplicates.into_iter().next() {
            return Err(RegistryError::DuplicateHandler(duplicate));
        }
        if self.handlers.is_empty() {
            return Err(RegistryError::Empty);
        }

        let mut registered: Vec<&String> = self.handlers.keys().collect();
        registered.sort();
        if let Some(unknown) = registered.iter().find(|t| !self.catalog.contains(t)) {
            return Err(RegistryError::UnknownEventType((*unknown).clone()));
        }

        if let Some(missing) = self
            .required
            .iter()
            .find(|t| !self.handlers.contains_key(*t))
        {
            return Err(RegistryError::MissingHandler(missing.clone()));
        }

        Ok(HandlerRegistry {
            catalog: self.catalog,
            handlers: self.handlers,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use event_bus::events::{AccountCreated, UserDeleted};
    use serde_json::json;

    struct Noop;

    #[async_trait]
    impl EventHandler for Noop {
        async fn handle(&self, _: &EventEnvelope, _: &HandlerContext) -> Result<(), EventError> {
            Ok(())
        }
    }

    fn catalog() -> Arc<EventCatalog> {
        Arc::new(EventCatalog::banking().unwrap())
    }

    fn ctx() -> HandlerContext {
        HandlerContext {
            consumer_group: "test".into(),
            topic: "user-events".into(),
            attempt: 1,
        }
    }

    #[test]
    fn test_registry_resolves_handlers_and_topics() {
        let registry = HandlerRegistry::builder(catalog())
            .on_event::<AccountCreated>(Arc::new(Noop))
            .on_event::<UserDeleted>(Arc::new(Noop))
            .build()
            .unwrap();

        assert!(registry.handler_for("AccountCreated").is_some());
        assert!(registry.handler_for("UserCreated").is_none());
        assert_eq!(
            registry.topics().into_iter().collect::<Vec<_>>(),
            vec!["account.created".to_string(), "user-events".to_string()]
        );
    }

    #[test]
    fn test_duplicate_handler_is_rejected() {
        let result = HandlerRegistry::builder(catalog())
            .on("AccountCreated", Arc::new(Noop))
            .on("AccountCreated", Arc::new(Noop))
            .build();

        assert_eq!(
            result.unwrap_err(),
            RegistryError::DuplicateHandler("AccountCreated".into())
        );
    }

    #[test]
    fn test_unknown_and_missing_types_are_rejected() {
        let unknown = HandlerRegistry::builder(catalog())
            .on("LoanApproved", Arc::new(Noop))
            .build();
        assert_eq!(
            unknown.unwrap_err(),
            RegistryError::UnknownEventType("LoanApproved".into())
        );

        let missing = HandlerRegistry::builder(catalog())
            .on_event::<AccountCreated>(Arc::new(Noop))
            .require(&["AccountCreated", "TransactionCompleted"])
            .build();
        assert_eq!(
            missing.unwrap_err(),
            RegistryError::MissingHandler("TransactionCompleted".into())
        );

        assert_eq!(
            HandlerRegistry::builder(catalog()).build().unwrap_err(),
            RegistryError::Empty
        );
    }

    #[test]
    fn test_on_all_covers_the_catalog() {
        let registry = HandlerRegistry::builder(catalog())
            .on_all(Arc::new(Noop))
            .build()
            .unwrap();

        assert_eq!(registry.event_types().len(), 13);
        assert_eq!(registry.topics().len(), 10);
    }

    #[tokio::test]
    async fn test_typed_handler_rejects_mismatched_payload() {
        let registry = HandlerRegistry::builder(catalog())
            .on_typed(|_event: UserDeleted, _env| async { Ok::<(), EventError>(()) })
            .build()
            .unwrap();

        let mut envelope =
            EventEnvelope::from_event("user-service", &UserDeleted { user_id: 7, reason: None })
                .unwrap();
        let handler = registry.handler_for("UserDeleted").unwrap();
        assert!(handler.handle(&envelope, &ctx()).await.is_ok());

        envelope.payload = json!({ "user": "seven" });
        assert!(matches!(
            handler.handle(&envelope, &ctx()).await,
            Err(EventError::InvalidPayload { .. })
        ));
    }
}
