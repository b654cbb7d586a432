//! # Event Consumer
//!
//! Consumer side of the banking event fabric: the explicit handler
//! registry, per-group delivery records, the retry/backoff coordinator with
//! dead-lettering, and the idempotent consumer runtime that ties them to an
//! [`EventBus`](event_bus::EventBus).
//!
//! ## Usage
//!
//! ```rust,no_run
//! use event_bus::events::AccountCreated;
//! use event_bus::{EventCatalog, EventError, InMemoryBus};
//! use event_consumer::{
//!     ConsumerConfig, HandlerRegistry, IdempotentConsumer, InMemoryDeadLetterSink,
//!     InMemoryDeliveryStore,
//! };
//! use std::sync::Arc;
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example() -> Result<(), EventError> {
//! let catalog = Arc::new(EventCatalog::banking()?);
//! let registry = HandlerRegistry::builder(catalog)
//!     .on_typed(|event: AccountCreated, _envelope| async move {
//!         tracing::info!(account_id = event.account_id, "wallet initialised");
//!         Ok::<(), EventError>(())
//!     })
//!     .build()?;
//!
//! let consumer = IdempotentConsumer::new(
//!     Arc::new(InMemoryBus::new()),
//!     Arc::new(registry),
//!     Arc::new(InMemoryDeliveryStore::new()),
//!     Arc::new(InMemoryDeadLetterSink::new()),
//!     ConsumerConfig::new("crypto-service"),
//! );
//! let shutdown = CancellationToken::new();
//! let handle = consumer.spawn(shutdown.clone());
//! shutdown.cancel();
//! handle.await.ok();
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod consumer;
pub mod dead_letter;
pub mod delivery;
pub mod postgres;
pub mod registry;
pub mod retry;
pub mod runtime;

pub use config::{ConfigError, ConsumerConfig, DlqSinkKind, ServiceConfig};
pub use consumer::{Disposition, IdempotentConsumer};
pub use dead_letter::{
    BusDeadLetterSink, DeadLetterRecord, DeadLetterSink, InMemoryDeadLetterSink,
};
pub use delivery::{
    default_claim_lease, Claim, DeliveryRecord, DeliveryStatus, DeliveryStore,
    InMemoryDeliveryStore,
};
pub use postgres::{PgDeadLetterSink, PgDeliveryStore};
pub use registry::{
    EventHandler, HandlerContext, HandlerRegistry, HandlerRegistryBuilder, RegistryError,
    TypedHandler,
};
pub use retry::{RetryCoordinator, RetryOutcome};
pub use runtime::{init_tracing, ServiceRuntime};
