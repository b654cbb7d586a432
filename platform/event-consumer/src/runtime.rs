//! Service bootstrap and lifecycle
//!
//! One process-wide transport handle and catalog, acquired at start and
//! released on shutdown.

use event_bus::{EventBus, EventCatalog, EventError, EventProducer};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::config::{DlqSinkKind, ServiceConfig};
use crate::consumer::IdempotentConsumer;
use crate::dead_letter::{BusDeadLetterSink, DeadLetterSink, InMemoryDeadLetterSink};
use crate::delivery::{DeliveryStore, InMemoryDeliveryStore};
use crate::postgres::{run_migrations, PgDeadLetterSink, PgDeliveryStore};
use crate::registry::HandlerRegistry;

/// Install the global tracing subscriber (`RUST_LOG`, default `info`)
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .try_init();
}

pub struct ServiceRuntime {
    config: ServiceConfig,
    bus: Arc<dyn EventBus>,
    catalog: Arc<EventCatalog>,
    store: Arc<dyn DeliveryStore>,
    sink: Arc<dyn DeadLetterSink>,
    shutdown: CancellationToken,
}

impl ServiceRuntime {
    /// Load `.env`, initialise tracing, read configuration and connect
    pub async fn bootstrap(service_name: &str) -> Result<Self, EventError> {
        dotenvy::dotenv().ok();
        init_tracing();

        info!(service = %service_name, "Starting service");

        let config = ServiceConfig::from_env(service_name)?;
        info!(
            bus = ?config.bus.kind,
            consumer_group = %config.consumer.consumer_group,
            lanes = config.consumer.lanes,
            dlq_sink = ?config.dlq_sink,
            "Configuration loaded"
        );

        Self::from_config(config).await
    }

    pub async fn from_config(config: ServiceConfig) -> Result<Self, EventError> {
        let catalog = Arc::new(config.bus.load_catalog()?);
        let bus = config.bus.connect().await?;

        let pool = match &config.database_url {
            Some(url) => {
                info!("Connecting to database...");
                let pool = PgPoolOptions::new()
                    .max_connections(5)
                    .connect(url)
                    .await
                    .map_err(|e| EventError::Config {
                        var: "DATABASE_URL".to_string(),
                        reason: e.to_string(),
                    })?;
                run_migrations(&pool).await?;
                Some(pool)
            }
            None => None,
        };

        let lease = config.consumer.claim_lease();
        info!(claim_lease_ms = lease.as_millis() as u64, "Claim lease derived from retry policy");
        let store: Arc<dyn DeliveryStore> = match &pool {
            Some(pool) => Arc::new(PgDeliveryStore::new(pool.clone()).with_lease(lease)),
            None => {
                warn!("DATABASE_URL not set, delivery records are kept in memory");
                Arc::new(InMemoryDeliveryStore::with_lease(lease))
            }
        };

        let sink = build_sink(config.dlq_sink, &bus, pool.as_ref())?;

        Ok(Self {
            config,
            bus,
            catalog,
            store,
            sink,
            shutdown: CancellationToken::new(),
        })
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    pub fn bus(&self) -> Arc<dyn EventBus> {
        self.bus.clone()
    }

    pub fn catalog(&self) -> Arc<EventCatalog> {
        self.catalog.clone()
    }

    pub fn producer(&self) -> EventProducer {
        EventProducer::new(
            self.bus.clone(),
            self.catalog.clone(),
            self.config.service_name.clone(),
        )
    }

    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Consumer for this service's group over `registry`
    pub fn consumer(&self, registry: HandlerRegistry) -> IdempotentConsumer {
        IdempotentConsumer::new(
            self.bus.clone(),
            Arc::new(registry),
            self.store.clone(),
            self.sink.clone(),
            self.config.consumer.clone(),
        )
    }

    /// Run consumers until ctrl-c or the shutdown token fires, then drain
    /// lanes and release the transport
    pub async fn run(self, consumers: Vec<IdempotentConsumer>) -> Result<(), EventError> {
        let handles: Vec<_> = consumers
            .into_iter()
            .map(|consumer| consumer.spawn(self.shutdown.clone()))
            .collect();

        tokio::select! {
            result = tokio::signal::ctrl_c() => {
                if let Err(e) = result {
                    error!(error = %e, "Failed to listen for shutdown signal");
                }
                info!("Shutdown signal received");
            }
            _ = self.shutdown.cancelled() => {}
        }
        self.shutdown.cancel();

        let mut first_error = None;
        for handle in handles {
            match handle.await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    first_error.get_or_insert(e);
                }
                Err(e) => error!(error = %e, "Consumer task panicked"),
            }
        }

        self.bus.shutdown().await?;
        info!(service = %self.config.service_name, "Service stopped");

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

fn build_sink(
    kind: DlqSinkKind,
    bus: &Arc<dyn EventBus>,
    pool: Option<&PgPool>,
) -> Result<Arc<dyn DeadLetterSink>, EventError> {
    Ok(match kind {
        DlqSinkKind::Bus => Arc::new(BusDeadLetterSink::new(bus.clone())),
        DlqSinkKind::Memory => Arc::new(InMemoryDeadLetterSink::new()),
        DlqSinkKind::Postgres => {
            let pool = pool.ok_or_else(|| EventError::Config {
                var: "DLQ_SINK".to_string(),
                reason: "postgres sink needs DATABASE_URL".to_string(),
            })?;
            Arc::new(PgDeadLetterSink::new(pool.clone()))
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConsumerConfig;
    use event_bus::BusConfig;

    fn config() -> ServiceConfig {
        ServiceConfig {
            service_name: "test-service".to_string(),
            bus: BusConfig::default(),
            consumer: ConsumerConfig::new("test-service"),
            dlq_sink: DlqSinkKind::Memory,
            database_url: None,
        }
    }

    #[tokio::test]
    async fn test_runtime_stops_on_token() {
        let runtime = ServiceRuntime::from_config(config()).await.unwrap();
        let registry = HandlerRegistry::builder(runtime.catalog())
            .on_typed(|_: event_bus::events::UserDeleted, _| async {
                Ok::<(), EventError>(())
            })
            .build()
            .unwrap();
        let consumer = runtime.consumer(registry);
        let token = runtime.shutdown_token();

        let run = tokio::spawn(runtime.run(vec![consumer]));
        token.cancel();

        let result = tokio::time::timeout(std::time::Duration::from_secs(2), run)
            .await
            .expect("runtime did not stop")
            .unwrap();
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_producer_uses_service_name_as_source() {
        let runtime = ServiceRuntime::from_config(config()).await.unwrap();
        assert_eq!(runtime.producer().source(), "test-service");
    }

    #[tokio::test]
    async fn test_postgres_sink_requires_pool() {
        let bus: Arc<dyn EventBus> = Arc::new(event_bus::InMemoryBus::new());
        assert!(build_sink(DlqSinkKind::Postgres, &bus, None).is_err());
    }
}
