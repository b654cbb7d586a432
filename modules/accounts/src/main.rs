use accounts_rs::repos::AccountRepo;
use accounts_rs::services::AccountService;
use accounts_rs::{build_registry, SERVICE_NAME};
use event_bus::EventError;
use event_consumer::ServiceRuntime;
use std::sync::Arc;

#[tokio::main]
async fn main() -> Result<(), EventError> {
    let runtime = ServiceRuntime::bootstrap(SERVICE_NAME).await?;

    let service = Arc::new(AccountService::new(
        Arc::new(AccountRepo::new()),
        runtime.producer(),
    ));
    let registry = build_registry(runtime.catalog(), service)?;
    tracing::info!(event_types = ?registry.event_types(), "Handlers registered");

    let consumer = runtime.consumer(registry);
    runtime.run(vec![consumer]).await
}
