use audit_rs::repos::AuditLog;
use audit_rs::{build_registry, SERVICE_NAME};
use event_bus::EventError;
use event_consumer::ServiceRuntime;
use std::sync::Arc;

#[tokio::main]
async fn main() -> Result<(), EventError> {
    let runtime = ServiceRuntime::bootstrap(SERVICE_NAME).await?;

    let log = Arc::new(AuditLog::new());
    let registry = build_registry(runtime.catalog(), log.clone())?;
    tracing::info!(topics = ?registry.topics(), "Auditing topics");
    let consumer = runtime.consumer(registry);

    runtime.run(vec![consumer]).await?;
    tracing::info!(entries = log.len().await, "Audit trail closed");
    Ok(())
}
