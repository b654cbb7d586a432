use analytics_rs::metrics::Metrics;
use analytics_rs::services::AnalyticsService;
use analytics_rs::{build_registry, AnalyticsConfig, SERVICE_NAME};
use event_bus::EventError;
use event_consumer::ServiceRuntime;
use std::sync::Arc;

#[tokio::main]
async fn main() -> Result<(), EventError> {
    let runtime = ServiceRuntime::bootstrap(SERVICE_NAME).await?;

    let config = AnalyticsConfig::from_env()?;
    tracing::info!(high_spend_threshold = %config.high_spend_threshold, "Analytics configuration loaded");

    let service = Arc::new(AnalyticsService::new(
        Arc::new(Metrics::new()),
        runtime.producer(),
        config,
    ));
    let consumer = runtime.consumer(build_registry(runtime.catalog(), service)?);

    runtime.run(vec![consumer]).await
}
