use event_bus::EventError;
use event_consumer::ServiceRuntime;
use payments_rs::repos::PaymentRepo;
use payments_rs::services::PaymentService;
use payments_rs::SERVICE_NAME;
use std::sync::Arc;

#[tokio::main]
async fn main() -> Result<(), EventError> {
    let runtime = ServiceRuntime::bootstrap(SERVICE_NAME).await?;

    let payments = PaymentService::new(Arc::new(PaymentRepo::new()), runtime.producer());
    tracing::info!(payments = payments.repo().count().await, "Payment service ready");

    // Producer only
    runtime.run(Vec::new()).await
}
