use event_bus::EventError;
use event_consumer::ServiceRuntime;
use notifications_rs::models::Channel;
use notifications_rs::preferences::PreferenceStore;
use notifications_rs::services::NotificationService;
use notifications_rs::{build_registry, LogChannel, SERVICE_NAME};
use std::sync::Arc;

#[tokio::main]
async fn main() -> Result<(), EventError> {
    let runtime = ServiceRuntime::bootstrap(SERVICE_NAME).await?;

    let max_attempts = runtime.config().consumer.retry.max_attempts;
    let service = [Channel::Email, Channel::Sms, Channel::Push, Channel::InApp]
        .into_iter()
        .fold(
            NotificationService::new(
                runtime.producer(),
                Arc::new(PreferenceStore::new()),
                max_attempts,
            ),
            |service, channel| service.with_channel(Arc::new(LogChannel::new(channel))),
        );

    let registry = build_registry(runtime.catalog(), Arc::new(service))?;
    let consumer = runtime.consumer(registry);

    runtime.run(vec![consumer]).await
}
