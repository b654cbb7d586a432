use event_bus::EventError;
use event_consumer::ServiceRuntime;
use std::sync::Arc;
use users_rs::repos::UserRepo;
use users_rs::services::UserDirectory;
use users_rs::SERVICE_NAME;

#[tokio::main]
async fn main() -> Result<(), EventError> {
    let runtime = ServiceRuntime::bootstrap(SERVICE_NAME).await?;

    let directory = UserDirectory::new(Arc::new(UserRepo::new()), runtime.producer());
    tracing::info!(users = directory.repo().count().await, "User directory ready");

    // Producer only
    runtime.run(Vec::new()).await
}
