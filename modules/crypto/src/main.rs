use crypto_rs::repos::WalletRepo;
use crypto_rs::services::CryptoService;
use crypto_rs::{build_registry, SERVICE_NAME};
use event_bus::EventError;
use event_consumer::ServiceRuntime;
use std::sync::Arc;

#[tokio::main]
async fn main() -> Result<(), EventError> {
    let runtime = ServiceRuntime::bootstrap(SERVICE_NAME).await?;

    let service = Arc::new(CryptoService::new(
        Arc::new(WalletRepo::new()),
        runtime.producer(),
    ));
    let consumer = runtime.consumer(build_registry(runtime.catalog(), service)?);

    runtime.run(vec![consumer]).await
}
