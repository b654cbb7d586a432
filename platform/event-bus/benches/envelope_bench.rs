//! Envelope encode/decode and catalog validation throughput.

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use event_bus::events::TransactionCompleted;
use event_bus::{partition_for, EventCatalog, EventEnvelope};
use rust_decimal::Decimal;

fn transaction() -> TransactionCompleted {
    TransactionCompleted {
        transaction_id: "T-000001".to_string(),
        user_id: 7,
        from_account_id: Some(42),
        to_account_id: Some(43),
        from_account_number: Some("ACC-42".to_string()),
        to_account_number: Some("ACC-43".to_string()),
        amount: Decimal::new(125_050, 2),
        currency: "EUR".to_string(),
        transaction_type: "TRANSFER".to_string(),
        status: "COMPLETED".to_string(),
        description: Some("rent".to_string()),
    }
}

fn bench_encode(c: &mut Criterion) {
    let envelope = EventEnvelope::from_event("payment-service", &transaction())
        .expect("envelope");

    c.bench_function("envelope_to_bytes", |b| {
        b.iter(|| black_box(&envelope).to_bytes())
    });
}

fn bench_decode(c: &mut Criterion) {
    let bytes = EventEnvelope::from_event("payment-service", &transaction())
        .and_then(|e| e.to_bytes())
        .expect("encoded envelope");

    c.bench_function("envelope_from_bytes", |b| {
        b.iter(|| EventEnvelope::from_bytes(black_box(&bytes)))
    });
}

fn bench_validate(c: &mut Criterion) {
    let catalog = EventCatalog::banking().expect("catalog");
    let envelope = EventEnvelope::from_event("payment-service", &transaction())
        .expect("envelope");

    c.bench_function("catalog_validate_payload", |b| {
        b.iter(|| catalog.validate_payload(black_box("TransactionCompleted"), &envelope.payload))
    });
}

fn bench_partitioning(c: &mut Criterion) {
    c.bench_function("partition_for", |b| {
        b.iter(|| partition_for(black_box("T-000001"), 8))
    });
}

criterion_group!(benches, bench_encode, bench_decode, bench_validate, bench_partitioning);
criterion_main!(benches);
