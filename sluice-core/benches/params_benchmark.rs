use criterion::{black_box, criterion_group, criterion_main, Criterion};

use sluice_core::params::{convert_named_to_positional, parse_typed_parameters};
use sluice_core::types::EngineKind;

const TEMPLATE: &str = "SELECT a.account_id, a.login_id, a.full_name \
     FROM ${SCHEMA}accounts a \
     JOIN ${SCHEMA}sessions s ON s.account_id = a.account_id \
     WHERE a.login_id = :loginId AND s.expires_at > :cutoff AND a.active = :active";

const PARAMS: &str = r#"{
    "STRING": {"loginId": "alice@example.com"},
    "TIMESTAMP": {"cutoff": "2026-01-01T00:00:00Z"},
    "BOOLEAN": {"active": true}
}"#;

fn bench_parse(c: &mut Criterion) {
    c.bench_function("parse_typed_parameters", |b| {
        b.iter(|| parse_typed_parameters(black_box(PARAMS)).unwrap())
    });
}

fn bench_convert(c: &mut Criterion) {
    let params = parse_typed_parameters(PARAMS).unwrap();
    c.bench_function("convert_named_to_positional/postgres", |b| {
        b.iter(|| {
            convert_named_to_positional(black_box(TEMPLATE), &params, EngineKind::Postgres)
                .unwrap()
        })
    });
}

criterion_group!(benches, bench_parse, bench_convert);
criterion_main!(benches);
