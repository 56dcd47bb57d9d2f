use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use std::hint::black_box;
use serde_json::{json, Map, Value};
use vexis_hub::config::SanitizeConfig;
use vexis_hub::middleware::sanitize::{check_payload_size, find_forbidden, sanitize_value};
use vexis_hub::schema::{Mode, TASK};

fn task_payload(description_len: usize) -> Value {
    json!({
        "title": "  Quarterly review\u{0007}  ",
        "description": "lorem ipsum ".repeat(description_len / 12),
        "status": "in_progress",
        "priority": "high",
        "due_date": "2026-12-01",
        "assignee_ids": [
            "6fa459ea-ee8a-3ca4-894e-db77e160355e",
            "550e8400-e29b-41d4-a716-446655440000"
        ]
    })
}

fn nested_payload(width: usize, depth: usize) -> Value {
    let mut value = json!({ "leaf": "value" });
    for level in 0..depth {
        let mut map = Map::new();
        for i in 0..width {
            map.insert(format!("k{}_{}", level, i), value.clone());
        }
        value = Value::Object(map);
    }
    value
}

/// The full body path of the guard: size check, sanitize, denylist, schema.
fn benchmark_guard_body(c: &mut Criterion) {
    let cfg = SanitizeConfig::default();
    let mut group = c.benchmark_group("guard_body");

    for size in [256usize, 1024, 4096] {
        let payload = task_payload(size);
        group.bench_with_input(BenchmarkId::from_parameter(size), &payload, |b, payload| {
            b.iter(|| {
                let value = payload.clone();
                check_payload_size(&value, cfg.max_payload_kb).unwrap();
                let value = sanitize_value(value, &cfg).unwrap();
                assert!(find_forbidden(&value).is_none());
                if let Value::Object(map) = &value {
                    TASK.validate(map, Mode::Create).unwrap();
                }
                black_box(value)
            })
        });
    }
    group.finish();
}

fn benchmark_nested_sanitize(c: &mut Criterion) {
    let cfg = SanitizeConfig::default();
    let payload = nested_payload(4, 6);

    c.bench_function("sanitize_nested_4x6", |b| b.iter(|| black_box(sanitize_value(payload.clone(), &cfg).unwrap())));
    c.bench_function("denylist_nested_4x6", |b| b.iter(|| black_box(find_forbidden(&payload))));
}

criterion_group!(benches, benchmark_guard_body, benchmark_nested_sanitize);
criterion_main!(benches);
