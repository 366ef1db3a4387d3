//! Interpreter benchmarks.

use arbor_core::{Chart, Interpreter};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use serde_json::{json, Value};
use std::sync::Arc;

fn toggle_def() -> Value {
    json!({
        "id": "toggle",
        "initial": "off",
        "context": {"flips": 0},
        "states": {
            "off": {"on": {"FLIP": {"target": "on", "actions": [
                {"type": "assign", "key": "flips", "value": {"expr": "ctx.flips + 1"}}
            ]}}},
            "on": {"on": {"FLIP": {"target": "off", "guard": "ctx.flips >= 0"}}}
        }
    })
}

/// A chain of `depth` nested composites with two leaves at the bottom.
fn nested_def(depth: usize) -> Value {
    let mut node = json!({
        "initial": "left",
        "states": {
            "left": {"on": {"SWAP": "right"}},
            "right": {"on": {"SWAP": "left"}}
        }
    });
    for level in (0..depth).rev() {
        node = json!({
            "initial": format!("level_{}", level),
            "states": {format!("level_{}", level): node},
            "on": {format!("RESET_{}", level): format!("level_{}", level)}
        });
    }
    node["id"] = json!("nested");
    node
}

/// `steps` states linked by raised events, so one dispatch walks the chain.
fn raise_chain_def(steps: usize) -> Value {
    let mut states = serde_json::Map::new();
    for i in 0..steps {
        let next = (i + 1) % steps;
        states.insert(
            format!("s{}", i),
            json!({
                "entry": [{"type": "raise", "event": format!("TO_{}", next)}],
                "on": {format!("TO_{}", next): format!("s{}", next)}
            }),
        );
    }
    states.insert("idle".to_string(), json!({"on": {"GO": "s0"}}));
    json!({"id": "chain", "initial": "idle", "states": states})
}

fn bench_build_chart(c: &mut Criterion) {
    let mut group = c.benchmark_group("chart_build");

    let toggle = toggle_def();
    group.bench_function("toggle", |b| {
        b.iter(|| black_box(Chart::from_json(&toggle).unwrap()))
    });

    for depth in [4usize, 16, 64] {
        let def = nested_def(depth);
        group.bench_with_input(BenchmarkId::new("nested", depth), &def, |b, def| {
            b.iter(|| black_box(Chart::from_json(def).unwrap()))
        });
    }

    group.finish();
}

fn bench_dispatch(c: &mut Criterion) {
    let mut group = c.benchmark_group("dispatch");
    group.throughput(Throughput::Elements(1));

    let chart = Arc::new(Chart::from_json(&toggle_def()).unwrap());
    let mut interpreter = Interpreter::new(chart, Value::Null).unwrap();
    interpreter.start().unwrap();
    group.bench_function("toggle", |b| {
        b.iter(|| black_box(interpreter.dispatch("FLIP").unwrap()))
    });

    for depth in [4usize, 16, 64] {
        let chart = Arc::new(Chart::from_json(&nested_def(depth)).unwrap());
        let mut interpreter = Interpreter::new(chart, Value::Null).unwrap();
        interpreter.start().unwrap();
        group.bench_function(BenchmarkId::new("nested_leaf", depth), |b| {
            b.iter(|| black_box(interpreter.dispatch("SWAP").unwrap()))
        });
        group.bench_function(BenchmarkId::new("nested_reset_root", depth), |b| {
            b.iter(|| black_box(interpreter.dispatch("RESET_0").unwrap()))
        });
    }

    group.bench_function("unhandled", |b| {
        let chart = Arc::new(Chart::from_json(&toggle_def()).unwrap());
        let mut interpreter = Interpreter::new(chart, Value::Null).unwrap();
        interpreter.start().unwrap();
        b.iter(|| black_box(interpreter.dispatch("NOTHING").unwrap()))
    });

    group.finish();
}

fn bench_raise_chain(c: &mut Criterion) {
    let mut group = c.benchmark_group("raise_chain");

    for steps in [10usize, 100] {
        let chart = Arc::new(Chart::from_json(&raise_chain_def(steps)).unwrap());
        group.throughput(Throughput::Elements(steps as u64));
        group.bench_function(BenchmarkId::new("steps", steps), |b| {
            b.iter_batched(
                || {
                    let mut interpreter = Interpreter::new(chart.clone(), Value::Null)
                        .unwrap()
                        .with_settings(arbor_core::InterpreterSettings {
                            max_microsteps: steps,
                            ..Default::default()
                        });
                    interpreter.start().unwrap();
                    interpreter
                },
                // The chain never settles, so every run ends at the microstep limit.
                |mut interpreter| black_box(interpreter.dispatch("GO").is_err()),
                criterion::BatchSize::SmallInput,
            )
        });
    }

    group.finish();
}

criterion_group!(benches, bench_build_chart, bench_dispatch, bench_raise_chain);
criterion_main!(benches);
