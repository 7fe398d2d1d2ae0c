use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use pregel_core::{
    Channel, CompiledGraph, Durability, GraphBuilder, InMemoryCheckpointSaver, NodeSpec,
    RunConfig, Runtime, START,
};
use serde_json::{json, Value};
use std::sync::Arc;

/// `width` parallel nodes fanning into one topic, then a reducer node
fn fan_out(width: usize) -> CompiledGraph {
    let mut builder = GraphBuilder::new();
    builder
        .add_channel("parts", Channel::topic())
        .add_channel("total", Channel::last_value())
        .set_output("total");
    for i in 0..width {
        builder.add_node(
            NodeSpec::new(format!("worker_{}", i), move |input: Value, _rt: Runtime| async move {
                Ok(json!(input.as_i64().unwrap_or(0) + i as i64))
            })
            .triggered_by([START])
            .writes_to("parts"),
        );
    }
    builder.add_node(
        NodeSpec::new("sum", |input: Value, _rt: Runtime| async move {
            let total: i64 = input
                .as_array()
                .map(|parts| parts.iter().filter_map(Value::as_i64).sum())
                .unwrap_or(0);
            Ok(json!(total))
        })
        .triggered_by(["parts"])
        .writes_to("total"),
    );
    builder.compile().unwrap()
}

/// A node that re-triggers itself `steps` times
fn chain(steps: i64) -> CompiledGraph {
    let mut builder = GraphBuilder::new();
    builder
        .add_channel("n", Channel::last_value())
        .set_input("n")
        .add_node(
            NodeSpec::new("step", move |input: Value, _rt: Runtime| async move {
                let n = input.as_i64().unwrap_or(0);
                Ok(if n < steps { json!(n + 1) } else { Value::Null })
            })
            .triggered_by(["n"])
            .writes_to("n"),
        );
    builder.compile().unwrap()
}

fn fan_out_benchmark(c: &mut Criterion) {
    let runtime = tokio::runtime::Runtime::new().unwrap();
    let mut group = c.benchmark_group("fan_out");
    for width in [4, 16, 64] {
        let graph = fan_out(width);
        group.bench_with_input(BenchmarkId::from_parameter(width), &width, |b, _| {
            b.to_async(&runtime).iter(|| async {
                graph.invoke(black_box(json!(1)), RunConfig::new()).await.unwrap()
            });
        });
    }
    group.finish();
}

fn checkpointed_chain_benchmark(c: &mut Criterion) {
    let runtime = tokio::runtime::Runtime::new().unwrap();
    let graph = chain(20);
    let mut group = c.benchmark_group("chain_20_steps");
    for durability in [Durability::Sync, Durability::Async, Durability::Exit] {
        group.bench_function(format!("{:?}", durability), |b| {
            b.to_async(&runtime).iter(|| async {
                let config = RunConfig::thread("bench")
                    .with_checkpointer(Arc::new(InMemoryCheckpointSaver::new()))
                    .with_durability(durability);
                graph.invoke(json!(0), config).await.unwrap()
            });
        });
    }
    group.finish();
}

criterion_group!(benches, fan_out_benchmark, checkpointed_chain_benchmark);
criterion_main!(benches);
