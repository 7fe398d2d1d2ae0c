use criterion::{black_box, criterion_group, criterion_main, Criterion};
use pregel_checkpoint::{
    BaseChannel, Channel, Checkpoint, CheckpointConfig, CheckpointMetadata, CheckpointSaver,
    CheckpointSource, InMemoryCheckpointSaver,
};
use serde_json::json;
use std::collections::HashMap;

fn populated_checkpoint(channels: usize) -> Checkpoint {
    let mut checkpoint = Checkpoint::empty();
    for i in 0..channels {
        let mut channel = Channel::last_value();
        channel.update(vec![json!({"index": i, "payload": "x".repeat(64)})]).unwrap();
        if let Some(blob) = channel.checkpoint() {
            checkpoint.channel_values.insert(format!("channel_{}", i), blob);
        }
    }
    checkpoint
}

fn checkpoint_save_benchmark(c: &mut Criterion) {
    let runtime = tokio::runtime::Runtime::new().unwrap();
    let saver = InMemoryCheckpointSaver::new();
    let config = CheckpointConfig::new().with_thread_id("bench-thread");
    let base = populated_checkpoint(32);

    c.bench_function("checkpoint save (32 channels)", |b| {
        b.to_async(&runtime).iter(|| async {
            let checkpoint = base.successor(0, CheckpointSource::Loop);
            saver
                .put(&config, black_box(checkpoint), CheckpointMetadata::new(), HashMap::new())
                .await
                .unwrap();
        });
    });
}

fn checkpoint_load_benchmark(c: &mut Criterion) {
    let runtime = tokio::runtime::Runtime::new().unwrap();
    let saver = InMemoryCheckpointSaver::new();
    let config = CheckpointConfig::new().with_thread_id("bench-thread");
    let saved = runtime
        .block_on(saver.put(&config, populated_checkpoint(32), CheckpointMetadata::new(), HashMap::new()))
        .unwrap();

    c.bench_function("checkpoint load (32 channels)", |b| {
        b.to_async(&runtime).iter(|| async {
            saver.get_tuple(black_box(&saved)).await.unwrap();
        });
    });
}

fn channel_restore_benchmark(c: &mut Criterion) {
    let declared = Channel::named_barrier((0..16).map(|i| format!("producer_{}", i)));
    let mut filled = declared.clone();
    filled
        .update((0..16).map(|i| json!(format!("producer_{}", i))).collect())
        .unwrap();
    let blob = filled.checkpoint();

    c.bench_function("barrier restore", |b| {
        b.iter(|| declared.from_checkpoint(black_box(blob.clone())).unwrap());
    });
}

criterion_group!(
    benches,
    checkpoint_save_benchmark,
    checkpoint_load_benchmark,
    channel_restore_benchmark
);
criterion_main!(benches);
