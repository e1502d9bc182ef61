//! Saver and channel throughput benchmarks.

use criterion::{criterion_group, criterion_main, BatchSize, Criterion};
use serde_json::json;
use stategraph_checkpoint::{
    BinaryOperatorChannel, Channel, Checkpoint, CheckpointConfig, CheckpointMetadata,
    CheckpointSaver, LastValueChannel, MemorySaver, TopicChannel,
};
use std::collections::HashMap;

fn channel_updates(c: &mut Criterion) {
    c.bench_function("last_value_update", |b| {
        b.iter_batched(
            || LastValueChannel::new("bench"),
            |mut channel| {
                for i in 0..100 {
                    channel.update(vec![json!(i)]).unwrap();
                }
                channel
            },
            BatchSize::SmallInput,
        )
    });

    c.bench_function("topic_accumulate_1k", |b| {
        b.iter_batched(
            || TopicChannel::new("bench"),
            |mut channel| {
                for i in 0..1_000 {
                    channel.update(vec![json!(i)]).unwrap();
                }
                channel
            },
            BatchSize::SmallInput,
        )
    });

    c.bench_function("binary_operator_sum_1k", |b| {
        b.iter_batched(
            || BinaryOperatorChannel::sum("bench"),
            |mut channel| {
                channel
                    .update((0..1_000).map(|i| json!(i as f64)).collect())
                    .unwrap();
                channel
            },
            BatchSize::SmallInput,
        )
    });
}

fn saver_roundtrip(c: &mut Criterion) {
    let runtime = tokio::runtime::Runtime::new().unwrap();

    c.bench_function("memory_saver_put_get", |b| {
        b.to_async(&runtime).iter(|| async {
            let saver = MemorySaver::new();
            let config = CheckpointConfig::for_thread("bench");
            let mut checkpoint = Checkpoint::empty();
            checkpoint
                .channel_values
                .insert("state".into(), json!({"n": 42, "items": [1, 2, 3]}));
            let stored = saver
                .put(&config, checkpoint, CheckpointMetadata::new(), HashMap::new())
                .await
                .unwrap();
            saver.get_tuple(&stored).await.unwrap().unwrap()
        })
    });

    c.bench_function("memory_saver_history_50", |b| {
        b.to_async(&runtime).iter(|| async {
            let saver = MemorySaver::new();
            let mut config = CheckpointConfig::for_thread("bench");
            for step in 0..50 {
                config = saver
                    .put(
                        &config,
                        Checkpoint::empty(),
                        CheckpointMetadata::new().with_step(step),
                        HashMap::new(),
                    )
                    .await
                    .unwrap();
            }
            saver
                .list(&config, Default::default())
                .await
                .unwrap()
                .len()
        })
    });
}

criterion_group!(benches, channel_updates, saver_roundtrip);
criterion_main!(benches);
