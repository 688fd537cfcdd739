use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};
use replicast_core::{QueueConfig, ReplicationQueue};
use tokio::runtime::Runtime;
use tokio::sync::mpsc;

fn bench_push(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();

    let mut group = c.benchmark_group("queue_push");

    for size in [100, 1000, 10_000] {
        group.throughput(Throughput::Elements(size as u64));

        group.bench_with_input(BenchmarkId::new("push", size), &size, |b, &size| {
            b.to_async(&rt).iter(|| async move {
                let queue = ReplicationQueue::new(QueueConfig::default());

                for i in 0..size {
                    queue.push(black_box(vec![i as u8; 64]));
                }

                // Round-trip so every push has been processed
                black_box(queue.dumpq().await.unwrap().len());
                queue.shutdown().await;
            });
        });
    }

    group.finish();
}

fn bench_pull_drain(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();

    let mut group = c.benchmark_group("queue_pull");

    for size in [100, 1000] {
        group.throughput(Throughput::Elements(size as u64));

        group.bench_with_input(BenchmarkId::new("pull_ack", size), &size, |b, &size| {
            b.to_async(&rt).iter(|| async move {
                let queue = ReplicationQueue::new(QueueConfig::default());
                queue.register("bench").await.unwrap();

                for i in 0..size {
                    queue.push(vec![i as u8; 64]);
                }

                let (tx, mut rx) = mpsc::unbounded_channel();
                for _ in 0..size {
                    let tx = tx.clone();
                    queue.pull("bench", move |delivery| {
                        tx.send(delivery).unwrap();
                        Ok(())
                    });
                    black_box(rx.recv().await.unwrap().unwrap().seq);
                }

                queue.ack("bench", size as u64);
                assert!(queue.dumpq().await.unwrap().is_empty());
                queue.shutdown().await;
            });
        });
    }

    group.finish();
}

criterion_group!(benches, bench_push, bench_pull_drain);
criterion_main!(benches);
