use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};
use serde_json::json;

use jobrelay_channel::InMemoryChannel;
use jobrelay_core::{FnCompute, JobArgs, JobRecord, Outcome};
use jobrelay_infra::{InMemoryJobRecordStore, JobCoordinator, JobRecordStore, WorkerPool, WorkerPoolConfig};

type Store = Arc<InMemoryJobRecordStore>;
type Channel = Arc<InMemoryChannel>;

fn args(i: usize) -> JobArgs {
    JobArgs::new()
        .with("item_a", format!("Bread {i}"))
        .with("item_b", "Acme")
}

fn setup() -> (JobCoordinator<Store, Channel>, WorkerPool<Store, Channel>) {
    let store = InMemoryJobRecordStore::arc();
    let channel = Arc::new(InMemoryChannel::new());
    let compute = FnCompute::new(|args: &JobArgs| Ok(json!({ "len": args.len() })));

    (
        JobCoordinator::new(store.clone(), channel.clone()),
        WorkerPool::new(store, channel, Arc::new(compute)),
    )
}

/// Submit latency: record write + enqueue.
fn bench_submit(c: &mut Criterion) {
    let mut group = c.benchmark_group("submit");
    group.throughput(Throughput::Elements(1));

    group.bench_function("in_memory", |b| {
        let (coordinator, _pool) = setup();
        let mut i = 0;
        b.iter(|| {
            i += 1;
            black_box(coordinator.submit(args(i)).unwrap());
        });
    });

    group.finish();
}

/// Submit then drain a batch through one worker, inline (no threads).
fn bench_submit_and_process(c: &mut Criterion) {
    let mut group = c.benchmark_group("submit_and_process");
    let config = WorkerPoolConfig::default()
        .with_dequeue_wait(Duration::ZERO)
        .with_compute_timeout(None);

    for batch_size in [1usize, 10, 100] {
        group.throughput(Throughput::Elements(batch_size as u64));
        group.bench_with_input(BenchmarkId::new("batch", batch_size), &batch_size, |b, &size| {
            let (coordinator, pool) = setup();
            b.iter(|| {
                for i in 0..size {
                    coordinator.submit(args(i)).unwrap();
                }
                while let Some(processed) = pool.process_next("bench-0", &config).unwrap() {
                    black_box(processed);
                }
            });
        });
    }

    group.finish();
}

/// Cost of the claim/complete pair against the store alone.
fn bench_claim_complete(c: &mut Criterion) {
    let mut group = c.benchmark_group("claim_complete");

    group.bench_function("in_memory_store", |b| {
        let store = InMemoryJobRecordStore::new();
        b.iter(|| {
            let record = JobRecord::new(args(0));
            let id = record.id;
            store.put(record).unwrap();
            store
                .update(id, &mut |r: &mut JobRecord| {
                    r.claim("bench-0", Utc::now(), Duration::from_secs(600));
                    Ok(())
                })
                .unwrap();
            black_box(
                store
                    .update(id, &mut |r: &mut JobRecord| {
                        r.complete(1, Outcome::success(json!(1)), Utc::now())
                    })
                    .unwrap(),
            );
        });
    });

    group.finish();
}

criterion_group!(benches, bench_submit, bench_submit_and_process, bench_claim_complete);
criterion_main!(benches);
