//! Benchmarks for aggregation and payload building.
//!
//! Run with: `cargo bench --bench payload`
//!
//! Both stages are pure; these measure the per-message CPU cost for
//! manifestations of increasing size.

use criterion::{
    black_box, criterion_group, criterion_main,
    BenchmarkId, Criterion, Throughput,
};
use serde_json::{json, Value};

use segment_mapping_publisher::{aggregate, build_payload, JobId, SegmentTask, TaskId};
use uuid::Uuid;

/// Tasks with `mappings_per_segment` cross-references each.
fn make_tasks(segment_count: usize, mappings_per_segment: usize) -> Vec<SegmentTask> {
    let job_id = JobId::new(Uuid::from_u128(1));
    (0..segment_count)
        .map(|i| {
            let result: Vec<Value> = (0..mappings_per_segment)
                .map(|j| json!({
                    "manifestation_id": format!("M{j}"),
                    "segments": [format!("S{i}-{j}-a"), format!("S{i}-{j}-b")],
                }))
                .collect();
            SegmentTask::new(
                TaskId::new(Uuid::from_u128(i as u128 + 10)),
                job_id,
                format!("S{i}"),
                Some(Value::Array(result)),
            )
        })
        .collect()
}

fn bench_aggregate(c: &mut Criterion) {
    let mut group = c.benchmark_group("aggregate");

    for segment_count in [10, 100, 1000] {
        let tasks = make_tasks(segment_count, 4);

        group.throughput(Throughput::Elements(segment_count as u64));
        group.bench_with_input(
            BenchmarkId::new("segments", segment_count),
            &tasks,
            |b, tasks| b.iter(|| aggregate(black_box("ROOT"), black_box(tasks)).unwrap()),
        );
    }

    group.finish();
}

fn bench_build_and_serialize(c: &mut Criterion) {
    let mut group = c.benchmark_group("build_payload");

    for segment_count in [10, 100, 1000] {
        let graph = aggregate("ROOT", &make_tasks(segment_count, 4)).unwrap();

        group.throughput(Throughput::Elements(segment_count as u64));
        group.bench_with_input(
            BenchmarkId::new("segments", segment_count),
            &graph,
            |b, graph| {
                b.iter(|| {
                    let payload = build_payload(black_box(graph));
                    serde_json::to_vec(&payload).unwrap()
                })
            },
        );
    }

    group.finish();
}

criterion_group!(benches, bench_aggregate, bench_build_and_serialize);
criterion_main!(benches);
