//! Criterion benchmarks for the end-to-end probe against file-backed devices
//! of varying size.
//!
//! Run with:
//!   cargo bench --bench probe

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use tempfile::tempdir;

use f3::device::file_emulator::FileDevice;

fn bench_probe_good_drive(c: &mut Criterion) {
    let mut group = c.benchmark_group("probe_good_drive");
    group.sample_size(10);

    for &order in &[20u32, 24] {
        let size = 1u64 << order;
        group.bench_with_input(BenchmarkId::new("probe_device", order), &size, |b, &size| {
            b.iter_batched(
                || {
                    let dir = tempdir().unwrap();
                    let path = dir.path().join("bench.img");
                    let dev = FileDevice::create(path, size, size, 63, 12, None, false, false).unwrap();
                    (dir, dev)
                },
                |(_dir, mut dev)| {
                    f3::probe_device(&mut dev).unwrap();
                },
                criterion::BatchSize::SmallInput,
            )
        });
    }

    group.finish();
}

criterion_group!(benches, bench_probe_good_drive);
criterion_main!(benches);
