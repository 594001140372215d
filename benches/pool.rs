//! Benchmarks for respool.
//!
//! Run with: cargo bench

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use respool::{
    BufferDescriptor, BufferUsage, DummyAllocator, Format, ImageDescriptor, ImageUsage,
    MemoryUsage, Pool, PoolConfig,
};

fn upload(size: u64) -> BufferDescriptor {
    BufferDescriptor::new(size, BufferUsage::UNIFORM_BUFFER, MemoryUsage::CpuToGpu)
}

fn bench_allocate_purge(c: &mut Criterion) {
    let mut group = c.benchmark_group("allocate_purge");

    for count in [16usize, 256, 1024] {
        group.throughput(Throughput::Elements(count as u64));
        group.bench_with_input(BenchmarkId::new("buffers", count), &count, |b, &count| {
            let mut pool = Pool::new(DummyAllocator::new());
            b.iter(|| {
                for _ in 0..count {
                    black_box(pool.allocate_buffer(&upload(256)).ok());
                }
                pool.purge();
            })
        });
    }

    group.bench_function("images_64", |b| {
        let mut pool = Pool::new(DummyAllocator::new());
        let desc = ImageDescriptor::new_2d(
            Format::R8G8B8A8_UNORM,
            32,
            32,
            ImageUsage::SAMPLED,
            MemoryUsage::GpuOnly,
        );
        b.iter(|| {
            for _ in 0..64 {
                black_box(pool.allocate_image(&desc).ok());
            }
            pool.purge();
        })
    });

    group.finish();
}

fn bench_reserve_batch(c: &mut Criterion) {
    let mut group = c.benchmark_group("reserve_batch");

    for batch in [1usize, 16, 256] {
        group.bench_with_input(BenchmarkId::from_parameter(batch), &batch, |b, &batch| {
            let config = PoolConfig::default().with_reserve_batch(batch);
            let mut pool = Pool::with_config(DummyAllocator::new(), config);
            b.iter(|| {
                for _ in 0..1024 {
                    black_box(pool.allocate_buffer(&upload(64)).ok());
                }
                pool.purge();
            })
        });
    }

    group.finish();
}

fn bench_map(c: &mut Criterion) {
    let mut group = c.benchmark_group("map");

    for size in [256u64, 64 * 1024] {
        group.throughput(Throughput::Bytes(size));

        let mut pool = Pool::new(DummyAllocator::new());
        let buffer = pool.allocate_buffer(&upload(size)).unwrap();
        group.bench_with_input(BenchmarkId::new("write_fill", size), &size, |b, _| {
            b.iter(|| {
                let mut data = buffer.memory().map_write::<u32>().unwrap();
                data.fill(black_box(7));
            })
        });
        group.bench_with_input(BenchmarkId::new("read_sum", size), &size, |b, _| {
            b.iter(|| {
                let data = buffer.memory().map_read::<u32>().unwrap();
                black_box(data.iter().copied().map(u64::from).sum::<u64>())
            })
        });

        let mut coherent = Pool::new(DummyAllocator::coherent());
        let buffer = coherent.allocate_buffer(&upload(size)).unwrap();
        group.bench_with_input(BenchmarkId::new("write_fill_coherent", size), &size, |b, _| {
            b.iter(|| {
                let mut data = buffer.memory().map_write::<u32>().unwrap();
                data.fill(black_box(7));
            })
        });
    }

    group.finish();
}

criterion_group!(benches, bench_allocate_purge, bench_reserve_batch, bench_map);
criterion_main!(benches);
