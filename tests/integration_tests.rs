//! Integration tests for respool.

use respool::{
    AccessFlags, BufferDescriptor, BufferUsage, DummyAllocator, Format, ImageDescriptor,
    ImageUsage, MemoryUsage, Pool, PoolConfig, ResourceError,
};
use std::sync::Mutex;
use std::thread;

fn upload(size: u64) -> BufferDescriptor {
    BufferDescriptor::new(size, BufferUsage::UNIFORM_BUFFER, MemoryUsage::CpuToGpu)
}

fn readback(size: u64) -> BufferDescriptor {
    BufferDescriptor::new(size, BufferUsage::TRANSFER_DST, MemoryUsage::GpuToCpu)
}

fn texture(width: u32, height: u32) -> ImageDescriptor {
    ImageDescriptor::new_2d(
        Format::R8G8B8A8_UNORM,
        width,
        height,
        ImageUsage::SAMPLED | ImageUsage::TRANSFER_DST,
        MemoryUsage::GpuOnly,
    )
}

#[test]
fn test_allocate_buffer_is_valid() {
    let mut pool = Pool::new(DummyAllocator::new());

    for size in [1, 100, 4096, 65_537] {
        let buffer = pool.allocate_buffer(&upload(size)).unwrap();
        assert!(buffer.is_valid());
        assert!(buffer.is_alive());
        assert!(buffer.memory().size() >= size);
        assert_eq!(buffer.descriptor().size, size);
    }
    assert_eq!(pool.buffer_count(), 4);
}

#[test]
fn test_allocate_image_is_valid() {
    let mut pool = Pool::new(DummyAllocator::new());

    let image = pool.allocate_image(&texture(64, 32)).unwrap();
    assert!(image.is_valid());
    assert!(!image.view().is_null());
    assert!(image.memory().size() >= 64 * 32 * 4);
    assert_eq!(pool.image_count(), 1);
}

#[test]
fn test_write_then_read_non_coherent() {
    let allocator = DummyAllocator::new();
    let probe = allocator.probe();
    let mut pool = Pool::new(allocator);
    let buffer = pool.allocate_buffer(&upload(64)).unwrap();
    assert!(!buffer.memory().info().host_coherent);

    {
        let mut data = buffer.memory().map_write::<u32>().unwrap();
        assert_eq!(data.len(), 16);
        for (i, v) in data.iter_mut().enumerate() {
            *v = i as u32 * 3;
        }
    }
    assert_eq!(probe.flush_calls(), 1);
    assert_eq!(probe.unmap_calls(), 1);

    // The flush reached the device side.
    let device = probe.device_bytes(buffer.memory().allocation()).unwrap();
    assert_eq!(&device[4..8], &3u32.to_ne_bytes());

    let data = buffer.memory().map_read::<u32>().unwrap();
    assert!(data.iter().enumerate().all(|(i, &v)| v == i as u32 * 3));
}

#[test]
fn test_read_map_sees_device_writes() {
    let allocator = DummyAllocator::new();
    let probe = allocator.probe();
    let mut pool = Pool::new(allocator);
    let buffer = pool.allocate_buffer(&readback(16)).unwrap();

    let allocation = buffer.memory().allocation();
    assert!(probe.write_device(allocation, 0, &[1, 2, 3, 4]));

    let data = buffer.memory().map_read::<u8>().unwrap();
    assert_eq!(&data[..4], &[1, 2, 3, 4]);
    assert_eq!(probe.invalidate_calls(), 1);
}

#[test]
fn test_read_map_does_not_mutate_device() {
    let allocator = DummyAllocator::new();
    let probe = allocator.probe();
    let mut pool = Pool::new(allocator);
    let buffer = pool.allocate_buffer(&readback(32)).unwrap();
    let allocation = buffer.memory().allocation();

    probe.write_device(allocation, 0, &[0x5A; 32]);
    let before = probe.device_bytes(allocation).unwrap();
    {
        let data = buffer.memory().map_read::<u8>().unwrap();
        assert_eq!(data.len(), 32);
    }
    assert_eq!(probe.device_bytes(allocation).unwrap(), before);
    assert_eq!(probe.flush_calls(), 0);
    assert_eq!(probe.unmap_calls(), 1);
}

#[test]
fn test_read_write_invalidates_and_flushes() {
    let allocator = DummyAllocator::new();
    let probe = allocator.probe();
    let mut pool = Pool::new(allocator);
    let buffer = pool.allocate_buffer(&upload(16)).unwrap();
    probe.write_device(buffer.memory().allocation(), 0, &7u32.to_ne_bytes());

    {
        let mut data = buffer.memory().map_read_write::<u32>().unwrap();
        assert_eq!(data[0], 7);
        data[0] += 1;
    }
    assert_eq!(probe.invalidate_calls(), 1);
    assert_eq!(probe.flush_calls(), 1);

    let device = probe.device_bytes(buffer.memory().allocation()).unwrap();
    assert_eq!(&device[..4], &8u32.to_ne_bytes());
}

#[test]
fn test_coherent_mapping_writes_through() {
    let allocator = DummyAllocator::coherent();
    let probe = allocator.probe();
    let mut pool = Pool::new(allocator);
    let buffer = pool.allocate_buffer(&upload(16)).unwrap();
    assert!(buffer.memory().info().host_coherent);

    {
        let mut data = buffer.memory().map_write::<u8>().unwrap();
        data.fill(9);
    }
    // Flush is still issued; the backend decides it is a no-op.
    assert_eq!(probe.flush_calls(), 1);
    assert_eq!(
        probe.device_bytes(buffer.memory().allocation()).unwrap(),
        vec![9u8; 16]
    );
}

#[test]
fn test_runtime_access_flags() {
    let allocator = DummyAllocator::new();
    let probe = allocator.probe();
    let mut pool = Pool::new(allocator);
    let buffer = pool.allocate_buffer(&upload(8)).unwrap();

    {
        let mut bytes = buffer.memory().map_bytes(AccessFlags::WRITE).unwrap();
        assert_eq!(bytes.access(), AccessFlags::WRITE);
        bytes.as_bytes_mut().unwrap().copy_from_slice(&[1, 2, 3, 4, 5, 6, 7, 8]);
    }
    {
        let mut bytes = buffer.memory().map_bytes(AccessFlags::READ).unwrap();
        assert!(bytes.as_bytes_mut().is_none());
        assert_eq!(&bytes.as_bytes()[..8], &[1, 2, 3, 4, 5, 6, 7, 8]);
    }
    assert_eq!(probe.map_calls(), 2);
}

#[test]
fn test_invalid_access_flags_rejected_before_allocator() {
    let allocator = DummyAllocator::new();
    let probe = allocator.probe();
    let mut pool = Pool::new(allocator);
    let buffer = pool.allocate_buffer(&upload(8)).unwrap();

    for bits in [0u8, 4, 5, 0xFF] {
        let flags = AccessFlags::from_bits_retain(bits);
        assert_eq!(
            buffer.memory().map_bytes(flags).err(),
            Some(ResourceError::InvalidAccessFlags(bits))
        );
    }
    assert_eq!(probe.total_calls(), 0);
    assert!(!buffer.memory().is_mapped());
}

#[test]
fn test_already_mapped() {
    let mut pool = Pool::new(DummyAllocator::new());
    let buffer = pool.allocate_buffer(&upload(16)).unwrap();

    let guard = buffer.memory().map_read::<u8>().unwrap();
    assert!(buffer.memory().is_mapped());
    assert_eq!(
        buffer.memory().map_write::<u8>().err(),
        Some(ResourceError::AlreadyMapped)
    );
    drop(guard);

    assert!(!buffer.memory().is_mapped());
    assert!(buffer.memory().map_write::<u8>().is_ok());
}

#[test]
fn test_device_local_not_host_visible() {
    let allocator = DummyAllocator::new();
    let probe = allocator.probe();
    let mut pool = Pool::new(allocator);
    let buffer = pool.allocate_buffer(&BufferDescriptor::storage(64)).unwrap();

    assert_eq!(
        buffer.memory().map_read::<u32>().err(),
        Some(ResourceError::NotHostVisible)
    );
    assert_eq!(probe.map_calls(), 0);
}

#[test]
fn test_host_visible_image_mapping() {
    let mut pool = Pool::new(DummyAllocator::new());
    let mut desc = texture(4, 4);
    desc.memory = MemoryUsage::CpuToGpu;
    let image = pool.allocate_image(&desc).unwrap();

    {
        let mut texels = image.memory().map_write::<[u8; 4]>().unwrap();
        assert_eq!(texels.len(), 16);
        texels.fill([255, 0, 0, 255]);
    }
    let texels = image.memory().map_read::<[u8; 4]>().unwrap();
    assert!(texels.iter().all(|t| *t == [255, 0, 0, 255]));
}

#[test]
fn test_purge_empties_pool_and_reissues() {
    let allocator = DummyAllocator::new();
    let probe = allocator.probe();
    let mut pool = Pool::new(allocator);

    let old_buffer = pool.allocate_buffer(&upload(128)).unwrap();
    let old_image = pool.allocate_image(&texture(8, 8)).unwrap();
    assert_eq!(probe.live_allocations(), 2);

    pool.purge();
    assert!(pool.is_empty());
    assert_eq!(pool.buffer_count(), 0);
    assert_eq!(pool.image_count(), 0);
    assert_eq!(probe.live_allocations(), 0);
    assert_eq!(probe.live_views(), 0);
    assert!(!old_buffer.is_alive());
    assert!(!old_image.is_alive());
    assert_eq!(pool.stats().purge_count, 1);

    let new_buffer = pool.allocate_buffer(&upload(128)).unwrap();
    assert!(new_buffer.is_alive());
    assert_ne!(new_buffer.handle(), old_buffer.handle());
    assert_ne!(
        new_buffer.memory().allocation(),
        old_buffer.memory().allocation()
    );
    assert!(pool.owns_buffer(&new_buffer));
    assert!(!pool.owns_buffer(&old_buffer));
}

#[test]
fn test_use_after_purge_reported() {
    let allocator = DummyAllocator::new();
    let probe = allocator.probe();
    let mut pool = Pool::new(allocator);
    let buffer = pool.allocate_buffer(&upload(16)).unwrap();

    pool.purge();
    assert_eq!(
        buffer.memory().map_write::<u8>().err(),
        Some(ResourceError::UseAfterPurge)
    );
    // Same epoch check after the pool is gone.
    drop(pool);
    assert_eq!(
        buffer.memory().map_read::<u8>().err(),
        Some(ResourceError::UseAfterPurge)
    );
    assert_eq!(probe.map_calls(), 0);
}

#[test]
fn test_purge_while_mapped_defers_release() {
    respool::suppress_diagnostics(true);

    let allocator = DummyAllocator::new();
    let probe = allocator.probe();
    let mut pool = Pool::new(allocator);
    let buffer = pool.allocate_buffer(&upload(16)).unwrap();
    let allocation = buffer.memory().allocation();

    let mut guard = buffer.memory().map_write::<u8>().unwrap();
    pool.purge();
    assert!(pool.is_empty());
    assert!(!buffer.is_alive());
    // Still backed while the guard lives.
    assert!(probe.contains(allocation));
    guard.fill(1);

    drop(guard);
    assert!(!probe.contains(allocation));
    assert_eq!(probe.buffers_destroyed(), 1);
    assert_eq!(probe.unmap_calls(), 1);
}

#[test]
fn test_pool_drop_while_mapped() {
    respool::suppress_diagnostics(true);

    let allocator = DummyAllocator::new();
    let probe = allocator.probe();
    let mut pool = Pool::new(allocator);
    let buffer = pool.allocate_buffer(&upload(16)).unwrap();

    let guard = buffer.memory().map_read::<u8>().unwrap();
    drop(pool);
    assert_eq!(probe.live_allocations(), 1);

    drop(guard);
    assert_eq!(probe.live_allocations(), 0);
}

#[test]
fn test_flush_failure_still_unmaps() {
    respool::suppress_diagnostics(true);

    let allocator = DummyAllocator::new();
    let probe = allocator.probe();
    let mut pool = Pool::new(allocator);
    let buffer = pool.allocate_buffer(&upload(16)).unwrap();
    let allocation = buffer.memory().allocation();

    {
        let mut data = buffer.memory().map_write::<u8>().unwrap();
        data.fill(0xEE);
        probe.fail_next_flush();
    }
    assert_eq!(probe.flush_calls(), 1);
    assert_eq!(probe.unmap_calls(), 1);
    assert!(!probe.is_mapped(allocation));
    assert!(!buffer.memory().is_mapped());
    // Nothing reached the device.
    assert_eq!(probe.device_bytes(allocation).unwrap(), vec![0u8; 16]);
}

#[test]
fn test_view_failure_leaks_nothing() {
    respool::suppress_diagnostics(true);

    let allocator = DummyAllocator::new();
    let probe = allocator.probe();
    let mut pool = Pool::new(allocator);

    probe.fail_next_view();
    let err = pool.allocate_image(&texture(16, 16)).unwrap_err();
    assert!(matches!(err, ResourceError::BackendError(_)));
    assert!(pool.is_empty());
    assert_eq!(probe.images_created(), 1);
    assert_eq!(probe.images_destroyed(), 1);
    assert_eq!(probe.live_allocations(), 0);
    assert_eq!(pool.stats().failed_allocations, 1);

    // The next request is unaffected.
    assert!(pool.allocate_image(&texture(16, 16)).is_ok());
}

#[test]
fn test_invalid_descriptors() {
    let allocator = DummyAllocator::new();
    let probe = allocator.probe();
    let mut pool = Pool::new(allocator);

    assert_eq!(
        pool.allocate_buffer(&upload(0)).unwrap_err(),
        ResourceError::InvalidSize
    );
    assert_eq!(
        pool.allocate_buffer(&BufferDescriptor::new(
            16,
            BufferUsage::default(),
            MemoryUsage::CpuToGpu
        ))
        .unwrap_err(),
        ResourceError::UnsupportedUsage
    );
    assert_eq!(
        pool.allocate_image(&texture(0, 16)).unwrap_err(),
        ResourceError::InvalidExtent
    );

    let mut unknown = texture(4, 4);
    unknown.format = Format(123_456);
    unknown.view.format = Format(123_456);
    assert_eq!(
        pool.allocate_image(&unknown).unwrap_err(),
        ResourceError::UnsupportedFormat
    );

    assert!(pool.is_empty());
    assert_eq!(probe.live_allocations(), 0);
    assert_eq!(pool.stats().failed_allocations, 4);
}

#[test]
fn test_out_of_memory() {
    let mut pool = Pool::new(DummyAllocator::with_capacity(1024));
    pool.allocate_buffer(&upload(1024)).unwrap();

    let err = pool.allocate_buffer(&upload(16)).unwrap_err();
    assert_eq!(err, ResourceError::OutOfMemory);
    assert!(err.is_allocation_failure());
    assert_eq!(pool.buffer_count(), 1);

    pool.purge();
    assert!(pool.allocate_buffer(&upload(16)).is_ok());
}

#[test]
fn test_huge_buffer_request_fails() {
    let allocator = DummyAllocator::new();
    let probe = allocator.probe();
    let mut pool = Pool::new(allocator);

    let huge = BufferDescriptor::new(u64::MAX - 3, BufferUsage::TRANSFER_SRC, MemoryUsage::CpuToGpu);
    assert_eq!(pool.allocate_buffer(&huge).unwrap_err(), ResourceError::OutOfMemory);
    assert!(pool.is_empty());
    assert_eq!(pool.stats().failed_allocations, 1);
    assert_eq!(probe.live_allocations(), 0);

    // The pool is still usable.
    assert!(pool.allocate_buffer(&upload(16)).is_ok());
}

#[test]
fn test_deferred_bytes_count_against_budget() {
    respool::suppress_diagnostics(true);

    let config = PoolConfig::default().with_memory_limit(1024);
    let mut pool = Pool::with_config(DummyAllocator::new(), config);
    let buffer = pool.allocate_buffer(&upload(1024)).unwrap();

    let guard = buffer.memory().map_write::<u8>().unwrap();
    pool.purge();
    assert_eq!(pool.stats().live_bytes, 0);
    assert_eq!(pool.deferred_bytes(), 1024);
    // The purged buffer is still held by the live guard.
    assert_eq!(pool.allocate_buffer(&upload(16)).unwrap_err(), ResourceError::OutOfMemory);

    drop(guard);
    assert_eq!(pool.deferred_bytes(), 0);
    assert!(pool.allocate_buffer(&upload(1024)).is_ok());
}

#[test]
fn test_two_pools_are_independent() {
    let allocator_a = DummyAllocator::new();
    let probe_a = allocator_a.probe();
    let allocator_b = DummyAllocator::new();
    let probe_b = allocator_b.probe();

    let mut a = Pool::new(allocator_a);
    let mut b = Pool::with_config(allocator_b, PoolConfig::default().with_label("b"));

    let from_a = a.allocate_buffer(&upload(32)).unwrap();
    let from_b = b.allocate_buffer(&upload(32)).unwrap();

    a.purge();
    assert!(!from_a.is_alive());
    assert!(from_b.is_alive());
    assert_eq!(probe_a.live_allocations(), 0);
    assert_eq!(probe_b.live_allocations(), 1);
    assert_eq!(b.epoch(), 0);
    assert!(!b.owns_buffer(&from_a));

    let mut data = from_b.memory().map_write::<u8>().unwrap();
    data.fill(1);
}

#[test]
fn test_drop_releases_everything() {
    let allocator = DummyAllocator::new();
    let probe = allocator.probe();
    {
        let mut pool = Pool::with_config(allocator, PoolConfig::minimal());
        for _ in 0..40 {
            pool.allocate_buffer(&upload(64)).unwrap();
        }
        pool.allocate_image(&texture(4, 4)).unwrap();
        assert_eq!(probe.live_allocations(), 41);
    }
    assert_eq!(probe.live_allocations(), 0);
    assert_eq!(probe.buffers_destroyed(), 40);
    assert_eq!(probe.views_destroyed(), 1);
}

#[test]
fn test_stats() {
    let mut pool = Pool::new(DummyAllocator::new());
    pool.allocate_buffer(&upload(1024)).unwrap();
    pool.allocate_image(&texture(16, 16)).unwrap();

    let stats = pool.stats();
    assert_eq!(stats.live_buffers, 1);
    assert_eq!(stats.live_images, 1);
    assert_eq!(stats.live_bytes, 1024 + 16 * 16 * 4);
    assert_eq!(pool.allocator_stats().allocation_count, 2);

    pool.purge();
    assert_eq!(pool.stats().live_bytes, 0);
    assert_eq!(pool.stats().peak_bytes, 1024 + 16 * 16 * 4);
    assert!(pool.stats().to_string().contains("Purges:"));
}

// ============ MULTI-THREADED TESTS ============

#[test]
fn test_multithread_mapping_distinct_buffers() {
    let mut pool = Pool::new(DummyAllocator::new());
    let buffers: Vec<_> = (0..4)
        .map(|_| pool.allocate_buffer(&upload(256)).unwrap())
        .collect();

    thread::scope(|s| {
        for (i, buffer) in buffers.iter().enumerate() {
            s.spawn(move || {
                for _ in 0..100 {
                    let mut data = buffer.memory().map_write::<u32>().unwrap();
                    data.fill(i as u32);
                }
            });
        }
    });

    for (i, buffer) in buffers.iter().enumerate() {
        let data = buffer.memory().map_read::<u32>().unwrap();
        assert!(data.iter().all(|&v| v == i as u32));
    }
}

#[test]
fn test_multithread_pool_behind_mutex() {
    let allocator = DummyAllocator::new();
    let probe = allocator.probe();
    let pool = Mutex::new(Pool::new(allocator));

    thread::scope(|s| {
        for _ in 0..4 {
            s.spawn(|| {
                for _ in 0..25 {
                    let buffer = pool.lock().unwrap().allocate_buffer(&upload(64)).unwrap();
                    let mut data = buffer.memory().map_write::<u8>().unwrap();
                    data.fill(3);
                }
            });
        }
    });

    let mut pool = pool.into_inner().unwrap();
    assert_eq!(pool.buffer_count(), 100);
    pool.purge();
    assert_eq!(probe.live_allocations(), 0);
}
