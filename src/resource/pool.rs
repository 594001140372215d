//! The resource pool: sole allocation and release authority.

use std::sync::Arc;

use crate::api::config::PoolConfig;
use crate::api::stats::PoolStats;
use crate::diagnostics::macros::{rp_emit, rp_trace};
use crate::diagnostics::{RP101, RP301};
use crate::gpu::traits::{AllocatorStats, ImageViewHandle, ResourceAllocator, ResourceError, Result};
use crate::resource::buffer::{Buffer, BufferDescriptor};
use crate::resource::image::{Image, ImageDescriptor};
use crate::resource::memory::Memory;
use crate::resource::state::{Epoch, Release, SharedState};

/// A registry entry: the value handed out plus the action that frees it.
struct Owned<T> {
    value: T,
    release: Release,
    bytes: u64,
}

/// Owns every buffer and image allocated through it.
///
/// Callers receive non-owning clones. [`purge`](Self::purge) releases
/// everything at once and leaves the pool ready for new allocations; dropping
/// the pool purges and then drops the allocator.
///
/// Registry mutation takes `&mut self`; share a pool across threads behind a
/// mutex.
///
/// # Example
///
/// ```
/// use respool::{BufferDescriptor, DummyAllocator, Pool};
///
/// let mut pool = Pool::new(DummyAllocator::new());
/// let buffer = pool.allocate_buffer(&BufferDescriptor::staging(256))?;
/// assert!(buffer.is_valid());
///
/// pool.purge();
/// assert!(pool.is_empty());
/// assert!(!buffer.is_alive());
/// # Ok::<(), respool::ResourceError>(())
/// ```
pub struct Pool {
    state: Arc<SharedState>,
    buffers: Vec<Owned<Buffer>>,
    images: Vec<Owned<Image>>,
    config: PoolConfig,
    stats: PoolStats,
}

impl Pool {
    /// Create a pool that owns `allocator`, with default configuration.
    pub fn new<A: ResourceAllocator + 'static>(allocator: A) -> Self {
        Self::with_config(allocator, PoolConfig::default())
    }

    /// Create a pool that owns `allocator`.
    pub fn with_config<A: ResourceAllocator + 'static>(allocator: A, config: PoolConfig) -> Self {
        Self::from_boxed(Box::new(allocator), config)
    }

    /// Create a pool from an already boxed allocator.
    pub fn from_boxed(allocator: Box<dyn ResourceAllocator>, config: PoolConfig) -> Self {
        rp_trace!("[{}] created on {} allocator", config.label, allocator.name());
        Self {
            state: SharedState::new(allocator),
            buffers: Vec::new(),
            images: Vec::new(),
            config,
            stats: PoolStats::default(),
        }
    }

    /// Allocate a buffer.
    ///
    /// Nothing is registered when this fails.
    pub fn allocate_buffer(&mut self, descriptor: &BufferDescriptor) -> Result<Buffer> {
        if let Err(err) = descriptor
            .validate()
            .and_then(|()| self.check_budget(descriptor.size))
        {
            return Err(self.fail(err));
        }

        let created = self.state.allocator().create_buffer(descriptor);
        let (handle, allocation, info) = match created {
            Ok(created) => created,
            Err(err) => return Err(self.fail(err)),
        };

        let memory = Memory::new(&self.state, allocation, info, self.state.epoch());
        let buffer = Buffer::new(handle, *descriptor, memory);

        reserve_in_batches(&mut self.buffers, self.config.reserve_batch);
        self.buffers.push(Owned {
            value: buffer.clone(),
            release: Release::Buffer { handle, allocation },
            bytes: info.size,
        });
        self.stats.live_buffers += 1;
        self.stats.buffers_allocated += 1;
        self.stats.record_alloc(info.size);

        rp_trace!(
            "[{}] buffer {:?}: {} bytes at offset {}",
            self.config.label,
            handle,
            info.size,
            info.offset
        );
        Ok(buffer)
    }

    /// Allocate an image and its view.
    ///
    /// If the view cannot be created the image is destroyed before the error
    /// is returned. Nothing is registered when this fails.
    pub fn allocate_image(&mut self, descriptor: &ImageDescriptor) -> Result<Image> {
        let requested = descriptor.packed_size().unwrap_or(0);
        if let Err(err) = descriptor
            .validate()
            .and_then(|()| self.check_budget(requested))
        {
            return Err(self.fail(err));
        }

        let allocator = self.state.allocator();
        let (handle, allocation, info) = match allocator.create_image(descriptor) {
            Ok(created) => created,
            Err(err) => return Err(self.fail(err)),
        };
        let view = match allocator.create_image_view(handle, descriptor) {
            Ok(view) => view,
            Err(err) => {
                allocator.destroy_image(handle, ImageViewHandle::NULL, allocation);
                let err = self.fail(err);
                rp_emit!(RP101, "[{}] image {:?}: {}", self.config.label, handle, err);
                return Err(err);
            }
        };

        let memory = Memory::new(&self.state, allocation, info, self.state.epoch());
        let image = Image::new(handle, view, *descriptor, memory);

        reserve_in_batches(&mut self.images, self.config.reserve_batch);
        self.images.push(Owned {
            value: image.clone(),
            release: Release::Image {
                handle,
                view,
                allocation,
            },
            bytes: info.size,
        });
        self.stats.live_images += 1;
        self.stats.images_allocated += 1;
        self.stats.record_alloc(info.size);

        rp_trace!(
            "[{}] image {:?} ({}x{}x{}): {} bytes",
            self.config.label,
            handle,
            descriptor.extent.width,
            descriptor.extent.height,
            descriptor.extent.depth,
            info.size
        );
        Ok(image)
    }

    /// Release every buffer and image, then accept new allocations.
    ///
    /// Every value previously returned by this pool stops being alive.
    /// Resources still mapped are released when their guard drops; until then
    /// their bytes count as [`deferred_bytes`](Self::deferred_bytes).
    pub fn purge(&mut self) {
        let buffers = self.buffers.len();
        let images = self.images.len();

        let releases = self
            .buffers
            .drain(..)
            .map(|owned| (owned.release, owned.bytes))
            .chain(self.images.drain(..).map(|owned| (owned.release, owned.bytes)));
        let deferred = self.state.retire(releases);
        self.stats.record_purge();

        rp_trace!(
            "[{}] purged {} buffer(s), {} image(s), {} deferred; epoch {}",
            self.config.label,
            buffers,
            images,
            deferred,
            self.state.epoch()
        );
    }

    /// Buffers currently registered.
    pub fn buffer_count(&self) -> usize {
        self.buffers.len()
    }

    /// Images currently registered.
    pub fn image_count(&self) -> usize {
        self.images.len()
    }

    /// True when nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.buffers.is_empty() && self.images.is_empty()
    }

    /// Registered buffers, in allocation order.
    pub fn buffers(&self) -> impl Iterator<Item = &Buffer> + '_ {
        self.buffers.iter().map(|owned| &owned.value)
    }

    /// Registered images, in allocation order.
    pub fn images(&self) -> impl Iterator<Item = &Image> + '_ {
        self.images.iter().map(|owned| &owned.value)
    }

    /// Whether `buffer` came from this pool and has not been purged.
    pub fn owns_buffer(&self, buffer: &Buffer) -> bool {
        buffer.memory().is_from(&self.state)
            && buffer.is_alive()
            && self
                .buffers
                .iter()
                .any(|owned| owned.value.handle() == buffer.handle())
    }

    /// Whether `image` came from this pool and has not been purged.
    pub fn owns_image(&self, image: &Image) -> bool {
        image.memory().is_from(&self.state)
            && image.is_alive()
            && self
                .images
                .iter()
                .any(|owned| owned.value.handle() == image.handle())
    }

    /// Number of purges so far; handles carry the epoch they were made in.
    pub fn epoch(&self) -> Epoch {
        self.state.epoch()
    }

    /// Bytes purged but still held because a mapping guard is live.
    ///
    /// They count against `memory_limit` until the guard drops.
    pub fn deferred_bytes(&self) -> u64 {
        self.state.deferred_bytes()
    }

    /// Pool statistics.
    pub fn stats(&self) -> &PoolStats {
        &self.stats
    }

    /// Statistics reported by the allocator.
    pub fn allocator_stats(&self) -> AllocatorStats {
        self.state.allocator().stats()
    }

    /// Pool configuration.
    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    fn check_budget(&self, bytes: u64) -> Result<()> {
        let limit = self.config.memory_limit;
        if limit == 0 {
            return Ok(());
        }
        let held = self
            .stats
            .live_bytes
            .saturating_add(self.state.deferred_bytes());
        if held.saturating_add(bytes) > limit {
            rp_emit!(
                RP301,
                "[{}] {} held + {} requested > {} limit",
                self.config.label,
                held,
                bytes,
                limit
            );
            return Err(ResourceError::OutOfMemory);
        }
        Ok(())
    }

    fn fail(&mut self, err: ResourceError) -> ResourceError {
        self.stats.failed_allocations += 1;
        rp_trace!("[{}] allocation failed: {}", self.config.label, err);
        err
    }
}

impl Drop for Pool {
    fn drop(&mut self) {
        if !self.is_empty() {
            self.purge();
        }
        rp_trace!("[{}] dropped", self.config.label);
    }
}

impl std::fmt::Debug for Pool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pool")
            .field("label", &self.config.label)
            .field("allocator", &self.state.allocator().name())
            .field("buffers", &self.buffers.len())
            .field("images", &self.images.len())
            .field("epoch", &self.state.epoch())
            .finish()
    }
}

/// Grow `registry` by a whole batch once it is full.
fn reserve_in_batches<T>(registry: &mut Vec<T>, batch: usize) {
    if registry.len() == registry.capacity() {
        registry.reserve_exact(batch.max(1));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::dummy::DummyAllocator;
    use crate::gpu::traits::{Format, ImageUsage, MemoryUsage};
    use crate::resource::image::ImageViewType;

    fn pool() -> Pool {
        Pool::with_config(DummyAllocator::new(), PoolConfig::minimal())
    }

    #[test]
    fn test_reserve_in_batches() {
        let mut registry: Vec<u32> = Vec::new();
        reserve_in_batches(&mut registry, 4);
        assert!(registry.capacity() >= 4);
        let cap = registry.capacity();
        for i in 0..cap as u32 {
            registry.push(i);
        }
        reserve_in_batches(&mut registry, 4);
        assert!(registry.capacity() >= cap + 4);
    }

    #[test]
    fn test_registry_counts() {
        let mut pool = pool();
        pool.allocate_buffer(&BufferDescriptor::staging(64)).unwrap();
        pool.allocate_buffer(&BufferDescriptor::storage(64)).unwrap();
        pool.allocate_image(&ImageDescriptor::new_2d(
            Format::R8G8B8A8_UNORM,
            4,
            4,
            ImageUsage::SAMPLED,
            MemoryUsage::GpuOnly,
        ))
        .unwrap();

        assert_eq!(pool.buffer_count(), 2);
        assert_eq!(pool.image_count(), 1);
        assert_eq!(pool.stats().live_resources(), 3);
        assert_eq!(pool.buffers().count(), 2);

        pool.purge();
        assert!(pool.is_empty());
        assert_eq!(pool.stats().live_bytes, 0);
        assert_eq!(pool.epoch(), 1);
    }

    #[test]
    fn test_invalid_descriptor_registers_nothing() {
        let mut pool = pool();
        let err = pool.allocate_buffer(&BufferDescriptor::staging(0)).unwrap_err();
        assert_eq!(err, ResourceError::InvalidSize);
        assert!(pool.is_empty());
        assert_eq!(pool.stats().failed_allocations, 1);
        assert_eq!(pool.allocator_stats().allocation_count, 0);
    }

    #[test]
    fn test_budget() {
        let mut pool = Pool::with_config(
            DummyAllocator::new(),
            PoolConfig::minimal().with_memory_limit(1024),
        );
        pool.allocate_buffer(&BufferDescriptor::staging(1024)).unwrap();
        let err = pool.allocate_buffer(&BufferDescriptor::staging(1)).unwrap_err();
        assert_eq!(err, ResourceError::OutOfMemory);
        assert_eq!(pool.buffer_count(), 1);

        pool.purge();
        assert!(pool.allocate_buffer(&BufferDescriptor::staging(512)).is_ok());
    }

    #[test]
    fn test_owns() {
        let mut a = pool();
        let mut b = pool();
        let from_a = a.allocate_buffer(&BufferDescriptor::staging(16)).unwrap();
        let from_b = b.allocate_buffer(&BufferDescriptor::staging(16)).unwrap();

        assert!(a.owns_buffer(&from_a));
        assert!(!a.owns_buffer(&from_b));

        a.purge();
        assert!(!a.owns_buffer(&from_a));
    }

    #[test]
    fn test_image_view_matches_descriptor() {
        let mut pool = pool();
        let desc = ImageDescriptor::new_2d(
            Format::R32_SFLOAT,
            8,
            8,
            ImageUsage::STORAGE,
            MemoryUsage::GpuOnly,
        )
        .with_view(ImageViewType::D2Array, Format::R32_SFLOAT);
        let image = pool.allocate_image(&desc).unwrap();
        assert!(image.is_valid());
        assert!(!image.view().is_null());
        assert_eq!(image.descriptor().view.view_type, ImageViewType::D2Array);
        assert!(pool.owns_image(&image));
    }
}
