//! Dummy allocator implementation for testing
//!
//! Backs every allocation with host RAM and doesn't require actual GPU hardware.
//! It still behaves like a device allocator where it matters:
//!
//! - **Non-coherent memory** (the default) keeps a separate host copy per
//!   allocation. `flush` copies host → device and `invalidate` copies
//!   device → host, so a missing flush or invalidate shows up as stale data.
//! - **Coherent memory** ([`DummyAllocator::coherent`]) maps the device bytes
//!   directly.
//! - Capacity limits and one-shot view or flush failures can be injected.
//!
//! A [`DummyProbe`] observes the allocator after it has been moved into a pool.

use std::collections::{HashMap, HashSet};
use std::ptr::NonNull;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use super::traits::*;
use crate::resource::buffer::BufferDescriptor;
use crate::resource::image::{ImageDescriptor, ImageType, ImageViewType};
use crate::sync::atomics::AtomicCounter;
use crate::sync::mutex::Mutex;
use crate::util::size::{align_up, mb};

/// Placement alignment inside the fake device heap.
const BLOCK_ALIGNMENT: u64 = 256;

/// Storage word; gives mapped pointers 16-byte alignment.
type Word = u128;
const WORD: u64 = std::mem::size_of::<Word>() as u64;

/// A fake device allocation
#[derive(Debug)]
struct DummyBlock {
    info: AllocationInfo,
    /// What the "device" sees
    device: Vec<Word>,
    /// Host-side copy; empty for coherent blocks
    host: Vec<Word>,
    mapped: bool,
}

impl DummyBlock {
    fn new(info: AllocationInfo) -> Self {
        let words = (info.size / WORD) as usize;
        let host = if info.host_visible && !info.host_coherent {
            vec![0; words]
        } else {
            Vec::new()
        };
        Self {
            info,
            device: vec![0; words],
            host,
            mapped: false,
        }
    }

    fn device_bytes(&self) -> &[u8] {
        &bytemuck::cast_slice::<Word, u8>(&self.device)[..self.info.size as usize]
    }
}

#[derive(Debug, Default)]
struct Heap {
    next_handle: u64,
    next_offset: u64,
    used: u64,
    blocks: HashMap<AllocationId, DummyBlock>,
    buffers: HashSet<BufferHandle>,
    images: HashMap<ImageHandle, ImageDescriptor>,
    views: HashSet<ImageViewHandle>,
}

impl Heap {
    fn next_raw(&mut self) -> u64 {
        self.next_handle += 1;
        self.next_handle
    }
}

#[derive(Debug, Default)]
struct Counters {
    buffers_created: AtomicCounter,
    buffers_destroyed: AtomicCounter,
    images_created: AtomicCounter,
    images_destroyed: AtomicCounter,
    views_destroyed: AtomicCounter,
    maps: AtomicCounter,
    unmaps: AtomicCounter,
    flushes: AtomicCounter,
    invalidates: AtomicCounter,
    failed: AtomicCounter,
    peak: AtomicCounter,
}

#[derive(Debug)]
struct Inner {
    coherent: bool,
    capacity: u64,
    heap: Mutex<Heap>,
    counters: Counters,
    fail_next_view: AtomicBool,
    fail_next_flush: AtomicBool,
}

/// Host-RAM allocator capability for testing
#[derive(Debug)]
pub struct DummyAllocator {
    inner: Arc<Inner>,
}

impl DummyAllocator {
    /// Create a dummy allocator with non-coherent host memory and 256 MB of capacity.
    pub fn new() -> Self {
        Self::with_options(false, mb(256))
    }

    /// Create a dummy allocator whose host-visible memory is coherent.
    pub fn coherent() -> Self {
        Self::with_options(true, mb(256))
    }

    /// Create a dummy allocator with a capacity limit in bytes.
    pub fn with_capacity(capacity: u64) -> Self {
        Self::with_options(false, capacity)
    }

    fn with_options(coherent: bool, capacity: u64) -> Self {
        Self {
            inner: Arc::new(Inner {
                coherent,
                capacity,
                heap: Mutex::new(Heap::default()),
                counters: Counters::default(),
                fail_next_view: AtomicBool::new(false),
                fail_next_flush: AtomicBool::new(false),
            }),
        }
    }

    /// A probe that stays usable after the allocator moves into a pool.
    pub fn probe(&self) -> DummyProbe {
        DummyProbe {
            inner: Arc::clone(&self.inner),
        }
    }

    fn allocate(&self, size: u64, memory: MemoryUsage) -> Result<(u64, AllocationId, AllocationInfo)> {
        let mut heap = self.inner.heap.lock();
        let Some((size, offset)) = self.place(&heap, size) else {
            self.inner.counters.failed.increment();
            return Err(ResourceError::OutOfMemory);
        };

        let host_visible = memory.is_host_visible();
        let info = AllocationInfo {
            size,
            offset,
            host_visible,
            host_coherent: host_visible && self.inner.coherent,
        };
        heap.next_offset = offset + size;
        heap.used += size;
        self.inner.counters.peak.max(heap.used);

        let allocation = AllocationId::from_raw(heap.next_raw());
        heap.blocks.insert(allocation, DummyBlock::new(info));
        let handle = heap.next_raw();
        Ok((handle, allocation, info))
    }

    /// Rounded size and heap offset for a request, `None` if it does not fit.
    fn place(&self, heap: &Heap, size: u64) -> Option<(u64, u64)> {
        let size = align_up(size, WORD)?;
        if heap.used.checked_add(size)? > self.inner.capacity {
            return None;
        }
        let offset = align_up(heap.next_offset, BLOCK_ALIGNMENT)?;
        offset.checked_add(size)?;
        Some((size, offset))
    }

    fn free(&self, heap: &mut Heap, allocation: AllocationId) {
        if let Some(block) = heap.blocks.remove(&allocation) {
            heap.used -= block.info.size;
        }
    }
}

impl Default for DummyAllocator {
    fn default() -> Self {
        Self::new()
    }
}

fn view_compatible(descriptor: &ImageDescriptor) -> bool {
    let type_ok = matches!(
        (descriptor.image_type, descriptor.view.view_type),
        (ImageType::D1, ImageViewType::D1 | ImageViewType::D1Array)
            | (
                ImageType::D2,
                ImageViewType::D2 | ImageViewType::D2Array | ImageViewType::Cube | ImageViewType::CubeArray
            )
            | (ImageType::D3, ImageViewType::D3)
    );
    type_ok && descriptor.view.format.texel_size() == descriptor.format.texel_size()
}

impl ResourceAllocator for DummyAllocator {
    fn name(&self) -> &str {
        "dummy"
    }

    fn create_buffer(
        &self,
        descriptor: &BufferDescriptor,
    ) -> Result<(BufferHandle, AllocationId, AllocationInfo)> {
        if descriptor.size == 0 {
            return Err(ResourceError::InvalidSize);
        }
        let (raw, allocation, info) = self.allocate(descriptor.size, descriptor.memory)?;
        let handle = BufferHandle::from_raw(raw);
        self.inner.heap.lock().buffers.insert(handle);
        self.inner.counters.buffers_created.increment();
        Ok((handle, allocation, info))
    }

    fn destroy_buffer(&self, buffer: BufferHandle, allocation: AllocationId) {
        let mut heap = self.inner.heap.lock();
        if heap.buffers.remove(&buffer) {
            self.inner.counters.buffers_destroyed.increment();
        }
        self.free(&mut heap, allocation);
    }

    fn create_image(
        &self,
        descriptor: &ImageDescriptor,
    ) -> Result<(ImageHandle, AllocationId, AllocationInfo)> {
        let texel = descriptor
            .format
            .texel_size()
            .ok_or(ResourceError::UnsupportedFormat)?;
        let size = descriptor
            .extent
            .texel_count()
            .and_then(|count| count.checked_mul(texel))
            .ok_or(ResourceError::OutOfMemory)?;
        if size == 0 {
            return Err(ResourceError::InvalidExtent);
        }
        let (raw, allocation, info) = self.allocate(size, descriptor.memory)?;
        let handle = ImageHandle::from_raw(raw);
        self.inner.heap.lock().images.insert(handle, *descriptor);
        self.inner.counters.images_created.increment();
        Ok((handle, allocation, info))
    }

    fn create_image_view(
        &self,
        image: ImageHandle,
        descriptor: &ImageDescriptor,
    ) -> Result<ImageViewHandle> {
        if self.inner.fail_next_view.swap(false, Ordering::Relaxed) {
            return Err(ResourceError::BackendError("injected view failure".to_string()));
        }
        if !view_compatible(descriptor) {
            return Err(ResourceError::UnsupportedFormat);
        }
        let mut heap = self.inner.heap.lock();
        if !heap.images.contains_key(&image) {
            return Err(ResourceError::BackendError(format!("unknown image {:?}", image)));
        }
        let view = ImageViewHandle::from_raw(heap.next_raw());
        heap.views.insert(view);
        Ok(view)
    }

    fn destroy_image(&self, image: ImageHandle, view: ImageViewHandle, allocation: AllocationId) {
        let mut heap = self.inner.heap.lock();
        if heap.views.remove(&view) {
            self.inner.counters.views_destroyed.increment();
        }
        if heap.images.remove(&image).is_some() {
            self.inner.counters.images_destroyed.increment();
        }
        self.free(&mut heap, allocation);
    }

    fn map(&self, allocation: AllocationId) -> Result<NonNull<u8>> {
        let mut heap = self.inner.heap.lock();
        let block = heap
            .blocks
            .get_mut(&allocation)
            .ok_or_else(|| ResourceError::BackendError(format!("unknown allocation {:?}", allocation)))?;
        if !block.info.host_visible {
            return Err(ResourceError::NotHostVisible);
        }
        if block.mapped {
            return Err(ResourceError::AlreadyMapped);
        }
        block.mapped = true;
        self.inner.counters.maps.increment();

        let storage = if block.info.host_coherent {
            &mut block.device
        } else {
            &mut block.host
        };
        // Zero-sized blocks still need a non-null, aligned pointer.
        Ok(NonNull::new(storage.as_mut_ptr().cast::<u8>()).unwrap_or(NonNull::<Word>::dangling().cast()))
    }

    fn unmap(&self, allocation: AllocationId) {
        let mut heap = self.inner.heap.lock();
        if let Some(block) = heap.blocks.get_mut(&allocation) {
            if block.mapped {
                block.mapped = false;
                self.inner.counters.unmaps.increment();
            }
        }
    }

    fn flush(&self, allocation: AllocationId) -> Result<()> {
        self.inner.counters.flushes.increment();
        if self.inner.fail_next_flush.swap(false, Ordering::Relaxed) {
            return Err(ResourceError::BackendError("injected flush failure".to_string()));
        }
        let mut heap = self.inner.heap.lock();
        let block = heap
            .blocks
            .get_mut(&allocation)
            .ok_or_else(|| ResourceError::BackendError(format!("unknown allocation {:?}", allocation)))?;
        if !block.info.host_coherent {
            block.device.copy_from_slice(&block.host);
        }
        Ok(())
    }

    fn invalidate(&self, allocation: AllocationId) -> Result<()> {
        self.inner.counters.invalidates.increment();
        let mut heap = self.inner.heap.lock();
        let block = heap
            .blocks
            .get_mut(&allocation)
            .ok_or_else(|| ResourceError::BackendError(format!("unknown allocation {:?}", allocation)))?;
        if !block.info.host_coherent {
            block.host.copy_from_slice(&block.device);
        }
        Ok(())
    }

    fn stats(&self) -> AllocatorStats {
        let heap = self.inner.heap.lock();
        AllocatorStats {
            allocation_count: heap.blocks.len() as u64,
            allocated_bytes: heap.used,
            peak_usage: self.inner.counters.peak.get(),
            failed_allocations: self.inner.counters.failed.get(),
            map_count: self.inner.counters.maps.get(),
        }
    }
}

/// Observer for a [`DummyAllocator`] that has been handed to a pool
#[derive(Debug, Clone)]
pub struct DummyProbe {
    inner: Arc<Inner>,
}

impl DummyProbe {
    /// Make the next `create_image_view` fail.
    pub fn fail_next_view(&self) {
        self.inner.fail_next_view.store(true, Ordering::Relaxed);
    }

    /// Make the next `flush` fail without copying anything to the device.
    pub fn fail_next_flush(&self) {
        self.inner.fail_next_flush.store(true, Ordering::Relaxed);
    }

    /// Copy of the device-side bytes of `allocation`.
    pub fn device_bytes(&self, allocation: AllocationId) -> Option<Vec<u8>> {
        let heap = self.inner.heap.lock();
        heap.blocks.get(&allocation).map(|block| block.device_bytes().to_vec())
    }

    /// Simulate a device write to `allocation`. Returns false if it doesn't exist.
    ///
    /// Must not be called while a guard is live on a coherent allocation.
    pub fn write_device(&self, allocation: AllocationId, offset: usize, bytes: &[u8]) -> bool {
        let mut heap = self.inner.heap.lock();
        let Some(block) = heap.blocks.get_mut(&allocation) else {
            return false;
        };
        let size = block.info.size as usize;
        let Some(end) = offset.checked_add(bytes.len()).filter(|&end| end <= size) else {
            return false;
        };
        bytemuck::cast_slice_mut::<Word, u8>(&mut block.device)[offset..end].copy_from_slice(bytes);
        true
    }

    /// Whether the allocator still holds `allocation`.
    pub fn contains(&self, allocation: AllocationId) -> bool {
        self.inner.heap.lock().blocks.contains_key(&allocation)
    }

    /// Whether `allocation` is currently mapped.
    pub fn is_mapped(&self, allocation: AllocationId) -> bool {
        self.inner
            .heap
            .lock()
            .blocks
            .get(&allocation)
            .map_or(false, |block| block.mapped)
    }

    /// Live allocations.
    pub fn live_allocations(&self) -> usize {
        self.inner.heap.lock().blocks.len()
    }

    /// Live image views.
    pub fn live_views(&self) -> usize {
        self.inner.heap.lock().views.len()
    }

    pub fn buffers_created(&self) -> u64 {
        self.inner.counters.buffers_created.get()
    }

    pub fn buffers_destroyed(&self) -> u64 {
        self.inner.counters.buffers_destroyed.get()
    }

    pub fn images_created(&self) -> u64 {
        self.inner.counters.images_created.get()
    }

    pub fn images_destroyed(&self) -> u64 {
        self.inner.counters.images_destroyed.get()
    }

    pub fn views_destroyed(&self) -> u64 {
        self.inner.counters.views_destroyed.get()
    }

    pub fn map_calls(&self) -> u64 {
        self.inner.counters.maps.get()
    }

    pub fn unmap_calls(&self) -> u64 {
        self.inner.counters.unmaps.get()
    }

    pub fn flush_calls(&self) -> u64 {
        self.inner.counters.flushes.get()
    }

    pub fn invalidate_calls(&self) -> u64 {
        self.inner.counters.invalidates.get()
    }

    /// Every allocator entry point that touches an allocation, summed.
    pub fn total_calls(&self) -> u64 {
        self.map_calls() + self.unmap_calls() + self.flush_calls() + self.invalidate_calls()
    }
}
