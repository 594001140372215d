//! Vulkan allocator implementation

use std::collections::{HashMap, HashSet};
use std::ptr::NonNull;
use std::sync::Arc;

use ash::vk::{self, Handle};
use gpu_allocator::vulkan::{
    Allocation, AllocationCreateDesc, AllocationScheme, Allocator, AllocatorCreateDesc,
};
use gpu_allocator::{AllocationError, AllocationSizes, AllocatorDebugSettings, MemoryLocation};

use crate::diagnostics::macros::rp_emit;
use crate::diagnostics::RP901;
use crate::gpu::traits::*;
use crate::resource::buffer::BufferDescriptor;
use crate::resource::image::ImageDescriptor;
use crate::sync::mutex::Mutex;
use crate::util::size::align_up;

/// One live suballocation
struct VulkanBlock {
    allocation: Allocation,
    mapped: bool,
}

struct VulkanState {
    allocator: Allocator,
    blocks: HashMap<AllocationId, VulkanBlock>,
    views: HashSet<ImageViewHandle>,
    next_id: u64,
    stats: AllocatorStats,
}

impl VulkanState {
    fn insert(&mut self, allocation: Allocation) -> AllocationId {
        self.next_id += 1;
        let id = AllocationId::from_raw(self.next_id);
        self.stats.allocation_count += 1;
        self.stats.allocated_bytes += allocation.size();
        self.stats.peak_usage = self.stats.peak_usage.max(self.stats.allocated_bytes);
        self.blocks.insert(
            id,
            VulkanBlock {
                allocation,
                mapped: false,
            },
        );
        id
    }

    fn free(&mut self, id: AllocationId) {
        let Some(block) = self.blocks.remove(&id) else {
            return;
        };
        self.stats.allocation_count -= 1;
        self.stats.allocated_bytes -= block.allocation.size();
        if let Err(err) = self.allocator.free(block.allocation) {
            rp_emit!(release RP901, "free {:?}: {}", id, err);
        }
    }
}

/// Vulkan-based resource allocator
///
/// Buffers and images are created on the given device and bound to memory
/// suballocated by `gpu-allocator`. Host-visible allocations stay persistently
/// mapped by `gpu-allocator`; `map`/`unmap` only track exclusivity.
pub struct VulkanAllocator {
    /// Vulkan device
    device: Arc<ash::Device>,
    /// Flush/invalidate ranges are aligned to this
    non_coherent_atom_size: u64,
    state: Mutex<VulkanState>,
}

impl VulkanAllocator {
    /// Create a new Vulkan allocator.
    ///
    /// # Safety
    ///
    /// `device` must have been created from `physical_device` on `instance`,
    /// and must outlive the allocator and every pool built on it.
    pub unsafe fn new(
        instance: &ash::Instance,
        device: Arc<ash::Device>,
        physical_device: vk::PhysicalDevice,
    ) -> Result<Self> {
        let properties = instance.get_physical_device_properties(physical_device);
        let allocator = Allocator::new(&AllocatorCreateDesc {
            instance: instance.clone(),
            device: (*device).clone(),
            physical_device,
            debug_settings: AllocatorDebugSettings::default(),
            buffer_device_address: false,
            allocation_sizes: AllocationSizes::default(),
        })
        .map_err(allocation_error)?;

        Ok(Self {
            device,
            non_coherent_atom_size: properties.limits.non_coherent_atom_size.max(1),
            state: Mutex::new(VulkanState {
                allocator,
                blocks: HashMap::new(),
                views: HashSet::new(),
                next_id: 0,
                stats: AllocatorStats::default(),
            }),
        })
    }

    fn allocate(
        &self,
        name: &str,
        requirements: vk::MemoryRequirements,
        memory: MemoryUsage,
        linear: bool,
    ) -> Result<(AllocationId, AllocationInfo, vk::DeviceMemory, u64)> {
        let mut state = self.state.lock();
        let allocation = match state.allocator.allocate(&AllocationCreateDesc {
            name,
            requirements,
            location: memory_location(memory),
            linear,
            allocation_scheme: AllocationScheme::GpuAllocatorManaged,
        }) {
            Ok(allocation) => allocation,
            Err(err) => {
                state.stats.failed_allocations += 1;
                return Err(allocation_error(err));
            }
        };

        let info = AllocationInfo {
            size: allocation.size(),
            offset: allocation.offset(),
            host_visible: allocation.mapped_ptr().is_some(),
            host_coherent: allocation
                .memory_properties()
                .contains(vk::MemoryPropertyFlags::HOST_COHERENT),
        };
        let memory = unsafe { allocation.memory() };
        let offset = allocation.offset();
        let id = state.insert(allocation);
        Ok((id, info, memory, offset))
    }

    /// Flush or invalidate the whole allocation.
    fn sync_range(&self, id: AllocationId, flush: bool) -> Result<()> {
        let state = self.state.lock();
        let block = state
            .blocks
            .get(&id)
            .ok_or_else(|| ResourceError::BackendError(format!("unknown allocation {:?}", id)))?;
        if block
            .allocation
            .memory_properties()
            .contains(vk::MemoryPropertyFlags::HOST_COHERENT)
        {
            return Ok(());
        }

        let (offset, size) = atom_range(
            block.allocation.offset(),
            block.allocation.size(),
            self.non_coherent_atom_size,
        )
        .ok_or_else(|| ResourceError::BackendError(format!("range of {:?} overflows", id)))?;
        let range = vk::MappedMemoryRange::builder()
            .memory(unsafe { block.allocation.memory() })
            .offset(offset)
            .size(size)
            .build();

        let result = unsafe {
            if flush {
                self.device.flush_mapped_memory_ranges(&[range])
            } else {
                self.device.invalidate_mapped_memory_ranges(&[range])
            }
        };
        result.map_err(vk_error)
    }
}

/// Offset and size of a mapped-memory range covering `offset..offset + size`
/// with both ends on `atom` boundaries.
///
/// An end that is not already atom-aligned may be the end of the memory
/// object, which the range must not pass; `WHOLE_SIZE` covers the rest of the
/// mapping instead. `gpu-allocator` maps whole memory blocks, so the rest of the
/// mapping is the rest of the memory object.
fn atom_range(offset: u64, size: u64, atom: u64) -> Option<(u64, u64)> {
    let start = offset / atom * atom;
    let end = offset.checked_add(size)?;
    if align_up(end, atom)? == end {
        Some((start, end - start))
    } else {
        Some((start, vk::WHOLE_SIZE))
    }
}

impl ResourceAllocator for VulkanAllocator {
    fn name(&self) -> &str {
        "vulkan"
    }

    fn create_buffer(
        &self,
        descriptor: &BufferDescriptor,
    ) -> Result<(BufferHandle, AllocationId, AllocationInfo)> {
        let buffer_info = vk::BufferCreateInfo::builder()
            .size(descriptor.size)
            .usage(vk::BufferUsageFlags::from_raw(descriptor.usage.bits))
            .sharing_mode(vk::SharingMode::EXCLUSIVE);
        let buffer = unsafe { self.device.create_buffer(&buffer_info, None) }.map_err(vk_error)?;

        let requirements = unsafe { self.device.get_buffer_memory_requirements(buffer) };
        let (id, info, memory, offset) =
            match self.allocate("respool buffer", requirements, descriptor.memory, true) {
                Ok(allocated) => allocated,
                Err(err) => {
                    unsafe { self.device.destroy_buffer(buffer, None) };
                    return Err(err);
                }
            };

        if let Err(err) = unsafe { self.device.bind_buffer_memory(buffer, memory, offset) } {
            self.destroy_buffer(BufferHandle::from_raw(buffer.as_raw()), id);
            return Err(vk_error(err));
        }
        Ok((BufferHandle::from_raw(buffer.as_raw()), id, info))
    }

    fn destroy_buffer(&self, buffer: BufferHandle, allocation: AllocationId) {
        unsafe {
            self.device
                .destroy_buffer(vk::Buffer::from_raw(buffer.as_raw()), None)
        };
        self.state.lock().free(allocation);
    }

    fn create_image(
        &self,
        descriptor: &ImageDescriptor,
    ) -> Result<(ImageHandle, AllocationId, AllocationInfo)> {
        // Host-visible images are linear so a mapping sees texels in order.
        let linear = descriptor.memory.is_host_visible();
        let extent = descriptor.extent;
        let image_info = vk::ImageCreateInfo::builder()
            .image_type(vk::ImageType::from_raw(descriptor.image_type as i32))
            .format(vk_format(descriptor.format))
            .extent(vk::Extent3D {
                width: extent.width,
                height: extent.height,
                depth: extent.depth,
            })
            .mip_levels(1)
            .array_layers(1)
            .samples(vk::SampleCountFlags::TYPE_1)
            .tiling(if linear {
                vk::ImageTiling::LINEAR
            } else {
                vk::ImageTiling::OPTIMAL
            })
            .usage(vk::ImageUsageFlags::from_raw(descriptor.usage.bits))
            .sharing_mode(vk::SharingMode::EXCLUSIVE)
            .initial_layout(vk::ImageLayout::UNDEFINED);
        let image = unsafe { self.device.create_image(&image_info, None) }.map_err(vk_error)?;

        let requirements = unsafe { self.device.get_image_memory_requirements(image) };
        let (id, info, memory, offset) =
            match self.allocate("respool image", requirements, descriptor.memory, linear) {
                Ok(allocated) => allocated,
                Err(err) => {
                    unsafe { self.device.destroy_image(image, None) };
                    return Err(err);
                }
            };

        let handle = ImageHandle::from_raw(image.as_raw());
        if let Err(err) = unsafe { self.device.bind_image_memory(image, memory, offset) } {
            self.destroy_image(handle, ImageViewHandle::NULL, id);
            return Err(vk_error(err));
        }
        Ok((handle, id, info))
    }

    fn create_image_view(
        &self,
        image: ImageHandle,
        descriptor: &ImageDescriptor,
    ) -> Result<ImageViewHandle> {
        let aspect_mask = if descriptor.view.format == Format::D32_SFLOAT {
            vk::ImageAspectFlags::DEPTH
        } else {
            vk::ImageAspectFlags::COLOR
        };
        let view_info = vk::ImageViewCreateInfo::builder()
            .image(vk::Image::from_raw(image.as_raw()))
            .view_type(vk::ImageViewType::from_raw(descriptor.view.view_type as i32))
            .format(vk_format(descriptor.view.format))
            .subresource_range(vk::ImageSubresourceRange {
                aspect_mask,
                base_mip_level: 0,
                level_count: 1,
                base_array_layer: 0,
                layer_count: 1,
            });
        let view = unsafe { self.device.create_image_view(&view_info, None) }.map_err(vk_error)?;

        let handle = ImageViewHandle::from_raw(view.as_raw());
        self.state.lock().views.insert(handle);
        Ok(handle)
    }

    fn destroy_image(&self, image: ImageHandle, view: ImageViewHandle, allocation: AllocationId) {
        let mut state = self.state.lock();
        if state.views.remove(&view) {
            unsafe {
                self.device
                    .destroy_image_view(vk::ImageView::from_raw(view.as_raw()), None)
            };
        }
        unsafe {
            self.device
                .destroy_image(vk::Image::from_raw(image.as_raw()), None)
        };
        state.free(allocation);
    }

    fn map(&self, allocation: AllocationId) -> Result<NonNull<u8>> {
        let mut state = self.state.lock();
        let block = state.blocks.get_mut(&allocation).ok_or_else(|| {
            ResourceError::BackendError(format!("unknown allocation {:?}", allocation))
        })?;
        let ptr = block
            .allocation
            .mapped_ptr()
            .ok_or(ResourceError::NotHostVisible)?;
        if block.mapped {
            return Err(ResourceError::AlreadyMapped);
        }
        block.mapped = true;
        state.stats.map_count += 1;
        Ok(ptr.cast())
    }

    fn unmap(&self, allocation: AllocationId) {
        if let Some(block) = self.state.lock().blocks.get_mut(&allocation) {
            block.mapped = false;
        }
    }

    fn flush(&self, allocation: AllocationId) -> Result<()> {
        self.sync_range(allocation, true)
    }

    fn invalidate(&self, allocation: AllocationId) -> Result<()> {
        self.sync_range(allocation, false)
    }

    fn stats(&self) -> AllocatorStats {
        self.state.lock().stats.clone()
    }
}

impl std::fmt::Debug for VulkanAllocator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VulkanAllocator")
            .field("non_coherent_atom_size", &self.non_coherent_atom_size)
            .field("stats", &self.stats())
            .finish_non_exhaustive()
    }
}

fn memory_location(memory: MemoryUsage) -> MemoryLocation {
    match memory {
        MemoryUsage::GpuOnly => MemoryLocation::GpuOnly,
        MemoryUsage::CpuOnly | MemoryUsage::CpuToGpu => MemoryLocation::CpuToGpu,
        MemoryUsage::GpuToCpu => MemoryLocation::GpuToCpu,
    }
}

fn vk_format(format: Format) -> vk::Format {
    vk::Format::from_raw(format.0 as i32)
}

fn vk_error(result: vk::Result) -> ResourceError {
    match result {
        vk::Result::ERROR_OUT_OF_DEVICE_MEMORY | vk::Result::ERROR_OUT_OF_HOST_MEMORY => {
            ResourceError::OutOfMemory
        }
        vk::Result::ERROR_FORMAT_NOT_SUPPORTED => ResourceError::UnsupportedFormat,
        other => ResourceError::BackendError(other.to_string()),
    }
}

fn allocation_error(err: AllocationError) -> ResourceError {
    match err {
        AllocationError::OutOfMemory => ResourceError::OutOfMemory,
        other => ResourceError::BackendError(other.to_string()),
    }
}
