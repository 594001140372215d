//! Allocator capability traits and types
//!
//! This module defines the allocator interface WITHOUT pulling in any backend-specific dependencies.
//! The pool depends on [`ResourceAllocator`], never on a concrete backend.
//!
//! Flag and format values share their numeric encoding with Vulkan, so a Vulkan
//! backend converts them with `from_raw` and nothing else.

use std::fmt;
use std::ptr::NonNull;

use crate::resource::buffer::BufferDescriptor;
use crate::resource::image::ImageDescriptor;

/// Errors produced while allocating or mapping pool resources
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResourceError {
    /// Device memory (or the pool budget) is exhausted
    OutOfMemory,
    /// Zero-sized buffer request
    InvalidSize,
    /// Image extent with a zero dimension, or a shape the image type cannot hold
    InvalidExtent,
    /// Format the backend cannot allocate
    UnsupportedFormat,
    /// Usage flags the backend cannot satisfy
    UnsupportedUsage,
    /// Access flag bits outside {READ, WRITE, READ|WRITE}
    InvalidAccessFlags(u8),
    /// Mapping requested on memory the host cannot see
    NotHostVisible,
    /// The allocation already has a live mapping
    AlreadyMapped,
    /// The resource was released by a purge (or its pool was dropped)
    UseAfterPurge,
    /// Backend-specific error (opaque)
    BackendError(String),
}

impl ResourceError {
    /// True for the failures `allocate_*` reports when a descriptor cannot be satisfied.
    pub fn is_allocation_failure(&self) -> bool {
        matches!(
            self,
            ResourceError::OutOfMemory
                | ResourceError::InvalidSize
                | ResourceError::InvalidExtent
                | ResourceError::UnsupportedFormat
                | ResourceError::UnsupportedUsage
                | ResourceError::BackendError(_)
        )
    }
}

impl fmt::Display for ResourceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResourceError::OutOfMemory => write!(f, "GPU out of memory"),
            ResourceError::InvalidSize => write!(f, "Invalid buffer size"),
            ResourceError::InvalidExtent => write!(f, "Invalid image extent"),
            ResourceError::UnsupportedFormat => write!(f, "Unsupported image format"),
            ResourceError::UnsupportedUsage => write!(f, "Unsupported usage flags"),
            ResourceError::InvalidAccessFlags(bits) => {
                write!(f, "Invalid memory access flags: {:#04b}", bits)
            }
            ResourceError::NotHostVisible => write!(f, "Memory is not host visible"),
            ResourceError::AlreadyMapped => write!(f, "Memory is already mapped"),
            ResourceError::UseAfterPurge => write!(f, "Resource used after its pool was purged"),
            ResourceError::BackendError(msg) => write!(f, "Backend error: {}", msg),
        }
    }
}

impl std::error::Error for ResourceError {}

/// Result alias used throughout the crate
pub type Result<T> = std::result::Result<T, ResourceError>;

macro_rules! native_handle {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
        pub struct $name(u64);

        impl $name {
            /// The null handle.
            pub const NULL: Self = Self(0);

            /// Wrap a raw handle value.
            pub const fn from_raw(raw: u64) -> Self {
                Self(raw)
            }

            /// Raw handle value.
            pub const fn as_raw(self) -> u64 {
                self.0
            }

            /// True for the null handle.
            pub const fn is_null(self) -> bool {
                self.0 == 0
            }
        }
    };
}

native_handle!(
    /// Opaque device buffer handle
    BufferHandle
);
native_handle!(
    /// Opaque device image handle
    ImageHandle
);
native_handle!(
    /// Opaque image view handle
    ImageViewHandle
);
native_handle!(
    /// Backend-issued identifier of one suballocation
    AllocationId
);

/// Buffer usage flags
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct BufferUsage {
    pub bits: u32,
}

impl BufferUsage {
    pub const TRANSFER_SRC: Self = Self { bits: 0x0001 };
    pub const TRANSFER_DST: Self = Self { bits: 0x0002 };
    pub const UNIFORM_TEXEL_BUFFER: Self = Self { bits: 0x0004 };
    pub const STORAGE_TEXEL_BUFFER: Self = Self { bits: 0x0008 };
    pub const UNIFORM_BUFFER: Self = Self { bits: 0x0010 };
    pub const STORAGE_BUFFER: Self = Self { bits: 0x0020 };
    pub const INDEX_BUFFER: Self = Self { bits: 0x0040 };
    pub const VERTEX_BUFFER: Self = Self { bits: 0x0080 };
    pub const INDIRECT_BUFFER: Self = Self { bits: 0x0100 };

    /// True when every bit of `other` is set.
    pub const fn contains(self, other: Self) -> bool {
        self.bits & other.bits == other.bits
    }

    /// True when no bit is set.
    pub const fn is_empty(self) -> bool {
        self.bits == 0
    }
}

impl std::ops::BitOr for BufferUsage {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self { bits: self.bits | rhs.bits }
    }
}

/// Image usage flags
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct ImageUsage {
    pub bits: u32,
}

impl ImageUsage {
    pub const TRANSFER_SRC: Self = Self { bits: 0x0001 };
    pub const TRANSFER_DST: Self = Self { bits: 0x0002 };
    pub const SAMPLED: Self = Self { bits: 0x0004 };
    pub const STORAGE: Self = Self { bits: 0x0008 };
    pub const COLOR_ATTACHMENT: Self = Self { bits: 0x0010 };
    pub const DEPTH_STENCIL_ATTACHMENT: Self = Self { bits: 0x0020 };

    /// True when every bit of `other` is set.
    pub const fn contains(self, other: Self) -> bool {
        self.bits & other.bits == other.bits
    }

    /// True when no bit is set.
    pub const fn is_empty(self) -> bool {
        self.bits == 0
    }
}

impl std::ops::BitOr for ImageUsage {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self { bits: self.bits | rhs.bits }
    }
}

/// Memory usage hint - expresses WHERE the allocation should live
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MemoryUsage {
    /// GPU-only access, fastest for shaders
    GpuOnly,
    /// Host memory the GPU can reach, for staging
    CpuOnly,
    /// CPU writes, GPU reads (uploads, uniforms)
    CpuToGpu,
    /// GPU writes, CPU reads (readback)
    GpuToCpu,
}

impl MemoryUsage {
    /// Whether allocations with this hint can be mapped by the host.
    pub const fn is_host_visible(self) -> bool {
        !matches!(self, MemoryUsage::GpuOnly)
    }
}

/// Pixel format, numerically identical to `VkFormat`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Format(pub u32);

impl Format {
    pub const UNDEFINED: Self = Self(0);
    pub const R8_UNORM: Self = Self(9);
    pub const R8G8B8A8_UNORM: Self = Self(37);
    pub const R8G8B8A8_SRGB: Self = Self(43);
    pub const B8G8R8A8_UNORM: Self = Self(44);
    pub const R16_SFLOAT: Self = Self(76);
    pub const R16G16B16A16_SFLOAT: Self = Self(97);
    pub const R32_SFLOAT: Self = Self(100);
    pub const R32G32_SFLOAT: Self = Self(103);
    pub const R32G32B32A32_SFLOAT: Self = Self(109);
    pub const D32_SFLOAT: Self = Self(126);

    /// Bytes per texel for the formats this crate knows about.
    pub const fn texel_size(self) -> Option<u64> {
        match self.0 {
            9 => Some(1),
            76 => Some(2),
            37 | 43 | 44 | 100 | 126 => Some(4),
            97 | 103 => Some(8),
            109 => Some(16),
            _ => None,
        }
    }
}

/// Allocator-reported metadata for one allocation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AllocationInfo {
    /// Size in bytes, at least the requested size
    pub size: u64,
    /// Offset inside the backing device memory block
    pub offset: u64,
    /// The host can map this allocation
    pub host_visible: bool,
    /// Host writes and device writes are visible without flush/invalidate
    pub host_coherent: bool,
}

/// Allocator statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AllocatorStats {
    /// Live allocations
    pub allocation_count: u64,
    /// Bytes held by live allocations
    pub allocated_bytes: u64,
    /// High-water mark of `allocated_bytes`
    pub peak_usage: u64,
    /// Requests the allocator refused
    pub failed_allocations: u64,
    /// Map operations performed
    pub map_count: u64,
}

/// The allocator capability a [`Pool`](crate::Pool) is built on.
///
/// Implementations use interior mutability: every method takes `&self` so
/// live [`Memory`](crate::Memory) handles can map without borrowing the pool.
///
/// Mapping is not reentrant: a second `map` of the same allocation before
/// `unmap` must fail with [`ResourceError::AlreadyMapped`].
pub trait ResourceAllocator: Send + Sync {
    /// Short backend name for diagnostics.
    fn name(&self) -> &str;

    /// Create a buffer and bind freshly suballocated memory to it.
    fn create_buffer(
        &self,
        descriptor: &BufferDescriptor,
    ) -> Result<(BufferHandle, AllocationId, AllocationInfo)>;

    /// Destroy a buffer and return its memory.
    fn destroy_buffer(&self, buffer: BufferHandle, allocation: AllocationId);

    /// Create an image and bind freshly suballocated memory to it.
    fn create_image(
        &self,
        descriptor: &ImageDescriptor,
    ) -> Result<(ImageHandle, AllocationId, AllocationInfo)>;

    /// Create the view described by `descriptor.view` for `image`.
    fn create_image_view(
        &self,
        image: ImageHandle,
        descriptor: &ImageDescriptor,
    ) -> Result<ImageViewHandle>;

    /// Destroy an image, its view (may be null), and return its memory.
    fn destroy_image(&self, image: ImageHandle, view: ImageViewHandle, allocation: AllocationId);

    /// Obtain a host pointer to the start of the allocation.
    fn map(&self, allocation: AllocationId) -> Result<NonNull<u8>>;

    /// Release a mapping obtained with [`map`](Self::map).
    fn unmap(&self, allocation: AllocationId);

    /// Make host writes visible to the device.
    fn flush(&self, allocation: AllocationId) -> Result<()>;

    /// Make device writes visible to the host.
    fn invalidate(&self, allocation: AllocationId) -> Result<()>;

    /// Current statistics.
    fn stats(&self) -> AllocatorStats;
}
