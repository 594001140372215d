//! # respool
//!
//! Pool-owned GPU buffers and images with scoped host mapping.
//!
//! ## Features
//!
//! - A [`Pool`] that allocates buffers and images and owns their release
//! - Bulk [`Pool::purge`]; dropping a pool purges it
//! - Scoped host mapping: [`Memory::map_read`], [`Memory::map_write`],
//!   [`Memory::map_read_write`] return guards that flush and unmap on drop
//! - Access constness in the type system: a read guard only derefs to `&[T]`
//! - Use-after-purge is reported as an error instead of touching freed memory
//! - Pluggable allocator capability ([`ResourceAllocator`]) with a host-RAM
//!   [`DummyAllocator`] and a Vulkan backend (`gpu-vulkan` feature)
//! - Coded diagnostics, a [`StrictMode`] that can make them fatal (also set
//!   through the `RESPOOL_STRICT` environment variable) and optional `log`
//!   tracing
//!
//! ## Quick Start
//!
//! ```rust
//! use respool::{BufferDescriptor, BufferUsage, DummyAllocator, MemoryUsage, Pool};
//!
//! let mut pool = Pool::new(DummyAllocator::new());
//! let desc = BufferDescriptor::new(256, BufferUsage::UNIFORM_BUFFER, MemoryUsage::CpuToGpu);
//! let buffer = pool.allocate_buffer(&desc)?;
//!
//! {
//!     let mut data = buffer.memory().map_write::<f32>()?;
//!     data[0] = 1.0;
//! } // flushed and unmapped here
//!
//! pool.purge();
//! assert!(!buffer.is_alive());
//! # Ok::<(), respool::ResourceError>(())
//! ```

pub mod api;
pub mod diagnostics;
pub mod gpu;
pub mod resource;

mod sync;
mod util;

// Re-export public API at crate root for convenience
pub use api::config::PoolConfig;
pub use api::stats::PoolStats;

// Resources and mapping
pub use resource::{
    Access, AccessFlags, Buffer, BufferDescriptor, Extent3D, Image, ImageDescriptor, ImageType,
    ImageViewType, MappedBytes, MappedScope, Memory, Pool, Read, ReadGuard, ReadWrite,
    ViewDescriptor, Write, WriteGuard,
};

// Allocator capability
pub use gpu::{
    AllocationId, AllocationInfo, AllocatorStats, BufferHandle, BufferUsage, Format, ImageHandle,
    ImageUsage, ImageViewHandle, MemoryUsage, ResourceAllocator, ResourceError, Result,
};
pub use gpu::{DummyAllocator, DummyProbe};

#[cfg(feature = "gpu-vulkan")]
pub use gpu::vulkan::VulkanAllocator;

// Diagnostics - Core types and predefined codes
pub use diagnostics::{Diagnostic, DiagnosticKind};
pub use diagnostics::{set_strict_mode, suppress_diagnostics, StrictMode, StrictModeGuard};
pub use diagnostics::{RP001, RP002, RP101, RP301, RP901};
