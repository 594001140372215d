//! Allocator backends
//!
//! The pool only sees the [`ResourceAllocator`] capability defined in `traits`.
//!
//! ## Backends
//! - `dummy`: host RAM, always available, used by tests and benches
//! - `vulkan`: via the `ash` and `gpu-allocator` crates (enable `gpu-vulkan` feature)

// Always present for API stability: traits define the interface
pub mod traits;
pub use traits::{
    AllocationId, AllocationInfo, AllocatorStats, BufferHandle, BufferUsage, Format, ImageHandle,
    ImageUsage, ImageViewHandle, MemoryUsage, ResourceAllocator, ResourceError, Result,
};

pub mod dummy;
pub use dummy::{DummyAllocator, DummyProbe};

#[cfg(feature = "gpu-vulkan")]
pub mod vulkan;
