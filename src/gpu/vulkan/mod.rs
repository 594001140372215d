//! Vulkan backend for pool allocation
//!
//! Suballocates through `gpu-allocator` and creates resources with `ash`.

pub mod allocator;

pub use allocator::VulkanAllocator;
