//! Buffer resources.

use crate::gpu::traits::{BufferHandle, BufferUsage, MemoryUsage, ResourceError, Result};
use crate::resource::memory::Memory;

/// What to allocate for a buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BufferDescriptor {
    /// Size in bytes, must be non-zero
    pub size: u64,
    /// Buffer usage flags
    pub usage: BufferUsage,
    /// Where the memory should live
    pub memory: MemoryUsage,
}

impl BufferDescriptor {
    /// Create a descriptor.
    pub fn new(size: u64, usage: BufferUsage, memory: MemoryUsage) -> Self {
        Self {
            size,
            usage,
            memory,
        }
    }

    /// Host-visible transfer source, for uploads.
    pub fn staging(size: u64) -> Self {
        Self::new(size, BufferUsage::TRANSFER_SRC, MemoryUsage::CpuOnly)
    }

    /// Device-local storage buffer.
    pub fn storage(size: u64) -> Self {
        Self::new(
            size,
            BufferUsage::STORAGE_BUFFER | BufferUsage::TRANSFER_SRC | BufferUsage::TRANSFER_DST,
            MemoryUsage::GpuOnly,
        )
    }

    /// Check the descriptor before it reaches an allocator.
    pub fn validate(&self) -> Result<()> {
        if self.size == 0 {
            return Err(ResourceError::InvalidSize);
        }
        if self.usage.is_empty() {
            return Err(ResourceError::UnsupportedUsage);
        }
        Ok(())
    }
}

/// A device buffer and the memory bound to it.
///
/// This is a non-owning value: the [`Pool`](crate::Pool) that returned it
/// destroys the buffer on purge or drop.
#[derive(Debug, Clone)]
pub struct Buffer {
    handle: BufferHandle,
    descriptor: BufferDescriptor,
    memory: Memory,
}

impl Buffer {
    pub(crate) fn new(handle: BufferHandle, descriptor: BufferDescriptor, memory: Memory) -> Self {
        Self {
            handle,
            descriptor,
            memory,
        }
    }

    /// Native handle.
    pub fn handle(&self) -> BufferHandle {
        self.handle
    }

    /// Descriptor the buffer was allocated with.
    pub fn descriptor(&self) -> &BufferDescriptor {
        &self.descriptor
    }

    /// Backing memory.
    pub fn memory(&self) -> &Memory {
        &self.memory
    }

    /// Whether the native handle is non-null.
    pub fn is_valid(&self) -> bool {
        !self.handle.is_null()
    }

    /// Valid and not yet released by a purge.
    pub fn is_alive(&self) -> bool {
        self.is_valid() && self.memory.is_alive()
    }
}
