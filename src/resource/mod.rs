//! Pool-owned GPU resources.
//!
//! - [`Pool`]: allocates and owns buffers and images
//! - [`Buffer`] / [`Image`]: non-owning resource values
//! - [`Memory`]: scoped host mapping of a resource's allocation

pub mod buffer;
pub mod image;
pub mod memory;
pub mod pool;
pub(crate) mod state;

pub use buffer::{Buffer, BufferDescriptor};
pub use image::{Extent3D, Image, ImageDescriptor, ImageType, ImageViewType, ViewDescriptor};
pub use memory::{
    Access, AccessFlags, MappedBytes, MappedScope, Memory, Read, ReadGuard, ReadWrite, Write,
    WriteGuard,
};
pub use pool::Pool;
