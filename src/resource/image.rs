//! Image resources.

use crate::gpu::traits::{
    Format, ImageHandle, ImageUsage, ImageViewHandle, MemoryUsage, ResourceError, Result,
};
use crate::resource::memory::Memory;

/// Image dimensionality, numerically identical to `VkImageType`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum ImageType {
    D1 = 0,
    D2 = 1,
    D3 = 2,
}

/// View dimensionality, numerically identical to `VkImageViewType`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum ImageViewType {
    D1 = 0,
    D2 = 1,
    D3 = 2,
    Cube = 3,
    D1Array = 4,
    D2Array = 5,
    CubeArray = 6,
}

/// Image size in texels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Extent3D {
    pub width: u32,
    pub height: u32,
    pub depth: u32,
}

impl Extent3D {
    pub const fn new(width: u32, height: u32, depth: u32) -> Self {
        Self {
            width,
            height,
            depth,
        }
    }

    /// Number of texels, `None` on overflow.
    pub fn texel_count(&self) -> Option<u64> {
        u64::from(self.width)
            .checked_mul(u64::from(self.height))?
            .checked_mul(u64::from(self.depth))
    }
}

/// The view created alongside an image
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ViewDescriptor {
    pub view_type: ImageViewType,
    pub format: Format,
}

/// What to allocate for an image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ImageDescriptor {
    pub image_type: ImageType,
    pub format: Format,
    pub extent: Extent3D,
    pub usage: ImageUsage,
    pub memory: MemoryUsage,
    pub view: ViewDescriptor,
}

impl ImageDescriptor {
    /// A 2D image with a matching 2D view.
    pub fn new_2d(
        format: Format,
        width: u32,
        height: u32,
        usage: ImageUsage,
        memory: MemoryUsage,
    ) -> Self {
        Self {
            image_type: ImageType::D2,
            format,
            extent: Extent3D::new(width, height, 1),
            usage,
            memory,
            view: ViewDescriptor {
                view_type: ImageViewType::D2,
                format,
            },
        }
    }

    /// A 3D image with a matching 3D view.
    pub fn new_3d(format: Format, extent: Extent3D, usage: ImageUsage, memory: MemoryUsage) -> Self {
        Self {
            image_type: ImageType::D3,
            format,
            extent,
            usage,
            memory,
            view: ViewDescriptor {
                view_type: ImageViewType::D3,
                format,
            },
        }
    }

    /// Replace the view sub-descriptor.
    pub fn with_view(mut self, view_type: ImageViewType, format: Format) -> Self {
        self.view = ViewDescriptor { view_type, format };
        self
    }

    /// Tightly packed size in bytes, if the format is known.
    pub fn packed_size(&self) -> Option<u64> {
        self.extent.texel_count()?.checked_mul(self.format.texel_size()?)
    }

    /// Check the descriptor before it reaches an allocator.
    pub fn validate(&self) -> Result<()> {
        let Extent3D {
            width,
            height,
            depth,
        } = self.extent;
        if width == 0 || height == 0 || depth == 0 {
            return Err(ResourceError::InvalidExtent);
        }
        let shape_ok = match self.image_type {
            ImageType::D1 => height == 1 && depth == 1,
            ImageType::D2 => depth == 1,
            ImageType::D3 => true,
        };
        if !shape_ok {
            return Err(ResourceError::InvalidExtent);
        }
        if self.format == Format::UNDEFINED || self.view.format == Format::UNDEFINED {
            return Err(ResourceError::UnsupportedFormat);
        }
        if self.usage.is_empty() {
            return Err(ResourceError::UnsupportedUsage);
        }
        Ok(())
    }
}

/// A device image, its view, and the memory bound to it.
///
/// This is a non-owning value: the [`Pool`](crate::Pool) that returned it
/// destroys the image and view on purge or drop.
#[derive(Debug, Clone)]
pub struct Image {
    handle: ImageHandle,
    view: ImageViewHandle,
    descriptor: ImageDescriptor,
    memory: Memory,
}

impl Image {
    pub(crate) fn new(
        handle: ImageHandle,
        view: ImageViewHandle,
        descriptor: ImageDescriptor,
        memory: Memory,
    ) -> Self {
        Self {
            handle,
            view,
            descriptor,
            memory,
        }
    }

    /// Native image handle.
    pub fn handle(&self) -> ImageHandle {
        self.handle
    }

    /// Native view handle.
    pub fn view(&self) -> ImageViewHandle {
        self.view
    }

    /// Descriptor the image was allocated with.
    pub fn descriptor(&self) -> &ImageDescriptor {
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
