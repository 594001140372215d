//! Device memory handles and scoped host mapping.
//!
//! A [`Memory`] maps into host address space only through a guard that
//! borrows it. The guard unmaps when dropped, flushing first when the mapping
//! was writable, so a mapped slice can never outlive the memory handle that
//! produced it.
//!
//! Mapping a temporary is rejected by the borrow checker:
//!
//! ```compile_fail
//! use respool::{BufferDescriptor, BufferUsage, DummyAllocator, MemoryUsage, Pool};
//!
//! let mut pool = Pool::new(DummyAllocator::new());
//! let desc = BufferDescriptor::new(64, BufferUsage::STORAGE_BUFFER, MemoryUsage::CpuToGpu);
//! let data = pool.allocate_buffer(&desc).unwrap().memory().clone().map_read::<u32>().unwrap();
//! assert_eq!(data.len(), 16);
//! ```
//!
//! Binding the handle first is what the guard requires:
//!
//! ```
//! use respool::{BufferDescriptor, BufferUsage, DummyAllocator, MemoryUsage, Pool};
//!
//! let mut pool = Pool::new(DummyAllocator::new());
//! let desc = BufferDescriptor::new(64, BufferUsage::STORAGE_BUFFER, MemoryUsage::CpuToGpu);
//! let buffer = pool.allocate_buffer(&desc).unwrap();
//! {
//!     let mut data = buffer.memory().map_write::<u32>().unwrap();
//!     data.fill(7);
//! }
//! let data = buffer.memory().map_read::<u32>().unwrap();
//! assert!(data.iter().all(|&v| v == 7));
//! ```

use std::ops::{Deref, DerefMut};
use std::ptr::NonNull;
use std::sync::{Arc, Weak};

use bytemuck::Pod;

use crate::diagnostics::macros::rp_emit;
use crate::diagnostics::RP001;
use crate::gpu::traits::{AllocationId, AllocationInfo, ResourceError, Result};
use crate::resource::state::{Epoch, SharedState};

/// Host access requested for a mapping.
///
/// Valid values are [`READ`](Self::READ), [`WRITE`](Self::WRITE) and
/// [`READ_WRITE`](Self::READ_WRITE). Other bit patterns can be held (see
/// [`from_bits_retain`](Self::from_bits_retain)) but every map call rejects
/// them before touching the allocator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AccessFlags(u8);

impl AccessFlags {
    pub const READ: Self = Self(1 << 0);
    pub const WRITE: Self = Self(1 << 1);
    pub const READ_WRITE: Self = Self(Self::READ.0 | Self::WRITE.0);

    /// Validate raw bits.
    pub fn from_bits(bits: u8) -> Result<Self> {
        Self(bits).validate()
    }

    /// Keep raw bits as-is, valid or not.
    pub const fn from_bits_retain(bits: u8) -> Self {
        Self(bits)
    }

    /// Raw bits.
    pub const fn bits(self) -> u8 {
        self.0
    }

    /// True when every bit of `other` is set.
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    /// True for READ, WRITE and READ|WRITE.
    pub const fn is_valid(self) -> bool {
        matches!(self.0, 1..=3)
    }

    /// Return `self` if valid, `InvalidAccessFlags` otherwise.
    pub fn validate(self) -> Result<Self> {
        if self.is_valid() {
            Ok(self)
        } else {
            Err(ResourceError::InvalidAccessFlags(self.0))
        }
    }
}

impl std::ops::BitOr for AccessFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

mod sealed {
    pub trait Sealed {}
}

/// Type-level access mode for [`Memory::map`].
///
/// The mode picks the guard type: [`Read`] yields a [`ReadGuard`] that only
/// derefs to `&[T]`; [`Write`] and [`ReadWrite`] yield a [`WriteGuard`].
pub trait Access: sealed::Sealed {
    /// Flags this mode maps with.
    const FLAGS: AccessFlags;

    #[doc(hidden)]
    const ASSERT_VALID: () = assert!(Self::FLAGS.is_valid(), "Invalid memory access!");

    /// Guard handed out for this mode.
    type Guard<'m, T: Pod>;

    #[doc(hidden)]
    fn guard<'m, T: Pod>(scope: MappedScope<'m>, data: NonNull<T>, len: usize) -> Self::Guard<'m, T>;
}

/// Read-only access. Device writes are made visible before the slice is handed out.
#[derive(Debug, Clone, Copy)]
pub struct Read;

/// Write-only access. Host writes are flushed when the guard drops.
#[derive(Debug, Clone, Copy)]
pub struct Write;

/// Read and write access.
#[derive(Debug, Clone, Copy)]
pub struct ReadWrite;

impl sealed::Sealed for Read {}
impl sealed::Sealed for Write {}
impl sealed::Sealed for ReadWrite {}

impl Access for Read {
    const FLAGS: AccessFlags = AccessFlags::READ;
    type Guard<'m, T: Pod> = ReadGuard<'m, T>;

    fn guard<'m, T: Pod>(scope: MappedScope<'m>, data: NonNull<T>, len: usize) -> ReadGuard<'m, T> {
        ReadGuard { data, len, scope }
    }
}

impl Access for Write {
    const FLAGS: AccessFlags = AccessFlags::WRITE;
    type Guard<'m, T: Pod> = WriteGuard<'m, T>;

    fn guard<'m, T: Pod>(scope: MappedScope<'m>, data: NonNull<T>, len: usize) -> WriteGuard<'m, T> {
        WriteGuard { data, len, scope }
    }
}

impl Access for ReadWrite {
    const FLAGS: AccessFlags = AccessFlags::READ_WRITE;
    type Guard<'m, T: Pod> = WriteGuard<'m, T>;

    fn guard<'m, T: Pod>(scope: MappedScope<'m>, data: NonNull<T>, len: usize) -> WriteGuard<'m, T> {
        WriteGuard { data, len, scope }
    }
}

/// A handle to one device allocation.
///
/// Cloning is cheap and does not duplicate the allocation; the owning
/// [`Pool`](crate::Pool) releases it on purge.
#[derive(Clone)]
pub struct Memory {
    state: Weak<SharedState>,
    allocation: AllocationId,
    info: AllocationInfo,
    epoch: Epoch,
}

impl Memory {
    pub(crate) fn new(
        state: &Arc<SharedState>,
        allocation: AllocationId,
        info: AllocationInfo,
        epoch: Epoch,
    ) -> Self {
        Self {
            state: Arc::downgrade(state),
            allocation,
            info,
            epoch,
        }
    }

    /// Backend allocation id.
    pub fn allocation(&self) -> AllocationId {
        self.allocation
    }

    /// Allocator-reported metadata.
    pub fn info(&self) -> &AllocationInfo {
        &self.info
    }

    /// Size of the allocation in bytes.
    pub fn size(&self) -> u64 {
        self.info.size
    }

    /// False once the owning pool has been purged or dropped.
    pub fn is_alive(&self) -> bool {
        self.state
            .upgrade()
            .map_or(false, |state| state.is_current(self.epoch))
    }

    pub(crate) fn is_from(&self, state: &Arc<SharedState>) -> bool {
        std::ptr::eq(self.state.as_ptr(), Arc::as_ptr(state))
    }

    /// True while a guard for this allocation is live.
    pub fn is_mapped(&self) -> bool {
        self.state
            .upgrade()
            .map_or(false, |state| state.is_mapped(self.allocation))
    }

    /// Map for reading as a slice of `T`.
    pub fn map_read<T: Pod>(&self) -> Result<ReadGuard<'_, T>> {
        self.map::<T, Read>()
    }

    /// Map for writing as a mutable slice of `T`.
    ///
    /// Existing contents are not made visible to the host first; overwrite
    /// what you need.
    pub fn map_write<T: Pod>(&self) -> Result<WriteGuard<'_, T>> {
        self.map::<T, Write>()
    }

    /// Map for reading and writing as a mutable slice of `T`.
    pub fn map_read_write<T: Pod>(&self) -> Result<WriteGuard<'_, T>> {
        self.map::<T, ReadWrite>()
    }

    /// Map with a type-level access mode.
    ///
    /// The slice covers `size / size_of::<T>()` elements.
    pub fn map<T: Pod, A: Access>(&self) -> Result<A::Guard<'_, T>> {
        let () = A::ASSERT_VALID;
        let (scope, ptr) = self.open(A::FLAGS, std::mem::align_of::<T>())?;
        let len = element_count::<T>(self.info.size);
        Ok(A::guard(scope, ptr.cast::<T>(), len))
    }

    /// Map with runtime access flags as raw bytes.
    ///
    /// Invalid flags fail with [`ResourceError::InvalidAccessFlags`] before the
    /// allocator is called.
    pub fn map_bytes(&self, access: AccessFlags) -> Result<MappedBytes<'_>> {
        let (scope, data) = self.open(access, 1)?;
        let len = element_count::<u8>(self.info.size);
        Ok(MappedBytes { data, len, scope })
    }

    fn open(&self, access: AccessFlags, align: usize) -> Result<(MappedScope<'_>, NonNull<u8>)> {
        let access = access.validate()?;
        let state = self.state.upgrade().ok_or(ResourceError::UseAfterPurge)?;
        if !self.info.host_visible {
            return Err(ResourceError::NotHostVisible);
        }
        state.begin_mapping(self.allocation, self.epoch)?;

        let allocator = state.allocator();
        let ptr = match allocator.map(self.allocation) {
            Ok(ptr) => ptr,
            Err(err) => {
                state.end_mapping(self.allocation);
                return Err(err);
            }
        };

        let ready = if ptr.as_ptr().align_offset(align) != 0 {
            Err(ResourceError::BackendError(format!(
                "mapped pointer {:p} is not aligned to {}",
                ptr.as_ptr(),
                align
            )))
        } else if access.contains(AccessFlags::READ) {
            allocator.invalidate(self.allocation)
        } else {
            Ok(())
        };
        if let Err(err) = ready {
            allocator.unmap(self.allocation);
            state.end_mapping(self.allocation);
            return Err(err);
        }

        Ok((
            MappedScope {
                memory: self,
                state,
                access,
            },
            ptr,
        ))
    }
}

impl std::fmt::Debug for Memory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Memory")
            .field("allocation", &self.allocation)
            .field("info", &self.info)
            .field("epoch", &self.epoch)
            .finish()
    }
}

fn element_count<T>(size: u64) -> usize {
    usize::try_from(size)
        .unwrap_or(usize::MAX)
        .checked_div(std::mem::size_of::<T>())
        .unwrap_or(0)
}

/// The release half of a mapping.
///
/// Dropping it flushes (when the mapping was writable) and then always
/// unmaps, before control leaves the scope that owned it.
pub struct MappedScope<'m> {
    memory: &'m Memory,
    state: Arc<SharedState>,
    access: AccessFlags,
}

impl<'m> MappedScope<'m> {
    /// Access the mapping was opened with.
    pub fn access(&self) -> AccessFlags {
        self.access
    }

    /// The memory being mapped.
    pub fn memory(&self) -> &'m Memory {
        self.memory
    }
}

impl Drop for MappedScope<'_> {
    fn drop(&mut self) {
        let allocation = self.memory.allocation;
        let allocator = self.state.allocator();
        let flushed = if self.access.contains(AccessFlags::WRITE) {
            allocator.flush(allocation)
        } else {
            Ok(())
        };
        allocator.unmap(allocation);
        self.state.end_mapping(allocation);
        if let Err(err) = flushed {
            rp_emit!(release RP001, "allocation {:?}: {}", allocation, err);
        }
    }
}

/// Read-only mapped view of a [`Memory`].
pub struct ReadGuard<'m, T> {
    data: NonNull<T>,
    len: usize,
    scope: MappedScope<'m>,
}

impl<'m, T> ReadGuard<'m, T> {
    /// The release scope backing this guard.
    pub fn scope(&self) -> &MappedScope<'m> {
        &self.scope
    }
}

impl<T> Deref for ReadGuard<'_, T> {
    type Target = [T];

    fn deref(&self) -> &[T] {
        // SAFETY: the allocator mapped `len * size_of::<T>()` bytes at `data`,
        // aligned for `T`, and they stay mapped until `scope` drops. `T: Pod`
        // makes every bit pattern a valid `T`.
        unsafe { std::slice::from_raw_parts(self.data.as_ptr(), self.len) }
    }
}

/// Writable mapped view of a [`Memory`].
pub struct WriteGuard<'m, T> {
    data: NonNull<T>,
    len: usize,
    scope: MappedScope<'m>,
}

impl<'m, T> WriteGuard<'m, T> {
    /// The release scope backing this guard.
    pub fn scope(&self) -> &MappedScope<'m> {
        &self.scope
    }
}

impl<T> Deref for WriteGuard<'_, T> {
    type Target = [T];

    fn deref(&self) -> &[T] {
        // SAFETY: see `ReadGuard::deref`.
        unsafe { std::slice::from_raw_parts(self.data.as_ptr(), self.len) }
    }
}

impl<T> DerefMut for WriteGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut [T] {
        // SAFETY: see `ReadGuard::deref`; the pool's mapping tracker admits one
        // live guard per allocation, so this is the only view of these bytes.
        unsafe { std::slice::from_raw_parts_mut(self.data.as_ptr(), self.len) }
    }
}

/// Byte-level mapped view opened with runtime [`AccessFlags`].
pub struct MappedBytes<'m> {
    data: NonNull<u8>,
    len: usize,
    scope: MappedScope<'m>,
}

impl<'m> MappedBytes<'m> {
    /// Access the mapping was opened with.
    pub fn access(&self) -> AccessFlags {
        self.scope.access
    }

    /// Mapped bytes.
    pub fn as_bytes(&self) -> &[u8] {
        // SAFETY: see `ReadGuard::deref`.
        unsafe { std::slice::from_raw_parts(self.data.as_ptr(), self.len) }
    }

    /// Mutable mapped bytes; `None` unless opened with WRITE.
    pub fn as_bytes_mut(&mut self) -> Option<&mut [u8]> {
        if !self.scope.access.contains(AccessFlags::WRITE) {
            return None;
        }
        // SAFETY: see `WriteGuard::deref_mut`.
        Some(unsafe { std::slice::from_raw_parts_mut(self.data.as_ptr(), self.len) })
    }
}
