//! State shared between a pool and the memory handles it hands out.
//!
//! The pool holds the only strong reference; memory handles hold weak ones and
//! mapping guards upgrade for the duration of a mapping. Every purge bumps the
//! epoch, which is how handles from before the purge are recognized.

use std::collections::HashSet;
use std::sync::Arc;

use crate::diagnostics::macros::rp_emit;
use crate::diagnostics::RP002;
use crate::gpu::traits::{
    AllocationId, BufferHandle, ImageHandle, ImageViewHandle, ResourceAllocator, ResourceError,
    Result,
};
use crate::sync::mutex::Mutex;

/// Purge counter carried by every handle a pool returns.
pub(crate) type Epoch = u64;

/// Self-contained release action for one registered resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Release {
    Buffer {
        handle: BufferHandle,
        allocation: AllocationId,
    },
    Image {
        handle: ImageHandle,
        view: ImageViewHandle,
        allocation: AllocationId,
    },
}

impl Release {
    pub(crate) fn allocation(&self) -> AllocationId {
        match *self {
            Release::Buffer { allocation, .. } | Release::Image { allocation, .. } => allocation,
        }
    }

    pub(crate) fn run(self, allocator: &dyn ResourceAllocator) {
        match self {
            Release::Buffer { handle, allocation } => allocator.destroy_buffer(handle, allocation),
            Release::Image {
                handle,
                view,
                allocation,
            } => allocator.destroy_image(handle, view, allocation),
        }
    }
}

/// A release held back by a live mapping, with the bytes it still holds.
#[derive(Debug, Clone, Copy)]
struct Orphan {
    release: Release,
    bytes: u64,
}

#[derive(Default)]
struct Tracker {
    epoch: Epoch,
    mapped: HashSet<AllocationId>,
    /// Purged while mapped; released when the mapping ends.
    orphans: Vec<Orphan>,
    deferred_bytes: u64,
}

pub(crate) struct SharedState {
    allocator: Box<dyn ResourceAllocator>,
    tracker: Mutex<Tracker>,
}

impl SharedState {
    pub(crate) fn new(allocator: Box<dyn ResourceAllocator>) -> Arc<Self> {
        Arc::new(Self {
            allocator,
            tracker: Mutex::new(Tracker::default()),
        })
    }

    pub(crate) fn allocator(&self) -> &dyn ResourceAllocator {
        self.allocator.as_ref()
    }

    pub(crate) fn epoch(&self) -> Epoch {
        self.tracker.lock().epoch
    }

    pub(crate) fn is_current(&self, epoch: Epoch) -> bool {
        self.tracker.lock().epoch == epoch
    }

    pub(crate) fn is_mapped(&self, allocation: AllocationId) -> bool {
        self.tracker.lock().mapped.contains(&allocation)
    }

    /// Bytes purged but not yet released because their mapping is live.
    pub(crate) fn deferred_bytes(&self) -> u64 {
        self.tracker.lock().deferred_bytes
    }

    /// Claim `allocation` for a mapping. The epoch check and the claim happen
    /// under one lock so a concurrent purge cannot slip in between.
    pub(crate) fn begin_mapping(&self, allocation: AllocationId, epoch: Epoch) -> Result<()> {
        let mut tracker = self.tracker.lock();
        if tracker.epoch != epoch {
            return Err(ResourceError::UseAfterPurge);
        }
        if !tracker.mapped.insert(allocation) {
            return Err(ResourceError::AlreadyMapped);
        }
        Ok(())
    }

    /// Drop the mapping claim and run a release that was deferred by a purge.
    pub(crate) fn end_mapping(&self, allocation: AllocationId) {
        let orphan = {
            let mut tracker = self.tracker.lock();
            tracker.mapped.remove(&allocation);
            let index = tracker
                .orphans
                .iter()
                .position(|orphan| orphan.release.allocation() == allocation);
            let orphan = index.map(|index| tracker.orphans.swap_remove(index));
            if let Some(orphan) = &orphan {
                tracker.deferred_bytes -= orphan.bytes;
            }
            orphan
        };
        if let Some(orphan) = orphan {
            orphan.release.run(self.allocator());
        }
    }

    /// Advance the epoch and run every release. Releases whose memory is still
    /// mapped are deferred to [`end_mapping`](Self::end_mapping).
    ///
    /// Each release comes with the bytes it frees. Returns the number of
    /// deferred releases.
    pub(crate) fn retire(&self, releases: impl IntoIterator<Item = (Release, u64)>) -> usize {
        let mut ready = Vec::new();
        let deferred = {
            let mut tracker = self.tracker.lock();
            tracker.epoch += 1;
            let before = tracker.orphans.len();
            for (release, bytes) in releases {
                if tracker.mapped.contains(&release.allocation()) {
                    tracker.orphans.push(Orphan { release, bytes });
                    tracker.deferred_bytes += bytes;
                } else {
                    ready.push(release);
                }
            }
            tracker.orphans.len() - before
        };

        for release in ready {
            release.run(self.allocator());
        }
        if deferred > 0 {
            rp_emit!(release RP002, "{} resource(s) deferred until unmapped", deferred);
        }
        deferred
    }
}

impl std::fmt::Debug for SharedState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedState")
            .field("allocator", &self.allocator.name())
            .field("epoch", &self.epoch())
            .finish()
    }
}
