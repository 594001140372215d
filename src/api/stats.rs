//! Pool statistics.

use crate::util::size::format_bytes;

/// Aggregated pool statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PoolStats {
    /// Buffers currently registered.
    pub live_buffers: usize,

    /// Images currently registered.
    pub live_images: usize,

    /// Bytes held by registered resources. Purged resources whose release
    /// waits on a live mapping are counted by
    /// [`Pool::deferred_bytes`](crate::Pool::deferred_bytes) instead.
    pub live_bytes: u64,

    /// Peak of `live_bytes` (high water mark).
    pub peak_bytes: u64,

    /// Buffers allocated over the pool's lifetime.
    pub buffers_allocated: u64,

    /// Images allocated over the pool's lifetime.
    pub images_allocated: u64,

    /// Allocation requests that failed.
    pub failed_allocations: u64,

    /// Number of purges performed.
    pub purge_count: u64,
}

impl PoolStats {
    /// Resources currently registered.
    pub fn live_resources(&self) -> usize {
        self.live_buffers + self.live_images
    }

    pub(crate) fn record_alloc(&mut self, bytes: u64) {
        self.live_bytes += bytes;
        self.peak_bytes = self.peak_bytes.max(self.live_bytes);
    }

    pub(crate) fn record_purge(&mut self) {
        self.live_buffers = 0;
        self.live_images = 0;
        self.live_bytes = 0;
        self.purge_count += 1;
    }
}

impl std::fmt::Display for PoolStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Pool Statistics:")?;
        writeln!(f, "  Live buffers:    {}", self.live_buffers)?;
        writeln!(f, "  Live images:     {}", self.live_images)?;
        writeln!(f, "  Live memory:     {}", format_bytes(self.live_bytes))?;
        writeln!(f, "  Peak memory:     {}", format_bytes(self.peak_bytes))?;
        writeln!(f, "  Failed requests: {}", self.failed_allocations)?;
        writeln!(f, "  Purges:          {}", self.purge_count)?;
        Ok(())
    }
}
