//! Pool configuration.

/// Configuration for a resource pool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolConfig {
    /// Registry capacity is grown in batches of this many entries (default: 256)
    pub reserve_batch: usize,

    /// Byte budget across all live resources (0 = unlimited)
    pub memory_limit: u64,

    /// Name shown in diagnostics and traces
    pub label: String,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            reserve_batch: 256,
            memory_limit: 0,
            label: String::from("pool"),
        }
    }
}

impl PoolConfig {
    /// Create a minimal config for testing or constrained environments.
    pub fn minimal() -> Self {
        Self {
            reserve_batch: 16,
            memory_limit: 0,
            label: String::from("pool"),
        }
    }

    /// Builder pattern: set the registry reserve batch (clamped to at least 1).
    pub fn with_reserve_batch(mut self, batch: usize) -> Self {
        self.reserve_batch = batch.max(1);
        self
    }

    /// Builder pattern: set the pool memory budget.
    pub fn with_memory_limit(mut self, limit: u64) -> Self {
        self.memory_limit = limit;
        self
    }

    /// Builder pattern: set the diagnostics label.
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }
}
