//! Kernel sizing and configuration.

use alloc::vec::Vec;

use crate::error::ConfigError;
use crate::memory::BLOCK_HEADER_SIZE;
use crate::thread::THREAD_NAME_CAPACITY;
use crate::vector::Vector;

/// One size class of the memory pool: `count` blocks of `size` bytes, header
/// included.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryClass {
    pub size: usize,
    pub count: usize,
}

impl MemoryClass {
    pub const fn new(size: usize, count: usize) -> Self {
        Self { size, count }
    }

    /// Bytes available to the caller in each block.
    pub const fn usable(&self) -> usize {
        self.size.saturating_sub(BLOCK_HEADER_SIZE)
    }
}

/// Configuration for the kz kernel.
///
/// Every table in the kernel is sized from here once, at construction.
#[derive(Debug, Clone)]
pub struct KernelConfig {
    pub name: &'static str,
    pub max_threads: usize,
    pub priority_levels: usize,
    pub thread_name_len: usize,
    pub mailbox_count: usize,
    pub stack_arena_size: usize,
    pub memory_classes: Vec<MemoryClass>,
    pub vector_count: usize,
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self {
            name: "kz",
            max_threads: 6,
            priority_levels: 16,
            thread_name_len: THREAD_NAME_CAPACITY,
            mailbox_count: 4,
            stack_arena_size: 0x2000,
            memory_classes: alloc::vec![
                MemoryClass::new(16, 8),
                MemoryClass::new(32, 8),
                MemoryClass::new(64, 4),
            ],
            vector_count: 3,
        }
    }
}

impl KernelConfig {
    /// Creates a new kernel configuration builder.
    pub fn builder() -> KernelConfigBuilder {
        KernelConfigBuilder::default()
    }

    /// Lowest (numerically largest) priority.
    pub fn lowest_priority(&self) -> u8 {
        u8::try_from(self.priority_levels.saturating_sub(1)).unwrap_or(u8::MAX)
    }

    /// Checks the configuration for values the kernel cannot be built with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_threads == 0 || self.max_threads > usize::from(u8::MAX) {
            return Err(ConfigError::ThreadCount(self.max_threads));
        }
        if self.priority_levels == 0 || self.priority_levels > 256 {
            return Err(ConfigError::PriorityLevels(self.priority_levels));
        }
        if self.thread_name_len == 0 || self.thread_name_len > THREAD_NAME_CAPACITY {
            return Err(ConfigError::NameLength(self.thread_name_len));
        }
        if self.mailbox_count == 0 || self.mailbox_count > usize::from(u8::MAX) {
            return Err(ConfigError::MailboxCount(self.mailbox_count));
        }
        if self.stack_arena_size == 0 {
            return Err(ConfigError::StackArena);
        }
        let reserved = usize::from(Vector::SYSCALL.0) + 1;
        if self.vector_count < reserved || self.vector_count > usize::from(u8::MAX) {
            return Err(ConfigError::VectorCount(self.vector_count));
        }
        self.validate_memory()
    }

    fn validate_memory(&self) -> Result<(), ConfigError> {
        if self.memory_classes.is_empty() {
            return Err(ConfigError::NoMemoryClasses);
        }
        let mut previous = 0;
        let mut total = 0usize;
        for class in &self.memory_classes {
            if class.size <= BLOCK_HEADER_SIZE
                || class.size <= previous
                || class.size > usize::from(u16::MAX)
                || class.count == 0
            {
                return Err(ConfigError::MemoryClass(*class));
            }
            previous = class.size;
            total = total.saturating_add(class.size.saturating_mul(class.count));
        }
        // Free-list links are 16-bit arena offsets with two reserved values.
        if total > usize::from(u16::MAX - 1) {
            return Err(ConfigError::MemoryArena(total));
        }
        Ok(())
    }
}

/// Builder for ergonomic kernel configuration construction.
#[derive(Debug, Clone, Default)]
pub struct KernelConfigBuilder {
    config: KernelConfig,
}

impl KernelConfigBuilder {
    /// Sets the kernel name.
    pub fn name(mut self, name: &'static str) -> Self {
        self.config.name = name;
        self
    }

    /// Sets the number of thread table slots.
    pub fn max_threads(mut self, max: usize) -> Self {
        self.config.max_threads = max;
        self
    }

    pub fn priority_levels(mut self, levels: usize) -> Self {
        self.config.priority_levels = levels;
        self
    }

    /// Sets how many characters of a thread name are kept.
    pub fn thread_name_len(mut self, len: usize) -> Self {
        self.config.thread_name_len = len;
        self
    }

    pub fn mailbox_count(mut self, count: usize) -> Self {
        self.config.mailbox_count = count;
        self
    }

    /// Sets the size of the bump-only arena thread stacks are carved from.
    pub fn stack_arena_size(mut self, size: usize) -> Self {
        self.config.stack_arena_size = size;
        self
    }

    /// Replaces the memory pool size classes.
    ///
    /// Classes must be listed in increasing size order.
    pub fn memory_classes<I>(mut self, classes: I) -> Self
    where
        I: IntoIterator<Item = MemoryClass>,
    {
        self.config.memory_classes = classes.into_iter().collect();
        self
    }

    pub fn vector_count(mut self, count: usize) -> Self {
        self.config.vector_count = count;
        self
    }

    /// Builds the kernel configuration.
    pub fn build(self) -> KernelConfig {
        self.config
    }
}
