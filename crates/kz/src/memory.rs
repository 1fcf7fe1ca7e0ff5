//! Fixed size-class memory pool.
//!
//! Every block is carved once from a single arena at construction. Each block
//! starts with a 4-byte header, the class size followed by the free-list
//! link, and the rest is payload. Allocation takes the smallest class whose
//! payload fits; freeing reads the header in front of the pointer. There is no
//! splitting, coalescing or growth.

use core::fmt;

use alloc::boxed::Box;
use alloc::vec::Vec;

use thiserror::Error;

use crate::config::MemoryClass;
use crate::sync::{Arc, Mutex};

/// Bytes in front of every payload.
pub const BLOCK_HEADER_SIZE: usize = 4;

const LINK_NONE: u16 = 0xFFFF;
const LINK_ALLOCATED: u16 = 0xFFFE;

/// Memory pool shared between the kernel and running threads.
pub type SharedMemory = Arc<Mutex<MemoryPool>>;

/// Handle to an allocated block: the arena offset of its payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BlockPtr(u16);

impl BlockPtr {
    pub fn offset(self) -> usize {
        usize::from(self.0)
    }
}

impl fmt::Display for BlockPtr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#06x}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum MemoryError {
    #[error("no size class holds {size} bytes")]
    TooLarge { size: usize },
    #[error("size class {class_size} exhausted")]
    Exhausted { class_size: usize },
    #[error("block {offset:#06x} has corrupt header size {size}")]
    Corrupt { offset: usize, size: usize },
    #[error("block {offset:#06x} freed twice")]
    DoubleFree { offset: usize },
    #[error("{offset:#06x} is not a block")]
    InvalidPointer { offset: usize },
    #[error("{len} bytes do not fit a {usable}-byte block")]
    Overflow { len: usize, usable: usize },
}

/// Per-class counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStats {
    pub block_size: usize,
    pub total: usize,
    pub free: usize,
    pub min_free: usize,
}

impl PoolStats {
    pub fn used(&self) -> usize {
        self.total - self.free
    }
}

struct SizeClass {
    size: usize,
    count: usize,
    base: usize,
    head: u16,
    free: usize,
    min_free: usize,
}

impl SizeClass {
    fn holds(&self, header: usize) -> bool {
        header >= self.base
            && header < self.base + self.size * self.count
            && (header - self.base) % self.size == 0
    }
}

pub struct MemoryPool {
    arena: Box<[u8]>,
    classes: Vec<SizeClass>,
}

impl MemoryPool {
    /// Carves every class from one arena and threads its free list.
    ///
    /// Classes are expected in increasing size order, as checked by
    /// [`KernelConfig::validate`](crate::KernelConfig::validate).
    pub fn new(layout: &[MemoryClass]) -> Self {
        let total = layout.iter().map(|c| c.size * c.count).sum();
        let mut pool = Self {
            arena: alloc::vec![0u8; total].into_boxed_slice(),
            classes: Vec::with_capacity(layout.len()),
        };

        let mut base = 0;
        for class in layout {
            let mut head = LINK_NONE;
            // Link back to front so the lowest block is handed out first.
            for index in (0..class.count).rev() {
                let header = base + index * class.size;
                pool.write_header(header, class.size as u16, head);
                head = header as u16;
            }
            pool.classes.push(SizeClass {
                size: class.size,
                count: class.count,
                base,
                head,
                free: class.count,
                min_free: class.count,
            });
            base += class.size * class.count;
        }
        pool
    }

    pub fn shared(layout: &[MemoryClass]) -> SharedMemory {
        Arc::new(Mutex::new(Self::new(layout)))
    }

    /// Takes a block from the smallest class whose payload holds `size` bytes.
    pub fn alloc(&mut self, size: usize) -> Result<BlockPtr, MemoryError> {
        let class = self
            .classes
            .iter_mut()
            .find(|class| class.size.saturating_sub(BLOCK_HEADER_SIZE) >= size)
            .ok_or(MemoryError::TooLarge { size })?;
        if class.head == LINK_NONE {
            return Err(MemoryError::Exhausted {
                class_size: class.size,
            });
        }

        let header = usize::from(class.head);
        let next = read_u16(&self.arena, header + 2);
        class.head = next;
        class.free -= 1;
        class.min_free = class.min_free.min(class.free);
        write_u16(&mut self.arena, header + 2, LINK_ALLOCATED);

        Ok(BlockPtr((header + BLOCK_HEADER_SIZE) as u16))
    }

    /// Returns a block to its class's free list.
    pub fn free(&mut self, block: BlockPtr) -> Result<(), MemoryError> {
        let header = self.allocated_header(block)?;
        let index = self.class_index(header)?;
        let class = &mut self.classes[index];
        write_u16(&mut self.arena, header + 2, class.head);
        class.head = header as u16;
        class.free += 1;
        Ok(())
    }

    /// Payload of an allocated block.
    pub fn payload(&self, block: BlockPtr) -> Result<&[u8], MemoryError> {
        let header = self.allocated_header(block)?;
        let size = self.classes[self.class_index(header)?].size;
        Ok(&self.arena[header + BLOCK_HEADER_SIZE..header + size])
    }

    pub fn payload_mut(&mut self, block: BlockPtr) -> Result<&mut [u8], MemoryError> {
        let header = self.allocated_header(block)?;
        let size = self.classes[self.class_index(header)?].size;
        Ok(&mut self.arena[header + BLOCK_HEADER_SIZE..header + size])
    }

    /// Copies `data` to the start of a block.
    pub fn write(&mut self, block: BlockPtr, data: &[u8]) -> Result<(), MemoryError> {
        let payload = self.payload_mut(block)?;
        if data.len() > payload.len() {
            return Err(MemoryError::Overflow {
                len: data.len(),
                usable: payload.len(),
            });
        }
        payload[..data.len()].copy_from_slice(data);
        Ok(())
    }

    /// Copies the first `len` bytes of a block out.
    pub fn read(&self, block: BlockPtr, len: usize) -> Result<Vec<u8>, MemoryError> {
        let payload = self.payload(block)?;
        if len > payload.len() {
            return Err(MemoryError::Overflow {
                len,
                usable: payload.len(),
            });
        }
        Ok(payload[..len].to_vec())
    }

    /// Header size of the class serving `block`.
    pub fn block_size(&self, block: BlockPtr) -> Result<usize, MemoryError> {
        let header = self.allocated_header(block)?;
        Ok(self.classes[self.class_index(header)?].size)
    }

    pub fn stats(&self) -> Vec<PoolStats> {
        self.classes
            .iter()
            .map(|class| PoolStats {
                block_size: class.size,
                total: class.count,
                free: class.free,
                min_free: class.min_free,
            })
            .collect()
    }

    fn allocated_header(&self, block: BlockPtr) -> Result<usize, MemoryError> {
        let offset = block.offset();
        let header = offset
            .checked_sub(BLOCK_HEADER_SIZE)
            .filter(|&header| self.classes.iter().any(|class| class.holds(header)))
            .ok_or(MemoryError::InvalidPointer { offset })?;
        self.class_index(header)?;
        if read_u16(&self.arena, header + 2) != LINK_ALLOCATED {
            return Err(MemoryError::DoubleFree { offset });
        }
        Ok(header)
    }

    /// Class owning the block at `header`, cross-checked against its header.
    fn class_index(&self, header: usize) -> Result<usize, MemoryError> {
        let size = usize::from(read_u16(&self.arena, header));
        self.classes
            .iter()
            .position(|class| class.holds(header) && class.size == size)
            .ok_or(MemoryError::Corrupt {
                offset: header + BLOCK_HEADER_SIZE,
                size,
            })
    }

    fn write_header(&mut self, header: usize, size: u16, link: u16) {
        write_u16(&mut self.arena, header, size);
        write_u16(&mut self.arena, header + 2, link);
    }
}

fn read_u16(arena: &[u8], at: usize) -> u16 {
    u16::from_le_bytes([arena[at], arena[at + 1]])
}

fn write_u16(arena: &mut [u8], at: usize, value: u16) {
    arena[at..at + 2].copy_from_slice(&value.to_le_bytes());
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::KernelConfig;

    fn pool() -> MemoryPool {
        MemoryPool::new(&KernelConfig::default().memory_classes)
    }

    #[test]
    fn smallest_fitting_class_is_used() {
        let mut pool = pool();

        let small = pool.alloc(10).unwrap();
        let exact = pool.alloc(12).unwrap();
        let medium = pool.alloc(13).unwrap();
        let large = pool.alloc(60).unwrap();

        assert_eq!(pool.block_size(small).unwrap(), 16);
        assert_eq!(pool.block_size(exact).unwrap(), 16);
        assert_eq!(pool.block_size(medium).unwrap(), 32);
        assert_eq!(pool.block_size(large).unwrap(), 64);
        assert_eq!(pool.alloc(61), Err(MemoryError::TooLarge { size: 61 }));
    }

    #[test]
    fn class_exhaustion_is_reported() {
        let mut pool = pool();
        for _ in 0..8 {
            pool.alloc(10).unwrap();
        }
        assert_eq!(
            pool.alloc(10),
            Err(MemoryError::Exhausted { class_size: 16 })
        );
        assert_eq!(pool.stats()[0].free, 0);
        assert_eq!(pool.stats()[1].free, 8);
    }

    #[test]
    fn freed_block_is_reused_lifo() {
        let mut pool = pool();
        let a = pool.alloc(20).unwrap();
        let b = pool.alloc(20).unwrap();
        assert_ne!(a, b);

        pool.free(a).unwrap();
        assert_eq!(pool.alloc(20).unwrap(), a);
        assert_eq!(pool.stats()[1].min_free, 6);
    }

    #[test]
    fn live_blocks_never_overlap() {
        let mut pool = pool();
        let mut ranges = Vec::new();
        for size in [1, 12, 12, 28, 5, 60, 40] {
            let block = pool.alloc(size).unwrap();
            let usable = pool.payload(block).unwrap().len();
            assert!(usable >= size);
            ranges.push((block.offset(), block.offset() + usable));
        }
        ranges.sort();
        for pair in ranges.windows(2) {
            assert!(pair[0].1 + BLOCK_HEADER_SIZE <= pair[1].0);
        }
    }

    #[test]
    fn double_free_is_detected() {
        let mut pool = pool();
        let block = pool.alloc(4).unwrap();
        pool.free(block).unwrap();
        assert_eq!(
            pool.free(block),
            Err(MemoryError::DoubleFree {
                offset: block.offset()
            })
        );
    }

    #[test]
    fn corrupt_header_is_detected() {
        let mut pool = pool();
        let block = pool.alloc(4).unwrap();
        let header = block.offset() - BLOCK_HEADER_SIZE;
        write_u16(&mut pool.arena, header, 24);

        assert_eq!(
            pool.free(block),
            Err(MemoryError::Corrupt {
                offset: block.offset(),
                size: 24
            })
        );
    }

    #[test]
    fn pointer_inside_payload_is_rejected() {
        let mut pool = pool();
        let block = pool.alloc(28).unwrap();
        let inner = BlockPtr(block.0 + 8);
        assert!(pool.free(inner).is_err());
    }

    #[test]
    fn write_and_read_back_payload() {
        let mut pool = pool();
        let block = pool.alloc(5).unwrap();
        pool.write(block, b"hello").unwrap();

        assert_eq!(pool.read(block, 5).unwrap(), b"hello".to_vec());
        assert_eq!(
            pool.write(block, &[0u8; 13]),
            Err(MemoryError::Overflow { len: 13, usable: 12 })
        );
    }
}
