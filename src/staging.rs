// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
/*!
A pool of recycled CPU-side staging blocks.

Uploads and readbacks happen at high frequency with highly variable sizes;
allocating a fresh buffer per transfer churns the allocator badly.  The pool
keeps every block it has ever allocated and hands them back out by capacity:
`rent` picks the smallest free block whose capacity covers the request
(first fit over a capacity-ascending free list), and allocates a new block
only when nothing fits.

A rented [`StagingBlock`] owns its allocation and returns itself to the pool
when dropped, so a block threaded through a work item or recorded into a
command list is recycled as soon as its owner lets go.  Ids are assigned
monotonically and never reused for a different allocation, which makes reuse
observable: renting after freeing a fitting block hands back the same id.

The free-list scan is linear in the number of free blocks.  Transfer sizes
repeat heavily frame to frame (the same uniform and vertex updates), so the
list stays short and the first candidate is almost always an exact fit.
*/

use std::sync::{Arc, Mutex, Weak};

/// Blocks are never allocated smaller than this, so tiny repeated rents of
/// slightly different sizes all land on the same block.
pub const MIN_BLOCK_CAPACITY: usize = 1024;

struct FreeBlock {
    id: u32,
    data: Box<[u8]>,
}

struct PoolShared {
    //kept sorted by capacity, ascending
    free: Vec<FreeBlock>,
    next_id: u32,
    total_blocks: u32,
}

/// Thread-safe staging block pool.  Cheap to clone; clones share storage.
#[derive(Clone)]
pub struct StagingPool {
    shared: Arc<Mutex<PoolShared>>,
}

/// A capacity-tagged chunk of CPU memory rented from a [`StagingPool`].
///
/// `capacity` is fixed at allocation; `len` is the portion meaningful to the
/// current rental and is reset on every rent.  Dropping the block returns it
/// to its pool (if the pool is still alive).
pub struct StagingBlock {
    id: u32,
    len: usize,
    //Option so Drop can move the allocation back into the pool
    data: Option<Box<[u8]>>,
    pool: Weak<Mutex<PoolShared>>,
}

impl StagingPool {
    pub fn new() -> StagingPool {
        StagingPool {
            shared: Arc::new(Mutex::new(PoolShared {
                free: Vec::new(),
                next_id: 0,
                total_blocks: 0,
            })),
        }
    }

    /// Rents a block with `capacity >= size`; `len` is set to `size`.
    pub fn rent(&self, size: usize) -> StagingBlock {
        let mut shared = self.shared.lock().unwrap();
        //first fit over the capacity-ascending free list
        let position = shared.free.iter().position(|b| b.data.len() >= size);
        let (id, data) = match position {
            Some(index) => {
                let block = shared.free.remove(index);
                (block.id, block.data)
            }
            None => {
                let capacity = size.max(MIN_BLOCK_CAPACITY);
                let id = shared.next_id;
                shared.next_id += 1;
                shared.total_blocks += 1;
                logwise::trace_sync!(
                    "staging pool grew to {blocks} blocks (new capacity {capacity})",
                    blocks = shared.total_blocks,
                    capacity = capacity
                );
                (id, vec![0u8; capacity].into_boxed_slice())
            }
        };
        drop(shared);
        StagingBlock {
            id,
            len: size,
            data: Some(data),
            pool: Arc::downgrade(&self.shared),
        }
    }

    /// Rents a block and copies `bytes` into it.
    pub fn stage(&self, bytes: &[u8]) -> StagingBlock {
        let mut block = self.rent(bytes.len());
        block.as_mut_slice().copy_from_slice(bytes);
        block
    }

    /// Returns a block to the pool.  Equivalent to dropping it; provided so
    /// call sites can make the hand-back explicit.
    pub fn free(&self, block: StagingBlock) {
        drop(block);
    }

    /// Number of blocks ever allocated (free or rented).
    pub fn total_blocks(&self) -> u32 {
        self.shared.lock().unwrap().total_blocks
    }

    /// Number of blocks currently idle in the pool.
    pub fn free_blocks(&self) -> usize {
        self.shared.lock().unwrap().free.len()
    }
}

impl Default for StagingPool {
    fn default() -> Self {
        StagingPool::new()
    }
}

impl StagingBlock {
    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn capacity(&self) -> usize {
        self.data.as_ref().expect("block already freed").len()
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// The rented portion of the block.
    pub fn as_slice(&self) -> &[u8] {
        &self.data.as_ref().expect("block already freed")[..self.len]
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        let len = self.len;
        &mut self.data.as_mut().expect("block already freed")[..len]
    }

    /// A raw pointer to the start of the block.  The allocation does not move
    /// for the life of the rental, so the pointer stays valid until the block
    /// is dropped.
    pub(crate) fn as_mut_ptr(&mut self) -> *mut u8 {
        self.data.as_mut().expect("block already freed").as_mut_ptr()
    }
}

impl std::fmt::Debug for StagingBlock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StagingBlock")
            .field("id", &self.id)
            .field("len", &self.len)
            .field("capacity", &self.data.as_ref().map(|d| d.len()))
            .finish()
    }
}

impl Drop for StagingBlock {
    fn drop(&mut self) {
        let Some(data) = self.data.take() else {
            return;
        };
        if let Some(pool) = self.pool.upgrade() {
            let mut shared = pool.lock().unwrap();
            //insert preserving capacity-ascending order
            let capacity = data.len();
            let at = shared
                .free
                .iter()
                .position(|b| b.data.len() >= capacity)
                .unwrap_or(shared.free.len());
            shared.free.insert(at, FreeBlock { id: self.id, data });
        }
        //pool gone: the allocation just drops
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rent_capacity_covers_request() {
        let pool = StagingPool::new();
        for size in [1usize, 17, MIN_BLOCK_CAPACITY, MIN_BLOCK_CAPACITY * 3 + 5] {
            let block = pool.rent(size);
            assert!(block.capacity() >= size);
            assert_eq!(block.len(), size);
        }
    }

    #[test]
    fn free_then_rent_reuses_id() {
        let pool = StagingPool::new();
        let block = pool.rent(4096);
        let id = block.id();
        pool.free(block);
        //anything that fits in the freed block must come back with its id
        let again = pool.rent(100);
        assert_eq!(again.id(), id);
        assert_eq!(pool.total_blocks(), 1);
    }

    #[test]
    fn first_fit_prefers_smallest_eligible_capacity() {
        let pool = StagingPool::new();
        let small = pool.rent(MIN_BLOCK_CAPACITY);
        let large = pool.rent(MIN_BLOCK_CAPACITY * 8);
        let small_id = small.id();
        let large_id = large.id();
        pool.free(large);
        pool.free(small);
        //request fits both; the smaller block must win
        let got = pool.rent(MIN_BLOCK_CAPACITY / 2);
        assert_eq!(got.id(), small_id);
        //request fits only the larger
        let got2 = pool.rent(MIN_BLOCK_CAPACITY * 2);
        assert_eq!(got2.id(), large_id);
    }

    #[test]
    fn rent_grows_when_nothing_fits() {
        let pool = StagingPool::new();
        let a = pool.rent(64);
        assert_eq!(pool.total_blocks(), 1);
        //first block is rented out, so a second must be allocated
        let b = pool.rent(64);
        assert_eq!(pool.total_blocks(), 2);
        assert_ne!(a.id(), b.id());
    }

    #[test]
    fn stage_copies_bytes() {
        let pool = StagingPool::new();
        let block = pool.stage(&[1, 2, 3, 4]);
        assert_eq!(block.as_slice(), &[1, 2, 3, 4]);
    }

    #[test]
    fn len_resets_on_rerent() {
        let pool = StagingPool::new();
        let block = pool.rent(512);
        let capacity = block.capacity();
        pool.free(block);
        let again = pool.rent(8);
        assert_eq!(again.len(), 8);
        assert_eq!(again.capacity(), capacity);
    }

    #[test]
    fn block_outlives_pool() {
        let pool = StagingPool::new();
        let block = pool.stage(&[9u8; 32]);
        drop(pool);
        //the rental stays valid; drop just deallocates
        assert_eq!(block.as_slice()[0], 9);
        drop(block);
    }
}
