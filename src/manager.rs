use std::collections::{HashMap, HashSet};

use log::{debug, error, warn};
use thiserror::Error;

use crate::block::{BlockHeader, BlockId, BlockState, HEADER_SIZE};
use crate::heap::{Heap, Ptr};
use crate::list::BlockList;
use crate::stats::HeapStats;
use crate::utils::{align, format_bytes};

/// Payload alignment boundary in bytes.
pub const ALIGNMENT: usize = 8;

/// Smallest payload worth carving out of an oversized free block. A split
/// that would leave a remainder below this is skipped and the whole block is
/// granted instead.
pub const MIN_BLOCK_SIZE: usize = 16;

/// Construction-time knobs for a [`HeapManager`]. Fixed for the manager's
/// whole lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeapConfig {
    /// Payload alignment boundary. Must be a power of two.
    pub alignment: usize,
    /// Split threshold: remainders below this are left as internal
    /// fragmentation.
    pub min_block_size: usize,
    /// Upper bound on the bytes requested from the host allocator.
    pub heap_limit: usize,
}

impl Default for HeapConfig {
    fn default() -> Self {
        Self {
            alignment: ALIGNMENT,
            min_block_size: MIN_BLOCK_SIZE,
            heap_limit: usize::MAX,
        }
    }
}

/// A rejected [`deallocate`](HeapManager::deallocate) call. The manager's
/// state is untouched when one of these comes back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum FreeError {
    /// The pointer was valid once but has already been returned.
    #[error("double free of {0}")]
    DoubleFree(Ptr),
    /// The pointer was never handed out by this manager.
    #[error("{0} does not belong to this heap")]
    UnknownPointer(Ptr),
}

/// A heap allocator over a doubly linked list of variable-sized blocks, with
/// leak and double-free detection.
///
/// The manager owns one block list in creation order (most recent first) and
/// one backing byte arena. `allocate` runs a first-fit scan over the list,
/// splits oversized free blocks, and grows the arena when nothing fits;
/// `deallocate` validates the pointer against the live-allocation table and
/// merges the freed block with any byte-adjacent free neighbour.
///
/// ```text
///              Block list (creation order)
///
///    +------+     +------+     +------+     +------+
///    | Used | <-> | Free | <-> | Used | <-> | Free |
///    +------+     +------+     +------+     +------+
///       |            |            |            |
///       v            v            v            v
///    [hdr|payload][hdr|payload][hdr|payload][hdr|payload]
///              Backing heap (one byte arena)
/// ```
///
/// Blocks are recycled through the list, never released individually; drop
/// reports any leaks and then returns the whole arena to the host at once.
///
/// The manager is single-threaded by construction: every operation takes
/// `&mut self` and runs to completion.
pub struct HeapManager {
    /// Every block ever created, most recent first.
    blocks: BlockList,
    /// Backing bytes for all block extents.
    heap: Heap,
    /// Outstanding pointers and the blocks backing them.
    live: HashMap<Ptr, BlockId>,
    /// Pointers that were valid once; tells a double free apart from a
    /// pointer that never belonged here.
    freed: HashSet<Ptr>,
    stats: HeapStats,
    config: HeapConfig,
    /// Verbose per-operation tracing. Observational only.
    debug_mode: bool,
}

impl HeapManager {
    pub fn new() -> Self {
        Self::with_config(HeapConfig::default())
    }

    pub fn with_config(config: HeapConfig) -> Self {
        assert!(
            config.alignment.is_power_of_two(),
            "alignment must be a power of two"
        );
        Self {
            blocks: BlockList::new(),
            heap: Heap::with_limit(config.heap_limit),
            live: HashMap::new(),
            freed: HashSet::new(),
            stats: HeapStats::default(),
            config,
            debug_mode: false,
        }
    }

    /// Allocates `size` bytes and returns a handle to a zeroed payload.
    ///
    /// The size is rounded up to the alignment boundary, then the block list
    /// is scanned first-fit. A hit reuses (and possibly splits) the free
    /// block; a miss requests `HEADER_SIZE + size` fresh bytes from the host
    /// and prepends a new block.
    ///
    /// Returns `None` for a zero-byte request or when the host refuses to
    /// grow the heap. Neither case disturbs existing state.
    pub fn allocate(&mut self, size: usize) -> Option<Ptr> {
        if size == 0 {
            if self.debug_mode {
                debug!("allocate: zero-byte request, nothing to do");
            }
            return None;
        }
        let size = align(size, self.config.alignment);

        let id = match self.find_free_block(size) {
            Some(id) => {
                self.blocks.get_mut(id).state = BlockState::Used;
                self.split_block(id, size);
                if self.debug_mode {
                    debug!(
                        "allocate: reusing free block at offset {:#x}",
                        self.blocks.get(id).offset
                    );
                }
                id
            }
            None => self.request_block(size)?,
        };

        let (payload, granted) = {
            let block = self.blocks.get(id);
            (block.payload_offset(), block.size)
        };
        self.heap.zero(payload, granted);

        let ptr = Ptr(payload);
        self.live.insert(ptr, id);
        self.freed.remove(&ptr);
        self.stats.record_alloc(granted);
        if self.debug_mode {
            debug!("allocate: {ptr} granted {granted} bytes");
        }
        Some(ptr)
    }

    /// Returns a payload to the heap.
    ///
    /// [`Ptr::NULL`] is a no-op. A pointer that is not currently outstanding
    /// is rejected without touching any state: [`FreeError::DoubleFree`] if
    /// it was outstanding once, [`FreeError::UnknownPointer`] if it never
    /// belonged here. A valid pointer marks its block free, updates the
    /// counters, and coalesces with byte-adjacent free neighbours.
    pub fn deallocate(&mut self, ptr: Ptr) -> Result<(), FreeError> {
        if ptr.is_null() {
            if self.debug_mode {
                debug!("deallocate: null pointer, nothing to do");
            }
            return Ok(());
        }

        let Some(id) = self.live.remove(&ptr) else {
            return Err(if self.freed.contains(&ptr) {
                warn!("deallocate: double free of {ptr}");
                FreeError::DoubleFree(ptr)
            } else {
                warn!("deallocate: {ptr} was never allocated here");
                FreeError::UnknownPointer(ptr)
            });
        };

        let (payload, size, state) = {
            let block = self.blocks.get(id);
            (block.payload_offset(), block.size, block.state)
        };
        // The payload must sit exactly one header reserve past its block.
        debug_assert_eq!(payload, ptr.offset());

        // The live table said this pointer was outstanding; a free block here
        // means the manager corrupted its own bookkeeping.
        if state == BlockState::Free {
            error!("deallocate: live pointer {ptr} maps to a free block");
            debug_assert!(false, "live pointer maps to a free block");
            return Ok(());
        }

        self.blocks.get_mut(id).state = BlockState::Free;
        self.freed.insert(ptr);
        self.stats.record_free(size);
        if self.debug_mode {
            debug!("deallocate: {ptr} returned {size} bytes");
        }
        self.coalesce(id);
        Ok(())
    }

    /// First-fit scan in list order: the first free block large enough wins.
    /// List order is creation order, so the most recent blocks are tried
    /// first.
    fn find_free_block(&self, size: usize) -> Option<BlockId> {
        self.blocks
            .iter()
            .find(|(_, block)| block.is_free() && block.size >= size)
            .map(|(id, _)| id)
    }

    /// Grows the heap by one header plus `size` payload bytes and prepends a
    /// new used block. Returns `None` with the list untouched when the host
    /// refuses.
    fn request_block(&mut self, size: usize) -> Option<BlockId> {
        let offset = match self.heap.grow(HEADER_SIZE + size) {
            Ok(offset) => offset,
            Err(_) => {
                warn!("allocate: host refused {} more bytes", HEADER_SIZE + size);
                return None;
            }
        };
        let id = self
            .blocks
            .push_front(BlockHeader::new(offset, size, BlockState::Used));
        if self.debug_mode {
            debug!("allocate: new block at offset {offset:#x} ({size} bytes)");
        }
        Some(id)
    }

    /// Carves `size` bytes out of an oversized block, leaving the rest as a
    /// free block linked right after it. No-op when the remainder would be
    /// too small to be worth tracking.
    fn split_block(&mut self, id: BlockId, size: usize) {
        let (offset, old_size) = {
            let block = self.blocks.get(id);
            (block.offset, block.size)
        };
        if old_size <= size + HEADER_SIZE + self.config.min_block_size {
            return;
        }

        let remainder = BlockHeader::new(
            offset + HEADER_SIZE + size,
            old_size - size - HEADER_SIZE,
            BlockState::Free,
        );
        let remainder_size = remainder.size;
        self.blocks.get_mut(id).size = size;
        self.blocks.insert_after(id, remainder);
        if self.debug_mode {
            debug!("split: kept {size} bytes, remainder {remainder_size} bytes");
        }
    }

    /// Merges a freshly freed block with any list neighbour that is free and
    /// byte-contiguous, repeating from the surviving block until neither side
    /// can merge. The list is in creation order, not address order, so
    /// contiguity is checked on byte offsets rather than assumed.
    fn coalesce(&mut self, start: BlockId) {
        let mut id = start;
        loop {
            let (prev, next) = {
                let block = self.blocks.get(id);
                (block.prev, block.next)
            };
            if let Some(merged) = next.and_then(|next| self.try_merge(id, next)) {
                id = merged;
                continue;
            }
            if let Some(merged) = prev.and_then(|prev| self.try_merge(id, prev)) {
                id = merged;
                continue;
            }
            break;
        }
    }

    /// Merges two list neighbours when both are free and the lower one's
    /// extent ends exactly where the higher one begins. The lower block
    /// absorbs the higher, which is unlinked and its slot recycled. Returns
    /// the surviving block.
    fn try_merge(&mut self, a: BlockId, b: BlockId) -> Option<BlockId> {
        if !self.blocks.get(a).is_free() || !self.blocks.get(b).is_free() {
            return None;
        }

        let (lo, hi) = if self.blocks.get(a).offset < self.blocks.get(b).offset {
            (a, b)
        } else {
            (b, a)
        };
        let lo_end = {
            let block = self.blocks.get(lo);
            block.offset + HEADER_SIZE + block.size
        };
        let (hi_offset, hi_size) = {
            let block = self.blocks.get(hi);
            (block.offset, block.size)
        };
        if lo_end != hi_offset {
            return None;
        }

        self.blocks.unlink(hi);
        self.blocks.get_mut(lo).size += HEADER_SIZE + hi_size;
        if self.debug_mode {
            let block = self.blocks.get(lo);
            debug!(
                "coalesce: merged into block at offset {:#x} ({} bytes)",
                block.offset, block.size
            );
        }
        Some(lo)
    }

    /// Read access to a live payload. `None` for anything that is not
    /// currently outstanding.
    pub fn payload(&self, ptr: Ptr) -> Option<&[u8]> {
        let id = *self.live.get(&ptr)?;
        let block = self.blocks.get(id);
        Some(self.heap.slice(block.payload_offset(), block.size))
    }

    /// Write access to a live payload. `None` for anything that is not
    /// currently outstanding.
    pub fn payload_mut(&mut self, ptr: Ptr) -> Option<&mut [u8]> {
        let id = *self.live.get(&ptr)?;
        let (offset, size) = {
            let block = self.blocks.get(id);
            (block.payload_offset(), block.size)
        };
        Some(self.heap.slice_mut(offset, size))
    }

    pub fn total_allocated(&self) -> usize {
        self.stats.total_allocated
    }

    pub fn total_deallocated(&self) -> usize {
        self.stats.total_deallocated
    }

    /// Bytes currently checked out, as cumulative allocated minus cumulative
    /// deallocated.
    pub fn currently_allocated(&self) -> usize {
        self.stats.currently_allocated()
    }

    pub fn allocation_count(&self) -> usize {
        self.stats.allocation_count
    }

    pub fn deallocation_count(&self) -> usize {
        self.stats.deallocation_count
    }

    /// Snapshot of all counters.
    pub fn stats(&self) -> HeapStats {
        self.stats
    }

    /// True iff at least one pointer is still outstanding.
    pub fn detect_leaks(&self) -> bool {
        !self.live.is_empty()
    }

    /// True iff `ptr` is currently outstanding.
    pub fn is_valid_pointer(&self, ptr: Ptr) -> bool {
        self.live.contains_key(&ptr)
    }

    /// Number of blocks in the list, free and used.
    pub fn block_count(&self) -> usize {
        self.blocks.len()
    }

    /// Bytes obtained from the host so far.
    pub fn heap_size(&self) -> usize {
        self.heap.len()
    }

    /// Toggles verbose per-operation tracing. Has no effect on any
    /// allocation decision.
    pub fn set_debug_mode(&mut self, enabled: bool) {
        self.debug_mode = enabled;
    }

    /// External fragmentation of the free space, in percent: 0 when all free
    /// bytes sit in one region, approaching 100 as they scatter across many.
    pub fn fragmentation(&self) -> f64 {
        let mut total = 0usize;
        let mut largest = 0usize;
        for (_, block) in &self.blocks {
            if block.is_free() {
                total += block.size;
                largest = largest.max(block.size);
            }
        }
        if total == 0 {
            0.0
        } else {
            100.0 * (1.0 - largest as f64 / total as f64)
        }
    }

    /// Dumps counters and leak status to stdout. Diagnostic output, not a
    /// stable interface.
    pub fn print_status(&self) {
        println!("=== heap status ===");
        println!("{}", self.stats);
        println!("blocks:              {}", self.blocks.len());
        println!("heap size:           {}", format_bytes(self.heap.len()));
        if self.detect_leaks() {
            println!("leaks: {} pointer(s) still outstanding", self.live.len());
        } else {
            println!("no leaks detected");
        }
        println!("===================");
    }

    /// Dumps every block in list order to stdout.
    pub fn print_free_list(&self) {
        println!("=== block list ===");
        if self.blocks.is_empty() {
            println!("no blocks created yet");
        }
        for (index, (_, block)) in self.blocks.iter().enumerate() {
            println!(
                "block {index}: offset={:#x} size={} {}",
                block.offset,
                block.size,
                if block.is_free() { "FREE" } else { "USED" },
            );
        }
        println!("==================");
    }
}

impl Default for HeapManager {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for HeapManager {
    /// Teardown reports leak status first; the block list and the whole
    /// arena then go back to the host in one piece, used blocks included.
    fn drop(&mut self) {
        if self.detect_leaks() {
            warn!(
                "heap dropped with {} unfreed allocation(s) ({} still checked out)",
                self.live.len(),
                format_bytes(self.stats.currently_allocated()),
            );
        }
    }
}
