use std::fmt;

use thiserror::Error;

/// Opaque handle to an allocated payload.
///
/// A `Ptr` is the byte offset of the payload inside the backing heap, handed
/// out by [`allocate`](crate::HeapManager::allocate) and taken back by
/// [`deallocate`](crate::HeapManager::deallocate). It carries no capability:
/// reading or writing goes through the manager, which validates the handle
/// against its live-allocation table on every access.
///
/// [`Ptr::NULL`] plays the role of the C null pointer. No successful
/// allocation can produce it, because the first payload already sits one
/// header reserve into the heap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Ptr(pub(crate) usize);

impl Ptr {
    /// The null handle. Deallocating it is a no-op.
    pub const NULL: Ptr = Ptr(0);

    pub const fn is_null(self) -> bool {
        self.0 == 0
    }

    pub(crate) const fn offset(self) -> usize {
        self.0
    }
}

impl fmt::Display for Ptr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

/// The host refused to hand over more memory.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("backing heap exhausted")]
pub(crate) struct HeapExhausted;

/// Backing storage for every block extent.
///
/// The bytes come from the host's general-purpose allocator as one growable
/// arena; block machinery above this layer works purely in offsets.
/// Consecutive [`grow`](Heap::grow) calls return byte-contiguous extents,
/// which is what makes coalescing of neighbouring blocks meaningful.
///
/// A configurable byte limit models host-memory exhaustion: growth past the
/// limit is refused as a value, the arena is left untouched, and the caller
/// can carry on.
pub(crate) struct Heap {
    bytes: Vec<u8>,
    limit: usize,
}

impl Heap {
    pub fn with_limit(limit: usize) -> Self {
        Self {
            bytes: Vec::new(),
            limit,
        }
    }

    /// Bytes obtained from the host so far.
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// Requests `len` fresh zeroed bytes and returns the offset of the new
    /// extent. The arena is unchanged when the request is refused.
    pub fn grow(&mut self, len: usize) -> Result<usize, HeapExhausted> {
        let offset = self.bytes.len();
        let total = offset.checked_add(len).ok_or(HeapExhausted)?;
        if total > self.limit {
            return Err(HeapExhausted);
        }
        self.bytes.try_reserve(len).map_err(|_| HeapExhausted)?;
        self.bytes.resize(total, 0);
        Ok(offset)
    }

    pub fn slice(&self, offset: usize, len: usize) -> &[u8] {
        &self.bytes[offset..offset + len]
    }

    pub fn slice_mut(&mut self, offset: usize, len: usize) -> &mut [u8] {
        &mut self.bytes[offset..offset + len]
    }

    pub fn zero(&mut self, offset: usize, len: usize) {
        self.slice_mut(offset, len).fill(0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grow_returns_contiguous_extents() {
        let mut heap = Heap::with_limit(usize::MAX);

        let first = heap.grow(64).unwrap();
        let second = heap.grow(32).unwrap();

        assert_eq!(first, 0);
        assert_eq!(second, 64);
        assert_eq!(heap.len(), 96);
    }

    #[test]
    fn limit_refuses_growth_without_side_effects() {
        let mut heap = Heap::with_limit(100);

        assert!(heap.grow(64).is_ok());
        assert_eq!(heap.grow(64), Err(HeapExhausted));
        assert_eq!(heap.len(), 64);
    }

    #[test]
    fn zero_clears_previous_contents() {
        let mut heap = Heap::with_limit(usize::MAX);
        let offset = heap.grow(16).unwrap();

        heap.slice_mut(offset, 16).fill(0xFF);
        heap.zero(offset, 16);

        assert!(heap.slice(offset, 16).iter().all(|&byte| byte == 0));
    }

    #[test]
    fn null_ptr_is_distinct_from_real_offsets() {
        assert!(Ptr::NULL.is_null());
        assert!(!Ptr(8).is_null());
        assert_eq!(format!("{}", Ptr(0x40)), "0x40");
    }
}
