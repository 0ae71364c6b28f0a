use std::fmt;

use crate::utils::format_bytes;

/// Snapshot of the allocator's cumulative counters.
///
/// All four counters only ever increase. The byte counters account the
/// granted block capacity (the block's size after any split), which is fixed
/// for as long as a block is checked out, so every deallocation subtracts
/// exactly what its allocation added and
/// [`currently_allocated`](HeapStats::currently_allocated) can never
/// underflow.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct HeapStats {
    /// Cumulative bytes handed out.
    pub total_allocated: usize,
    /// Cumulative bytes returned.
    pub total_deallocated: usize,
    /// Number of successful allocations.
    pub allocation_count: usize,
    /// Number of successful deallocations.
    pub deallocation_count: usize,
}

impl HeapStats {
    /// Bytes currently checked out: cumulative allocated minus deallocated.
    pub fn currently_allocated(&self) -> usize {
        self.total_allocated - self.total_deallocated
    }

    pub(crate) fn record_alloc(&mut self, bytes: usize) {
        self.total_allocated += bytes;
        self.allocation_count += 1;
    }

    pub(crate) fn record_free(&mut self, bytes: usize) {
        self.total_deallocated += bytes;
        self.deallocation_count += 1;
    }
}

impl fmt::Display for HeapStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "total allocated:     {}", format_bytes(self.total_allocated))?;
        writeln!(f, "total deallocated:   {}", format_bytes(self.total_deallocated))?;
        writeln!(
            f,
            "currently allocated: {}",
            format_bytes(self.currently_allocated())
        )?;
        writeln!(f, "allocation count:    {}", self.allocation_count)?;
        write!(f, "deallocation count:  {}", self.deallocation_count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_accumulate() {
        let mut stats = HeapStats::default();

        stats.record_alloc(64);
        stats.record_alloc(32);
        stats.record_free(64);

        assert_eq!(stats.total_allocated, 96);
        assert_eq!(stats.total_deallocated, 64);
        assert_eq!(stats.allocation_count, 2);
        assert_eq!(stats.deallocation_count, 1);
        assert_eq!(stats.currently_allocated(), 32);
    }

    #[test]
    fn display_lists_every_counter() {
        let mut stats = HeapStats::default();
        stats.record_alloc(2048);

        let rendered = stats.to_string();
        assert!(rendered.contains("total allocated:     2.0 KB"));
        assert!(rendered.contains("allocation count:    1"));
    }
}
