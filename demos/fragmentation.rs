//! Shows how the free list fragments under churn and how coalescing stitches
//! it back together.

use trackalloc::HeapManager;

fn main() {
    let mut heap = HeapManager::new();

    let ptrs: Vec<_> = (0..8).map(|_| heap.allocate(32).unwrap()).collect();
    println!("Allocated {} blocks of 32 bytes", ptrs.len());

    for ptr in ptrs.iter().step_by(2) {
        heap.deallocate(*ptr).unwrap();
    }
    println!(
        "Freed every other block, fragmentation: {:.1}%",
        heap.fragmentation()
    );
    heap.print_free_list();

    for ptr in ptrs.iter().skip(1).step_by(2) {
        heap.deallocate(*ptr).unwrap();
    }
    println!(
        "Freed the rest, fragmentation: {:.1}%",
        heap.fragmentation()
    );
    heap.print_free_list();

    // The coalesced region now serves a request none of the original
    // 32-byte blocks could have held.
    let big = heap.allocate(200).unwrap();
    println!("Reused the coalesced region for 200 bytes at {big}");
    heap.deallocate(big).unwrap();
}
