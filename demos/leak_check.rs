//! Walks through the allocator's misuse detection: a leak, a double free,
//! and a null free, none of which crash or corrupt the heap.

use trackalloc::{HeapManager, Ptr};

fn main() {
    let mut heap = HeapManager::new();
    heap.set_debug_mode(true);

    let a = heap.allocate(128).unwrap();
    let b = heap.allocate(64).unwrap();
    let c = heap.allocate(32).unwrap();

    heap.deallocate(a).unwrap();
    println!(
        "Freed 1 of 3 pointers, leaks outstanding: {}",
        heap.detect_leaks()
    );

    // Freeing `a` again is refused and reported, not executed.
    if let Err(err) = heap.deallocate(a) {
        println!("Second free of {a} rejected: {err}");
    }

    // A null free is simply a no-op.
    heap.deallocate(Ptr::NULL).unwrap();

    heap.deallocate(b).unwrap();
    heap.deallocate(c).unwrap();
    println!("Leaks after freeing everything: {}", heap.detect_leaks());

    heap.print_status();
}
