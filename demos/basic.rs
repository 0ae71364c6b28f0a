use trackalloc::HeapManager;

fn main() {
    let mut heap = HeapManager::new();

    let message = b"heap testing";
    let ptr = heap.allocate(message.len()).expect("allocation failed");
    println!("Requested {} bytes, received {ptr}", message.len());

    heap.payload_mut(ptr).unwrap()[..message.len()].copy_from_slice(message);
    let stored = &heap.payload(ptr).unwrap()[..message.len()];
    println!("Payload now holds: {}", String::from_utf8_lossy(stored));

    let numbers = heap.allocate(8 * 4).expect("allocation failed");
    println!("Requested 32 bytes, received {numbers}");

    heap.print_status();

    heap.deallocate(ptr).unwrap();
    heap.deallocate(numbers).unwrap();

    println!("After returning both pointers:");
    heap.print_status();
}
