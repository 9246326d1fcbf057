use std::ptr;

use libc::sbrk;
use rmalloc::LockedAllocator;

/// The process-wide allocator: one mutex, one heap, lazily initialized
/// on the first allocation.
static MALLOC: LockedAllocator = LockedAllocator::new();

/// Prints the current program break using `sbrk(0)`.
/// The program break is the upper boundary of the heap managed via brk/sbrk.
unsafe fn print_program_break(label: &str) {
  println!(
    "[{}] PID = {}, program break (sbrk(0)) = {:?}",
    label,
    std::process::id(),
    unsafe { sbrk(0) },
  );
}

fn main() {
  // Opt into allocator logs with e.g. RUST_LOG=debug.
  tracing_subscriber::fmt()
    .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
    .init();

  unsafe {
    // Initial heap state: nothing acquired yet.
    print_program_break("start");
    println!("heap size before first allocation = {} bytes", MALLOC.heap_size());

    // --------------------------------------------------------------------
    // 1) First allocation boots the heap: one page is acquired and the
    //    request is carved from its front.
    // --------------------------------------------------------------------
    let first = MALLOC.allocate(16);
    println!("\n[1] allocate(16) = {:?}", first);
    println!("[1] heap size after boot = {} bytes", MALLOC.heap_size());
    print_program_break("after boot");

    let first_ptr = first as *mut u32;
    first_ptr.write(0xDEADBEEF);
    println!("[1] value written through first = 0x{:X}", first_ptr.read());

    // --------------------------------------------------------------------
    // 2) A second allocation lands right behind the first one.
    // --------------------------------------------------------------------
    let second = MALLOC.allocate(100);
    println!("\n[2] allocate(100) = {:?}", second);
    ptr::write_bytes(second, 0xAB, 100);

    // --------------------------------------------------------------------
    // 3) Freeing and reallocating shows first-fit reuse: the freed block
    //    is the lowest-addressed candidate, so it is handed out again.
    // --------------------------------------------------------------------
    MALLOC.deallocate(first);
    let third = MALLOC.allocate(16);
    println!("\n[3] freed the first block, allocate(16) = {:?}", third);
    println!(
      "[3] third == first? {}",
      if third == first {
        "yes, the freed block was reused"
      } else {
        "no, it was placed elsewhere"
      }
    );

    // --------------------------------------------------------------------
    // 4) callocate returns zeroed memory.
    // --------------------------------------------------------------------
    let zeroed = MALLOC.callocate(10, 8);
    println!("\n[4] callocate(10, 8) = {:?}", zeroed);
    let all_zero = (0..80).all(|i| zeroed.add(i).read() == 0);
    println!("[4] all 80 bytes zero? {}", all_zero);

    // --------------------------------------------------------------------
    // 5) resize moves the payload into a bigger block, preserving the
    //    prefix; the old pointer is retired.
    // --------------------------------------------------------------------
    let grown = MALLOC.resize(zeroed, 200);
    println!("\n[5] resize(.., 200) = {:?} (moved from {:?})", grown, zeroed);
    let prefix_zero = (0..80).all(|i| grown.add(i).read() == 0);
    println!("[5] first 80 bytes still zero? {}", prefix_zero);

    // --------------------------------------------------------------------
    // 6) A large request bypasses the heap entirely: the program break
    //    does not move, the payload comes from an anonymous mapping.
    // --------------------------------------------------------------------
    print_program_break("before large alloc");
    let heap_before = MALLOC.heap_size();

    let big = MALLOC.allocate(200_000);
    println!("\n[6] allocate(200_000) = {:?}", big);
    println!(
      "[6] heap size unchanged? {} ({} bytes)",
      MALLOC.heap_size() == heap_before,
      MALLOC.heap_size()
    );
    print_program_break("after large alloc");

    MALLOC.deallocate(big);
    println!("[6] large allocation unmapped");

    // --------------------------------------------------------------------
    // 7) End of demo. Freed heap blocks coalesce back into one span;
    //    the break stays where it is until the process exits.
    // --------------------------------------------------------------------
    MALLOC.deallocate(second);
    MALLOC.deallocate(third);
    MALLOC.deallocate(grown);
    println!("\n[7] all blocks freed; heap size = {} bytes", MALLOC.heap_size());
    print_program_break("end");
  }
}
