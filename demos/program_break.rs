use std::{io::Read, ptr};

use segalloc::{ProgramBreak, SegregatedAllocator};

/// Waits until the user presses ENTER.
/// Useful when you want to inspect memory state with tools like `pmap` or
/// `gdb`, or just to watch how the program break moves between steps.
fn block_until_enter_pressed() {
  println!("\n>>> Press ENTER to continue...");
  let _ = std::io::stdin().bytes().next();
}

/// Prints the current program break (`sbrk(0)`).
fn print_program_break(label: &str) {
  println!(
    "[{}] PID = {}, program break (sbrk(0)) = {:?}",
    label,
    std::process::id(),
    ProgramBreak::current(),
  );
}

/// Prints every block of the heap in address order.
fn print_heap(allocator: &SegregatedAllocator<ProgramBreak>) {
  println!(
    "    heap: {} bytes, {} free",
    allocator.heap_size(),
    allocator.free_bytes()
  );
  for block in allocator.blocks() {
    println!(
      "    {:#x} size={:<6} {}{}",
      block.address,
      block.size,
      if block.allocated { "allocated" } else { "free" },
      if block.pinned { " (pinned)" } else { "" },
    );
  }
}

fn main() {
  let mut allocator = SegregatedAllocator::with_source(ProgramBreak::new());

  unsafe {
    print_program_break("start");
    block_until_enter_pressed();

    // --------------------------------------------------------------------
    // 1) First allocation: lays down the sentinels and the initial chunk.
    // --------------------------------------------------------------------
    let first = allocator.allocate(4) as *mut u32;
    first.write(0xDEADBEEF);
    println!("\n[1] Allocate 4 bytes at {:?}, value = 0x{:X}", first, first.read());
    print_heap(&allocator);
    print_program_break("after init");

    block_until_enter_pressed();

    // --------------------------------------------------------------------
    // 2) A few more small blocks.
    // --------------------------------------------------------------------
    let second = allocator.allocate(12);
    ptr::write_bytes(second, 0xAB, 12);
    let third = allocator.allocate(32);
    println!("\n[2] Allocate 12 bytes at {:?} and 32 bytes at {:?}", second, third);
    print_heap(&allocator);

    block_until_enter_pressed();

    // --------------------------------------------------------------------
    // 3) Free the middle block: it goes back to a free list and is reused
    //    by the next request that fits.
    // --------------------------------------------------------------------
    allocator.free(second);
    let reused = allocator.allocate(8);
    println!(
      "\n[3] Freed {:?}, then allocated 8 bytes at {:?} (reused: {})",
      second,
      reused,
      reused == second
    );
    print_heap(&allocator);

    block_until_enter_pressed();

    // --------------------------------------------------------------------
    // 4) Grow a block with reallocate. The contents survive the move and
    //    the block after it gets pinned for the next growth.
    // --------------------------------------------------------------------
    let grown = allocator.reallocate(first as *mut u8, 200) as *mut u32;
    println!(
      "\n[4] Reallocate 4 -> 200 bytes: {:?} -> {:?}, value = 0x{:X}",
      first,
      grown,
      grown.read()
    );
    print_heap(&allocator);

    block_until_enter_pressed();

    // --------------------------------------------------------------------
    // 5) A large block moves the program break.
    // --------------------------------------------------------------------
    print_program_break("before large alloc");
    let big = allocator.allocate(64 * 1024);
    println!("\n[5] Allocate 64 KiB at {:?}", big);
    print_program_break("after large alloc");

    block_until_enter_pressed();

    // --------------------------------------------------------------------
    // 6) Free everything. The blocks coalesce back together, but the break
    //    never moves down again.
    // --------------------------------------------------------------------
    for address in [grown as *mut u8, reused, third, big] {
      allocator.free(address);
    }
    println!("\n[6] Freed everything");
    print_heap(&allocator);
    println!("    heap consistent: {}", allocator.check(true));
    print_program_break("end");
  }
}
