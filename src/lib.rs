//! # segalloc - A Segregated Free List Allocator
//!
//! This crate provides a `malloc`/`free`/`realloc` style allocator that
//! manages one contiguous, growable heap. Free blocks are kept in size
//! segregated lists, neighbours are merged eagerly through boundary tags and
//! reallocation keeps some headroom around blocks that tend to grow.
//!
//! ## Overview
//!
//! ```text
//!   Heap:
//!
//!   ┌──────────────────────────────────────────────────────────────────────┐
//!   │                              HEAP MEMORY                             │
//!   │                                                                      │
//!   │  ┌────┬──────┬──────┬────────────┬──────┬──────────────────┬────┐    │
//!   │  │ P  │  A1  │  F1  │     A2     │  F2  │        A3        │ E  │    │
//!   │  └────┴──────┴──────┴────────────┴──────┴──────────────────┴────┘    │
//!   │    ▲            │                   │                         ▲      │
//!   │    │            │                   │                         │      │
//!   │ prologue        ▼                   ▼                     epilogue   │
//!   │           ┌──────────┐                                    (heap end) │
//!   │           │  class 5 │ ◄── F1                                        │
//!   │           │  class 9 │ ◄── F2                                        │
//!   │           └──────────┘                                               │
//!   │        segregated lists                                              │
//!   └──────────────────────────────────────────────────────────────────────┘
//!
//!   A = allocated block, F = free block.
//!   Free blocks never touch each other (unless one is pinned, see below):
//!   freeing merges them immediately.
//! ```
//!
//! ## Crate Structure
//!
//! ```text
//!   segalloc
//!   ├── align      - Alignment macros (align!, checked_align!)
//!   ├── block      - Boundary tags and block address arithmetic (internal)
//!   ├── buckets    - Segregated free lists (internal)
//!   ├── coalesce   - Merging of adjacent free blocks (internal)
//!   ├── allocator  - SegregatedAllocator: allocate, free, reallocate
//!   ├── check      - Heap consistency checker
//!   ├── source     - Where heap memory comes from (HeapSource, MappedHeap, ProgramBreak)
//!   ├── config     - Tunables
//!   └── error      - AllocError
//! ```
//!
//! ## Quick Start
//!
//! ```rust
//! use segalloc::SegregatedAllocator;
//!
//! let mut allocator = SegregatedAllocator::with_capacity(1 << 20).unwrap();
//!
//! let ptr = allocator.allocate(64) as *mut u64;
//! assert!(!ptr.is_null());
//!
//! unsafe {
//!     *ptr = 42;
//!
//!     let ptr = allocator.reallocate(ptr as *mut u8, 4096) as *mut u64;
//!     assert_eq!(*ptr, 42);
//!
//!     allocator.free(ptr as *mut u8);
//! }
//!
//! assert!(allocator.check(false));
//! ```
//!
//! ## How It Works
//!
//! Each block carries its size and flags twice, in a header before the
//! payload and a footer after it, so both neighbours of any block can be
//! reached in constant time:
//!
//! ```text
//!   Allocated block:
//!   ┌──────────┬───────────────────────────────────────────┬──────────┐
//!   │  header  │                 User Data                 │  footer  │
//!   │ size | A │                                           │ size | A │
//!   └──────────┴───────────────────────────────────────────┴──────────┘
//!              ▲
//!              └── Pointer returned to user (8-byte aligned)
//!
//!   Free block:
//!   ┌──────────┬──────────┬──────────┬─────────────────────┬──────────┐
//!   │  header  │   pred   │   succ   │       unused        │  footer  │
//!   │ size | 0 │  offset  │  offset  │                     │ size | 0 │
//!   └──────────┴──────────┴──────────┴─────────────────────┴──────────┘
//! ```
//!
//! Allocation looks for the first block big enough in the list of the
//! request's size class and then in larger classes. When nothing fits, the
//! heap grows by at least one chunk. Blocks bigger than needed are split;
//! large requests take the high end of the block, small ones the low end.
//!
//! Reallocation adds a margin to every request. When the block can't hold
//! the new size it first tries to swallow the following free block (or to
//! grow the heap when it is the last one) before falling back to
//! allocate + copy + free. If little headroom is left afterwards, the next
//! block is *pinned*: the coalescer and the fit search leave it alone, so
//! the next reallocation can grow in place again.
//!
//! ## Heap Sources
//!
//! All memory comes from a [`HeapSource`], which behaves like `sbrk`:
//!
//! - [`MappedHeap`] reserves a private mapping up front and hands it out
//!   piece by piece. Any number of them can coexist.
//! - [`ProgramBreak`] moves the real program break with `sbrk(2)`.
//!
//! ## Limitations
//!
//! - **Single-threaded only**: No synchronization primitives
//! - **8-byte alignment**: Larger alignments are not supported
//! - **Never shrinks**: Memory is never returned to the source
//! - **Trusting**: Double frees and foreign pointers are undefined behaviour
//! - **Unix-only**: Requires `libc` (`mmap`, `sbrk`)
//!
//! ## Safety
//!
//! Freeing and reallocating take raw pointers and are `unsafe`: the
//! allocator believes whatever the boundary tags next to the pointer say.

pub mod align;
mod allocator;
mod block;
mod buckets;
mod check;
mod coalesce;
mod config;
mod error;
mod source;

pub use allocator::SegregatedAllocator;
pub use block::{BlockInfo, MIN_BLOCK_SIZE};
pub use buckets::{CLASS_COUNT, classify};
pub use check::Violation;
pub use config::Config;
pub use error::AllocError;
pub use source::{DEFAULT_CAPACITY, HeapSource, MappedHeap, ProgramBreak};
