//! Boundary tag coalescing.
//!
//! ```text
//!   case 1: [alloc][ bp ][alloc]   nothing to do
//!   case 2: [alloc][ bp ][ free]   bp absorbs next
//!   case 3: [ free][ bp ][alloc]   prev absorbs bp
//!   case 4: [ free][ bp ][ free]   prev absorbs bp and next
//! ```
//!
//! A pinned neighbour counts as allocated here even when it is free: it is
//! being held back as growth room for the block in front of it.

use crate::{
  block::{Block, Tag},
  buckets::FreeLists,
};

#[inline]
unsafe fn mergeable(block: Block) -> bool {
  unsafe {
    let tag = block.tag();
    !tag.allocated && !tag.pinned
  }
}

/// Merges `block` with its free neighbours and returns the resulting block,
/// which is `block` itself or the previous block. Free neighbours are removed
/// from their buckets; the merged block is *not* inserted anywhere, that's
/// up to the caller.
///
/// # Safety
///
/// `block` must be a free block of the heap that is not on any list, and the
/// heap must be bounded by the prologue and epilogue sentinels.
pub(crate) unsafe fn coalesce(
  lists: &mut FreeLists,
  block: Block,
) -> Block {
  unsafe {
    let prev = block.prev();
    let next = block.next();
    let mut size = block.size();

    match (mergeable(prev), mergeable(next)) {
      (false, false) => block,

      (false, true) => {
        lists.remove(next);
        size += next.size();
        block.write(Tag::free(size));
        block
      }

      (true, false) => {
        lists.remove(prev);
        size += prev.size();
        prev.write(Tag::free(size));
        prev
      }

      (true, true) => {
        lists.remove(prev);
        lists.remove(next);
        size += prev.size() + next.size();
        prev.write(Tag::free(size));
        prev
      }
    }
  }
}
