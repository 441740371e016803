//! Heap consistency checker.
//!
//! Walks the heap from the prologue to the epilogue and then every free
//! list, answering:
//!
//! - Are the sentinels intact?
//! - Does every header agree with its footer?
//! - Is every block aligned, big enough and inside the heap?
//! - Are there any contiguous free blocks that somehow escaped coalescing?
//! - Is every block on a free list marked free, in the right class and in
//!   ascending order, with consistent back links?
//! - Is every free block actually on a free list?
//!
//! The walk never follows a link or a size that points outside the heap, so
//! it can be used on a heap that is already corrupted.

use thiserror::Error;

use crate::{
  align::ALIGNMENT,
  block::{Block, DSIZE, MIN_BLOCK_SIZE, Tag},
  buckets::{CLASS_COUNT, classify},
  SegregatedAllocator,
  source::HeapSource,
};

/// One broken invariant found by [`SegregatedAllocator::violations`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Violation {
  #[error("prologue at {address:#x} is damaged")]
  BadPrologue { address: usize },

  #[error("epilogue at {address:#x} is damaged")]
  BadEpilogue { address: usize },

  #[error("block {address:#x} is not aligned")]
  Misaligned { address: usize },

  #[error("block {address:#x} has size {size}, below the minimum block")]
  TooSmall { address: usize, size: usize },

  #[error("block {address:#x} header and footer disagree")]
  TagMismatch { address: usize },

  #[error("block {address:#x} runs past the end of the heap")]
  OutOfBounds { address: usize },

  #[error("free blocks {first:#x} and {second:#x} escaped coalescing")]
  Uncoalesced { first: usize, second: usize },

  #[error("block {address:#x} on the free list of class {class} is outside the heap")]
  ListedOutside { class: usize, address: usize },

  #[error("block {address:#x} on the free list of class {class} is allocated")]
  ListedAllocated { class: usize, address: usize },

  #[error("block {address:#x} of size {size} is on the free list of class {class}")]
  WrongClass {
    class: usize,
    address: usize,
    size: usize,
  },

  #[error("free list of class {class} is out of order at {address:#x}")]
  Unsorted { class: usize, address: usize },

  #[error("free list of class {class} has a broken back link at {address:#x}")]
  BrokenLink { class: usize, address: usize },

  #[error("{in_heap} free blocks in the heap but {listed} on the free lists")]
  UnlistedFreeBlocks { in_heap: usize, listed: usize },
}

impl<S: HeapSource> SegregatedAllocator<S> {
  /// Verifies the heap and logs every problem found. Returns `true` when the
  /// heap is consistent. With `verbose` every block visited is logged at
  /// debug level as well.
  pub fn check(
    &self,
    verbose: bool,
  ) -> bool {
    let violations = self.collect_violations(verbose);

    for violation in &violations {
      log::warn!("heap check: {}", violation);
    }

    violations.is_empty()
  }

  /// Every broken invariant, in the order found. Empty for a healthy or
  /// uninitialized heap.
  pub fn violations(&self) -> Vec<Violation> {
    self.collect_violations(false)
  }

  fn collect_violations(
    &self,
    verbose: bool,
  ) -> Vec<Violation> {
    let mut violations = Vec::new();

    let (Some(prologue), Some(epilogue)) = (self.prologue(), self.epilogue()) else {
      return violations;
    };

    unsafe {
      let in_heap = self.walk_heap(prologue, epilogue, verbose, &mut violations);
      let listed = self.walk_lists(prologue, epilogue, verbose, &mut violations);

      if in_heap != listed {
        violations.push(Violation::UnlistedFreeBlocks { in_heap, listed });
      }
    }

    violations
  }

  /// Returns the number of free blocks seen.
  unsafe fn walk_heap(
    &self,
    prologue: Block,
    epilogue: Block,
    verbose: bool,
    violations: &mut Vec<Violation>,
  ) -> usize {
    unsafe {
      let sentinel = Tag::allocated(DSIZE);
      if prologue.tag() != sentinel || prologue.footer_tag() != sentinel {
        violations.push(Violation::BadPrologue {
          address: prologue.addr(),
        });
        return 0;
      }

      let end = epilogue.addr();
      let mut free_blocks = 0;
      // Last block seen if it was free and unpinned.
      let mut mergeable_before: Option<usize> = None;
      let mut block = prologue.next();

      loop {
        let address = block.addr();
        if address > end {
          violations.push(Violation::OutOfBounds { address });
          break;
        }

        let tag = block.tag();

        if tag.size == 0 {
          if address != end || !tag.allocated {
            violations.push(Violation::BadEpilogue { address });
          }
          break;
        }

        if verbose {
          log::debug!(
            "block {:#x}: size={} allocated={} pinned={}",
            address,
            tag.size,
            tag.allocated,
            tag.pinned
          );
        }

        if address % ALIGNMENT != 0 || tag.size % ALIGNMENT != 0 {
          violations.push(Violation::Misaligned { address });
          break;
        }

        if tag.size < MIN_BLOCK_SIZE {
          violations.push(Violation::TooSmall {
            address,
            size: tag.size,
          });
          break;
        }

        if address + tag.size > end {
          violations.push(Violation::OutOfBounds { address });
          break;
        }

        let footer = block.footer_tag();
        if footer.size != tag.size || footer.allocated != tag.allocated {
          violations.push(Violation::TagMismatch { address });
        }

        if tag.allocated {
          mergeable_before = None;
        } else {
          free_blocks += 1;

          // Pinned blocks are skipped by the coalescer, so they may sit next
          // to other free blocks.
          if let (Some(first), false) = (mergeable_before, tag.pinned) {
            violations.push(Violation::Uncoalesced {
              first,
              second: address,
            });
          }

          mergeable_before = (!tag.pinned).then_some(address);
        }

        block = block.next();
      }

      free_blocks
    }
  }

  /// Returns the number of blocks found on the lists.
  unsafe fn walk_lists(
    &self,
    prologue: Block,
    epilogue: Block,
    verbose: bool,
    violations: &mut Vec<Violation>,
  ) -> usize {
    unsafe {
      let (low, high) = (prologue.addr() + DSIZE, epilogue.addr());
      // Upper bound on the length of any list, in case the links loop.
      let limit = (high - low) / MIN_BLOCK_SIZE + 1;
      let mut listed = 0;

      for class in 0..CLASS_COUNT {
        let mut previous: Option<Block> = None;
        let mut current = self.lists.head(class);
        let mut steps = 0;

        while let Some(block) = current {
          let address = block.addr();

          if address < low || address >= high || address % ALIGNMENT != 0 || steps >= limit {
            violations.push(Violation::ListedOutside { class, address });
            break;
          }

          let tag = block.tag();

          if verbose {
            log::debug!("class {} entry {:#x}: size={}", class, address, tag.size);
          }

          if tag.allocated {
            violations.push(Violation::ListedAllocated { class, address });
          }

          if classify(tag.size) != class {
            violations.push(Violation::WrongClass {
              class,
              address,
              size: tag.size,
            });
          }

          if let Some(previous) = previous {
            if previous.size() > tag.size {
              violations.push(Violation::Unsorted { class, address });
            }
          }

          if self.lists.predecessor(block) != previous {
            violations.push(Violation::BrokenLink { class, address });
          }

          listed += 1;
          steps += 1;
          previous = Some(block);
          current = self.lists.successor(block);
        }
      }

      listed
    }
  }
}
