//! Segregated free lists.
//!
//! Free blocks are partitioned into [`CLASS_COUNT`] buckets by the position
//! of the highest set bit of their size, so bucket `k` holds sizes in
//! `[2^k, 2^(k+1))` and the last bucket takes everything larger:
//!
//! ```text
//!   heads[4]  ──► [16] ◄──► [24] ◄──► [24]
//!   heads[5]  ──► [32] ◄──► [48]
//!   heads[6]  ──► (empty)
//!     ...
//!   heads[19] ──► [600000] ◄──► [2097152]      catch-all
//! ```
//!
//! Each bucket is a doubly linked list threaded through the payloads of the
//! free blocks themselves, kept in ascending size order so a first fit scan
//! from the head also tends to be a good fit. Links are stored as 32 bit
//! offsets from the heap base rather than as pointers; `0` means "no block",
//! which is safe because the first payload of the heap sits past the
//! alignment pad and the prologue.

use std::{iter, ptr::NonNull};

use crate::block::Block;

/// Number of size classes.
pub const CLASS_COUNT: usize = 20;

/// Offset used as the null link.
const NIL: u32 = 0;

/// Maps a block size to its size class: the index of the highest set bit,
/// clamped to the catch-all class.
pub fn classify(size: usize) -> usize {
  if size <= 1 {
    return 0;
  }

  let highest_bit = (usize::BITS - 1 - size.leading_zeros()) as usize;
  highest_bit.min(CLASS_COUNT - 1)
}

/// Bucket array of one allocator instance. Heads are weak references into
/// the heap: a block must be removed from its bucket before its metadata is
/// overwritten.
pub(crate) struct FreeLists {
  base: Option<NonNull<u8>>,
  heads: [u32; CLASS_COUNT],
}

impl FreeLists {
  pub const fn new() -> Self {
    Self {
      base: None,
      heads: [NIL; CLASS_COUNT],
    }
  }

  /// Empties every bucket and rebases links on `base`, the first address
  /// of the heap.
  pub fn reset(
    &mut self,
    base: NonNull<u8>,
  ) {
    self.base = Some(base);
    self.heads = [NIL; CLASS_COUNT];
  }

  #[cfg(test)]
  pub fn is_empty(&self) -> bool {
    self.heads.iter().all(|&head| head == NIL)
  }

  fn offset_of(
    &self,
    block: Block,
  ) -> u32 {
    let base = self.base.map_or(0, |base| base.as_ptr() as usize);
    (block.addr() - base) as u32
  }

  unsafe fn block_at(
    &self,
    offset: u32,
  ) -> Option<Block> {
    if offset == NIL {
      return None;
    }

    let base = self.base?;
    unsafe { Some(Block::from_payload(base.add(offset as usize))) }
  }

  /// First (smallest) block of bucket `class`.
  pub unsafe fn head(
    &self,
    class: usize,
  ) -> Option<Block> {
    unsafe { self.block_at(self.heads[class]) }
  }

  /// Next block after `block` in its bucket.
  pub unsafe fn successor(
    &self,
    block: Block,
  ) -> Option<Block> {
    unsafe { self.block_at(block.succ_link()) }
  }

  /// Previous block before `block` in its bucket.
  pub unsafe fn predecessor(
    &self,
    block: Block,
  ) -> Option<Block> {
    unsafe { self.block_at(block.pred_link()) }
  }

  /// Inserts a free block into the bucket of its current size, right before
  /// the first entry that is at least as large.
  ///
  /// # Safety
  ///
  /// `block` must be a free block of this heap that is not on any list.
  pub unsafe fn insert(
    &mut self,
    block: Block,
  ) {
    unsafe {
      let size = block.size();
      let class = classify(size);

      let mut before = None;
      let mut after = self.head(class);

      while let Some(current) = after {
        if current.size() >= size {
          break;
        }
        before = Some(current);
        after = self.successor(current);
      }

      let offset = self.offset_of(block);

      block.set_pred_link(before.map_or(NIL, |b| self.offset_of(b)));
      block.set_succ_link(after.map_or(NIL, |a| self.offset_of(a)));

      match before {
        Some(before) => before.set_succ_link(offset),
        None => self.heads[class] = offset,
      }

      if let Some(after) = after {
        after.set_pred_link(offset);
      }
    }
  }

  /// Unlinks `block` from its bucket in constant time.
  ///
  /// # Safety
  ///
  /// `block` must currently be on the list of the class of its current size.
  pub unsafe fn remove(
    &mut self,
    block: Block,
  ) {
    unsafe {
      let class = classify(block.size());
      let pred = block.pred_link();
      let succ = block.succ_link();

      match self.block_at(pred) {
        Some(pred) => pred.set_succ_link(succ),
        None => self.heads[class] = succ,
      }

      if let Some(succ) = self.block_at(succ) {
        succ.set_pred_link(pred);
      }
    }
  }

  /// First fit search. Starts at the class of `size` and moves to larger
  /// classes until a block that is big enough and not pinned shows up.
  pub unsafe fn find_fit(
    &self,
    size: usize,
  ) -> Option<Block> {
    unsafe {
      (classify(size)..CLASS_COUNT).find_map(|class| {
        self
          .iter(class)
          .find(|block| !block.is_pinned() && block.size() >= size)
      })
    }
  }

  /// Walks bucket `class` from its head.
  ///
  /// # Safety
  ///
  /// The bucket must not be modified while the iterator is alive.
  pub unsafe fn iter(
    &self,
    class: usize,
  ) -> impl Iterator<Item = Block> + '_ {
    let mut current = unsafe { self.head(class) };

    iter::from_fn(move || {
      let block = current?;
      current = unsafe { self.successor(block) };
      Some(block)
    })
  }

  /// Walks every bucket, smallest class first.
  pub unsafe fn iter_all(&self) -> impl Iterator<Item = (usize, Block)> + '_ {
    (0..CLASS_COUNT).flat_map(move |class| unsafe { self.iter(class) }.map(move |block| (class, block)))
  }

  /// Sum of the sizes of every listed block.
  pub unsafe fn total_bytes(&self) -> usize {
    unsafe { self.iter_all().map(|(_, block)| block.size()).sum() }
  }
}
