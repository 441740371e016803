use std::{cmp, iter, ptr, ptr::NonNull};

use crate::{
  block::{Block, BlockInfo, DSIZE, MAX_BLOCK_SIZE, MIN_BLOCK_SIZE, OVERHEAD, Tag, WSIZE},
  buckets::FreeLists,
  checked_align,
  coalesce::coalesce,
  config::Config,
  error::AllocError,
  source::{HeapSource, MappedHeap},
};

/// Bytes laid down by `init` before the first chunk: alignment pad, prologue
/// header and footer, epilogue header.
const SENTINELS: usize = 4 * WSIZE;

/// Segregated free list allocator over a single growable heap.
///
/// ```text
///   base
///    │
///    ▼
///   ┌─────┬───────────┬─────────┬─────────┬─────────┬─── ─ ─ ───┬─────┐
///   │ pad │ prologue  │ block 1 │ block 2 │ block 3 │    ...    │ epi │
///   │     │ hdr │ ftr │         │         │         │           │ hdr │
///   └─────┴───────────┴─────────┴─────────┴─────────┴─── ─ ─ ───┴─────┘
///                                                                     ▲
///                                                           base + heap_size
/// ```
///
/// Single threaded: nothing here is synchronized.
pub struct SegregatedAllocator<S: HeapSource = MappedHeap> {
  pub(crate) source: S,
  pub(crate) config: Config,
  pub(crate) lists: FreeLists,
  /// First byte of the heap, `None` until `init`.
  pub(crate) base: Option<NonNull<u8>>,
  /// Bytes obtained from the source so far.
  pub(crate) heap_size: usize,
}

impl SegregatedAllocator<MappedHeap> {
  /// Allocator over a fresh private [`MappedHeap`] of `capacity` bytes with
  /// the default configuration, already initialized.
  pub fn with_capacity(capacity: usize) -> Result<Self, AllocError> {
    let mut allocator = Self::with_source(MappedHeap::new(capacity)?);
    allocator.init()?;
    Ok(allocator)
  }
}

impl<S: HeapSource> SegregatedAllocator<S> {
  /// Builds an allocator on top of `source`. No memory is requested until
  /// [`Self::init`] or the first allocation.
  pub fn new(
    source: S,
    config: Config,
  ) -> Self {
    Self {
      source,
      config: config.normalized(),
      lists: FreeLists::new(),
      base: None,
      heap_size: 0,
    }
  }

  pub fn with_source(source: S) -> Self {
    Self::new(source, Config::default())
  }

  pub fn config(&self) -> &Config {
    &self.config
  }

  pub fn source(&self) -> &S {
    &self.source
  }

  pub fn is_initialized(&self) -> bool {
    self.base.is_some()
  }

  /// Total bytes obtained from the heap source.
  pub fn heap_size(&self) -> usize {
    self.heap_size
  }

  /// Bytes sitting in free blocks, metadata included.
  pub fn free_bytes(&self) -> usize {
    unsafe { self.lists.total_bytes() }
  }

  /// Lays down the sentinels at the current break of the source and seeds
  /// the heap with one free block of `initial_chunk` bytes.
  pub fn init(&mut self) -> Result<(), AllocError> {
    let base = self.source.grow(SENTINELS)?;

    self.lists.reset(base);
    self.base = Some(base);
    self.heap_size = SENTINELS;

    unsafe {
      base.cast::<u32>().write(0);

      let prologue = Block::from_payload(base.add(DSIZE));
      prologue.write(Tag::allocated(DSIZE));
      prologue.next().write_header(Tag::allocated(0));
    }

    self.extend_heap(self.config.initial_chunk)?;

    log::debug!("heap initialized at {:?}", base);

    Ok(())
  }

  fn ensure_initialized(&mut self) -> Result<(), AllocError> {
    if self.is_initialized() {
      return Ok(());
    }
    self.init()
  }

  /// Allocates a block with room for at least `size` bytes and returns its
  /// 8-byte aligned payload. Returns null when `size` is zero or the heap
  /// cannot grow any further.
  pub fn allocate(
    &mut self,
    size: usize,
  ) -> *mut u8 {
    if size == 0 {
      return ptr::null_mut();
    }

    let result = self
      .ensure_initialized()
      .and_then(|_| adjust(size))
      .and_then(|asize| self.allocate_block(asize, asize));

    match result {
      Ok(block) => {
        log::trace!("allocate({}) -> {:?}", size, block.payload());
        block.payload().as_ptr()
      }
      Err(error) => {
        log::warn!("allocate({}) failed: {}", size, error);
        ptr::null_mut()
      }
    }
  }

  /// Releases a block previously returned by [`Self::allocate`] or
  /// [`Self::reallocate`]. Freeing null does nothing.
  ///
  /// # Safety
  ///
  /// `address` must be null or a live pointer obtained from this allocator.
  pub unsafe fn free(
    &mut self,
    address: *mut u8,
  ) {
    let Some(payload) = NonNull::new(address) else {
      return;
    };

    unsafe {
      let block = Block::from_payload(payload);
      let size = block.size();

      // Growth room reserved after this block is not needed anymore. While
      // it was pinned it may have collected free neighbours of its own.
      let next = block.next();
      if next.is_pinned() {
        next.set_pinned(false);
        if !next.is_allocated() {
          self.lists.remove(next);
          let released = coalesce(&mut self.lists, next);
          self.lists.insert(released);
        }
      }

      block.write(Tag::free(size));

      let merged = coalesce(&mut self.lists, block);
      self.lists.insert(merged);

      log::trace!("free({:?}) size={} merged={}", payload, size, merged.size());
    }
  }

  /// Resizes the allocation at `address` so it can hold `size` bytes,
  /// preserving its contents. The block is grown in place when the next
  /// block is free (or the end of the heap), otherwise the contents move to
  /// a new block. A few extra bytes are always reserved so that a block
  /// that keeps growing doesn't move every time.
  ///
  /// Returns null, leaving the original block untouched, when `size` is zero
  /// or memory is exhausted. A null `address` behaves like
  /// [`Self::allocate`].
  ///
  /// # Safety
  ///
  /// `address` must be null or a live pointer obtained from this allocator.
  pub unsafe fn reallocate(
    &mut self,
    address: *mut u8,
    size: usize,
  ) -> *mut u8 {
    if size == 0 {
      return ptr::null_mut();
    }

    let Some(payload) = NonNull::new(address) else {
      return self.allocate(size);
    };

    match unsafe { self.reallocate_block(Block::from_payload(payload), size) } {
      Ok(block) => block.payload().as_ptr(),
      Err(error) => {
        log::warn!("reallocate({:?}, {}) failed: {}", payload, size, error);
        ptr::null_mut()
      }
    }
  }

  /// Payload bytes usable through a live pointer. At least what was asked
  /// for, often more. Zero for null.
  ///
  /// # Safety
  ///
  /// `address` must be null or a live pointer obtained from this allocator.
  pub unsafe fn usable_size(
    &self,
    address: *mut u8,
  ) -> usize {
    match NonNull::new(address) {
      Some(payload) => unsafe { Block::from_payload(payload).size() - OVERHEAD },
      None => 0,
    }
  }

  /// Every block between the sentinels, in address order.
  pub fn blocks(&self) -> impl Iterator<Item = BlockInfo> + '_ {
    let mut current = self.prologue().map(|prologue| unsafe { prologue.next() });

    iter::from_fn(move || unsafe {
      let block = current?;
      if block.size() == 0 {
        current = None;
        return None;
      }
      current = Some(block.next());
      Some(block.info())
    })
  }

  pub(crate) fn prologue(&self) -> Option<Block> {
    self
      .base
      .map(|base| unsafe { Block::from_payload(base.add(DSIZE)) })
  }

  pub(crate) fn epilogue(&self) -> Option<Block> {
    self
      .base
      .map(|base| unsafe { Block::from_payload(base.add(self.heap_size)) })
  }

  /// Finds or makes room for an `asize` byte block. `requested` is the
  /// block size the caller actually needs, which decides the split
  /// direction; it differs from `asize` when reallocation adds its margin.
  fn allocate_block(
    &mut self,
    asize: usize,
    requested: usize,
  ) -> Result<Block, AllocError> {
    let block = match unsafe { self.lists.find_fit(asize) } {
      Some(block) => block,
      None => self.extend_heap(cmp::max(asize, self.config.chunk))?,
    };

    let at_tail = requested >= self.config.split_threshold;
    Ok(unsafe { self.place(block, asize, at_tail) })
  }

  /// Turns `asize` bytes of the listed free `block` into an allocated block.
  /// Large requests take the high end of the block (`at_tail`) and small
  /// ones the low end, so big and small allocations tend to cluster apart.
  unsafe fn place(
    &mut self,
    block: Block,
    asize: usize,
    at_tail: bool,
  ) -> Block {
    unsafe {
      self.lists.remove(block);

      let csize = block.size();
      let remainder = csize - asize;

      if remainder < MIN_BLOCK_SIZE {
        block.write(Tag::allocated(csize));
        return block;
      }

      if at_tail {
        block.write(Tag::free(remainder));
        self.lists.insert(block);

        let allocated = block.next();
        allocated.write(Tag::allocated(asize));
        allocated
      } else {
        block.write(Tag::allocated(asize));

        let rest = block.next();
        rest.write(Tag::free(remainder));
        self.lists.insert(rest);
        block
      }
    }
  }

  /// Appends a free block of `bytes` bytes where the epilogue used to be and
  /// writes a new epilogue after it. The block is not coalesced nor listed.
  fn grow_heap(
    &mut self,
    bytes: usize,
  ) -> Result<Block, AllocError> {
    let bytes = checked_align!(bytes).ok_or(AllocError::OutOfMemory { increment: bytes })?;

    match self.heap_size.checked_add(bytes) {
      Some(total) if total <= MAX_BLOCK_SIZE => {}
      _ => return Err(AllocError::OutOfMemory { increment: bytes }),
    }

    let Some(epilogue) = self.epilogue() else {
      return Err(AllocError::OutOfMemory { increment: bytes });
    };

    let address = self.source.grow(bytes)?;
    debug_assert_eq!(address.as_ptr() as usize, epilogue.addr());

    self.heap_size += bytes;

    log::debug!("heap grew by {} bytes to {}", bytes, self.heap_size);

    unsafe {
      let block = Block::from_payload(address);
      block.write(Tag::free(bytes));
      block.next().write_header(Tag::allocated(0));
      Ok(block)
    }
  }

  /// Grows the heap by `bytes`, merges the new space with a free last block
  /// and lists the result.
  fn extend_heap(
    &mut self,
    bytes: usize,
  ) -> Result<Block, AllocError> {
    let block = self.grow_heap(bytes)?;

    unsafe {
      let merged = coalesce(&mut self.lists, block);
      self.lists.insert(merged);
      Ok(merged)
    }
  }

  unsafe fn reallocate_block(
    &mut self,
    block: Block,
    size: usize,
  ) -> Result<Block, AllocError> {
    let margin = self.config.realloc_margin;
    let asize = adjust(size)?;
    let target = asize
      .checked_add(margin)
      .filter(|&target| target <= MAX_BLOCK_SIZE)
      .ok_or(AllocError::RequestTooLarge { requested: size })?;

    let resized = unsafe {
      if block.size() >= target {
        block
      } else if let Some(grown) = self.grow_in_place(block, target) {
        log::trace!("reallocate({:?}, {}) grew in place", block.payload(), size);
        grown
      } else {
        // Split direction follows the request, not the margin.
        let moved = self.allocate_block(target, asize)?;
        let count = cmp::min(block.size() - OVERHEAD, size);
        ptr::copy_nonoverlapping(block.payload().as_ptr(), moved.payload().as_ptr(), count);
        self.free(block.payload().as_ptr());

        log::trace!(
          "reallocate({:?}, {}) moved to {:?}",
          block.payload(),
          size,
          moved.payload()
        );
        moved
      }
    };

    // Not much headroom left: keep the neighbour out of reach of the
    // coalescer so the next growth can happen in place.
    unsafe {
      if resized.size() - target < 2 * margin {
        resized.next().set_pinned(true);
      }
    }

    Ok(resized)
  }

  /// Extends `block` over its free neighbour, growing the heap first when
  /// the neighbour is the last block and still too small. Returns `None`
  /// when the block has to move instead.
  unsafe fn grow_in_place(
    &mut self,
    block: Block,
    target: usize,
  ) -> Option<Block> {
    unsafe {
      let next = block.next();
      let next_tag = next.tag();
      let next_is_epilogue = next_tag.size == 0;

      if next_tag.allocated && !next_is_epilogue {
        return None;
      }

      let mut available = block.size() + next_tag.size;

      if available < target {
        if !next_is_epilogue && next.next().size() != 0 {
          return None;
        }

        let extension = match self.grow_heap(cmp::max(target - available, self.config.chunk)) {
          Ok(extension) => extension,
          Err(error) => {
            log::debug!("in place growth of {:?} failed: {}", block.payload(), error);
            return None;
          }
        };
        available += extension.size();
      }

      if !next_is_epilogue {
        self.lists.remove(next);
      }

      block.write(Tag::allocated(available));
      Some(block)
    }
  }
}

/// Block size needed for a `size` byte payload: overhead added, rounded to
/// the alignment, never below the minimum block.
fn adjust(size: usize) -> Result<usize, AllocError> {
  let too_large = AllocError::RequestTooLarge { requested: size };

  if size <= DSIZE {
    return Ok(MIN_BLOCK_SIZE);
  }

  let asize = size
    .checked_add(OVERHEAD)
    .and_then(|total| checked_align!(total))
    .ok_or(too_large)?;

  if asize > MAX_BLOCK_SIZE {
    return Err(too_large);
  }

  Ok(asize)
}

#[cfg(test)]
mod tests {
  use super::*;

  fn allocator() -> SegregatedAllocator {
    SegregatedAllocator::with_capacity(1 << 24).unwrap()
  }

  fn block_size(address: *mut u8) -> usize {
    unsafe { Block::from_payload(NonNull::new(address).unwrap()).size() }
  }

  fn fill(
    address: *mut u8,
    len: usize,
    seed: u8,
  ) {
    for i in 0..len {
      unsafe { *address.add(i) = seed.wrapping_add(i as u8) };
    }
  }

  fn holds(
    address: *mut u8,
    len: usize,
    seed: u8,
  ) -> bool {
    (0..len).all(|i| unsafe { *address.add(i) } == seed.wrapping_add(i as u8))
  }

  #[test]
  fn test_adjust() {
    assert_eq!(adjust(1), Ok(16));
    assert_eq!(adjust(8), Ok(16));
    assert_eq!(adjust(9), Ok(24));
    assert_eq!(adjust(16), Ok(24));
    assert_eq!(adjust(100), Ok(112));
    assert_eq!(
      adjust(usize::MAX),
      Err(AllocError::RequestTooLarge {
        requested: usize::MAX
      })
    );
    assert!(adjust(MAX_BLOCK_SIZE).is_err());
  }

  #[test]
  fn test_init() {
    let allocator = allocator();

    assert!(allocator.is_initialized());
    assert_eq!(allocator.heap_size(), SENTINELS + 64);
    assert_eq!(allocator.free_bytes(), 64);
    assert_eq!(
      allocator.blocks().collect::<Vec<_>>(),
      vec![BlockInfo {
        address: allocator.base.unwrap().as_ptr() as usize + SENTINELS,
        size: 64,
        allocated: false,
        pinned: false,
      }]
    );
    assert!(allocator.check(false));
  }

  #[test]
  fn test_init_fails_without_memory() {
    let mut allocator = SegregatedAllocator::with_source(MappedHeap::new(32).unwrap());

    assert_eq!(
      allocator.init(),
      Err(AllocError::OutOfMemory { increment: 64 })
    );
  }

  #[test]
  fn test_allocate_zero_is_null() {
    let mut allocator = allocator();
    assert!(allocator.allocate(0).is_null());
    assert_eq!(allocator.heap_size(), SENTINELS + 64);
  }

  #[test]
  fn test_lazy_init() {
    let mut allocator = SegregatedAllocator::with_source(MappedHeap::new(1 << 16).unwrap());
    assert!(!allocator.is_initialized());

    let address = allocator.allocate(10);
    assert!(!address.is_null());
    assert!(allocator.is_initialized());
    assert!(allocator.check(false));
  }

  #[test]
  fn test_allocations_are_aligned_and_disjoint() {
    let mut allocator = allocator();
    let sizes = [1, 7, 8, 9, 24, 100, 513, 4000, 70000];

    let addresses: Vec<*mut u8> = sizes.iter().map(|&size| allocator.allocate(size)).collect();

    for (&address, &size) in addresses.iter().zip(&sizes) {
      assert!(!address.is_null());
      assert_eq!(address as usize % 8, 0);
      assert!(unsafe { allocator.usable_size(address) } >= size);
    }

    for (i, &address) in addresses.iter().enumerate() {
      fill(address, sizes[i], i as u8);
    }
    for (i, &address) in addresses.iter().enumerate() {
      assert!(holds(address, sizes[i], i as u8));
    }

    assert!(allocator.check(false));
  }

  #[test]
  fn test_small_request_takes_front_of_block() {
    let mut allocator = allocator();
    let first_free = allocator.blocks().next().unwrap().address;

    let address = allocator.allocate(16);
    assert_eq!(address as usize, first_free);
    assert_eq!(block_size(address), 24);

    let blocks: Vec<_> = allocator.blocks().collect();
    assert_eq!(blocks.len(), 2);
    assert!(blocks[0].allocated);
    assert_eq!(blocks[1].size, 40);
    assert!(!blocks[1].allocated);
  }

  #[test]
  fn test_large_request_takes_tail_of_block() {
    let mut allocator = allocator();

    // Forces a 4096 byte extension that merges with the initial 64 bytes.
    let address = allocator.allocate(200);
    let blocks: Vec<_> = allocator.blocks().collect();

    assert_eq!(blocks.len(), 2);
    assert!(!blocks[0].allocated);
    assert_eq!(blocks[0].size, 64 + 4096 - 208);
    assert_eq!(blocks[1].address, address as usize);
    assert_eq!(blocks[1].size, 208);
    assert!(allocator.check(false));
  }

  #[test]
  fn test_leftover_below_minimum_is_not_split() {
    let mut allocator = allocator();

    // 64 byte block, 56 byte request block leaves 8 bytes: kept inside.
    let address = allocator.allocate(48);
    assert_eq!(block_size(address), 64);
    assert_eq!(allocator.free_bytes(), 0);
    assert_eq!(allocator.heap_size(), SENTINELS + 64);
  }

  #[test]
  fn test_free_reuses_block() {
    let mut allocator = allocator();

    let a = allocator.allocate(16);
    let heap_size = allocator.heap_size();
    unsafe { allocator.free(a) };
    let b = allocator.allocate(16);

    assert_eq!(a, b);
    assert_eq!(allocator.heap_size(), heap_size);
  }

  #[test]
  fn test_free_null_is_noop() {
    let mut allocator = allocator();
    unsafe { allocator.free(ptr::null_mut()) };
    assert!(allocator.check(false));
  }

  #[test]
  fn test_coalescing() {
    let mut allocator = allocator();

    let a = allocator.allocate(40);
    let b = allocator.allocate(40);
    let c = allocator.allocate(40);
    let d = allocator.allocate(40);
    assert!(!d.is_null());

    let merged_size = block_size(b) + block_size(c);

    unsafe {
      allocator.free(b);
      allocator.free(c);
    }

    let free: Vec<_> = allocator
      .blocks()
      .filter(|block| !block.allocated)
      .collect();
    assert_eq!(free[0].address, b as usize);
    assert_eq!(free[0].size, merged_size);
    assert!(allocator.check(false));

    let heap_size = allocator.heap_size();
    let e = allocator.allocate(merged_size - OVERHEAD);
    assert_eq!(e, b);
    assert_eq!(allocator.heap_size(), heap_size);

    unsafe {
      allocator.free(a);
      allocator.free(d);
      allocator.free(e);
    }
    assert_eq!(allocator.blocks().count(), 1);
    assert_eq!(allocator.free_bytes(), allocator.heap_size() - SENTINELS);
    assert!(allocator.check(false));
  }

  #[test]
  fn test_out_of_memory_returns_null() {
    let mut allocator = SegregatedAllocator::with_capacity(8192).unwrap();

    assert!(allocator.allocate(1 << 20).is_null());
    assert!(allocator.allocate(usize::MAX).is_null());

    // Smaller requests still work afterwards.
    let address = allocator.allocate(1000);
    assert!(!address.is_null());
    assert!(allocator.check(false));
  }

  #[test]
  fn test_reallocate_zero_is_null() {
    let mut allocator = allocator();
    let address = allocator.allocate(32);
    fill(address, 32, 3);

    unsafe {
      assert!(allocator.reallocate(address, 0).is_null());
    }
    assert!(holds(address, 32, 3));
    assert!(allocator.check(false));
  }

  #[test]
  fn test_reallocate_null_allocates() {
    let mut allocator = allocator();
    let address = unsafe { allocator.reallocate(ptr::null_mut(), 24) };
    assert!(!address.is_null());
    assert!(unsafe { allocator.usable_size(address) } >= 24);
    assert_eq!(unsafe { allocator.usable_size(ptr::null_mut()) }, 0);
  }

  #[test]
  fn test_reallocate_within_capacity_keeps_address() {
    let mut allocator = allocator();
    let address = allocator.allocate(300);
    fill(address, 300, 9);

    let grown = unsafe { allocator.reallocate(address, 400) };
    assert!(holds(grown, 300, 9));

    let heap_size = allocator.heap_size();
    let shrunk = unsafe { allocator.reallocate(grown, 100) };
    assert_eq!(shrunk, grown);
    assert_eq!(allocator.heap_size(), heap_size);
    assert!(holds(shrunk, 100, 9));
  }

  #[test]
  fn test_reallocate_grows_into_free_neighbour() {
    let mut allocator = allocator();

    let a = allocator.allocate(24);
    let b = allocator.allocate(64);
    assert_eq!(b as usize, a as usize + block_size(a));

    fill(a, 24, 1);
    unsafe { allocator.free(b) };

    let heap_size = allocator.heap_size();
    let grown = unsafe { allocator.reallocate(a, 100) };

    assert_eq!(grown, a);
    assert_eq!(allocator.heap_size(), heap_size);
    assert!(holds(grown, 24, 1));
    assert!(allocator.check(false));
  }

  #[test]
  fn test_reallocate_grows_over_epilogue() {
    let mut allocator = allocator();

    // Takes the whole initial chunk, so the epilogue follows.
    let a = allocator.allocate(56);
    assert_eq!(block_size(a), 64);
    fill(a, 56, 5);

    let grown = unsafe { allocator.reallocate(a, 1000) };

    assert_eq!(grown, a);
    assert_eq!(allocator.heap_size(), SENTINELS + 64 + 4096);
    assert_eq!(block_size(grown), 64 + 4096);
    assert!(holds(grown, 56, 5));
    assert!(allocator.check(false));
  }

  #[test]
  fn test_reallocate_moves_when_neighbour_is_allocated() {
    let mut allocator = allocator();

    let a = allocator.allocate(24);
    let b = allocator.allocate(24);
    assert_eq!(b as usize, a as usize + block_size(a));
    fill(a, 24, 42);
    fill(b, 24, 7);

    let moved = unsafe { allocator.reallocate(a, 200) };

    assert_ne!(moved, a);
    assert!(holds(moved, 24, 42));
    assert!(holds(b, 24, 7));
    assert!(allocator.check(false));
  }

  #[test]
  fn test_reallocate_moves_when_free_neighbour_is_too_small() {
    let mut allocator = allocator();

    let a = allocator.allocate(16);
    let b = allocator.allocate(16);
    let c = allocator.allocate(16);
    assert_eq!(b as usize, a as usize + block_size(a));
    assert_eq!(c as usize, b as usize + block_size(b));
    fill(a, 16, 21);

    // Free but too small, and not the last block: no in place growth.
    unsafe { allocator.free(b) };

    let moved = unsafe { allocator.reallocate(a, 500) };

    assert!(!moved.is_null());
    assert_ne!(moved, a);
    assert!(holds(moved, 16, 21));
    assert!(allocator.check(false));
  }

  #[test]
  fn test_reallocate_out_of_memory_keeps_block() {
    let mut allocator = SegregatedAllocator::with_capacity(8192).unwrap();

    let a = allocator.allocate(16);
    let b = allocator.allocate(16);
    fill(a, 16, 33);
    fill(b, 16, 44);

    let heap_size = allocator.heap_size();
    let result = unsafe { allocator.reallocate(a, 1 << 20) };

    assert!(result.is_null());
    assert_eq!(allocator.heap_size(), heap_size);
    assert!(holds(a, 16, 33));
    assert!(holds(b, 16, 44));
    assert!(allocator.check(false));

    // Still live: it can be freed normally.
    unsafe { allocator.free(a) };
    assert!(allocator.check(false));
  }

  #[test]
  fn test_moved_small_block_takes_front_and_pins_its_own_rest() {
    let mut allocator = allocator();

    // Fills the initial chunk exactly, so the move needs a fresh extension.
    let a = allocator.allocate(24);
    let b = allocator.allocate(24);
    assert_eq!(allocator.free_bytes(), 0);
    fill(a, 24, 8);

    // 48 byte block plus margin: large enough to reach the split threshold,
    // yet placed at the low end of the extension.
    let moved = unsafe { allocator.reallocate(a, 40) };
    assert_eq!(moved as usize, b as usize + block_size(b));
    assert_eq!(block_size(moved), 48 + 128);
    assert!(holds(moved, 24, 8));

    let blocks: Vec<_> = allocator.blocks().collect();
    let after = blocks
      .iter()
      .find(|block| block.address == moved as usize + block_size(moved))
      .unwrap();
    assert!(!after.allocated);
    assert!(after.pinned);
    assert!(blocks.iter().all(|block| !(block.allocated && block.pinned)));
    assert!(allocator.check(false));
  }

  #[test]
  fn test_reallocate_pins_neighbour() {
    // Every request takes the front of its block, so the moved block is
    // followed by the free rest of the extension.
    let config = Config::default().with_split_threshold(usize::MAX);
    let mut allocator = SegregatedAllocator::new(MappedHeap::new(1 << 20).unwrap(), config);
    allocator.init().unwrap();

    let a = allocator.allocate(24);
    let b = allocator.allocate(24);

    let moved = unsafe { allocator.reallocate(a, 200) };
    let info = allocator
      .blocks()
      .find(|block| block.address == moved as usize)
      .unwrap();

    // Exactly the requested size plus margin: the next block gets pinned.
    assert_eq!(info.size, 208 + 128);
    let next = allocator
      .blocks()
      .find(|block| block.address == info.end() + WSIZE)
      .unwrap();
    assert!(next.pinned);
    assert!(!next.allocated);

    // Pinned free space is not handed out to other requests.
    let c = allocator.allocate(next.size - OVERHEAD);
    assert_ne!(c as usize, next.address);

    // Freeing the owner releases the pin again.
    unsafe { allocator.free(moved) };
    assert!(allocator.blocks().all(|block| !block.pinned));
    assert!(allocator.check(false));

    unsafe {
      allocator.free(b);
      allocator.free(c);
    }
    assert!(allocator.check(false));
  }

  #[test]
  fn test_free_releases_pinned_space_with_its_neighbours() {
    let config = Config::default().with_split_threshold(usize::MAX);
    let mut allocator = SegregatedAllocator::new(MappedHeap::new(1 << 20).unwrap(), config);
    allocator.init().unwrap();

    let a = allocator.allocate(24);
    let b = allocator.allocate(24);
    let moved = unsafe { allocator.reallocate(a, 200) };

    // Lands past the pinned rest of the first extension, then gets freed
    // again: the pinned block now has a free neighbour it could not absorb.
    let pinned = allocator.blocks().find(|block| block.pinned).unwrap();
    let c = allocator.allocate(pinned.size - OVERHEAD);
    unsafe { allocator.free(c) };
    assert!(allocator.check(false));
    assert_eq!(allocator.blocks().filter(|block| !block.allocated).count(), 3);

    unsafe { allocator.free(moved) };

    let blocks: Vec<_> = allocator.blocks().collect();
    assert_eq!(blocks.len(), 3);
    assert_eq!(blocks[1].address, b as usize);
    assert!(!blocks[2].allocated);
    assert!(allocator.check(false));
  }

  #[test]
  fn test_repeated_growth_stays_in_place() {
    let mut allocator = allocator();
    let mut address = allocator.allocate(16);
    let _other = allocator.allocate(16);

    let mut len = 16;
    fill(address, len, 11);

    let mut moves = 0;
    for _ in 0..64 {
      let grown = unsafe { allocator.reallocate(address, len + 16) };
      if grown != address {
        moves += 1;
      }
      address = grown;
      len += 16;
      assert!(holds(address, 16, 11));
    }

    assert!(moves <= 2, "moved {} times", moves);
    assert!(allocator.check(false));
  }

  #[test]
  fn test_many_instances_are_independent() {
    let mut first = allocator();
    let mut second = allocator();

    let a = first.allocate(64);
    let b = second.allocate(64);
    fill(a, 64, 1);
    fill(b, 64, 2);

    unsafe { first.free(a) };
    assert!(holds(b, 64, 2));
    assert!(first.check(false));
    assert!(second.check(false));
  }
}
