use std::ptr::NonNull;

/// Word size in bytes. Headers, footers and free list links are one word.
pub(crate) const WSIZE: usize = 4;

/// Double word size in bytes.
pub(crate) const DSIZE: usize = 8;

/// Bytes every block spends on metadata (header + footer).
pub(crate) const OVERHEAD: usize = 2 * WSIZE;

/// Smallest block we ever create: header, footer and the two free list links
/// that live in the payload while the block is free.
pub const MIN_BLOCK_SIZE: usize = 2 * DSIZE;

/// Largest block size that fits in a header word.
pub(crate) const MAX_BLOCK_SIZE: usize = (u32::MAX & SIZE_MASK) as usize;

const ALLOCATED: u32 = 0x1;
const PINNED: u32 = 0x2;
const SIZE_MASK: u32 = !0x7;

/// Decoded boundary tag. In memory this is one 32 bit word where the size
/// (always a multiple of 8) occupies the high bits and the low bits carry the
/// flags:
///
/// ```text
///   31                                    3   2   1   0
///  ┌───────────────────────────────────────┬───┬───┬───┐
///  │               block size              │ 0 │ P │ A │
///  └───────────────────────────────────────┴───┴───┴───┘
///                                                │   └── allocated
///                                                └────── pinned
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Tag {
  pub size: usize,
  pub allocated: bool,
  pub pinned: bool,
}

impl Tag {
  pub const fn new(
    size: usize,
    allocated: bool,
    pinned: bool,
  ) -> Self {
    Self {
      size,
      allocated,
      pinned,
    }
  }

  pub const fn free(size: usize) -> Self {
    Self::new(size, false, false)
  }

  pub const fn allocated(size: usize) -> Self {
    Self::new(size, true, false)
  }

  pub fn pack(self) -> u32 {
    debug_assert!(self.size <= MAX_BLOCK_SIZE && self.size % DSIZE == 0);

    let mut word = self.size as u32 & SIZE_MASK;
    if self.allocated {
      word |= ALLOCATED;
    }
    if self.pinned {
      word |= PINNED;
    }
    word
  }

  pub fn unpack(word: u32) -> Self {
    Self {
      size: (word & SIZE_MASK) as usize,
      allocated: word & ALLOCATED != 0,
      pinned: word & PINNED != 0,
    }
  }
}

/// Handle to a block, identified by its payload address. Everything else is
/// found from there using the sizes stored in the boundary tags:
///
/// ```text
///              ┌──────────┬─────────────────────────────┬──────────┐
///   block      │  header  │           payload           │  footer  │
///              └──────────┴─────────────────────────────┴──────────┘
///              ▲          ▲                             ▲          ▲
///              │          │                             │          │
///   payload - WSIZE    payload         payload + size - DSIZE   next block's
///                                                               header
/// ```
///
/// While a block is free, the first two words of its payload hold the free
/// list links (see [`crate::buckets`]).
///
/// The handle itself is just an address. All accessors are unsafe because
/// they trust that the address points at a well formed block of the heap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Block(NonNull<u8>);

impl Block {
  /// # Safety
  ///
  /// `payload` must be the payload address of a block (or a sentinel) inside
  /// the managed heap.
  #[inline]
  pub unsafe fn from_payload(payload: NonNull<u8>) -> Self {
    Self(payload)
  }

  #[inline]
  pub fn payload(self) -> NonNull<u8> {
    self.0
  }

  #[inline]
  pub fn addr(self) -> usize {
    self.0.as_ptr() as usize
  }

  #[inline]
  unsafe fn header_ptr(self) -> *mut u32 {
    unsafe { self.0.as_ptr().sub(WSIZE).cast() }
  }

  #[inline]
  unsafe fn footer_ptr(
    self,
    size: usize,
  ) -> *mut u32 {
    unsafe { self.0.as_ptr().add(size - DSIZE).cast() }
  }

  /// Tag stored in the header.
  #[inline]
  pub unsafe fn tag(self) -> Tag {
    unsafe { Tag::unpack(self.header_ptr().read()) }
  }

  /// Tag stored in the footer. Only meaningful for blocks with a non-zero
  /// size, the epilogue has no footer.
  #[inline]
  pub unsafe fn footer_tag(self) -> Tag {
    unsafe {
      let size = self.size();
      Tag::unpack(self.footer_ptr(size).read())
    }
  }

  #[inline]
  pub unsafe fn size(self) -> usize {
    unsafe { self.tag().size }
  }

  #[inline]
  pub unsafe fn is_allocated(self) -> bool {
    unsafe { self.tag().allocated }
  }

  #[inline]
  pub unsafe fn is_pinned(self) -> bool {
    unsafe { self.tag().pinned }
  }

  /// Writes `tag` to both the header and the footer. The footer location is
  /// derived from `tag.size`, not from whatever the header said before.
  #[inline]
  pub unsafe fn write(
    self,
    tag: Tag,
  ) {
    unsafe {
      self.header_ptr().write(tag.pack());
      if tag.size > 0 {
        // The pin only matters to whoever walks forward into this header.
        self
          .footer_ptr(tag.size)
          .write(Tag::new(tag.size, tag.allocated, false).pack());
      }
    }
  }

  /// Writes the header only. Used for the epilogue.
  #[inline]
  pub unsafe fn write_header(
    self,
    tag: Tag,
  ) {
    unsafe { self.header_ptr().write(tag.pack()) }
  }

  pub unsafe fn set_pinned(
    self,
    pinned: bool,
  ) {
    unsafe {
      let tag = self.tag();
      self.write_header(Tag { pinned, ..tag });
    }
  }

  /// Next block in address order.
  #[inline]
  pub unsafe fn next(self) -> Block {
    unsafe { Block(self.0.add(self.size())) }
  }

  /// Previous block in address order, found through its footer which sits
  /// right before our header.
  #[inline]
  pub unsafe fn prev(self) -> Block {
    unsafe {
      let footer = self.0.as_ptr().sub(DSIZE).cast::<u32>().read();
      Block(self.0.sub(Tag::unpack(footer).size))
    }
  }

  /// Predecessor link (heap offset) of a free block.
  #[inline]
  pub unsafe fn pred_link(self) -> u32 {
    unsafe { self.0.as_ptr().cast::<u32>().read() }
  }

  /// Successor link (heap offset) of a free block.
  #[inline]
  pub unsafe fn succ_link(self) -> u32 {
    unsafe { self.0.as_ptr().add(WSIZE).cast::<u32>().read() }
  }

  #[inline]
  pub unsafe fn set_pred_link(
    self,
    link: u32,
  ) {
    unsafe { self.0.as_ptr().cast::<u32>().write(link) }
  }

  #[inline]
  pub unsafe fn set_succ_link(
    self,
    link: u32,
  ) {
    unsafe { self.0.as_ptr().add(WSIZE).cast::<u32>().write(link) }
  }

  pub unsafe fn info(self) -> BlockInfo {
    unsafe {
      let tag = self.tag();
      BlockInfo {
        address: self.addr(),
        size: tag.size,
        allocated: tag.allocated,
        pinned: tag.pinned,
      }
    }
  }
}

/// Snapshot of one block, as reported by
/// [`crate::SegregatedAllocator::blocks`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockInfo {
  /// Payload address.
  pub address: usize,
  /// Total block size, metadata included.
  pub size: usize,
  pub allocated: bool,
  pub pinned: bool,
}

impl BlockInfo {
  /// Address one past the last byte of the block, which is the payload
  /// address of the next block minus one header word.
  pub fn end(&self) -> usize {
    self.address - WSIZE + self.size
  }
}
