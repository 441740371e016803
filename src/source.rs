use std::ptr::{self, NonNull};

use libc::{c_void, intptr_t, sbrk};

use crate::{align::ALIGNMENT, error::AllocError};

/// Default capacity of a [`MappedHeap`]: 20 MiB.
pub const DEFAULT_CAPACITY: usize = 20 * (1 << 20);

/// The only place new memory comes from. The allocator asks its source to
/// move the break forward and carves blocks out of the bytes it gets back.
///
/// ```text
///   ┌────────────────────────────────┬──────────────┐
///   │        already handed out      │  increment   │
///   └────────────────────────────────┴──────────────┘
///                                    ▲              ▲
///                                    │              └── new break
///                                    └── returned by grow()
/// ```
///
/// Implementations must hand out one contiguous range: the bytes returned by
/// a call start exactly where the previous call's bytes ended. The first
/// address ever returned must be aligned to [`ALIGNMENT`].
pub trait HeapSource {
  /// Moves the break forward by `increment` bytes and returns the old break.
  fn grow(
    &mut self,
    increment: usize,
  ) -> Result<NonNull<u8>, AllocError>;
}

impl<S: HeapSource + ?Sized> HeapSource for &mut S {
  fn grow(
    &mut self,
    increment: usize,
  ) -> Result<NonNull<u8>, AllocError> {
    (**self).grow(increment)
  }
}

impl<S: HeapSource + ?Sized> HeapSource for Box<S> {
  fn grow(
    &mut self,
    increment: usize,
  ) -> Result<NonNull<u8>, AllocError> {
    (**self).grow(increment)
  }
}

/// A private simulated break. A fixed amount of address space is mapped up
/// front with `mmap(2)` and handed out in order; asking for more than the
/// mapping holds fails with [`AllocError::OutOfMemory`].
///
/// Every instance is independent, so many allocators can live in the same
/// process (tests run in parallel, for instance).
pub struct MappedHeap {
  start: NonNull<u8>,
  capacity: usize,
  brk: usize,
}

impl MappedHeap {
  pub fn new(capacity: usize) -> Result<Self, AllocError> {
    // Memory should be private to our process and not mapped to any file.
    let protection = libc::PROT_READ | libc::PROT_WRITE;
    let flags = libc::MAP_PRIVATE | libc::MAP_ANONYMOUS;

    let address = unsafe { libc::mmap(ptr::null_mut(), capacity, protection, flags, -1, 0) };

    if address == libc::MAP_FAILED {
      log::warn!("mmap of {} bytes failed", capacity);
      return Err(AllocError::MapFailed { capacity });
    }

    let start = NonNull::new(address.cast::<u8>()).ok_or(AllocError::MapFailed { capacity })?;

    Ok(Self {
      start,
      capacity,
      brk: 0,
    })
  }

  /// Same as [`MappedHeap::new`] with [`DEFAULT_CAPACITY`].
  pub fn with_default_capacity() -> Result<Self, AllocError> {
    Self::new(DEFAULT_CAPACITY)
  }

  /// First byte of the mapping.
  pub fn start(&self) -> NonNull<u8> {
    self.start
  }

  pub fn capacity(&self) -> usize {
    self.capacity
  }

  /// Bytes handed out so far.
  pub fn used(&self) -> usize {
    self.brk
  }
}

impl HeapSource for MappedHeap {
  fn grow(
    &mut self,
    increment: usize,
  ) -> Result<NonNull<u8>, AllocError> {
    match self.brk.checked_add(increment) {
      Some(brk) if brk <= self.capacity => {
        let old = unsafe { self.start.add(self.brk) };
        self.brk = brk;
        Ok(old)
      }
      _ => Err(AllocError::OutOfMemory { increment }),
    }
  }
}

impl Drop for MappedHeap {
  fn drop(&mut self) {
    unsafe {
      if libc::munmap(self.start.as_ptr().cast::<c_void>(), self.capacity) != 0 {
        log::warn!("munmap of {:?} failed", self.start);
      }
    }
  }
}

/// The real program break, moved with `sbrk(2)`.
///
/// Only one allocator should ever drive the program break, and nothing else
/// in the process should be moving it concurrently.
#[derive(Debug, Default)]
pub struct ProgramBreak {
  aligned: bool,
}

impl ProgramBreak {
  pub const fn new() -> Self {
    Self { aligned: false }
  }

  /// Current program break (`sbrk(0)`).
  pub fn current() -> *mut u8 {
    unsafe { sbrk(0).cast() }
  }

  /// Pads the break so the first block lands on an aligned address.
  fn align_break(&mut self) -> Result<(), AllocError> {
    let current = Self::current() as usize;
    let padding = current.wrapping_neg() & (ALIGNMENT - 1);

    if padding > 0 && unsafe { sbrk(padding as intptr_t) } == usize::MAX as *mut c_void {
      return Err(AllocError::OutOfMemory { increment: padding });
    }

    self.aligned = true;
    Ok(())
  }
}

impl HeapSource for ProgramBreak {
  fn grow(
    &mut self,
    increment: usize,
  ) -> Result<NonNull<u8>, AllocError> {
    let out_of_memory = AllocError::OutOfMemory { increment };
    let delta = intptr_t::try_from(increment).map_err(|_| out_of_memory)?;

    if !self.aligned {
      self.align_break()?;
    }

    let address = unsafe { sbrk(delta) };

    if address == usize::MAX as *mut c_void {
      return Err(out_of_memory);
    }

    NonNull::new(address.cast::<u8>()).ok_or(out_of_memory)
  }
}
