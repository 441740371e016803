use thiserror::Error;

/// Reasons an allocator operation can fail. Only the heap source can run
/// out of memory; misuse of the allocator (double free, foreign pointers) is
/// undefined behaviour and never reported here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum AllocError {
  /// The heap source refused to extend the heap.
  #[error("heap source cannot grow by {increment} bytes")]
  OutOfMemory { increment: usize },

  /// The request doesn't fit in a block header.
  #[error("request of {requested} bytes exceeds the largest block size")]
  RequestTooLarge { requested: usize },

  /// Reserving the backing mapping of a [`crate::MappedHeap`] failed.
  #[error("failed to map {capacity} bytes for the heap")]
  MapFailed { capacity: usize },
}
