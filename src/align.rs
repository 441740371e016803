/// Every block size and every payload address is a multiple of this many
/// bytes (one double word).
pub const ALIGNMENT: usize = 8;

/// Rounds the given size up to the block alignment ([`ALIGNMENT`]).
///
/// # Examples
///
/// ```rust
/// use segalloc::align;
///
/// assert_eq!(align!(1), 8);
/// assert_eq!(align!(8), 8);
/// assert_eq!(align!(13), 16);
/// ```
#[macro_export]
macro_rules! align {
  ($value:expr) => {
    ($value + $crate::align::ALIGNMENT - 1) & !($crate::align::ALIGNMENT - 1)
  };
}

/// Same as [`align!`] but returns `None` instead of overflowing. Used for
/// caller supplied sizes, which can be anything up to `usize::MAX`.
#[macro_export]
macro_rules! checked_align {
  ($value:expr) => {
    ($value as usize)
      .checked_add($crate::align::ALIGNMENT - 1)
      .map(|v| v & !($crate::align::ALIGNMENT - 1))
  };
}
