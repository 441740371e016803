//! Allocator tunables.
//!
//! Values can be set programmatically or loaded from the environment:
//!
//! | Variable | Description | Default |
//! |----------|-------------|---------|
//! | `SEGALLOC_INITIAL_CHUNK` | Bytes requested from the heap source by `init` | 64 |
//! | `SEGALLOC_CHUNK` | Minimum bytes requested when the heap has to grow | 4096 |
//! | `SEGALLOC_REALLOC_MARGIN` | Headroom added to every reallocation | 128 |
//! | `SEGALLOC_SPLIT_THRESHOLD` | Requests at least this big are placed at the tail of a split block | 100 |
//!
//! ```rust
//! use segalloc::Config;
//!
//! let config = Config::default().with_chunk(1 << 16).with_realloc_margin(256);
//! assert_eq!(config.chunk, 1 << 16);
//! ```

use std::env;

use crate::{align, block::MIN_BLOCK_SIZE};

/// See the [module documentation](self).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Config {
  /// Size of the free block laid down by `init`.
  pub initial_chunk: usize,

  /// Minimum growth when no free block fits a request.
  pub chunk: usize,

  /// Extra bytes reserved on each reallocation so that a block that keeps
  /// growing doesn't have to move every time.
  pub realloc_margin: usize,

  /// Requests of at least this many bytes take the high end of the block
  /// they are carved from; smaller ones take the low end. Compared against
  /// the adjusted block size of the request; the reallocation margin does
  /// not count.
  pub split_threshold: usize,
}

impl Default for Config {
  fn default() -> Self {
    Self {
      initial_chunk: 1 << 6,
      chunk: 1 << 12,
      realloc_margin: 1 << 7,
      split_threshold: 100,
    }
  }
}

impl Config {
  /// Loads the configuration from `SEGALLOC_*` variables. Missing or
  /// unparsable values keep their default.
  pub fn from_env() -> Self {
    Self::from_vars(|name| env::var(name).ok())
  }

  /// Same as [`Config::from_env`] with variables looked up through `lookup`.
  fn from_vars(lookup: impl Fn(&str) -> Option<String>) -> Self {
    let defaults = Self::default();
    let var = |name: &str, default: usize| {
      lookup(name)
        .as_deref()
        .and_then(parse_usize)
        .unwrap_or(default)
    };

    Self {
      initial_chunk: var("SEGALLOC_INITIAL_CHUNK", defaults.initial_chunk),
      chunk: var("SEGALLOC_CHUNK", defaults.chunk),
      realloc_margin: var("SEGALLOC_REALLOC_MARGIN", defaults.realloc_margin),
      split_threshold: var("SEGALLOC_SPLIT_THRESHOLD", defaults.split_threshold),
    }
  }

  pub fn with_initial_chunk(
    mut self,
    bytes: usize,
  ) -> Self {
    self.initial_chunk = bytes;
    self
  }

  pub fn with_chunk(
    mut self,
    bytes: usize,
  ) -> Self {
    self.chunk = bytes;
    self
  }

  pub fn with_realloc_margin(
    mut self,
    bytes: usize,
  ) -> Self {
    self.realloc_margin = bytes;
    self
  }

  pub fn with_split_threshold(
    mut self,
    bytes: usize,
  ) -> Self {
    self.split_threshold = bytes;
    self
  }

  /// Byte counts rounded to the block alignment, chunks at least one
  /// minimum block.
  pub(crate) fn normalized(self) -> Self {
    Self {
      initial_chunk: align!(self.initial_chunk.max(MIN_BLOCK_SIZE)),
      chunk: align!(self.chunk.max(MIN_BLOCK_SIZE)),
      realloc_margin: align!(self.realloc_margin),
      split_threshold: self.split_threshold,
    }
  }
}

fn parse_usize(value: &str) -> Option<usize> {
  value.trim().parse().ok()
}
