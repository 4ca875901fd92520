use crate::error::{CritBitError, Result};

/// Largest total key width (`width * dims`) a tree can address.
pub const MAX_KEY_BITS: u32 = u32::MAX - 64;

/// Construction parameters for [`CritBit`](crate::CritBit).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Config {
    /// Bits per key (1-D) or bits per dimension (k-D, at most 64).
    pub width: u32,
    /// `None` for a 1-D tree, `Some(k)` for a k-dimensional tree.
    pub dims: Option<usize>,
    /// Capacity hint for the node arena.
    pub initial_capacity: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            width: 64,
            dims: None,
            initial_capacity: 0,
        }
    }
}

impl Config {
    pub fn one_dimensional(width: u32) -> Self {
        Self {
            width,
            ..Self::default()
        }
    }

    pub fn k_dimensional(width: u32, dims: usize) -> Self {
        Self {
            width,
            dims: Some(dims),
            ..Self::default()
        }
    }

    pub fn with_initial_capacity(mut self, initial_capacity: usize) -> Self {
        self.initial_capacity = initial_capacity;
        self
    }

    /// Reject widths and dimension counts the tree cannot represent.
    pub fn validate(&self) -> Result<()> {
        match self.dims {
            None => {
                if self.width == 0 || self.width > MAX_KEY_BITS {
                    return Err(CritBitError::InvalidWidth {
                        width: self.width,
                        max: MAX_KEY_BITS,
                    });
                }
            }
            Some(dims) => {
                if self.width == 0 || self.width > 64 {
                    return Err(CritBitError::InvalidWidth {
                        width: self.width,
                        max: 64,
                    });
                }
                if dims == 0 {
                    return Err(CritBitError::InvalidDimensions(dims));
                }
                let total = u32::try_from(dims)
                    .ok()
                    .and_then(|d| d.checked_mul(self.width))
                    .filter(|t| *t <= MAX_KEY_BITS);
                if total.is_none() {
                    return Err(CritBitError::InvalidDimensions(dims));
                }
            }
        }
        Ok(())
    }

    /// Total bits of the (interleaved) key.
    pub(crate) fn key_bits(&self) -> u32 {
        self.width * self.dims.unwrap_or(1) as u32
    }
}
