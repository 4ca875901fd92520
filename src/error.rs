use thiserror::Error;

/// Errors returned by tree construction and by operations called with keys of
/// the wrong shape.
///
/// No operation mutates the tree before returning one of these.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CritBitError {
    #[error("illegal bit width: {width} (allowed: 1..={max})")]
    InvalidWidth { width: u32, max: u32 },

    #[error("illegal dimension count: {0}")]
    InvalidDimensions(usize),

    #[error("key has {actual} dimensions, tree has {expected}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("key has {actual} words, tree expects {expected}")]
    KeyLength { expected: usize, actual: usize },

    #[error("tree is k-dimensional; use the *_kd methods")]
    NotOneDimensional,

    #[error("tree is one-dimensional; use the 1-D methods")]
    NotMultiDimensional,

    #[error("masked queries support at most 64 dimensions, tree has {0}")]
    TooManyDimensions(usize),
}

pub type Result<T> = std::result::Result<T, CritBitError>;
