//! # critbit
//!
//! Crit-bit (PATRICIA) trees over fixed-width bit keys.
//!
//! - [`CritBit`] stores 1-D keys of any width as arrays of `u64` words, or
//!   k-dimensional points whose coordinates are interleaved into one key.
//!   It supports range queries in both modes.
//! - [`CritBit64Cow`] stores `u64` keys with copy-on-write updates: readers
//!   never block and always see a consistent [`CowSnapshot`].
//!
//! Signed integers and floating point values are mapped to order-preserving
//! unsigned keys with the helpers in [`bit_tools`].
//!
//! ## Example
//!
//! ```rust
//! use critbit::CritBit;
//!
//! let mut tree: CritBit<&str> = CritBit::create_1d(4).unwrap();
//! tree.put(&[0b1010], "a").unwrap();
//! tree.put(&[0b1011], "b").unwrap();
//! tree.put(&[0b0000], "c").unwrap();
//!
//! let hits: Vec<_> = tree
//!     .query(&[0b1000], &[0b1011])
//!     .unwrap()
//!     .map(|(_, v)| *v)
//!     .collect();
//! assert_eq!(hits, ["a", "b"]);
//!
//! let mut points: CritBit<u32> = CritBit::create_kd(16, 2).unwrap();
//! points.put_kd(&[3, 7], 1).unwrap();
//! points.put_kd(&[9, 2], 2).unwrap();
//! assert_eq!(points.query_kd(&[0, 0], &[5, 10]).unwrap().count(), 1);
//! ```

#![deny(unsafe_op_in_unsafe_fn)]

pub mod bit_tools;
mod config;
mod cow;
mod critbit;
mod error;

pub use config::{Config, MAX_KEY_BITS};
pub use cow::{CowIter, CowSnapshot, CritBit64Cow};
pub use critbit::{CritBit, Iter, KdIter, MaskQueryIter, QueryIter, QueryKdIter, RangeCheck};
pub use error::{CritBitError, Result};

#[cfg(test)]
mod proptests;
