//! Bit-level primitives shared by the tries.
//!
//! Bit positions are MSB-first: bit 0 is the most significant bit of word 0,
//! bit 64 the most significant bit of word 1, and so on.

use std::cmp::Ordering;

const SIGN_BIT_64: u64 = 1 << 63;
const SIGN_BIT_32: u32 = 1 << 31;

// =============================================================================
// Masks
// =============================================================================

/// Mask with the `n` most significant bits set. Saturates at 64.
#[inline]
pub fn high_bits_mask(n: u32) -> u64 {
    match n {
        0 => 0,
        1..=63 => u64::MAX << (64 - n),
        _ => u64::MAX,
    }
}

/// Mask with the `n` least significant bits set. Saturates at 64.
#[inline]
pub fn low_bits_mask(n: u32) -> u64 {
    match n {
        0 => 0,
        1..=63 => (1u64 << n) - 1,
        _ => u64::MAX,
    }
}

/// Number of 64-bit words needed to hold `bits` bits.
#[inline]
pub fn words_for_bits(bits: u32) -> usize {
    bits.div_ceil(64) as usize
}

// =============================================================================
// Sortable encodings for floating point values
// =============================================================================

/// Encode an `f64` so that unsigned order of the result equals numeric order
/// of the input.
///
/// Negative values have every bit below the sign complemented, positive values
/// keep their bit pattern, and the sign bit is then flipped so that negatives
/// sort below positives as unsigned integers. `-0.0` sorts directly below
/// `+0.0`.
#[inline]
pub fn to_sortable_long(value: f64) -> u64 {
    let bits = value.to_bits();
    if bits & SIGN_BIT_64 == 0 {
        bits | SIGN_BIT_64
    } else {
        !bits
    }
}

/// Inverse of [`to_sortable_long`].
#[inline]
pub fn to_double(sortable: u64) -> f64 {
    if sortable & SIGN_BIT_64 != 0 {
        f64::from_bits(sortable & !SIGN_BIT_64)
    } else {
        f64::from_bits(!sortable)
    }
}

/// 32-bit analogue of [`to_sortable_long`], widened to `u64`.
///
/// The result only occupies the low 32 bits, which makes it a natural key for
/// a 32-bit dimension of a k-dimensional tree.
#[inline]
pub fn to_sortable_long_f32(value: f32) -> u64 {
    let bits = value.to_bits();
    let sortable = if bits & SIGN_BIT_32 == 0 {
        bits | SIGN_BIT_32
    } else {
        !bits
    };
    u64::from(sortable)
}

/// Inverse of [`to_sortable_long_f32`]. Only the low 32 bits are read.
#[inline]
pub fn to_float(sortable: u64) -> f32 {
    let s = sortable as u32;
    if s & SIGN_BIT_32 != 0 {
        f32::from_bits(s & !SIGN_BIT_32)
    } else {
        f32::from_bits(!s)
    }
}

// =============================================================================
// Single bit access
// =============================================================================

#[inline]
fn word_mask(pos: u32) -> u64 {
    SIGN_BIT_64 >> (pos & 63)
}

#[inline]
pub fn get_bit(words: &[u64], pos: u32) -> bool {
    words[(pos >> 6) as usize] & word_mask(pos) != 0
}

#[inline]
pub fn set_bit(words: &mut [u64], pos: u32, value: bool) {
    let w = &mut words[(pos >> 6) as usize];
    if value {
        *w |= word_mask(pos);
    } else {
        *w &= !word_mask(pos);
    }
}

/// Read bit `pos` of `src`, write it to the same position in `dst`, and
/// return it.
#[inline]
pub fn get_and_copy_bit(src: &[u64], pos: u32, dst: &mut [u64]) -> bool {
    let bit = get_bit(src, pos);
    set_bit(dst, pos, bit);
    bit
}

/// Bit `pos` (0..64, MSB-first) of a single word.
#[inline]
pub fn get_bit64(word: u64, pos: u32) -> bool {
    word & (SIGN_BIT_64 >> pos) != 0
}

#[inline]
pub fn set_bit64(word: u64, pos: u32, value: bool) -> u64 {
    if value {
        word | (SIGN_BIT_64 >> pos)
    } else {
        word & !(SIGN_BIT_64 >> pos)
    }
}

// =============================================================================
// Word array comparisons
// =============================================================================

/// Position of the first bit where `a` and `b` differ, or `None` if they are
/// equal. Words before `start_word` are assumed equal and skipped.
#[inline]
pub fn first_diff_bit_from(a: &[u64], b: &[u64], start_word: usize) -> Option<u32> {
    debug_assert_eq!(a.len(), b.len());
    for i in start_word..a.len() {
        let x = a[i] ^ b[i];
        if x != 0 {
            return Some(i as u32 * 64 + x.leading_zeros());
        }
    }
    None
}

#[inline]
pub fn first_diff_bit(a: &[u64], b: &[u64]) -> Option<u32> {
    first_diff_bit_from(a, b, 0)
}

/// Lexicographic comparison of bits `[from, to)` of `a` and `b`.
pub fn cmp_bits(a: &[u64], b: &[u64], from: u32, to: u32) -> Ordering {
    if from >= to {
        return Ordering::Equal;
    }
    let first = (from >> 6) as usize;
    let last = ((to - 1) >> 6) as usize;
    for w in first..=last {
        let mut mask = u64::MAX;
        if w == first {
            mask &= u64::MAX >> (from & 63);
        }
        if w == last {
            mask &= high_bits_mask(((to - 1) & 63) + 1);
        }
        match (a[w] & mask).cmp(&(b[w] & mask)) {
            Ordering::Equal => {}
            other => return other,
        }
    }
    Ordering::Equal
}

// =============================================================================
// Interleaving
// =============================================================================

/// Interleave the low `bits_per_value` bits of every value in `src`.
///
/// Output bit `i * dims + d` is bit `i` (counting from the most significant
/// of the `bits_per_value` bits) of `src[d]`. The result has
/// `words_for_bits(dims * bits_per_value)` words; unused trailing bits are 0.
pub fn merge(dims: usize, bits_per_value: u32, src: &[u64]) -> Vec<u64> {
    debug_assert_eq!(src.len(), dims);
    let total = dims as u32 * bits_per_value;
    let mut out = vec![0u64; words_for_bits(total)];
    let mut pos = 0u32;
    for level in 0..bits_per_value {
        let shift = bits_per_value - 1 - level;
        for value in src {
            if (value >> shift) & 1 != 0 {
                out[(pos >> 6) as usize] |= word_mask(pos);
            }
            pos += 1;
        }
    }
    out
}

/// Inverse of [`merge`]: recover `dims` right-aligned values of
/// `bits_per_value` bits each.
pub fn split(dims: usize, bits_per_value: u32, src: &[u64]) -> Vec<u64> {
    let mut out = vec![0u64; dims];
    split_into(dims, bits_per_value, src, 0, dims as u32 * bits_per_value, &mut out);
    out
}

/// De-interleave bits `[from, to)` of `src` into `dst`, overwriting exactly
/// the destination bits those positions map to.
pub(crate) fn split_into(
    dims: usize,
    bits_per_value: u32,
    src: &[u64],
    from: u32,
    to: u32,
    dst: &mut [u64],
) {
    let dims32 = dims as u32;
    for pos in from..to {
        let d = (pos % dims32) as usize;
        let level = pos / dims32;
        let mask = 1u64 << (bits_per_value - 1 - level);
        if get_bit(src, pos) {
            dst[d] |= mask;
        } else {
            dst[d] &= !mask;
        }
    }
}

// =============================================================================
// Formatting
// =============================================================================

/// The `width` least significant bits of `word`, most significant first,
/// grouped by 8 with `.` separators.
pub fn to_binary(word: u64, width: u32) -> String {
    let width = width.min(64);
    let mut s = String::with_capacity(width as usize + width as usize / 8);
    for i in (0..width).rev() {
        s.push(if (word >> i) & 1 != 0 { '1' } else { '0' });
        if i != 0 && i % 8 == 0 {
            s.push('.');
        }
    }
    s
}

/// Every word rendered with [`to_binary`], separated by `, `.
pub fn to_binary_words(words: &[u64], width: u32) -> String {
    words
        .iter()
        .map(|w| to_binary(*w, width))
        .collect::<Vec<_>>()
        .join(", ")
}
