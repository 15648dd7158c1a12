//! Sub-byte packing for u2/u4/u8 tensors.
//!
//! Codes are unsigned and packed LSB-first: lane 0 of a byte occupies the
//! lowest `bits` bits. Operands of the dual-row engine use the reordered
//! layout described on [`reordered_slot`].

use serde::{Deserialize, Serialize};
use std::fmt;

/// Bytes in one reorder group (one 32-bit load on Cortex-M).
pub const REORDER_GROUP_BYTES: usize = 4;

/// Largest number of elements in a reorder group (u2: 16 per word).
pub const MAX_REORDER_GROUP: usize = REORDER_GROUP_BYTES * 4;

/// Storage width of an unsigned quantized code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
pub enum BitWidth {
    U2,
    U4,
    U8,
}

impl BitWidth {
    pub const fn bits(self) -> u32 {
        match self {
            BitWidth::U2 => 2,
            BitWidth::U4 => 4,
            BitWidth::U8 => 8,
        }
    }

    /// Codes per byte.
    pub const fn per_byte(self) -> usize { 8 / self.bits() as usize }

    pub const fn mask(self) -> u8 {
        match self {
            BitWidth::U2 => 0x03,
            BitWidth::U4 => 0x0F,
            BitWidth::U8 => 0xFF,
        }
    }

    /// Largest representable code, `2^bits - 1`.
    pub const fn max_code(self) -> u8 { self.mask() }

    pub const fn levels(self) -> usize { 1 << self.bits() }

    /// Breakpoints needed per channel by threshold folding.
    pub const fn thresholds_per_channel(self) -> usize { self.levels() - 1 }

    /// Bytes needed to hold `n` packed codes.
    pub const fn packed_len(self, n: usize) -> usize { n.div_ceil(self.per_byte()) }

    /// Elements in one reorder group.
    pub const fn reorder_group(self) -> usize { REORDER_GROUP_BYTES * self.per_byte() }
}

impl TryFrom<u32> for BitWidth {
    type Error = String;

    fn try_from(bits: u32) -> Result<Self, Self::Error> {
        match bits {
            2 => Ok(BitWidth::U2),
            4 => Ok(BitWidth::U4),
            8 => Ok(BitWidth::U8),
            other => Err(format!("unsupported bit width {other}, expected 2, 4 or 8")),
        }
    }
}

impl From<BitWidth> for u32 {
    fn from(w: BitWidth) -> u32 { w.bits() }
}

impl fmt::Display for BitWidth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { write!(f, "u{}", self.bits()) }
}

/// Extracts the code stored at `lane` of `byte`.
#[inline(always)]
pub fn unpack(byte: u8, lane: usize, width: BitWidth) -> u8 {
    debug_assert!(lane < width.per_byte());
    (byte >> (lane as u32 * width.bits())) & width.mask()
}

/// Packs up to `per_byte` codes into one byte, first code in the low bits.
/// Codes are truncated to the lane width.
#[inline(always)]
pub fn pack(codes: &[u8], width: BitWidth) -> u8 {
    debug_assert!(codes.len() <= width.per_byte());
    codes
        .iter()
        .enumerate()
        .fold(0u8, |byte, (lane, &c)| byte | ((c & width.mask()) << (lane as u32 * width.bits())))
}

#[inline]
pub fn get_code(packed: &[u8], index: usize, width: BitWidth) -> u8 {
    let per_byte = width.per_byte();
    unpack(packed[index / per_byte], index % per_byte, width)
}

#[inline]
pub fn set_code(packed: &mut [u8], index: usize, width: BitWidth, code: u8) {
    let per_byte = width.per_byte();
    let shift = (index % per_byte) as u32 * width.bits();
    let byte = &mut packed[index / per_byte];
    *byte = (*byte & !(width.mask() << shift)) | ((code & width.mask()) << shift);
}

/// Dense codes -> packed bytes. Writes `width.packed_len(codes.len())` bytes.
pub fn pack_slice(codes: &[u8], width: BitWidth, dst: &mut [u8]) {
    for (byte, chunk) in dst.iter_mut().zip(codes.chunks(width.per_byte())) {
        *byte = pack(chunk, width);
    }
}

/// Packed bytes -> dense codes, one per `dst` element.
pub fn unpack_slice(src: &[u8], width: BitWidth, dst: &mut [u8]) {
    for (i, d) in dst.iter_mut().enumerate() {
        *d = get_code(src, i, width);
    }
}

/// Natural-order decode of `dst.len()` codes starting at element `start`,
/// with `offset` subtracted and the result widened to i16.
pub fn unpack_to_i16(src: &[u8], start: usize, width: BitWidth, offset: u8, dst: &mut [i16]) {
    let off = offset as i16;
    for (i, d) in dst.iter_mut().enumerate() {
        *d = get_code(src, start + i, width) as i16 - off;
    }
}

/// Storage slot `(byte, lane)` of logical element `j` inside a reorder group.
///
/// Elements are consumed in lane pairs: pair `p` takes field `p % per_byte`
/// of bytes `(h, h + 2)` where `h = p / per_byte`. For u8 this is the byte
/// order `[a0, a2, a1, a3]`.
#[inline(always)]
pub const fn reordered_slot(j: usize, width: BitWidth) -> (usize, usize) {
    let pair = j / 2;
    let half = pair / width.per_byte();
    (half + 2 * (j % 2), pair % width.per_byte())
}

/// Decodes one reorder group (4 bytes) into `width.reorder_group()` offset-free
/// i16 lanes, in logical order.
#[inline(always)]
pub fn decode_group(word: &[u8], width: BitWidth, offset: i16, dst: &mut [i16]) {
    let mut j = 0;
    for half in 0..2 {
        let (row_a, row_b) = (word[half], word[half + 2]);
        for field in 0..width.per_byte() {
            dst[j] = unpack(row_a, field, width) as i16 - offset;
            dst[j + 1] = unpack(row_b, field, width) as i16 - offset;
            j += 2;
        }
    }
}

/// Reordered packed codes -> offset-free i16 lanes in logical order.
///
/// Full groups go through [`decode_group`]; the tail past the last full group
/// is stored in natural order and decoded with the same subtract-then-widen.
pub fn unpack_reordered_to_i16(src: &[u8], width: BitWidth, offset: u8, dst: &mut [i16]) {
    let group = width.reorder_group();
    let full = dst.len() / group;
    let (body, tail) = dst.split_at_mut(full * group);
    for (g, lanes) in body.chunks_exact_mut(group).enumerate() {
        let at = g * REORDER_GROUP_BYTES;
        decode_group(&src[at..at + REORDER_GROUP_BYTES], width, offset as i16, lanes);
    }
    if !tail.is_empty() {
        unpack_to_i16(&src[full * REORDER_GROUP_BYTES..], 0, width, offset, tail);
    }
}

/// Logical-order codes -> reordered packed bytes; inverse of
/// [`unpack_reordered_to_i16`]. Writes `width.packed_len(codes.len())` bytes.
pub fn pack_reordered(codes: &[u8], width: BitWidth, dst: &mut [u8]) {
    let group = width.reorder_group();
    let full = codes.len() / group;
    for (g, chunk) in codes[..full * group].chunks_exact(group).enumerate() {
        let word = &mut dst[g * REORDER_GROUP_BYTES..(g + 1) * REORDER_GROUP_BYTES];
        word.fill(0);
        for (j, &c) in chunk.iter().enumerate() {
            let (byte, lane) = reordered_slot(j, width);
            word[byte] |= (c & width.mask()) << (lane as u32 * width.bits());
        }
    }
    pack_slice(&codes[full * group..], width, &mut dst[full * REORDER_GROUP_BYTES..]);
}
