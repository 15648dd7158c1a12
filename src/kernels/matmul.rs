//! Dual-row matrix multiply over reordered weight rows.
//!
//! Each call multiplies `ch_out` weight rows by two activation vectors (two
//! output pixels) and writes two packed output streams back to back.
//! Weights are raw codes; their zero point is removed through a per-vector
//! correction `Σ z_a * b_i` computed once per call.

use super::dot::dot_i16_2x2;
use super::pack::{decode_group, unpack_to_i16, BitWidth, MAX_REORDER_GROUP, REORDER_GROUP_BYTES};
use super::requant::Requantize;
use crate::error::{ensure_len, KernelError};
use log::trace;

#[derive(Debug, Clone)]
pub struct MatMulKernel<'a, R> {
    /// `ch_out` rows of `weight_width.packed_len(num_col)` bytes, each row in
    /// the reordered layout (see [`super::pack::pack_reordered`]).
    pub weights: &'a [u8],
    pub weight_width: BitWidth,
    pub ch_out: usize,
    pub num_col: usize,
    pub bias: &'a [i32],
    pub z_a: u8,
    pub requant: R,
}

impl<R: Requantize> MatMulKernel<'_, R> {
    pub fn row_bytes(&self) -> usize { self.weight_width.packed_len(self.num_col) }

    /// Bytes of one output stream (one pixel).
    pub fn stream_len(&self) -> usize { self.requant.width().packed_len(self.ch_out) }

    /// Checks everything that does not depend on the per-call buffers.
    pub fn validate(&self) -> Result<(), KernelError> {
        if self.ch_out % 2 != 0 {
            return Err(KernelError::OddRowCount(self.ch_out));
        }
        ensure_len("weight", self.weights.len(), self.ch_out * self.row_bytes())?;
        ensure_len("bias", self.bias.len(), self.ch_out)?;
        self.requant.check_channels(self.ch_out)
    }

    /// Multiplies against `cols = [vector 1 | vector 2]` (offset-free, each
    /// `num_col` long) and writes both streams at `out[cursor..]`. Returns the
    /// cursor past the second stream.
    pub fn run(&self, cols: &[i16], out: &mut [u8], cursor: usize) -> Result<usize, KernelError> {
        self.validate()?;
        ensure_len("column", cols.len(), 2 * self.num_col)?;
        ensure_len("output", out.len(), cursor + 2 * self.stream_len())?;
        Ok(self.run_unchecked(cols, out, cursor))
    }

    pub(crate) fn run_unchecked(&self, cols: &[i16], out: &mut [u8], cursor: usize) -> usize {
        trace!("matmul {}x{} {} -> {} at {}", self.ch_out, self.num_col, self.weight_width, self.requant.width(), cursor);
        let n = self.num_col;
        let stream_len = self.stream_len();
        let width = self.requant.width();
        let (b0, b1) = cols[..2 * n].split_at(n);
        let za = self.z_a as i32;
        let corr = [zero_point_correction(b0, za), zero_point_correction(b1, za)];

        let (s1, rest) = out[cursor..].split_at_mut(stream_len);
        let s2 = &mut rest[..stream_len];

        let row_bytes = self.row_bytes();
        let ww = self.weight_width;
        let group = ww.reorder_group();
        let full = n / group;
        let tail = n - full * group;
        let mut a0 = [0i16; MAX_REORDER_GROUP];
        let mut a1 = [0i16; MAX_REORDER_GROUP];

        for i in (0..self.ch_out).step_by(2) {
            let r0 = &self.weights[i * row_bytes..(i + 1) * row_bytes];
            let r1 = &self.weights[(i + 1) * row_bytes..(i + 2) * row_bytes];
            let mut acc = [
                self.bias[i].wrapping_sub(corr[0]),
                self.bias[i].wrapping_sub(corr[1]),
                self.bias[i + 1].wrapping_sub(corr[0]),
                self.bias[i + 1].wrapping_sub(corr[1]),
            ];
            for g in 0..full {
                let w = g * REORDER_GROUP_BYTES;
                let k = g * group;
                decode_group(&r0[w..w + REORDER_GROUP_BYTES], ww, 0, &mut a0[..group]);
                decode_group(&r1[w..w + REORDER_GROUP_BYTES], ww, 0, &mut a1[..group]);
                acc = dot_i16_2x2([&a0[..group], &a1[..group]], [&b0[k..k + group], &b1[k..k + group]], acc);
            }
            if tail > 0 {
                let w = full * REORDER_GROUP_BYTES;
                let k = full * group;
                unpack_to_i16(&r0[w..], 0, ww, 0, &mut a0[..tail]);
                unpack_to_i16(&r1[w..], 0, ww, 0, &mut a1[..tail]);
                acc = dot_i16_2x2([&a0[..tail], &a1[..tail]], [&b0[k..], &b1[k..]], acc);
            }

            let q = |s: i32, c: usize| self.requant.requantize(s, c);
            store_pair(s1, i, width, q(acc[0], i), q(acc[2], i + 1));
            store_pair(s2, i, width, q(acc[1], i), q(acc[3], i + 1));
        }
        cursor + 2 * stream_len
    }
}

/// `Σ z_a * b_i` with wrapping accumulation.
#[inline]
pub fn zero_point_correction(b: &[i16], z_a: i32) -> i32 {
    b.iter().fold(0i32, |s, &x| s.wrapping_add(z_a * x as i32))
}

/// Writes channels `ch` and `ch + 1` of one stream. A pair landing on lane 0
/// starts a fresh byte; a pair in the upper lanes is OR-ed into the byte the
/// previous pair started (u2: odd pair index -> high half).
#[inline(always)]
fn store_pair(stream: &mut [u8], ch: usize, width: BitWidth, lo: u8, hi: u8) {
    let per_byte = width.per_byte();
    if per_byte == 1 {
        stream[ch] = lo;
        stream[ch + 1] = hi;
        return;
    }
    let byte = ch / per_byte;
    let lane = (ch % per_byte) as u32;
    let bits = ((lo & width.mask()) << (lane * width.bits())) | ((hi & width.mask()) << ((lane + 1) * width.bits()));
    if lane == 0 {
        stream[byte] = bits;
    } else {
        stream[byte] |= bits;
    }
}
