//! Accumulator -> output code conversion.
//!
//! Two policies implement [`Requantize`]; drivers are generic over it so the
//! policy is fixed when the kernel is instantiated.

use super::pack::BitWidth;
use crate::error::{ensure_len, KernelError};

pub trait Requantize {
    /// Width of the produced codes.
    fn width(&self) -> BitWidth;

    /// Code for the accumulator of output `channel`, always in `[0, max_code]`.
    fn requantize(&self, acc: i32, channel: usize) -> u8;

    /// Verifies per-channel parameters cover `channels` outputs.
    fn check_channels(&self, _channels: usize) -> Result<(), KernelError> { Ok(()) }
}

impl<R: Requantize + ?Sized> Requantize for &R {
    fn width(&self) -> BitWidth { (**self).width() }
    fn requantize(&self, acc: i32, channel: usize) -> u8 { (**self).requantize(acc, channel) }
    fn check_channels(&self, channels: usize) -> Result<(), KernelError> { (**self).check_channels(channels) }
}

/// High word of the signed 64-bit product.
#[inline(always)]
pub fn hi_smull(a: i32, b: i32) -> i32 { ((a as i64 * b as i64) >> 32) as i32 }

/// `acc << shift` clamped to the i32 range instead of wrapping.
#[inline(always)]
pub fn shl_saturating(acc: i32, shift: u32) -> i32 {
    ((acc as i64) << shift.min(31)).clamp(i32::MIN as i64, i32::MAX as i64) as i32
}

/// Clamp into the unsigned range of `width`.
#[inline(always)]
pub fn saturate(v: i32, width: BitWidth) -> u8 { v.clamp(0, width.max_code() as i32) as u8 }

/// Fixed-point scale/shift requantization:
/// `sat((hi_smull(acc << n1, m_zero) >> n2) + z_out)` with
/// `n1 = max(0, -n_zero)` and `n2 = max(0, n_zero)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Affine {
    pub m_zero: i32,
    pub n_zero: i8,
    pub z_out: u8,
    width: BitWidth,
    pre_shift: u32,
    post_shift: u32,
}

impl Affine {
    pub fn new(m_zero: i32, n_zero: i8, z_out: u8, width: BitWidth) -> Self {
        let n = n_zero as i32;
        Self {
            m_zero,
            n_zero,
            z_out,
            width,
            pre_shift: (-n).clamp(0, 31) as u32,
            post_shift: n.clamp(0, 31) as u32,
        }
    }

    /// Result before clamping to the output width. The pre-shift saturates
    /// at the i32 bounds so the mapping stays monotonic in `acc`.
    #[inline(always)]
    pub fn scale(&self, acc: i32) -> i32 {
        (hi_smull(shl_saturating(acc, self.pre_shift), self.m_zero) >> self.post_shift) + self.z_out as i32
    }
}

impl Requantize for Affine {
    fn width(&self) -> BitWidth { self.width }

    #[inline(always)]
    fn requantize(&self, acc: i32, _channel: usize) -> u8 { saturate(self.scale(acc), self.width) }
}

/// Per-channel threshold folding over a flat table laid out as
/// `channel * (2^bits - 1)`, ascending within each channel.
#[derive(Debug, Clone, Copy)]
pub struct Thresholds<'a> {
    table: &'a [i16],
    width: BitWidth,
}

impl<'a> Thresholds<'a> {
    pub fn new(table: &'a [i16], width: BitWidth) -> Self { Self { table, width } }

    /// Breakpoints of one output channel.
    #[inline(always)]
    pub fn channel(&self, channel: usize) -> &'a [i16] {
        let n = self.width.thresholds_per_channel();
        &self.table[channel * n..(channel + 1) * n]
    }

    /// Number of channels the table covers.
    pub fn channels(&self) -> usize { self.table.len() / self.width.thresholds_per_channel() }
}

impl Requantize for Thresholds<'_> {
    fn width(&self) -> BitWidth { self.width }

    #[inline(always)]
    fn requantize(&self, acc: i32, channel: usize) -> u8 { fold(acc, self.channel(channel), self.width) }

    fn check_channels(&self, channels: usize) -> Result<(), KernelError> {
        ensure_len("threshold", self.table.len(), channels * self.width.thresholds_per_channel())
    }
}

/// Bucket index of `acc`: the number of breakpoints `t` with `acc >= t`,
/// clamped to the width's code range.
#[inline]
pub fn fold(acc: i32, breakpoints: &[i16], width: BitWidth) -> u8 {
    let bucket = breakpoints.partition_point(|&t| acc >= t as i32);
    bucket.min(width.max_code() as usize) as u8
}
