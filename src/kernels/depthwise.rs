//! Depthwise HWC convolution over dense u8 activations and weights.

use super::dot::{dot_u8_strided, dot_u8_strided_x4};
use super::im2col::{stage_patch, ConvGeometry};
use super::pack::{pack, BitWidth};
use super::requant::Requantize;
use crate::error::{ensure_len, KernelError};
use log::debug;

/// One depthwise layer. `weights` are laid out `[ky][kx][channel]`, one
/// code per byte; outputs are packed per pixel at the requantizer's width,
/// each pixel starting on a fresh byte.
#[derive(Debug, Clone)]
pub struct DepthwiseConv<'a, R> {
    pub geom: ConvGeometry,
    pub ch_out: usize,
    pub weights: &'a [u8],
    pub bias: &'a [i32],
    pub z_in: u8,
    pub z_wt: u8,
    pub requant: R,
}

impl<R: Requantize> DepthwiseConv<'_, R> {
    /// Bytes of one packed output pixel.
    pub fn pixel_bytes(&self) -> usize { self.requant.width().packed_len(self.ch_out) }

    pub fn output_len(&self) -> usize { self.geom.out_pixels() * self.pixel_bytes() }

    fn validate(&self, input: &[u8], col_buffer: &[u8], output: &[u8]) -> Result<(), KernelError> {
        if self.geom.channels != self.ch_out {
            return Err(KernelError::ChannelMismatch { ch_in: self.geom.channels, ch_out: self.ch_out });
        }
        ensure_len("input", input.len(), self.geom.input_len())?;
        ensure_len("weight", self.weights.len(), self.geom.patch_len())?;
        ensure_len("bias", self.bias.len(), self.ch_out)?;
        ensure_len("column", col_buffer.len(), self.geom.patch_len())?;
        ensure_len("output", output.len(), self.output_len())?;
        self.requant.check_channels(self.ch_out)
    }

    /// Runs the layer, overwriting `col_buffer` per output pixel. Returns the
    /// number of output bytes written.
    pub fn run(&self, input: &[u8], col_buffer: &mut [u8], output: &mut [u8]) -> Result<usize, KernelError> {
        self.validate(input, col_buffer, output)?;
        let g = &self.geom;
        debug!(
            "depthwise {}x{}x{} k{}x{} s{}x{} -> {}x{}x{} {}",
            g.in_h, g.in_w, g.channels, g.kernel_h, g.kernel_w, g.stride_h, g.stride_w,
            g.out_h, g.out_w, self.ch_out, self.requant.width()
        );
        let pixel_bytes = self.pixel_bytes();
        if pixel_bytes == 0 {
            return Ok(0);
        }
        let col = &mut col_buffer[..g.patch_len()];
        let len = self.output_len();
        for (p, out) in output[..len].chunks_exact_mut(pixel_bytes).enumerate() {
            stage_patch(input, g, p / g.out_w, p % g.out_w, col);
            self.channels(col, out);
        }
        Ok(len)
    }

    /// All channels of one staged pixel: four per pass, then one at a time.
    #[inline]
    fn channels(&self, col: &[u8], out: &mut [u8]) {
        let ch = self.geom.channels;
        let taps = self.geom.taps();
        let width = self.requant.width();
        let mut codes = [0u8; 4];
        let mut at = 0;
        let quads = ch / 4;
        for q in 0..quads {
            let c = q * 4;
            let acc = [self.bias[c], self.bias[c + 1], self.bias[c + 2], self.bias[c + 3]];
            let sums = dot_u8_strided_x4(&self.weights[c..], &col[c..], ch, taps, self.z_wt, self.z_in, acc);
            for (lane, &s) in sums.iter().enumerate() {
                codes[lane] = self.requant.requantize(s, c + lane);
            }
            at = store_codes(out, at, &codes, width);
        }
        let rest = ch - quads * 4;
        for lane in 0..rest {
            let c = quads * 4 + lane;
            let s = dot_u8_strided(&self.weights[c..], &col[c..], ch, taps, self.z_wt, self.z_in, self.bias[c]);
            codes[lane] = self.requant.requantize(s, c);
        }
        store_codes(out, at, &codes[..rest], width);
    }
}

/// Packs `codes` LSB-first into fresh bytes starting at `at`.
#[inline(always)]
fn store_codes(out: &mut [u8], mut at: usize, codes: &[u8], width: BitWidth) -> usize {
    for chunk in codes.chunks(width.per_byte()) {
        out[at] = pack(chunk, width);
        at += 1;
    }
    at
}
