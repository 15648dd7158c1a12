//! Standard HWC convolution built on the dual-row matmul.

use super::im2col::{stage_patch_i16, ConvGeometry};
use super::matmul::MatMulKernel;
use super::pack::BitWidth;
use super::requant::Requantize;
use crate::error::{ensure_len, KernelError};
use log::debug;

/// Caller-owned working memory for [`ConvHwc::run`].
pub struct ConvScratch<'b> {
    /// At least `2 * patch_len` lanes: two staged pixels.
    pub col: &'b mut [i16],
    /// At least two output pixels; only touched when the pixel count is odd.
    pub tail: &'b mut [u8],
}

/// Convolution over a packed `in_width` input. Weight rows of `kernel`
/// follow the staging order `[ky][kx][ch_in]`.
#[derive(Debug, Clone)]
pub struct ConvHwc<'a, R> {
    pub geom: ConvGeometry,
    pub in_width: BitWidth,
    pub z_in: u8,
    pub kernel: MatMulKernel<'a, R>,
}

impl<R: Requantize> ConvHwc<'_, R> {
    pub fn pixel_bytes(&self) -> usize { self.kernel.stream_len() }

    pub fn output_len(&self) -> usize { self.geom.out_pixels() * self.pixel_bytes() }

    /// Lanes required in [`ConvScratch::col`].
    pub fn col_len(&self) -> usize { 2 * self.geom.patch_len() }

    pub fn run(&self, input: &[u8], scratch: ConvScratch<'_>, output: &mut [u8]) -> Result<usize, KernelError> {
        let g = &self.geom;
        if self.kernel.num_col != g.patch_len() {
            return Err(KernelError::ShapeMismatch { what: "matmul columns", expected: g.patch_len(), got: self.kernel.num_col });
        }
        self.kernel.validate()?;
        ensure_len("input", input.len(), self.in_width.packed_len(g.input_len()))?;
        ensure_len("column", scratch.col.len(), self.col_len())?;
        ensure_len("output", output.len(), self.output_len())?;
        let pixels = g.out_pixels();
        let pixel_bytes = self.pixel_bytes();
        if pixels % 2 == 1 {
            ensure_len("tail", scratch.tail.len(), 2 * pixel_bytes)?;
        }
        debug!(
            "conv {}x{}x{} {} k{}x{} -> {}x{}x{} {}",
            g.in_h, g.in_w, g.channels, self.in_width, g.kernel_h, g.kernel_w,
            g.out_h, g.out_w, self.kernel.ch_out, self.kernel.requant.width()
        );

        let patch = g.patch_len();
        let col = &mut scratch.col[..2 * patch];
        let at = |p: usize| (p / g.out_w, p % g.out_w);
        let mut cursor = 0;
        let mut p = 0;
        while p + 1 < pixels {
            {
                let (first, second) = col.split_at_mut(patch);
                let (y, x) = at(p);
                stage_patch_i16(input, self.in_width, g, y, x, self.z_in, first);
                let (y, x) = at(p + 1);
                stage_patch_i16(input, self.in_width, g, y, x, self.z_in, second);
            }
            cursor = self.kernel.run_unchecked(col, output, cursor);
            p += 2;
        }
        if p < pixels {
            {
                let (first, second) = col.split_at_mut(patch);
                let (y, x) = at(p);
                stage_patch_i16(input, self.in_width, g, y, x, self.z_in, first);
                second.copy_from_slice(first);
            }
            self.kernel.run_unchecked(col, scratch.tail, 0);
            output[cursor..cursor + pixel_bytes].copy_from_slice(&scratch.tail[..pixel_bytes]);
            cursor += pixel_bytes;
        }
        Ok(cursor)
    }
}
