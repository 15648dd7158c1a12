//! Receptive-field staging for HWC tensors.

use super::pack::{unpack_to_i16, BitWidth};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Padding {
    pub top: usize,
    pub bottom: usize,
    pub left: usize,
    pub right: usize,
}

impl Padding {
    pub const fn uniform(p: usize) -> Self { Self { top: p, bottom: p, left: p, right: p } }
}

/// Spatial description of one convolution call. `channels` is the input
/// channel count; output extents are supplied by the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConvGeometry {
    pub in_h: usize,
    pub in_w: usize,
    pub channels: usize,
    pub kernel_h: usize,
    pub kernel_w: usize,
    pub stride_h: usize,
    pub stride_w: usize,
    pub padding: Padding,
    pub out_h: usize,
    pub out_w: usize,
}

impl ConvGeometry {
    /// Square input, kernel and output with a single stride.
    pub fn square(dim_in: usize, channels: usize, kernel: usize, stride: usize, padding: Padding, dim_out: usize) -> Self {
        Self {
            in_h: dim_in,
            in_w: dim_in,
            channels,
            kernel_h: kernel,
            kernel_w: kernel,
            stride_h: stride,
            stride_w: stride,
            padding,
            out_h: dim_out,
            out_w: dim_out,
        }
    }

    pub const fn taps(&self) -> usize { self.kernel_h * self.kernel_w }

    /// Elements in one staged receptive field.
    pub const fn patch_len(&self) -> usize { self.taps() * self.channels }

    pub const fn out_pixels(&self) -> usize { self.out_h * self.out_w }

    /// Input elements (not bytes).
    pub const fn input_len(&self) -> usize { self.in_h * self.in_w * self.channels }

    /// Largest output extent the padded input supports along each axis.
    pub fn max_out_dims(&self) -> (usize, usize) {
        let span_h = self.in_h + self.padding.top + self.padding.bottom;
        let span_w = self.in_w + self.padding.left + self.padding.right;
        let fit = |span: usize, k: usize, s: usize| if span < k { 0 } else { (span - k) / s.max(1) + 1 };
        (fit(span_h, self.kernel_h, self.stride_h), fit(span_w, self.kernel_w, self.stride_w))
    }

    /// Calls `f(source_element, dst_offset)` for every kernel tap of output
    /// pixel `(out_y, out_x)` in (ky, kx) order. `source_element` is `None`
    /// when the tap lies in the padding.
    #[inline]
    fn for_each_tap(&self, out_y: usize, out_x: usize, mut f: impl FnMut(Option<usize>, usize)) {
        let y0 = (out_y * self.stride_h) as isize - self.padding.top as isize;
        let x0 = (out_x * self.stride_w) as isize - self.padding.left as isize;
        let mut at = 0;
        for y in y0..y0 + self.kernel_h as isize {
            for x in x0..x0 + self.kernel_w as isize {
                let inside = y >= 0 && x >= 0 && (y as usize) < self.in_h && (x as usize) < self.in_w;
                let src = inside.then(|| (y as usize * self.in_w + x as usize) * self.channels);
                f(src, at);
                at += self.channels;
            }
        }
    }
}

/// Copies the receptive field of `(out_y, out_x)` into `dst`, writing
/// `T::default()` for taps in the padding. Overwrites `geom.patch_len()`
/// elements.
pub fn stage_patch<T: Copy + Default>(src: &[T], geom: &ConvGeometry, out_y: usize, out_x: usize, dst: &mut [T]) {
    let ch = geom.channels;
    geom.for_each_tap(out_y, out_x, |from, at| {
        let run = &mut dst[at..at + ch];
        match from {
            Some(base) => run.copy_from_slice(&src[base..base + ch]),
            None => run.fill(T::default()),
        }
    });
}

/// Stages a packed `width` source as offset-free i16 lanes: valid taps get
/// `code - z_in`, padding taps get 0.
pub fn stage_patch_i16(
    src: &[u8],
    width: BitWidth,
    geom: &ConvGeometry,
    out_y: usize,
    out_x: usize,
    z_in: u8,
    dst: &mut [i16],
) {
    let ch = geom.channels;
    geom.for_each_tap(out_y, out_x, |from, at| {
        let run = &mut dst[at..at + ch];
        match from {
            Some(base) => unpack_to_i16(src, base, width, z_in, run),
            None => run.fill(0),
        }
    });
}
