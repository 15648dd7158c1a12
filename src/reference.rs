//! Naive scalar oracle for every kernel.
//!
//! Straight loops over dense codes, no unrolling and no reordered layouts.
//! The accelerated kernels must agree with these bit for bit.

use crate::kernels::im2col::ConvGeometry;
use crate::kernels::pack::BitWidth;

/// `bias + Σ (w_i - z_w) * (x_i - z_x)`, wrapping like the kernels.
pub fn dot(w: &[u8], x: &[u8], z_w: u8, z_x: u8, bias: i32) -> i32 {
    let mut acc = bias;
    for (&wi, &xi) in w.iter().zip(x) {
        let p = (wi as i32 - z_w as i32) * (xi as i32 - z_x as i32);
        acc = acc.wrapping_add(p);
    }
    acc
}

/// Scale/shift requantization written out in 64-bit arithmetic.
pub fn affine(acc: i32, m_zero: i32, n_zero: i8, z_out: u8, width: BitWidth) -> u8 {
    let n = n_zero as i32;
    let mut shifted = acc as i64;
    if n < 0 {
        shifted = (shifted * (1i64 << (-n).min(31))).clamp(i32::MIN as i64, i32::MAX as i64);
    }
    let mut v = (shifted * m_zero as i64) >> 32;
    if n > 0 {
        v >>= n.min(31);
    }
    (v + z_out as i64).clamp(0, width.max_code() as i64) as u8
}

/// Linear scan: number of breakpoints at or below `acc`.
pub fn fold(acc: i32, breakpoints: &[i16], width: BitWidth) -> u8 {
    let count = breakpoints.iter().filter(|&&t| acc >= t as i32).count();
    count.min(width.max_code() as usize) as u8
}

/// Yields `Some(element index)` of input pixel `(oy*s - pad + ky, ...)`,
/// `None` in the padding.
fn tap(geom: &ConvGeometry, oy: usize, ox: usize, ky: usize, kx: usize) -> Option<usize> {
    let y = (oy * geom.stride_h + ky) as isize - geom.padding.top as isize;
    let x = (ox * geom.stride_w + kx) as isize - geom.padding.left as isize;
    if y < 0 || x < 0 || y as usize >= geom.in_h || x as usize >= geom.in_w {
        return None;
    }
    Some((y as usize * geom.in_w + x as usize) * geom.channels)
}

/// Depthwise convolution over dense codes. Padding taps read a raw code of
/// zero. Returns one code per `(pixel, channel)`.
pub fn depthwise_conv_hwc(
    input: &[u8],
    geom: &ConvGeometry,
    weights: &[u8],
    bias: &[i32],
    z_in: u8,
    z_wt: u8,
    requant: impl Fn(i32, usize) -> u8,
) -> Vec<u8> {
    let ch = geom.channels;
    let mut out = Vec::with_capacity(geom.out_pixels() * ch);
    for oy in 0..geom.out_h {
        for ox in 0..geom.out_w {
            for c in 0..ch {
                let mut acc = bias[c] as i64;
                for ky in 0..geom.kernel_h {
                    for kx in 0..geom.kernel_w {
                        let x = tap(geom, oy, ox, ky, kx).map_or(0, |base| input[base + c]);
                        let w = weights[(ky * geom.kernel_w + kx) * ch + c];
                        acc += (w as i64 - z_wt as i64) * (x as i64 - z_in as i64);
                    }
                }
                out.push(requant(acc as i32, c));
            }
        }
    }
    out
}

/// Standard convolution over dense codes; `weights` holds `ch_out` rows of
/// `patch_len` codes in `[ky][kx][ch_in]` order. Padding taps contribute
/// nothing (real zero after the input offset).
pub fn conv_hwc(
    input: &[u8],
    geom: &ConvGeometry,
    weights: &[u8],
    ch_out: usize,
    bias: &[i32],
    z_in: u8,
    z_wt: u8,
    requant: impl Fn(i32, usize) -> u8,
) -> Vec<u8> {
    let ch = geom.channels;
    let patch = geom.patch_len();
    let mut out = Vec::with_capacity(geom.out_pixels() * ch_out);
    for oy in 0..geom.out_h {
        for ox in 0..geom.out_w {
            for o in 0..ch_out {
                let row = &weights[o * patch..(o + 1) * patch];
                let mut acc = bias[o] as i64;
                for ky in 0..geom.kernel_h {
                    for kx in 0..geom.kernel_w {
                        let Some(base) = tap(geom, oy, ox, ky, kx) else { continue };
                        for c in 0..ch {
                            let w = row[(ky * geom.kernel_w + kx) * ch + c];
                            acc += (w as i64 - z_wt as i64) * (input[base + c] as i64 - z_in as i64);
                        }
                    }
                }
                out.push(requant(acc as i32, o));
            }
        }
    }
    out
}

/// Dense-weight matmul against two offset-free vectors. Returns the codes of
/// both output streams.
pub fn mat_mult(
    weights: &[u8],
    ch_out: usize,
    cols: [&[i16]; 2],
    bias: &[i32],
    z_a: u8,
    requant: impl Fn(i32, usize) -> u8,
) -> [Vec<u8>; 2] {
    let n = cols[0].len();
    let mut streams = [Vec::with_capacity(ch_out), Vec::with_capacity(ch_out)];
    for (v, stream) in streams.iter_mut().enumerate() {
        for o in 0..ch_out {
            let row = &weights[o * n..(o + 1) * n];
            let mut acc = bias[o] as i64;
            for (k, &w) in row.iter().enumerate() {
                acc += (w as i64 - z_a as i64) * cols[v][k] as i64;
            }
            stream.push(requant(acc as i32, o));
        }
    }
    streams
}
