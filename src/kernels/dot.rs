//! Quantized dot-product engine.
//!
//! Every variant computes `acc + Σ a_i * b_i` over offset-free operands with
//! wrapping i32 accumulation. The `*_unrolled` bodies consume two lanes per
//! multiply-accumulate (one packed 16x2 MAC on Cortex-M DSP cores) and finish
//! odd lengths one element at a time; the `*_scalar` bodies are plain element
//! loops. The `dsp` feature selects which one the public entry points call.
//! Both are always compiled and give identical sums.

/// Dual 16-bit multiply with 32-bit accumulate.
#[inline(always)]
fn mac2(a: [i16; 2], b: [i16; 2], acc: i32) -> i32 {
    acc.wrapping_add(a[0] as i32 * b[0] as i32)
        .wrapping_add(a[1] as i32 * b[1] as i32)
}

#[inline(always)]
fn centered(code: u8, zero_point: u8) -> i16 { code as i16 - zero_point as i16 }

#[inline(always)]
fn dot_scalar(a: &[i16], b: &[i16], acc: i32) -> i32 {
    a.iter().zip(b).fold(acc, |s, (&x, &y)| s.wrapping_add(x as i32 * y as i32))
}

/// One channel against one vector.
#[inline]
pub fn dot_i16(a: &[i16], b: &[i16], acc: i32) -> i32 {
    debug_assert_eq!(a.len(), b.len());
    if cfg!(feature = "dsp") {
        dot_i16_unrolled(a, b, acc)
    } else {
        dot_scalar(a, b, acc)
    }
}

pub(crate) fn dot_i16_unrolled(a: &[i16], b: &[i16], mut acc: i32) -> i32 {
    let mut a4 = a.chunks_exact(4);
    let mut b4 = b.chunks_exact(4);
    for (x, y) in (&mut a4).zip(&mut b4) {
        acc = mac2([x[0], x[1]], [y[0], y[1]], acc);
        acc = mac2([x[2], x[3]], [y[2], y[3]], acc);
    }
    dot_scalar(a4.remainder(), b4.remainder(), acc)
}

/// Two channels against two vectors. Accumulators are ordered
/// `[a0·b0, a0·b1, a1·b0, a1·b1]`.
#[inline]
pub fn dot_i16_2x2(a: [&[i16]; 2], b: [&[i16]; 2], acc: [i32; 4]) -> [i32; 4] {
    debug_assert!(a.iter().chain(&b).all(|v| v.len() == b[0].len()));
    if cfg!(feature = "dsp") {
        dot_i16_2x2_unrolled(a, b, acc)
    } else {
        dot_i16_2x2_scalar(a, b, acc)
    }
}

pub(crate) fn dot_i16_2x2_unrolled(a: [&[i16]; 2], b: [&[i16]; 2], acc: [i32; 4]) -> [i32; 4] {
    let n = b[0].len();
    let [mut s00, mut s01, mut s10, mut s11] = acc;
    let mut k = 0;
    while k + 1 < n {
        let a0 = [a[0][k], a[0][k + 1]];
        let a1 = [a[1][k], a[1][k + 1]];
        let b0 = [b[0][k], b[0][k + 1]];
        let b1 = [b[1][k], b[1][k + 1]];
        s00 = mac2(a0, b0, s00);
        s01 = mac2(a0, b1, s01);
        s10 = mac2(a1, b0, s10);
        s11 = mac2(a1, b1, s11);
        k += 2;
    }
    if k < n {
        s00 = s00.wrapping_add(a[0][k] as i32 * b[0][k] as i32);
        s01 = s01.wrapping_add(a[0][k] as i32 * b[1][k] as i32);
        s10 = s10.wrapping_add(a[1][k] as i32 * b[0][k] as i32);
        s11 = s11.wrapping_add(a[1][k] as i32 * b[1][k] as i32);
    }
    [s00, s01, s10, s11]
}

pub(crate) fn dot_i16_2x2_scalar(a: [&[i16]; 2], b: [&[i16]; 2], acc: [i32; 4]) -> [i32; 4] {
    [
        dot_scalar(a[0], b[0], acc[0]),
        dot_scalar(a[0], b[1], acc[1]),
        dot_scalar(a[1], b[0], acc[2]),
        dot_scalar(a[1], b[1], acc[3]),
    ]
}

/// One channel over `taps` raw u8 codes spaced `stride` apart in both
/// operands, zero points subtracted before the multiply.
pub fn dot_u8_strided(wt: &[u8], col: &[u8], stride: usize, taps: usize, z_wt: u8, z_in: u8, acc: i32) -> i32 {
    (0..taps).fold(acc, |s, t| {
        let i = t * stride;
        s.wrapping_add(centered(wt[i], z_wt) as i32 * centered(col[i], z_in) as i32)
    })
}

/// Four adjacent channels at once; `wt` and `col` start at the first of the
/// four channels.
#[inline]
pub fn dot_u8_strided_x4(
    wt: &[u8],
    col: &[u8],
    stride: usize,
    taps: usize,
    z_wt: u8,
    z_in: u8,
    acc: [i32; 4],
) -> [i32; 4] {
    if cfg!(feature = "dsp") {
        dot_u8_strided_x4_unrolled(wt, col, stride, taps, z_wt, z_in, acc)
    } else {
        dot_u8_strided_x4_scalar(wt, col, stride, taps, z_wt, z_in, acc)
    }
}

pub(crate) fn dot_u8_strided_x4_unrolled(
    wt: &[u8],
    col: &[u8],
    stride: usize,
    taps: usize,
    z_wt: u8,
    z_in: u8,
    acc: [i32; 4],
) -> [i32; 4] {
    let mut sums = acc;
    let mut t = 0;
    while t + 1 < taps {
        let (i, j) = (t * stride, (t + 1) * stride);
        for (lane, sum) in sums.iter_mut().enumerate() {
            let a = [centered(wt[i + lane], z_wt), centered(wt[j + lane], z_wt)];
            let b = [centered(col[i + lane], z_in), centered(col[j + lane], z_in)];
            *sum = mac2(a, b, *sum);
        }
        t += 2;
    }
    if t < taps {
        let i = t * stride;
        for (lane, sum) in sums.iter_mut().enumerate() {
            let p = centered(wt[i + lane], z_wt) as i32 * centered(col[i + lane], z_in) as i32;
            *sum = sum.wrapping_add(p);
        }
    }
    sums
}

pub(crate) fn dot_u8_strided_x4_scalar(
    wt: &[u8],
    col: &[u8],
    stride: usize,
    taps: usize,
    z_wt: u8,
    z_in: u8,
    acc: [i32; 4],
) -> [i32; 4] {
    let mut sums = acc;
    for (lane, sum) in sums.iter_mut().enumerate() {
        *sum = dot_u8_strided(&wt[lane..], &col[lane..], stride, taps, z_wt, z_in, *sum);
    }
    sums
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn odd_length_uses_tail() {
        let a = [1i16, 2, 3, 4, 5];
        let b = [1i16, 1, 1, 1, -2];
        assert_eq!(dot_i16(&a, &b, 7), 7 + 10 - 10);
    }

    fn lanes(n: usize, seed: i32) -> Vec<i16> {
        (0..n as i32).map(|i| ((i * 37 + seed * 11) % 511 - 255) as i16).collect()
    }

    #[test]
    fn unrolled_and_scalar_bodies_agree() {
        for n in [0usize, 1, 2, 3, 4, 5, 8, 15, 16, 33] {
            let (a0, a1, b0, b1) = (lanes(n, 1), lanes(n, 2), lanes(n, 3), lanes(n, 4));
            assert_eq!(dot_i16_unrolled(&a0, &b0, -9), dot_scalar(&a0, &b0, -9), "n={}", n);
            let acc = [3, -4, 5, i32::MAX];
            assert_eq!(
                dot_i16_2x2_unrolled([&a0[..], &a1[..]], [&b0[..], &b1[..]], acc),
                dot_i16_2x2_scalar([&a0[..], &a1[..]], [&b0[..], &b1[..]], acc),
                "n={}",
                n
            );
        }
        let wt: Vec<u8> = (0..6 * 9).map(|v| (v * 29 % 256) as u8).collect();
        let col: Vec<u8> = (0..6 * 9).map(|v| (255 - v * 13 % 256) as u8).collect();
        for taps in 0..=9 {
            assert_eq!(
                dot_u8_strided_x4_unrolled(&wt[1..], &col[1..], 6, taps, 100, 7, [1, 2, 3, 4]),
                dot_u8_strided_x4_scalar(&wt[1..], &col[1..], 6, taps, 100, 7, [1, 2, 3, 4]),
                "taps={}",
                taps
            );
        }
    }

    #[test]
    fn strided_x4_matches_single_lane() {
        let wt: Vec<u8> = (0..20).map(|v| v * 3).collect();
        let col: Vec<u8> = (0..20).map(|v| 200 - v * 5).collect();
        let sums = dot_u8_strided_x4(&wt, &col, 4, 5, 7, 11, [1, 2, 3, 4]);
        for lane in 0..4 {
            let one = dot_u8_strided(&wt[lane..], &col[lane..], 4, 5, 7, 11, lane as i32 + 1);
            assert_eq!(sums[lane], one);
        }
    }
}
