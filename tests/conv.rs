use mixq::kernels::pack::{get_code, pack_reordered, pack_slice};
use mixq::kernels::{Affine, BitWidth, ConvGeometry, ConvHwc, ConvScratch, MatMulKernel, Padding, Thresholds};
use mixq::{reference, KernelError, Requantize};
use pretty_assertions::assert_eq;
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};

struct Layer {
    geom: ConvGeometry,
    in_width: BitWidth,
    weight_width: BitWidth,
    ch_out: usize,
    input: Vec<u8>,
    weights: Vec<u8>,
    bias: Vec<i32>,
    z_in: u8,
    z_wt: u8,
}

impl Layer {
    fn random(rng: &mut SmallRng, geom: ConvGeometry, in_width: BitWidth, weight_width: BitWidth, ch_out: usize) -> Self {
        let input = (0..geom.input_len()).map(|_| rng.gen_range(0..=in_width.max_code())).collect();
        let weights = (0..ch_out * geom.patch_len()).map(|_| rng.gen_range(0..=weight_width.max_code())).collect();
        let bias = (0..ch_out).map(|_| rng.gen_range(-300..300)).collect();
        let z_in = rng.gen_range(0..=in_width.max_code());
        let z_wt = rng.gen_range(0..=weight_width.max_code());
        Self { geom, in_width, weight_width, ch_out, input, weights, bias, z_in, z_wt }
    }

    fn packed_input(&self) -> Vec<u8> {
        let mut out = vec![0u8; self.in_width.packed_len(self.input.len())];
        pack_slice(&self.input, self.in_width, &mut out);
        out
    }

    fn packed_weights(&self) -> Vec<u8> {
        let n = self.geom.patch_len();
        let rb = self.weight_width.packed_len(n);
        let mut out = vec![0u8; self.ch_out * rb];
        for r in 0..self.ch_out {
            pack_reordered(&self.weights[r * n..(r + 1) * n], self.weight_width, &mut out[r * rb..(r + 1) * rb]);
        }
        out
    }

    /// Runs the kernel and returns one code per `(pixel, channel)`.
    fn run<R: Requantize>(&self, requant: R) -> Vec<u8> {
        let out_width = requant.width();
        let weights = self.packed_weights();
        let conv = ConvHwc {
            geom: self.geom,
            in_width: self.in_width,
            z_in: self.z_in,
            kernel: MatMulKernel {
                weights: &weights,
                weight_width: self.weight_width,
                ch_out: self.ch_out,
                num_col: self.geom.patch_len(),
                bias: &self.bias,
                z_a: self.z_wt,
                requant,
            },
        };
        let mut col = vec![0i16; conv.col_len()];
        let mut tail = vec![0u8; 2 * conv.pixel_bytes()];
        let mut out = vec![0u8; conv.output_len()];
        let written = conv
            .run(&self.packed_input(), ConvScratch { col: &mut col, tail: &mut tail }, &mut out)
            .unwrap();
        assert_eq!(written, conv.output_len());

        let pb = conv.pixel_bytes();
        let mut codes = Vec::new();
        for p in 0..self.geom.out_pixels() {
            codes.extend((0..self.ch_out).map(|c| get_code(&out[p * pb..], c, out_width)));
        }
        codes
    }
}

#[test]
fn even_pixel_count_matches_reference() {
    let mut rng = SmallRng::seed_from_u64(51);
    let g = ConvGeometry::square(4, 3, 3, 1, Padding::uniform(1), 4);
    let layer = Layer::random(&mut rng, g, BitWidth::U8, BitWidth::U8, 4);
    let (m, n, z) = (1 << 29, 6, 7);
    let got = layer.run(Affine::new(m, n, z, BitWidth::U4));
    let want = reference::conv_hwc(&layer.input, &g, &layer.weights, 4, &layer.bias, layer.z_in, layer.z_wt, |acc, _| {
        reference::affine(acc, m, n, z, BitWidth::U4)
    });
    assert_eq!(got, want);
}

#[test]
fn odd_pixel_count_goes_through_the_tail_buffer() {
    let mut rng = SmallRng::seed_from_u64(52);
    // 5x5 output: 25 pixels, the last one runs alone
    let g = ConvGeometry::square(5, 5, 3, 1, Padding::uniform(1), 5);
    for (in_width, weight_width, out_width) in [
        (BitWidth::U4, BitWidth::U2, BitWidth::U8),
        (BitWidth::U2, BitWidth::U4, BitWidth::U2),
        (BitWidth::U8, BitWidth::U2, BitWidth::U4),
    ] {
        let layer = Layer::random(&mut rng, g, in_width, weight_width, 6);
        let (m, n, z) = (1 << 30, -1, out_width.max_code() / 2);
        let got = layer.run(Affine::new(m, n, z, out_width));
        let want = reference::conv_hwc(&layer.input, &g, &layer.weights, 6, &layer.bias, layer.z_in, layer.z_wt, |acc, _| {
            reference::affine(acc, m, n, z, out_width)
        });
        assert_eq!(got, want, "{} x {} -> {}", in_width, weight_width, out_width);
    }
}

#[test]
fn strided_threshold_conv_matches_reference() {
    let mut rng = SmallRng::seed_from_u64(53);
    let g = ConvGeometry {
        padding: Padding { top: 0, bottom: 1, left: 1, right: 0 },
        ..ConvGeometry::square(7, 4, 3, 2, Padding::default(), 3)
    };
    let layer = Layer::random(&mut rng, g, BitWidth::U4, BitWidth::U4, 8);
    let width = BitWidth::U4;
    let k = width.thresholds_per_channel();
    let mut table = Vec::new();
    for _ in 0..8 {
        let mut t: Vec<i16> = (0..k).map(|_| rng.gen_range(-2000..2000)).collect();
        t.sort_unstable();
        table.extend(t);
    }
    let got = layer.run(Thresholds::new(&table, width));
    let want = reference::conv_hwc(&layer.input, &g, &layer.weights, 8, &layer.bias, layer.z_in, layer.z_wt, |acc, c| {
        reference::fold(acc, &table[c * k..(c + 1) * k], width)
    });
    assert_eq!(got, want);
}

#[test]
fn column_count_must_match_patch() {
    let g = ConvGeometry::square(3, 2, 3, 1, Padding::uniform(1), 3);
    let weights = vec![0u8; 2 * 20];
    let bias = [0; 2];
    let conv = ConvHwc {
        geom: g,
        in_width: BitWidth::U8,
        z_in: 0,
        kernel: MatMulKernel {
            weights: &weights,
            weight_width: BitWidth::U8,
            ch_out: 2,
            num_col: 20,
            bias: &bias,
            z_a: 0,
            requant: Affine::new(1, 0, 0, BitWidth::U8),
        },
    };
    let mut col = vec![0i16; 64];
    let mut tail = vec![0u8; 4];
    let mut out = vec![0u8; 18];
    assert_eq!(
        conv.run(&[0; 18], ConvScratch { col: &mut col, tail: &mut tail }, &mut out),
        Err(KernelError::ShapeMismatch { what: "matmul columns", expected: 18, got: 20 })
    );
}

#[test]
fn odd_pixel_count_requires_tail_space() {
    let g = ConvGeometry::square(1, 2, 1, 1, Padding::default(), 1);
    let weights = vec![0u8; 2 * 2];
    let bias = [0; 2];
    let conv = ConvHwc {
        geom: g,
        in_width: BitWidth::U8,
        z_in: 0,
        kernel: MatMulKernel {
            weights: &weights,
            weight_width: BitWidth::U8,
            ch_out: 2,
            num_col: 2,
            bias: &bias,
            z_a: 0,
            requant: Affine::new(1, 0, 0, BitWidth::U8),
        },
    };
    let mut col = vec![0i16; 4];
    let mut tail = vec![0u8; 3];
    let mut out = vec![0u8; 2];
    assert_eq!(
        conv.run(&[0; 2], ConvScratch { col: &mut col, tail: &mut tail }, &mut out),
        Err(KernelError::BufferTooSmall { buffer: "tail", needed: 4, got: 3 })
    );
}
