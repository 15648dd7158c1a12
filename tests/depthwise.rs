use mixq::kernels::pack::get_code;
use mixq::kernels::{Affine, BitWidth, ConvGeometry, DepthwiseConv, Padding, Thresholds};
use mixq::{reference, KernelError};
use pretty_assertions::assert_eq;
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};

#[test]
fn zero_weights_with_zero_thresholds_saturate_every_output() {
    let g = ConvGeometry::square(5, 4, 3, 1, Padding::uniform(1), 5);
    let input = vec![77u8; g.input_len()];
    let weights = vec![0u8; g.patch_len()];
    let bias = [10, 20, 30, 40];
    let table = vec![0i16; 4 * BitWidth::U2.thresholds_per_channel()];
    let dw = DepthwiseConv {
        geom: g,
        ch_out: 4,
        weights: &weights,
        bias: &bias,
        z_in: 0,
        z_wt: 0,
        requant: Thresholds::new(&table, BitWidth::U2),
    };
    let mut col = vec![0u8; g.patch_len()];
    let mut out = vec![0u8; dw.output_len()];
    assert_eq!(dw.run(&input, &mut col, &mut out), Ok(25));
    assert_eq!(out, vec![0xFF; 25]);
}

#[test]
fn channel_count_mismatch_is_reported() {
    let g = ConvGeometry::square(3, 4, 3, 1, Padding::uniform(1), 3);
    let weights = vec![0u8; g.patch_len()];
    let bias = [0; 8];
    let dw = DepthwiseConv {
        geom: g,
        ch_out: 8,
        weights: &weights,
        bias: &bias,
        z_in: 0,
        z_wt: 0,
        requant: Affine::new(1 << 30, 0, 0, BitWidth::U4),
    };
    let mut col = vec![0u8; g.patch_len()];
    let mut out = vec![0u8; 64];
    assert_eq!(
        dw.run(&vec![0; g.input_len()], &mut col, &mut out),
        Err(KernelError::ChannelMismatch { ch_in: 4, ch_out: 8 })
    );
}

#[test]
fn short_output_buffer_is_rejected() {
    let g = ConvGeometry::square(3, 4, 3, 1, Padding::uniform(1), 3);
    let weights = vec![0u8; g.patch_len()];
    let bias = [0; 4];
    let dw = DepthwiseConv {
        geom: g,
        ch_out: 4,
        weights: &weights,
        bias: &bias,
        z_in: 0,
        z_wt: 0,
        requant: Affine::new(1 << 30, 0, 0, BitWidth::U4),
    };
    let mut col = vec![0u8; g.patch_len()];
    let mut out = vec![0u8; 17];
    assert_eq!(
        dw.run(&vec![0; g.input_len()], &mut col, &mut out),
        Err(KernelError::BufferTooSmall { buffer: "output", needed: 18, got: 17 })
    );
}

fn random_layer(rng: &mut SmallRng, g: &ConvGeometry) -> (Vec<u8>, Vec<u8>, Vec<i32>) {
    let input = (0..g.input_len()).map(|_| rng.gen()).collect();
    let weights = (0..g.patch_len()).map(|_| rng.gen()).collect();
    let bias = (0..g.channels).map(|_| rng.gen_range(-2000..2000)).collect();
    (input, weights, bias)
}

fn decode(out: &[u8], pixels: usize, ch: usize, width: BitWidth) -> Vec<u8> {
    let pb = width.packed_len(ch);
    (0..pixels).flat_map(|p| (0..ch).map(move |c| (p, c))).map(|(p, c)| get_code(&out[p * pb..], c, width)).collect()
}

#[test]
fn affine_output_matches_reference_with_channel_remainder() {
    let mut rng = SmallRng::seed_from_u64(31);
    for ch in [1usize, 4, 6, 7] {
        let g = ConvGeometry {
            padding: Padding { top: 1, bottom: 0, left: 2, right: 1 },
            stride_w: 2,
            out_w: 4,
            ..ConvGeometry::square(6, ch, 3, 1, Padding::default(), 5)
        };
        let (input, weights, bias) = random_layer(&mut rng, &g);
        let (z_in, z_wt) = (rng.gen(), rng.gen());
        let q = Affine::new(1 << 28, 4, 5, BitWidth::U4);
        let dw = DepthwiseConv { geom: g, ch_out: ch, weights: &weights, bias: &bias, z_in, z_wt, requant: q };
        let mut col = vec![0u8; g.patch_len()];
        let mut out = vec![0u8; dw.output_len()];
        dw.run(&input, &mut col, &mut out).unwrap();

        let want = reference::depthwise_conv_hwc(&input, &g, &weights, &bias, z_in, z_wt, |acc, _| {
            reference::affine(acc, 1 << 28, 4, 5, BitWidth::U4)
        });
        assert_eq!(decode(&out, g.out_pixels(), ch, BitWidth::U4), want, "ch={}", ch);
    }
}

#[test]
fn threshold_output_matches_reference() {
    let mut rng = SmallRng::seed_from_u64(32);
    let g = ConvGeometry::square(7, 9, 3, 2, Padding::uniform(1), 4);
    let (input, weights, bias) = random_layer(&mut rng, &g);
    let width = BitWidth::U2;
    let k = width.thresholds_per_channel();
    let mut table = Vec::new();
    for _ in 0..g.channels {
        let mut t: Vec<i16> = (0..k).map(|_| rng.gen_range(-20_000..20_000)).collect();
        t.sort_unstable();
        table.extend(t);
    }
    let dw = DepthwiseConv {
        geom: g,
        ch_out: 9,
        weights: &weights,
        bias: &bias,
        z_in: 128,
        z_wt: 100,
        requant: Thresholds::new(&table, width),
    };
    let mut col = vec![0u8; g.patch_len()];
    let mut out = vec![0u8; dw.output_len()];
    assert_eq!(dw.run(&input, &mut col, &mut out), Ok(16 * 3));

    let want = reference::depthwise_conv_hwc(&input, &g, &weights, &bias, 128, 100, |acc, c| {
        reference::fold(acc, &table[c * k..(c + 1) * k], width)
    });
    assert_eq!(decode(&out, g.out_pixels(), 9, width), want);
}
