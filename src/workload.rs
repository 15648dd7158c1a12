//! Random tensors for a [`LayerConfig`], plus kernel and reference execution.

use crate::config::{LayerConfig, LayerKind, QuantConfig};
use crate::error::KernelError;
use crate::kernels::pack::{get_code, pack_reordered, pack_slice};
use crate::kernels::{Affine, BitWidth, ConvHwc, ConvScratch, DepthwiseConv, MatMulKernel, Requantize, Thresholds};
use crate::reference;
use anyhow::{Context, Result};
use log::warn;
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};

/// Operands of one layer in both dense (reference) and kernel layouts.
#[derive(Debug, Clone)]
pub struct LayerData {
    pub input_codes: Vec<u8>,
    /// `input_codes` packed at the layer's input width.
    pub input: Vec<u8>,
    pub weight_codes: Vec<u8>,
    /// Depthwise: same as `weight_codes`. Conv: reordered packed rows.
    pub weights: Vec<u8>,
    pub bias: Vec<i32>,
    pub thresholds: Vec<i16>,
}

fn random_codes<G: Rng>(rng: &mut G, n: usize, width: BitWidth) -> Vec<u8> {
    (0..n).map(|_| rng.gen_range(0..=width.max_code())).collect()
}

impl LayerData {
    pub fn random<G: Rng>(cfg: &LayerConfig, rng: &mut G) -> Self {
        let g = cfg.geometry();
        let input_codes = random_codes(rng, g.input_len(), cfg.in_bits);
        let mut input = vec![0u8; cfg.in_bits.packed_len(input_codes.len())];
        pack_slice(&input_codes, cfg.in_bits, &mut input);

        let n = g.patch_len();
        let (weight_codes, weights) = match cfg.kind {
            LayerKind::Depthwise => {
                let codes = random_codes(rng, n, cfg.weight_bits);
                (codes.clone(), codes)
            }
            LayerKind::Conv => {
                let codes = random_codes(rng, cfg.ch_out * n, cfg.weight_bits);
                let row_bytes = cfg.weight_bits.packed_len(n);
                let mut packed = vec![0u8; cfg.ch_out * row_bytes];
                for o in 0..cfg.ch_out {
                    pack_reordered(&codes[o * n..(o + 1) * n], cfg.weight_bits, &mut packed[o * row_bytes..(o + 1) * row_bytes]);
                }
                (codes, packed)
            }
        };

        let bias = (0..cfg.ch_out).map(|_| rng.gen_range(-256..=256)).collect();

        let per_channel = cfg.out_bits.thresholds_per_channel();
        let span = (n as i32 * 256).clamp(16, i16::MAX as i32) as i16;
        let mut thresholds = Vec::with_capacity(cfg.ch_out * per_channel);
        for _ in 0..cfg.ch_out {
            let mut t: Vec<i16> = (0..per_channel).map(|_| rng.gen_range(-span..=span)).collect();
            t.sort_unstable();
            thresholds.extend(t);
        }

        Self { input_codes, input, weight_codes, weights, bias, thresholds }
    }
}

/// Working memory sized once per layer.
#[derive(Debug, Clone)]
struct Buffers {
    col_u8: Vec<u8>,
    col_i16: Vec<i16>,
    tail: Vec<u8>,
    output: Vec<u8>,
}

/// Owns a layer's operands and scratch so it can be invoked repeatedly.
pub struct LayerRunner<'c> {
    pub cfg: &'c LayerConfig,
    pub data: LayerData,
    bufs: Buffers,
}

impl<'c> LayerRunner<'c> {
    pub fn new(cfg: &'c LayerConfig, data: LayerData) -> Self {
        let g = cfg.geometry();
        let pixel_bytes = cfg.out_bits.packed_len(cfg.ch_out);
        let bufs = Buffers {
            col_u8: vec![0; g.patch_len()],
            col_i16: vec![0; 2 * g.patch_len()],
            tail: vec![0; 2 * pixel_bytes],
            output: vec![0; g.out_pixels() * pixel_bytes],
        };
        Self { cfg, data, bufs }
    }

    /// Fresh random operands from `seed`.
    pub fn seeded(cfg: &'c LayerConfig, seed: u64) -> Self {
        let mut rng = SmallRng::seed_from_u64(seed);
        Self::new(cfg, LayerData::random(cfg, &mut rng))
    }

    pub fn output(&self) -> &[u8] { &self.bufs.output }

    /// One kernel invocation; returns the bytes written.
    pub fn run(&mut self) -> Result<usize, KernelError> {
        let Self { cfg, data, bufs } = self;
        let cfg: &LayerConfig = cfg;
        let data: &LayerData = data;
        match cfg.quant {
            QuantConfig::Affine { m_zero, n_zero, z_out } => {
                execute(cfg, data, bufs, Affine::new(m_zero, n_zero, z_out, cfg.out_bits))
            }
            QuantConfig::Thresholds => execute(cfg, data, bufs, Thresholds::new(&data.thresholds, cfg.out_bits)),
        }
    }

    /// Codes the reference path produces for the same operands.
    pub fn reference_codes(&self) -> Vec<u8> {
        let (cfg, data) = (self.cfg, &self.data);
        let g = cfg.geometry();
        let width = cfg.out_bits;
        let requant = |acc: i32, c: usize| match cfg.quant {
            QuantConfig::Affine { m_zero, n_zero, z_out } => reference::affine(acc, m_zero, n_zero, z_out, width),
            QuantConfig::Thresholds => {
                let k = width.thresholds_per_channel();
                reference::fold(acc, &data.thresholds[c * k..(c + 1) * k], width)
            }
        };
        match cfg.kind {
            LayerKind::Depthwise => reference::depthwise_conv_hwc(
                &data.input_codes, &g, &data.weight_codes, &data.bias, cfg.z_in, cfg.z_wt, requant,
            ),
            LayerKind::Conv => reference::conv_hwc(
                &data.input_codes, &g, &data.weight_codes, cfg.ch_out, &data.bias, cfg.z_in, cfg.z_wt, requant,
            ),
        }
    }
}

fn execute<R: Requantize>(cfg: &LayerConfig, data: &LayerData, bufs: &mut Buffers, requant: R) -> Result<usize, KernelError> {
    let g = cfg.geometry();
    match cfg.kind {
        LayerKind::Depthwise => {
            let dw = DepthwiseConv {
                geom: g,
                ch_out: cfg.ch_out,
                weights: &data.weights,
                bias: &data.bias,
                z_in: cfg.z_in,
                z_wt: cfg.z_wt,
                requant,
            };
            dw.run(&data.input, &mut bufs.col_u8, &mut bufs.output)
        }
        LayerKind::Conv => {
            let conv = ConvHwc {
                geom: g,
                in_width: cfg.in_bits,
                z_in: cfg.z_in,
                kernel: MatMulKernel {
                    weights: &data.weights,
                    weight_width: cfg.weight_bits,
                    ch_out: cfg.ch_out,
                    num_col: g.patch_len(),
                    bias: &data.bias,
                    z_a: cfg.z_wt,
                    requant,
                },
            };
            conv.run(&data.input, ConvScratch { col: &mut bufs.col_i16, tail: &mut bufs.tail }, &mut bufs.output)
        }
    }
}

/// Dense codes of a per-pixel packed HWC output.
pub fn decode_output(packed: &[u8], channels: usize, width: BitWidth) -> Vec<u8> {
    let pixel_bytes = width.packed_len(channels);
    if pixel_bytes == 0 {
        return Vec::new();
    }
    packed
        .chunks_exact(pixel_bytes)
        .flat_map(|pixel| (0..channels).map(move |c| get_code(pixel, c, width)))
        .collect()
}

/// Runs `trials` random instances of `cfg` against the reference. Returns
/// the number of mismatching output codes.
pub fn verify_layer(cfg: &LayerConfig, seed: u64, trials: u64) -> Result<usize> {
    let mut mismatches = 0;
    for t in 0..trials {
        let mut runner = LayerRunner::seeded(cfg, seed.wrapping_add(t));
        runner.run().with_context(|| format!("layer {} trial {}", cfg.name, t))?;
        let got = decode_output(runner.output(), cfg.ch_out, cfg.out_bits);
        let want = runner.reference_codes();
        let bad = got.iter().zip(&want).filter(|(a, b)| a != b).count() + got.len().abs_diff(want.len());
        if bad > 0 {
            let first = got.iter().zip(&want).position(|(a, b)| a != b);
            warn!("layer {} trial {}: {} mismatching codes (first at {:?})", cfg.name, t, bad, first);
        }
        mismatches += bad;
    }
    Ok(mismatches)
}
