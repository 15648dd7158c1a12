//! JSON layer descriptions used by the CLI, the benches and the tests.
//!
//! ```json
//! { "layers": [
//!   { "name": "dw1", "kind": "depthwise", "in_h": 16, "in_w": 16,
//!     "ch_in": 32, "ch_out": 32, "kernel": 3, "stride": 1,
//!     "padding": { "top": 1, "bottom": 1, "left": 1, "right": 1 },
//!     "out_bits": 2, "z_in": 3, "z_wt": 128,
//!     "quant": { "mode": "thresholds" } }
//! ] }
//! ```

use crate::kernels::{BitWidth, ConvGeometry, Padding};
use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    pub layers: Vec<LayerConfig>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LayerKind {
    Depthwise,
    Conv,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum QuantConfig {
    Affine { m_zero: i32, n_zero: i8, z_out: u8 },
    /// Random ascending per-channel tables are generated by the workload.
    Thresholds,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LayerConfig {
    pub name: String,
    pub kind: LayerKind,
    pub in_h: usize,
    pub in_w: usize,
    pub ch_in: usize,
    pub ch_out: usize,
    pub kernel: usize,
    #[serde(default = "default_stride")]
    pub stride: usize,
    #[serde(default)]
    pub padding: Padding,
    #[serde(default = "default_width")]
    pub in_bits: BitWidth,
    #[serde(default = "default_width")]
    pub weight_bits: BitWidth,
    pub out_bits: BitWidth,
    #[serde(default)]
    pub z_in: u8,
    #[serde(default)]
    pub z_wt: u8,
    pub quant: QuantConfig,
}

fn default_stride() -> usize { 1 }

fn default_width() -> BitWidth { BitWidth::U8 }

impl LayerConfig {
    /// Geometry with output extents derived from padding and stride.
    pub fn geometry(&self) -> ConvGeometry {
        let mut g = ConvGeometry {
            in_h: self.in_h,
            in_w: self.in_w,
            channels: self.ch_in,
            kernel_h: self.kernel,
            kernel_w: self.kernel,
            stride_h: self.stride,
            stride_w: self.stride,
            padding: self.padding,
            out_h: 0,
            out_w: 0,
        };
        (g.out_h, g.out_w) = g.max_out_dims();
        g
    }

    /// Rejects descriptions no kernel can run. Channel agreement for
    /// depthwise layers is left to the kernel, which reports it itself.
    pub fn validate(&self) -> Result<()> {
        if self.kernel == 0 || self.stride == 0 {
            bail!("layer {}: kernel and stride must be positive", self.name);
        }
        match self.kind {
            LayerKind::Depthwise => {
                if self.in_bits != BitWidth::U8 || self.weight_bits != BitWidth::U8 {
                    bail!("layer {}: depthwise runs on u8 activations and weights", self.name);
                }
            }
            LayerKind::Conv => {
                if self.ch_out % 2 != 0 {
                    bail!("layer {}: conv needs an even output channel count, got {}", self.name, self.ch_out);
                }
            }
        }
        Ok(())
    }
}

impl ModelConfig {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let text = std::fs::read_to_string(&path)
            .with_context(|| format!("read layer config: {}", path.as_ref().display()))?;
        Self::from_json(&text).with_context(|| format!("parse layer config: {}", path.as_ref().display()))
    }

    pub fn from_json(text: &str) -> Result<Self> {
        let cfg: ModelConfig = serde_json::from_str(text).context("decode layer JSON")?;
        for layer in &cfg.layers {
            layer.validate()?;
        }
        Ok(cfg)
    }
}
