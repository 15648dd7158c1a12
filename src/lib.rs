// Mixed-precision quantized kernels: sub-byte packing, dual-row matmul,
// depthwise/standard convolution with affine or threshold requantization.
pub mod error;
pub mod kernels;
pub mod reference;
pub mod config;
pub mod workload;

pub use error::KernelError;
pub use kernels::{Affine, BitWidth, ConvGeometry, ConvHwc, ConvScratch, DepthwiseConv, MatMulKernel, Padding, Requantize, Thresholds};
