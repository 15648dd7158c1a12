pub mod pack;
pub mod dot;
pub mod requant;
pub mod im2col;
pub mod depthwise;
pub mod matmul;
pub mod conv;

pub use conv::{ConvHwc, ConvScratch};
pub use depthwise::DepthwiseConv;
pub use im2col::{ConvGeometry, Padding};
pub use matmul::MatMulKernel;
pub use pack::BitWidth;
pub use requant::{Affine, Requantize, Thresholds};
