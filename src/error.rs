use thiserror::Error;

/// Errors surfaced by the kernel drivers.
///
/// Only shape-level problems are reported; everything inside the hot loops
/// assumes the checks done up front.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum KernelError {
    /// Depthwise convolution requires `ch_in == ch_out`.
    #[error("size mismatch: depthwise input has {ch_in} channels but output has {ch_out}")]
    ChannelMismatch { ch_in: usize, ch_out: usize },

    /// The dual-row matmul consumes output rows two at a time.
    #[error("matmul row count must be even, got {0}")]
    OddRowCount(usize),

    /// Two descriptions of the same extent disagree (e.g. matmul columns vs
    /// the convolution patch length).
    #[error("{what} mismatch: expected {expected}, got {got}")]
    ShapeMismatch { what: &'static str, expected: usize, got: usize },

    /// A caller-provided buffer is shorter than the kernel needs.
    #[error("{buffer} buffer too small: need {needed}, got {got}")]
    BufferTooSmall { buffer: &'static str, needed: usize, got: usize },
}

pub(crate) fn ensure_len(buffer: &'static str, got: usize, needed: usize) -> Result<(), KernelError> {
    if got < needed {
        return Err(KernelError::BufferTooSmall { buffer, needed, got });
    }
    Ok(())
}
