use crate::DType;

/// Errors raised while describing tensors.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("convolution tensors must be rank 4 or 5, got rank {0}")]
    Rank(usize),

    #[error("expected {expected} strides for a rank-{expected} view, got {got}")]
    StrideCount { expected: usize, got: usize },

    #[error("dimension {axis} of shape {shape} is zero; all extents must be positive")]
    ZeroDim { axis: usize, shape: String },

    #[error("unsupported dtype {0} for this view")]
    UnsupportedDType(DType),
}
