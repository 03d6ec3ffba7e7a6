use serde::{Deserialize, Serialize};
use std::fmt;

/// Forward-convolution implementations a backend may support.
///
/// The set is fixed: the engine selects among these, a backend runs
/// whichever subset it implements. `ImplicitGemm` is the safe baseline
/// every backend carries and the downgrade target of the constraint
/// validator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConvAlgorithm {
    /// Matrix-multiply formulation without materializing the operand.
    ImplicitGemm,
    /// Implicit GEMM with a precomputed index buffer in workspace.
    ImplicitPrecompGemm,
    /// Explicit GEMM over an im2col-expanded operand in workspace.
    Gemm,
    /// Direct (naive) convolution loops.
    Direct,
    /// FFT-based convolution.
    Fft,
    /// Tiled FFT-based convolution.
    FftTiling,
    /// Winograd minimal-filtering convolution.
    Winograd,
}

impl ConvAlgorithm {
    /// Every algorithm, in enumeration order. Used by timing probes.
    pub const ALL: [ConvAlgorithm; 7] = [
        ConvAlgorithm::ImplicitGemm,
        ConvAlgorithm::ImplicitPrecompGemm,
        ConvAlgorithm::Gemm,
        ConvAlgorithm::Direct,
        ConvAlgorithm::Fft,
        ConvAlgorithm::FftTiling,
        ConvAlgorithm::Winograd,
    ];
}

impl fmt::Display for ConvAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConvAlgorithm::ImplicitGemm => "implicit-gemm",
            ConvAlgorithm::ImplicitPrecompGemm => "implicit-precomp-gemm",
            ConvAlgorithm::Gemm => "gemm",
            ConvAlgorithm::Direct => "direct",
            ConvAlgorithm::Fft => "fft",
            ConvAlgorithm::FftTiling => "fft-tiling",
            ConvAlgorithm::Winograd => "winograd",
        };
        write!(f, "{name}")
    }
}
