//! Constraint validation of a candidate algorithm against shapes,
//! descriptor, and backend capabilities.

use sable_core::TensorView;

use sable_backend::{BackendCapabilities, ConvAlgorithm, ConvDescriptor};

use crate::{ConvError, Result};

/// Largest input spatial extent the FFT path accepts.
const FFT_MAX_SPATIAL: usize = 1024;

/// Sanitize a candidate.
///
/// Legacy backend versions reject outright — never downgrade — any
/// request whose filter exceeds the input extent in a spatial
/// dimension, padding notwithstanding. The FFT path has documented
/// 2-D restrictions (unit stride only, input extent ≤ 1024, no 1×1
/// filters); violating candidates are silently downgraded to the
/// implicit-GEMM baseline, trading throughput for correctness.
/// Every other candidate passes through unchanged.
pub(crate) fn validate(
    candidate: ConvAlgorithm,
    input: &TensorView,
    kernel: &TensorView,
    desc: &ConvDescriptor,
    caps: &BackendCapabilities,
) -> Result<ConvAlgorithm> {
    if !caps.oversized_kernels {
        let oversized = kernel
            .spatial_dims()
            .iter()
            .zip(input.spatial_dims())
            .any(|(&k, &i)| k > i);
        if oversized {
            return Err(ConvError::VersionLimitation {
                version: caps.version,
            });
        }
    }

    if candidate == ConvAlgorithm::Fft && input.ndim() == 4 {
        let strided = !desc.is_unit_stride();
        let too_large = input.spatial_dims().iter().any(|&d| d > FFT_MAX_SPATIAL);
        let pointwise = kernel.spatial_dims().iter().all(|&d| d == 1);
        if strided || too_large || pointwise {
            tracing::debug!(
                "downgrading fft to implicit-gemm (strided={strided}, \
                 too_large={too_large}, pointwise={pointwise})"
            );
            return Ok(ConvAlgorithm::ImplicitGemm);
        }
    }

    Ok(candidate)
}
