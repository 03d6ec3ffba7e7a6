use serde::{Deserialize, Serialize};

use sable_backend::ConvAlgorithm;

/// How the algorithm for a call is obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AlgorithmPolicy {
    /// Always run this algorithm; the selector is bypassed entirely
    /// and the per-site state is neither read nor written.
    Fixed(ConvAlgorithm),
    /// Let the selector reuse or re-derive per the given knobs.
    Dynamic {
        reuse: ReuseGranularity,
        derivation: DerivationMethod,
    },
}

/// When a previously derived algorithm may be reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReuseGranularity {
    /// Derive on the first call for a site, then reuse forever —
    /// even when shapes change. Maximally amortizes expensive timing
    /// searches for sites with stable shapes.
    Once,
    /// Reuse only while the input and kernel shapes are elementwise
    /// identical to the ones the stored algorithm was derived for.
    PerShapeChange,
}

/// How a fresh algorithm is derived when reuse does not apply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DerivationMethod {
    /// Empirically time candidates on the real buffers (expensive,
    /// runs actual kernels) and take the backend's reported best.
    Timed,
    /// Ask the backend for a recommendation bounded by the currently
    /// free device memory.
    Heuristic,
}

/// How the output buffer is materialized.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OutputMode {
    /// The output aliases the accumulator buffer; nothing is allocated.
    InPlace,
    /// A fresh buffer shaped like the accumulator is allocated; the
    /// accumulator's contents are copied into it first iff `beta != 0`.
    OutOfPlace,
}

/// Per-call (or per-site) configuration of one forward convolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConvConfig {
    pub policy: AlgorithmPolicy,
    pub output_mode: OutputMode,
}

impl Default for ConvConfig {
    fn default() -> Self {
        Self {
            policy: AlgorithmPolicy::Dynamic {
                reuse: ReuseGranularity::PerShapeChange,
                derivation: DerivationMethod::Heuristic,
            },
            output_mode: OutputMode::OutOfPlace,
        }
    }
}

impl ConvConfig {
    /// Fixed-algorithm configuration, out-of-place output.
    pub fn fixed(algo: ConvAlgorithm) -> Self {
        Self {
            policy: AlgorithmPolicy::Fixed(algo),
            output_mode: OutputMode::OutOfPlace,
        }
    }

    /// Dynamic configuration with the given knobs, out-of-place output.
    pub fn dynamic(reuse: ReuseGranularity, derivation: DerivationMethod) -> Self {
        Self {
            policy: AlgorithmPolicy::Dynamic { reuse, derivation },
            output_mode: OutputMode::OutOfPlace,
        }
    }

    pub fn in_place(mut self) -> Self {
        self.output_mode = OutputMode::InPlace;
        self
    }
}
