use serde::{Deserialize, Serialize};

/// Backend versions below this reject filters spatially larger than the
/// input outright, even when padding would cover the difference.
pub const OVERSIZED_KERNEL_MIN_VERSION: u32 = 3000;

/// Backend versions below this have no FFT convolution path.
pub const FFT_MIN_VERSION: u32 = 3000;

/// What a backend build can do, queried once when the backend is
/// constructed and carried as plain flags from then on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackendCapabilities {
    /// Backend library version, vendor encoding (e.g. 3000 = 3.0).
    pub version: u32,
    /// Whether an FFT convolution path exists at all.
    pub fft: bool,
    /// Whether filters may exceed the input extent in a spatial
    /// dimension. False on legacy versions, which reject such calls.
    pub oversized_kernels: bool,
}

impl BackendCapabilities {
    /// Derive the capability flags from a backend library version.
    pub fn from_version(version: u32) -> Self {
        Self {
            version,
            fft: version >= FFT_MIN_VERSION,
            oversized_kernels: version >= OVERSIZED_KERNEL_MIN_VERSION,
        }
    }
}
