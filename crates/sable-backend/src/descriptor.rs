use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

use sable_core::Shape;

/// Whether the filter is applied flipped (true convolution) or as-is
/// (cross-correlation, the deep-learning default).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConvMode {
    CrossCorrelation,
    Convolution,
}

/// Geometry of one convolution: per-spatial-dimension padding, stride,
/// and dilation, plus the application mode.
///
/// Immutable for the duration of a call; owned by the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConvDescriptor {
    pad: SmallVec<[usize; 3]>,
    stride: SmallVec<[usize; 3]>,
    dilation: SmallVec<[usize; 3]>,
    mode: ConvMode,
}

impl ConvDescriptor {
    /// Descriptor for a 2-D convolution.
    pub fn new_2d(
        pad: (usize, usize),
        stride: (usize, usize),
        dilation: (usize, usize),
        mode: ConvMode,
    ) -> Self {
        Self {
            pad: SmallVec::from_slice(&[pad.0, pad.1]),
            stride: SmallVec::from_slice(&[stride.0, stride.1]),
            dilation: SmallVec::from_slice(&[dilation.0, dilation.1]),
            mode,
        }
    }

    /// Descriptor for a 3-D convolution.
    pub fn new_3d(
        pad: (usize, usize, usize),
        stride: (usize, usize, usize),
        dilation: (usize, usize, usize),
        mode: ConvMode,
    ) -> Self {
        Self {
            pad: SmallVec::from_slice(&[pad.0, pad.1, pad.2]),
            stride: SmallVec::from_slice(&[stride.0, stride.1, stride.2]),
            dilation: SmallVec::from_slice(&[dilation.0, dilation.1, dilation.2]),
            mode,
        }
    }

    /// Unit-stride, unpadded, undilated 2-D cross-correlation.
    pub fn default_2d() -> Self {
        Self::new_2d((0, 0), (1, 1), (1, 1), ConvMode::CrossCorrelation)
    }

    /// Number of spatial dimensions this descriptor covers.
    pub fn spatial_rank(&self) -> usize {
        self.stride.len()
    }

    pub fn pad(&self) -> &[usize] {
        &self.pad
    }

    pub fn stride(&self) -> &[usize] {
        &self.stride
    }

    pub fn dilation(&self) -> &[usize] {
        &self.dilation
    }

    pub fn mode(&self) -> ConvMode {
        self.mode
    }

    /// Whether every spatial stride is 1.
    pub fn is_unit_stride(&self) -> bool {
        self.stride.iter().all(|&s| s == 1)
    }

    /// The output shape this geometry produces for the given input and
    /// filter shapes, or `None` when the (padded, dilated) filter does
    /// not fit the input.
    ///
    /// `out = (in + 2*pad - (dilation*(k-1) + 1)) / stride + 1`
    pub fn output_dims(&self, input: &Shape, kernel: &Shape) -> Option<Shape> {
        if input.ndim() != kernel.ndim() || input.ndim() != self.spatial_rank() + 2 {
            return None;
        }
        let mut dims: Vec<usize> = Vec::with_capacity(input.ndim());
        dims.push(input.dim(0)?);
        dims.push(kernel.dim(0)?);
        for i in 0..self.spatial_rank() {
            let in_d = input.dim(i + 2)?;
            let k_d = kernel.dim(i + 2)?;
            let effective = self.dilation[i] * (k_d - 1) + 1;
            let padded = in_d + 2 * self.pad[i];
            if padded < effective {
                return None;
            }
            dims.push((padded - effective) / self.stride[i] + 1);
        }
        Some(Shape::from(dims))
    }
}
