use smallvec::SmallVec;
use std::fmt;

use crate::{CoreError, DType, Device, Result, Shape};

/// Opaque device address.
///
/// Only a backend knows how to dereference one; the dispatch layers
/// carry it around as a plain value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DevicePtr(u64);

impl DevicePtr {
    pub fn new(addr: u64) -> Self {
        Self(addr)
    }

    /// The raw address.
    pub fn addr(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for DevicePtr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

impl From<u64> for DevicePtr {
    fn from(addr: u64) -> Self {
        Self(addr)
    }
}

/// A non-owning description of a caller-owned device buffer.
///
/// Views are cheap value types: cloning one aliases the same buffer.
/// The engine reads and writes tensor memory exclusively through the
/// backend using the view's address; it never owns the memory itself.
#[derive(Debug, Clone)]
pub struct TensorView {
    shape: Shape,
    strides: SmallVec<[usize; 5]>,
    dtype: DType,
    device: Device,
    ptr: DevicePtr,
}

impl TensorView {
    /// Create a contiguous view over a device buffer.
    ///
    /// The shape must be rank 4 (NCHW) or rank 5 (NCDHW) with strictly
    /// positive extents.
    pub fn new(ptr: DevicePtr, shape: Shape, dtype: DType, device: Device) -> Result<Self> {
        Self::check_shape(&shape)?;
        let strides = shape.contiguous_strides();
        Ok(Self {
            shape,
            strides,
            dtype,
            device,
            ptr,
        })
    }

    /// Create a view with explicit strides (in elements).
    pub fn with_strides(
        ptr: DevicePtr,
        shape: Shape,
        strides: &[usize],
        dtype: DType,
        device: Device,
    ) -> Result<Self> {
        Self::check_shape(&shape)?;
        if strides.len() != shape.ndim() {
            return Err(CoreError::StrideCount {
                expected: shape.ndim(),
                got: strides.len(),
            });
        }
        Ok(Self {
            shape,
            strides: SmallVec::from_slice(strides),
            dtype,
            device,
            ptr,
        })
    }

    fn check_shape(shape: &Shape) -> Result<()> {
        let ndim = shape.ndim();
        if ndim != 4 && ndim != 5 {
            return Err(CoreError::Rank(ndim));
        }
        for (axis, &d) in shape.dims().iter().enumerate() {
            if d == 0 {
                return Err(CoreError::ZeroDim {
                    axis,
                    shape: shape.to_string(),
                });
            }
        }
        Ok(())
    }

    pub fn shape(&self) -> &Shape {
        &self.shape
    }

    pub fn strides(&self) -> &[usize] {
        &self.strides
    }

    pub fn dtype(&self) -> DType {
        self.dtype
    }

    pub fn device(&self) -> Device {
        self.device
    }

    pub fn ptr(&self) -> DevicePtr {
        self.ptr
    }

    /// Number of dimensions.
    pub fn ndim(&self) -> usize {
        self.shape.ndim()
    }

    /// The channel (stack-size) dimension: dim 1 for both image and
    /// filter layouts.
    pub fn channels(&self) -> usize {
        self.shape.dim(1).unwrap_or(0)
    }

    /// The spatial extents (everything past batch and channels).
    pub fn spatial_dims(&self) -> &[usize] {
        self.shape.spatial()
    }

    /// Total number of elements.
    pub fn numel(&self) -> usize {
        self.shape.numel()
    }

    /// Size of the described buffer in bytes, assuming dense storage.
    pub fn nbytes(&self) -> usize {
        self.dtype.storage_bytes(self.numel())
    }

    /// Whether the strides describe a contiguous row-major layout.
    pub fn is_contiguous(&self) -> bool {
        self.strides == self.shape.contiguous_strides()
    }
}
