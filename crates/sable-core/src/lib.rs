//! # sable-core
//!
//! Tensor vocabulary for the Sable convolution engine.
//!
//! Provides the value types the dispatch layers speak in:
//! - [`Device`] — where a buffer lives (CPU or a CUDA index)
//! - [`DType`] — floating-point element types
//! - [`Shape`] — stack-allocated dimension lists (rank ≤ 5)
//! - [`TensorView`] — a non-owning description of a caller-owned
//!   device buffer (shape, strides, dtype, raw address)
//!
//! This crate never owns or touches tensor memory; it only describes it.

pub mod device;
pub mod dtype;
pub mod error;
pub mod shape;
pub mod view;

pub use device::Device;
pub use dtype::DType;
pub use error::CoreError;
pub use shape::Shape;
pub use view::{DevicePtr, TensorView};

pub type Result<T> = std::result::Result<T, CoreError>;
