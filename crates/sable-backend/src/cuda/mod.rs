//! CUDA implementation of the backend seam.
//!
//! Provides:
//! - Lazy per-index device handles (`context`)
//! - A recycling workspace pool (`pool`)
//! - [`CudaBackend`]: the `ConvBackend` implementation, dispatching
//!   runtime-compiled PTX kernels for F32 NCHW convolutions

pub mod backend;
pub mod context;
pub mod pool;

pub use backend::CudaBackend;
pub use pool::CudaMemoryPool;
