//! # sable-backend
//!
//! The narrow seam between the Sable dispatch engine and a concrete
//! compute backend.
//!
//! Provides:
//! - The vocabulary shared across the seam: [`ConvAlgorithm`],
//!   [`ConvDescriptor`], [`BackendCapabilities`], [`Workspace`],
//!   [`MemoryInfo`]
//! - The [`ConvBackend`] and [`MemoryPool`] traits the engine consumes
//! - [`fake`] — a deterministic in-process backend for tests
//! - [`cuda`] — a cudarc-based CUDA backend (behind the `cuda` feature)

pub mod algo;
pub mod capabilities;
pub mod descriptor;
pub mod fake;
pub mod types;

#[cfg(feature = "cuda")]
pub mod cuda;

pub use algo::ConvAlgorithm;
pub use capabilities::BackendCapabilities;
pub use descriptor::{ConvDescriptor, ConvMode};
pub use types::{BackendError, ConvBackend, MemoryInfo, MemoryPool, Workspace};
