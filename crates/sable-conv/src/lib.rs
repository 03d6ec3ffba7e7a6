//! # sable-conv
//!
//! Convolution-algorithm dispatch and execution engine.
//!
//! Given caller-owned tensor views, a convolution descriptor, and an
//! affine blending pair, [`ConvExecutor::forward`] decides which
//! backend implementation to run (cached, empirically timed, or
//! heuristic), validates the choice against shape and version
//! constraints, acquires scratch memory sized for it, and issues the
//! backend compute call:
//!
//! `output = alpha * conv(input, kernel) + beta * output`
//!
//! Selection state is explicit: each logical operation site owns one
//! [`ShapeState`] and passes it into every call. Calls are synchronous
//! and single-threaded per site; callers serialize concurrent use of a
//! site.

pub mod config;
pub mod error;
pub mod exec;
pub mod state;

mod select;
mod validate;
mod workspace;

pub use config::{AlgorithmPolicy, ConvConfig, DerivationMethod, OutputMode, ReuseGranularity};
pub use error::ConvError;
pub use exec::ConvExecutor;
pub use state::ShapeState;

pub type Result<T> = std::result::Result<T, ConvError>;
