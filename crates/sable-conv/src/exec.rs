//! The executor: output materialization, the dispatch pipeline, and
//! the backend compute invocation.

use sable_core::TensorView;

use sable_backend::{ConvBackend, ConvDescriptor, MemoryPool};

use crate::config::{ConvConfig, OutputMode};
use crate::state::ShapeState;
use crate::{select, validate, workspace, ConvError, Result};

/// Runs forward convolutions against one backend and one workspace
/// pool.
///
/// The executor is stateless; everything per-site lives in the
/// [`ShapeState`] the caller passes in, and everything per-call in the
/// arguments. One `forward` call performs, in order: precondition
/// check, output materialization, algorithm selection, constraint
/// validation, workspace acquisition, compute invocation.
pub struct ConvExecutor<'a> {
    backend: &'a dyn ConvBackend,
    pool: &'a dyn MemoryPool,
}

impl<'a> ConvExecutor<'a> {
    pub fn new(backend: &'a dyn ConvBackend, pool: &'a dyn MemoryPool) -> Self {
        Self { backend, pool }
    }

    /// `output = alpha * conv(input, kernel) + beta * output`
    ///
    /// `accumulator` supplies both the output geometry and, when
    /// `beta != 0`, the prior values blended into the result. In
    /// in-place mode the returned view aliases `accumulator`; out of
    /// place it views a fresh backend-owned buffer.
    ///
    /// On any error before the compute call the output buffers are
    /// untouched; an error from the compute call itself may leave the
    /// output partially written.
    #[allow(clippy::too_many_arguments)]
    pub fn forward(
        &self,
        input: &TensorView,
        kernel: &TensorView,
        accumulator: &TensorView,
        desc: &ConvDescriptor,
        alpha: f32,
        beta: f32,
        config: &ConvConfig,
        state: &mut ShapeState,
    ) -> Result<TensorView> {
        if input.channels() != kernel.channels() {
            return Err(ConvError::ShapeMismatch {
                input: input.channels(),
                kernel: kernel.channels(),
            });
        }

        let output = match config.output_mode {
            OutputMode::InPlace => accumulator.clone(),
            OutputMode::OutOfPlace => {
                let fresh = self
                    .backend
                    .alloc_like(accumulator)
                    .map_err(|e| ConvError::OutputPreparation(e.to_string()))?;
                // The blend reads prior output values only when beta
                // contributes; otherwise the backend overwrites anyway.
                if beta != 0.0 {
                    self.backend
                        .copy_into(accumulator, &fresh)
                        .map_err(|e| ConvError::OutputPreparation(e.to_string()))?;
                }
                fresh
            }
        };

        let candidate = select::select(
            self.backend,
            input,
            kernel,
            &output,
            desc,
            &config.policy,
            state,
        )?;

        let caps = self.backend.capabilities();
        let algo = validate::validate(candidate, input, kernel, desc, &caps)?;

        let ws = workspace::acquire(self.backend, self.pool, algo, input, kernel, &output, desc)?;

        tracing::trace!("convolve {algo}: input {} -> output {}", input.shape(), output.shape());
        self.backend
            .convolve(algo, input, kernel, &output, desc, alpha, beta, ws.as_ref())
            .map_err(|e| ConvError::Execution(e.to_string()))?;

        Ok(output)
    }
}
