//! Workspace sizing and acquisition for a validated algorithm.

use sable_core::TensorView;

use sable_backend::{ConvAlgorithm, ConvBackend, ConvDescriptor, MemoryPool, Workspace};

use crate::{ConvError, Result};

/// Query the scratch requirement of `algo` and acquire it from the
/// pool.
///
/// A zero requirement is valid and skips acquisition entirely. A pool
/// refusal for a nonzero requirement is fatal. The returned workspace
/// is pool-owned transient memory: the engine hands it to exactly one
/// compute call and never releases it.
pub(crate) fn acquire(
    backend: &dyn ConvBackend,
    pool: &dyn MemoryPool,
    algo: ConvAlgorithm,
    input: &TensorView,
    kernel: &TensorView,
    output: &TensorView,
    desc: &ConvDescriptor,
) -> Result<Option<Workspace>> {
    let nbytes = backend
        .workspace_size(algo, input, kernel, output, desc)
        .map_err(|e| ConvError::WorkspaceSize {
            algo,
            msg: e.to_string(),
        })?;
    if nbytes == 0 {
        return Ok(None);
    }
    let ws = pool
        .acquire(nbytes)
        .ok_or(ConvError::WorkspaceAllocation { nbytes, algo })?;
    tracing::debug!("acquired {nbytes} byte workspace for {algo}");
    Ok(Some(ws))
}

#[cfg(test)]
mod tests {
    use super::*;
    use sable_backend::fake::FakeBackend;

    fn setup(backend: &FakeBackend) -> (TensorView, TensorView, TensorView, ConvDescriptor) {
        let input = backend.alloc(&[1, 3, 8, 8]);
        let kernel = backend.alloc(&[4, 3, 3, 3]);
        let output = backend.alloc(&[1, 4, 6, 6]);
        (input, kernel, output, ConvDescriptor::default_2d())
    }

    #[test]
    fn test_zero_size_skips_acquisition() {
        let backend = FakeBackend::new();
        let pool = backend.pool();
        let (input, kernel, output, desc) = setup(&backend);

        let ws = acquire(
            &backend,
            &pool,
            ConvAlgorithm::ImplicitGemm,
            &input,
            &kernel,
            &output,
            &desc,
        )
        .unwrap();
        assert!(ws.is_none());
        assert!(pool.acquisitions().is_empty());
    }

    #[test]
    fn test_nonzero_size_acquires() {
        let backend = FakeBackend::new();
        backend.set_workspace_size(ConvAlgorithm::Gemm, 4096);
        let pool = backend.pool();
        let (input, kernel, output, desc) = setup(&backend);

        let ws = acquire(
            &backend,
            &pool,
            ConvAlgorithm::Gemm,
            &input,
            &kernel,
            &output,
            &desc,
        )
        .unwrap()
        .expect("workspace expected");
        assert_eq!(ws.len(), 4096);
        assert_eq!(pool.acquisitions(), vec![4096]);
    }

    #[test]
    fn test_pool_exhaustion_is_fatal() {
        let backend = FakeBackend::new();
        backend.set_workspace_size(ConvAlgorithm::Gemm, 1024);
        let pool = backend.pool();
        pool.exhaust();
        let (input, kernel, output, desc) = setup(&backend);

        let err = acquire(
            &backend,
            &pool,
            ConvAlgorithm::Gemm,
            &input,
            &kernel,
            &output,
            &desc,
        )
        .unwrap_err();
        assert!(matches!(
            err,
            ConvError::WorkspaceAllocation { nbytes: 1024, .. }
        ));
    }

    #[test]
    fn test_size_query_failure_is_fatal() {
        let backend = FakeBackend::new();
        backend.fail_workspace_size();
        let pool = backend.pool();
        let (input, kernel, output, desc) = setup(&backend);

        let err = acquire(
            &backend,
            &pool,
            ConvAlgorithm::Gemm,
            &input,
            &kernel,
            &output,
            &desc,
        )
        .unwrap_err();
        assert!(matches!(err, ConvError::WorkspaceSize { .. }));
        assert!(pool.acquisitions().is_empty());
    }
}
