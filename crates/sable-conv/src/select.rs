//! Algorithm selection: the reuse state machine and the two
//! derivation paths.

use sable_core::TensorView;

use sable_backend::{ConvAlgorithm, ConvBackend, ConvDescriptor};

use crate::config::{AlgorithmPolicy, DerivationMethod, ReuseGranularity};
use crate::state::ShapeState;
use crate::{ConvError, Result};

/// Decide the candidate algorithm for one call.
///
/// `Fixed` bypasses everything, including the per-site state. Under
/// `Dynamic`, a previously stored algorithm is reused when the
/// granularity allows; otherwise a fresh one is derived (timed probe
/// or heuristic bounded by free memory — both fatal on backend error)
/// and recorded in the state along with the shapes it was made for.
pub(crate) fn select(
    backend: &dyn ConvBackend,
    input: &TensorView,
    kernel: &TensorView,
    output: &TensorView,
    desc: &ConvDescriptor,
    policy: &AlgorithmPolicy,
    state: &mut ShapeState,
) -> Result<ConvAlgorithm> {
    let (reuse, derivation) = match policy {
        AlgorithmPolicy::Fixed(algo) => return Ok(*algo),
        AlgorithmPolicy::Dynamic { reuse, derivation } => (*reuse, *derivation),
    };

    let reusable = match reuse {
        ReuseGranularity::Once => state.has_chosen_once(),
        ReuseGranularity::PerShapeChange => state.matches(input.shape(), kernel.shape()),
    };
    if reusable {
        if let Some(algo) = state.chosen() {
            tracing::trace!("reusing {algo} for input {}", input.shape());
            return Ok(algo);
        }
    }

    let algo = match derivation {
        DerivationMethod::Timed => backend
            .find_fastest(input, kernel, output, desc)
            .map_err(|e| ConvError::AlgorithmSelection(e.to_string()))?,
        DerivationMethod::Heuristic => {
            let info = backend
                .memory_info()
                .map_err(|e| ConvError::MemoryQuery(e.to_string()))?;
            backend
                .recommend(input, kernel, output, desc, info.free)
                .map_err(|e| ConvError::AlgorithmSelection(e.to_string()))?
        }
    };

    tracing::debug!(
        "derived {algo} via {derivation:?} for input {} kernel {}",
        input.shape(),
        kernel.shape()
    );
    state.record(input.shape(), kernel.shape(), algo);
    Ok(algo)
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
    fn test_fixed_policy_bypasses_backend_and_state() {
        let backend = FakeBackend::new();
        let (input, kernel, output, desc) = setup(&backend);
        let mut state = ShapeState::new();

        let algo = select(
            &backend,
            &input,
            &kernel,
            &output,
            &desc,
            &AlgorithmPolicy::Fixed(ConvAlgorithm::Winograd),
            &mut state,
        )
        .unwrap();

        assert_eq!(algo, ConvAlgorithm::Winograd);
        assert_eq!(backend.recommend_calls() + backend.find_calls(), 0);
        assert!(!state.has_chosen_once());
    }

    #[test]
    fn test_heuristic_derivation_bounded_by_free_memory() {
        let backend = FakeBackend::new();
        backend.set_free_memory(123_456);
        backend.set_recommendation(ConvAlgorithm::Gemm);
        let (input, kernel, output, desc) = setup(&backend);
        let mut state = ShapeState::new();

        let policy = AlgorithmPolicy::Dynamic {
            reuse: ReuseGranularity::PerShapeChange,
            derivation: DerivationMethod::Heuristic,
        };
        let algo = select(&backend, &input, &kernel, &output, &desc, &policy, &mut state).unwrap();

        assert_eq!(algo, ConvAlgorithm::Gemm);
        assert_eq!(backend.last_ceiling(), 123_456);
        assert_eq!(state.chosen(), Some(ConvAlgorithm::Gemm));
    }

    #[test]
    fn test_timed_derivation_uses_probe() {
        let backend = FakeBackend::new();
        backend.set_timed_result(ConvAlgorithm::Direct);
        let (input, kernel, output, desc) = setup(&backend);
        let mut state = ShapeState::new();

        let policy = AlgorithmPolicy::Dynamic {
            reuse: ReuseGranularity::Once,
            derivation: DerivationMethod::Timed,
        };
        let algo = select(&backend, &input, &kernel, &output, &desc, &policy, &mut state).unwrap();

        assert_eq!(algo, ConvAlgorithm::Direct);
        assert_eq!(backend.find_calls(), 1);
        assert_eq!(backend.recommend_calls(), 0);
    }

    #[test]
    fn test_search_failure_is_fatal() {
        let backend = FakeBackend::new();
        backend.fail_search();
        let (input, kernel, output, desc) = setup(&backend);
        let mut state = ShapeState::new();

        let policy = AlgorithmPolicy::Dynamic {
            reuse: ReuseGranularity::Once,
            derivation: DerivationMethod::Timed,
        };
        let err = select(&backend, &input, &kernel, &output, &desc, &policy, &mut state)
            .unwrap_err();
        assert!(matches!(err, ConvError::AlgorithmSelection(_)));
        assert!(!state.has_chosen_once());
    }

    #[test]
    fn test_memory_query_failure_is_fatal() {
        let backend = FakeBackend::new();
        backend.fail_memory_query();
        let (input, kernel, output, desc) = setup(&backend);
        let mut state = ShapeState::new();

        let policy = AlgorithmPolicy::Dynamic {
            reuse: ReuseGranularity::PerShapeChange,
            derivation: DerivationMethod::Heuristic,
        };
        let err = select(&backend, &input, &kernel, &output, &desc, &policy, &mut state)
            .unwrap_err();
        assert!(matches!(err, ConvError::MemoryQuery(_)));
        assert_eq!(backend.recommend_calls(), 0);
    }

    #[test]
    fn test_reuse_per_shape_change() {
        let backend = FakeBackend::new();
        let (input, kernel, output, desc) = setup(&backend);
        let mut state = ShapeState::new();
        let policy = AlgorithmPolicy::Dynamic {
            reuse: ReuseGranularity::PerShapeChange,
            derivation: DerivationMethod::Heuristic,
        };

        select(&backend, &input, &kernel, &output, &desc, &policy, &mut state).unwrap();
        select(&backend, &input, &kernel, &output, &desc, &policy, &mut state).unwrap();
        assert_eq!(backend.recommend_calls(), 1);

        let wider = backend.alloc(&[1, 3, 16, 16]);
        let wider_out = backend.alloc(&[1, 4, 14, 14]);
        select(&backend, &wider, &kernel, &wider_out, &desc, &policy, &mut state).unwrap();
        assert_eq!(backend.recommend_calls(), 2);
    }

    #[test]
    fn test_reuse_once_ignores_shape_changes() {
        let backend = FakeBackend::new();
        backend.set_recommendation(ConvAlgorithm::ImplicitPrecompGemm);
        let (input, kernel, output, desc) = setup(&backend);
        let mut state = ShapeState::new();
        let policy = AlgorithmPolicy::Dynamic {
            reuse: ReuseGranularity::Once,
            derivation: DerivationMethod::Heuristic,
        };

        let first =
            select(&backend, &input, &kernel, &output, &desc, &policy, &mut state).unwrap();

        let wider = backend.alloc(&[1, 3, 64, 64]);
        let wider_out = backend.alloc(&[1, 4, 62, 62]);
        backend.set_recommendation(ConvAlgorithm::Direct);
        let second =
            select(&backend, &wider, &kernel, &wider_out, &desc, &policy, &mut state).unwrap();

        assert_eq!(first, second);
        assert_eq!(backend.recommend_calls(), 1);
    }
}
