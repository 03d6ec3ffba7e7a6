use sable_core::Shape;

use sable_backend::ConvAlgorithm;

/// Per-operation-site memory of the last derivation.
///
/// One instance per logical operation site, owned by the caller and
/// passed into every call for that site. Mutated only by the selector.
/// Not internally synchronized: concurrent calls through the same site
/// must be serialized by the caller.
#[derive(Debug, Clone, Default)]
pub struct ShapeState {
    last_input: Option<Shape>,
    last_kernel: Option<Shape>,
    algorithm: Option<ConvAlgorithm>,
    chosen_once: bool,
}

impl ShapeState {
    pub fn new() -> Self {
        Self::default()
    }

    /// The algorithm stored by the last derivation, if any.
    pub fn chosen(&self) -> Option<ConvAlgorithm> {
        self.algorithm
    }

    /// Whether any derivation has happened for this site.
    pub fn has_chosen_once(&self) -> bool {
        self.chosen_once
    }

    /// Whether the stored shapes are elementwise identical to the
    /// given ones.
    pub(crate) fn matches(&self, input: &Shape, kernel: &Shape) -> bool {
        self.last_input.as_ref() == Some(input) && self.last_kernel.as_ref() == Some(kernel)
    }

    /// Record a fresh derivation: the shapes it was made for, the
    /// algorithm, and the permanent chosen-once flag.
    pub(crate) fn record(&mut self, input: &Shape, kernel: &Shape, algo: ConvAlgorithm) {
        self.last_input = Some(input.clone());
        self.last_kernel = Some(kernel.clone());
        self.algorithm = Some(algo);
        self.chosen_once = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fresh_state() {
        let state = ShapeState::new();
        assert!(!state.has_chosen_once());
        assert_eq!(state.chosen(), None);
        assert!(!state.matches(&Shape::new(&[1, 3, 8, 8]), &Shape::new(&[4, 3, 3, 3])));
    }

    #[test]
    fn test_record_and_match() {
        let input = Shape::new(&[1, 3, 8, 8]);
        let kernel = Shape::new(&[4, 3, 3, 3]);
        let mut state = ShapeState::new();
        state.record(&input, &kernel, ConvAlgorithm::Gemm);

        assert!(state.has_chosen_once());
        assert_eq!(state.chosen(), Some(ConvAlgorithm::Gemm));
        assert!(state.matches(&input, &kernel));
        assert!(!state.matches(&Shape::new(&[1, 3, 16, 16]), &kernel));
        assert!(!state.matches(&input, &Shape::new(&[8, 3, 3, 3])));
    }

    #[test]
    fn test_record_overwrites() {
        let mut state = ShapeState::new();
        state.record(
            &Shape::new(&[1, 3, 8, 8]),
            &Shape::new(&[4, 3, 3, 3]),
            ConvAlgorithm::Gemm,
        );
        state.record(
            &Shape::new(&[1, 3, 16, 16]),
            &Shape::new(&[4, 3, 5, 5]),
            ConvAlgorithm::Direct,
        );
        assert_eq!(state.chosen(), Some(ConvAlgorithm::Direct));
        assert!(state.matches(&Shape::new(&[1, 3, 16, 16]), &Shape::new(&[4, 3, 5, 5])));
        assert!(!state.matches(&Shape::new(&[1, 3, 8, 8]), &Shape::new(&[4, 3, 3, 3])));
    }
}
