use sable_core::{DevicePtr, TensorView};

use crate::{BackendCapabilities, ConvAlgorithm, ConvDescriptor};

/// Scratch device memory borrowed from a [`MemoryPool`] for one compute
/// call. The pool retains ownership and recycles the buffer; holders
/// never release it explicitly.
#[derive(Debug, Clone, Copy)]
pub struct Workspace {
    ptr: DevicePtr,
    len: usize,
}

impl Workspace {
    pub fn new(ptr: DevicePtr, len: usize) -> Self {
        Self { ptr, len }
    }

    pub fn ptr(&self) -> DevicePtr {
        self.ptr
    }

    /// Size in bytes.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

/// Free and total device memory in bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryInfo {
    pub free: usize,
    pub total: usize,
}

/// Errors reported by a backend implementation.
///
/// String-bearing by design: the engine wraps each into its own
/// stage-tagged error, so the backend only has to say what broke.
#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    #[error("device init failed: {0}")]
    Device(String),

    #[error("device memory query failed: {0}")]
    MemoryQuery(String),

    #[error("algorithm search failed: {0}")]
    Search(String),

    #[error("workspace size query failed: {0}")]
    WorkspaceSize(String),

    #[error("allocation failed: {0}")]
    Alloc(String),

    #[error("device copy failed: {0}")]
    Copy(String),

    #[error("compute call failed: {0}")]
    Compute(String),

    #[error("unsupported by this backend: {0}")]
    Unsupported(String),
}

/// The compute side of the seam: everything the dispatch engine needs
/// from a concrete convolution backend, and nothing else.
///
/// All calls are synchronous from the caller's perspective; a backend
/// that launches asynchronous device work is responsible for ordering
/// it correctly on its own stream.
pub trait ConvBackend {
    /// Capability flags, resolved once at backend construction.
    fn capabilities(&self) -> BackendCapabilities;

    /// Free and total device memory.
    fn memory_info(&self) -> Result<MemoryInfo, BackendError>;

    /// Empirically time candidate implementations on the given buffers
    /// and return the single fastest one. Runs real kernels; the output
    /// buffer's contents are clobbered, exactly as a subsequent compute
    /// call would clobber them.
    fn find_fastest(
        &self,
        input: &TensorView,
        kernel: &TensorView,
        output: &TensorView,
        desc: &ConvDescriptor,
    ) -> Result<ConvAlgorithm, BackendError>;

    /// Recommend an implementation by heuristics, keeping its workspace
    /// requirement within `memory_ceiling` bytes.
    fn recommend(
        &self,
        input: &TensorView,
        kernel: &TensorView,
        output: &TensorView,
        desc: &ConvDescriptor,
        memory_ceiling: usize,
    ) -> Result<ConvAlgorithm, BackendError>;

    /// Scratch bytes `algo` needs for these shapes. Zero is a valid
    /// answer and means no workspace will be acquired.
    fn workspace_size(
        &self,
        algo: ConvAlgorithm,
        input: &TensorView,
        kernel: &TensorView,
        output: &TensorView,
        desc: &ConvDescriptor,
    ) -> Result<usize, BackendError>;

    /// Allocate a fresh device buffer shaped like `view` and return a
    /// view of it. The backend retains ownership of the allocation.
    fn alloc_like(&self, view: &TensorView) -> Result<TensorView, BackendError>;

    /// Copy the contents of `src` into `dst` (same shape and dtype).
    fn copy_into(&self, src: &TensorView, dst: &TensorView) -> Result<(), BackendError>;

    /// Run the convolution:
    /// `output = alpha * conv(input, kernel) + beta * output`.
    ///
    /// `workspace` is present iff [`ConvBackend::workspace_size`]
    /// reported a nonzero requirement for `algo`.
    #[allow(clippy::too_many_arguments)]
    fn convolve(
        &self,
        algo: ConvAlgorithm,
        input: &TensorView,
        kernel: &TensorView,
        output: &TensorView,
        desc: &ConvDescriptor,
        alpha: f32,
        beta: f32,
        workspace: Option<&Workspace>,
    ) -> Result<(), BackendError>;
}

/// The memory-pool side of the seam. A pool is shared across operation
/// sites on a device and is internally synchronized; it owns every
/// buffer it hands out and recycles them across calls.
pub trait MemoryPool {
    /// Acquire at least `nbytes` of scratch device memory, or `None`
    /// when the pool cannot satisfy the request.
    fn acquire(&self, nbytes: usize) -> Option<Workspace>;
}
