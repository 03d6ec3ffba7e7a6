//! Deterministic in-process backend and pool for exercising the
//! dispatch engine without a device.
//!
//! "Device memory" is a map of `f32` buffers keyed by fake addresses.
//! The compute call runs a real 2-D convolution with padding, stride,
//! dilation, and alpha/beta blending, so tests can verify numerics.
//! Search results, workspace sizes, free memory, and failures are all
//! scriptable, and every trait method counts its calls.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use sable_core::{DType, Device, DevicePtr, Shape, TensorView};

use crate::{
    BackendCapabilities, BackendError, ConvAlgorithm, ConvBackend, ConvDescriptor, ConvMode,
    MemoryInfo, MemoryPool, Workspace,
};

/// Shared fake device memory: buffers keyed by address.
#[derive(Default)]
struct FakeMemory {
    buffers: HashMap<u64, Vec<f32>>,
    next_addr: u64,
}

impl FakeMemory {
    fn alloc(&mut self, len: usize) -> DevicePtr {
        self.next_addr += 1;
        let addr = self.next_addr;
        self.buffers.insert(addr, vec![0.0; len]);
        DevicePtr::new(addr)
    }
}

/// Scriptable reference backend. F32, rank-4 (NCHW) only.
pub struct FakeBackend {
    mem: Arc<Mutex<FakeMemory>>,
    caps: BackendCapabilities,

    recommendation: Mutex<ConvAlgorithm>,
    timed_result: Mutex<ConvAlgorithm>,
    workspace_sizes: Mutex<HashMap<ConvAlgorithm, usize>>,
    free_memory: AtomicUsize,

    fail_memory_query: AtomicBool,
    fail_search: AtomicBool,
    fail_workspace_size: AtomicBool,
    fail_compute: AtomicBool,

    find_calls: AtomicUsize,
    recommend_calls: AtomicUsize,
    workspace_queries: AtomicUsize,
    alloc_calls: AtomicUsize,
    copy_calls: AtomicUsize,
    last_ceiling: AtomicUsize,
    executed: Mutex<Vec<ConvAlgorithm>>,
}

impl FakeBackend {
    /// A modern-version backend with every script knob at its default:
    /// both searches answer `ImplicitGemm`, every workspace size is 0,
    /// 1 GiB of memory is reported free, nothing fails.
    pub fn new() -> Self {
        Self::with_capabilities(BackendCapabilities::from_version(7401))
    }

    /// Same defaults under explicit capability flags (legacy-version
    /// behavior is driven from here).
    pub fn with_capabilities(caps: BackendCapabilities) -> Self {
        Self {
            mem: Arc::new(Mutex::new(FakeMemory::default())),
            caps,
            recommendation: Mutex::new(ConvAlgorithm::ImplicitGemm),
            timed_result: Mutex::new(ConvAlgorithm::ImplicitGemm),
            workspace_sizes: Mutex::new(HashMap::new()),
            free_memory: AtomicUsize::new(1 << 30),
            fail_memory_query: AtomicBool::new(false),
            fail_search: AtomicBool::new(false),
            fail_workspace_size: AtomicBool::new(false),
            fail_compute: AtomicBool::new(false),
            find_calls: AtomicUsize::new(0),
            recommend_calls: AtomicUsize::new(0),
            workspace_queries: AtomicUsize::new(0),
            alloc_calls: AtomicUsize::new(0),
            copy_calls: AtomicUsize::new(0),
            last_ceiling: AtomicUsize::new(0),
            executed: Mutex::new(Vec::new()),
        }
    }

    /// A pool backed by the same fake memory.
    pub fn pool(&self) -> FakePool {
        FakePool {
            mem: Arc::clone(&self.mem),
            acquisitions: Mutex::new(Vec::new()),
            exhausted: AtomicBool::new(false),
        }
    }

    // ------------------------------------------------------------------
    // Script knobs
    // ------------------------------------------------------------------

    pub fn set_recommendation(&self, algo: ConvAlgorithm) {
        *self.recommendation.lock() = algo;
    }

    pub fn set_timed_result(&self, algo: ConvAlgorithm) {
        *self.timed_result.lock() = algo;
    }

    pub fn set_workspace_size(&self, algo: ConvAlgorithm, nbytes: usize) {
        self.workspace_sizes.lock().insert(algo, nbytes);
    }

    pub fn set_free_memory(&self, nbytes: usize) {
        self.free_memory.store(nbytes, Ordering::SeqCst);
    }

    pub fn fail_memory_query(&self) {
        self.fail_memory_query.store(true, Ordering::SeqCst);
    }

    pub fn fail_search(&self) {
        self.fail_search.store(true, Ordering::SeqCst);
    }

    pub fn fail_workspace_size(&self) {
        self.fail_workspace_size.store(true, Ordering::SeqCst);
    }

    pub fn fail_compute(&self) {
        self.fail_compute.store(true, Ordering::SeqCst);
    }

    // ------------------------------------------------------------------
    // Observation
    // ------------------------------------------------------------------

    pub fn find_calls(&self) -> usize {
        self.find_calls.load(Ordering::SeqCst)
    }

    pub fn recommend_calls(&self) -> usize {
        self.recommend_calls.load(Ordering::SeqCst)
    }

    pub fn workspace_queries(&self) -> usize {
        self.workspace_queries.load(Ordering::SeqCst)
    }

    pub fn alloc_calls(&self) -> usize {
        self.alloc_calls.load(Ordering::SeqCst)
    }

    pub fn copy_calls(&self) -> usize {
        self.copy_calls.load(Ordering::SeqCst)
    }

    /// The memory ceiling passed to the most recent `recommend` call.
    pub fn last_ceiling(&self) -> usize {
        self.last_ceiling.load(Ordering::SeqCst)
    }

    /// Every algorithm the compute call has executed, in order.
    pub fn executed(&self) -> Vec<ConvAlgorithm> {
        self.executed.lock().clone()
    }

    pub fn last_executed(&self) -> Option<ConvAlgorithm> {
        self.executed.lock().last().copied()
    }

    // ------------------------------------------------------------------
    // Buffer helpers for tests (the "caller" side of the contract)
    // ------------------------------------------------------------------

    /// Allocate a zeroed caller buffer and return a view of it.
    pub fn alloc(&self, dims: &[usize]) -> TensorView {
        let shape = Shape::new(dims);
        let ptr = self.mem.lock().alloc(shape.numel());
        TensorView::new(ptr, shape, DType::F32, Device::Cpu).expect("valid fake view")
    }

    /// Allocate a caller buffer initialized with `data`.
    pub fn tensor(&self, dims: &[usize], data: &[f32]) -> TensorView {
        let view = self.alloc(dims);
        self.write(&view, data);
        view
    }

    /// Overwrite the buffer behind `view`.
    pub fn write(&self, view: &TensorView, data: &[f32]) {
        let mut mem = self.mem.lock();
        let buf = mem
            .buffers
            .get_mut(&view.ptr().addr())
            .expect("unknown fake buffer");
        assert_eq!(buf.len(), data.len(), "fake write length mismatch");
        buf.copy_from_slice(data);
    }

    /// Read the buffer behind `view`.
    pub fn read(&self, view: &TensorView) -> Vec<f32> {
        self.mem
            .lock()
            .buffers
            .get(&view.ptr().addr())
            .expect("unknown fake buffer")
            .clone()
    }
}

impl Default for FakeBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl ConvBackend for FakeBackend {
    fn capabilities(&self) -> BackendCapabilities {
        self.caps
    }

    fn memory_info(&self) -> Result<MemoryInfo, BackendError> {
        if self.fail_memory_query.load(Ordering::SeqCst) {
            return Err(BackendError::MemoryQuery("scripted failure".into()));
        }
        let free = self.free_memory.load(Ordering::SeqCst);
        Ok(MemoryInfo {
            free,
            total: free * 2,
        })
    }

    fn find_fastest(
        &self,
        _input: &TensorView,
        _kernel: &TensorView,
        _output: &TensorView,
        _desc: &ConvDescriptor,
    ) -> Result<ConvAlgorithm, BackendError> {
        self.find_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_search.load(Ordering::SeqCst) {
            return Err(BackendError::Search("scripted failure".into()));
        }
        Ok(*self.timed_result.lock())
    }

    fn recommend(
        &self,
        _input: &TensorView,
        _kernel: &TensorView,
        _output: &TensorView,
        _desc: &ConvDescriptor,
        memory_ceiling: usize,
    ) -> Result<ConvAlgorithm, BackendError> {
        self.recommend_calls.fetch_add(1, Ordering::SeqCst);
        self.last_ceiling.store(memory_ceiling, Ordering::SeqCst);
        if self.fail_search.load(Ordering::SeqCst) {
            return Err(BackendError::Search("scripted failure".into()));
        }
        Ok(*self.recommendation.lock())
    }

    fn workspace_size(
        &self,
        algo: ConvAlgorithm,
        _input: &TensorView,
        _kernel: &TensorView,
        _output: &TensorView,
        _desc: &ConvDescriptor,
    ) -> Result<usize, BackendError> {
        self.workspace_queries.fetch_add(1, Ordering::SeqCst);
        if self.fail_workspace_size.load(Ordering::SeqCst) {
            return Err(BackendError::WorkspaceSize("scripted failure".into()));
        }
        Ok(self
            .workspace_sizes
            .lock()
            .get(&algo)
            .copied()
            .unwrap_or(0))
    }

    fn alloc_like(&self, view: &TensorView) -> Result<TensorView, BackendError> {
        self.alloc_calls.fetch_add(1, Ordering::SeqCst);
        if view.dtype() != DType::F32 {
            return Err(BackendError::Unsupported(format!(
                "fake backend is f32-only, got {}",
                view.dtype()
            )));
        }
        let ptr = self.mem.lock().alloc(view.numel());
        TensorView::new(ptr, view.shape().clone(), view.dtype(), view.device())
            .map_err(|e| BackendError::Alloc(e.to_string()))
    }

    fn copy_into(&self, src: &TensorView, dst: &TensorView) -> Result<(), BackendError> {
        self.copy_calls.fetch_add(1, Ordering::SeqCst);
        let mut mem = self.mem.lock();
        let data = mem
            .buffers
            .get(&src.ptr().addr())
            .ok_or_else(|| BackendError::Copy("unknown source buffer".into()))?
            .clone();
        let dst_buf = mem
            .buffers
            .get_mut(&dst.ptr().addr())
            .ok_or_else(|| BackendError::Copy("unknown destination buffer".into()))?;
        if dst_buf.len() != data.len() {
            return Err(BackendError::Copy(format!(
                "length mismatch: {} vs {}",
                data.len(),
                dst_buf.len()
            )));
        }
        dst_buf.copy_from_slice(&data);
        Ok(())
    }

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
        _workspace: Option<&Workspace>,
    ) -> Result<(), BackendError> {
        self.executed.lock().push(algo);
        if self.fail_compute.load(Ordering::SeqCst) {
            return Err(BackendError::Compute("scripted failure".into()));
        }
        if input.dtype() != DType::F32 {
            return Err(BackendError::Unsupported(format!(
                "fake backend is f32-only, got {}",
                input.dtype()
            )));
        }
        if input.ndim() != 4 || desc.spatial_rank() != 2 {
            return Err(BackendError::Unsupported(
                "fake backend computes rank-4 (NCHW) convolutions only".into(),
            ));
        }

        let mut mem = self.mem.lock();
        let x = mem
            .buffers
            .get(&input.ptr().addr())
            .ok_or_else(|| BackendError::Compute("unknown input buffer".into()))?
            .clone();
        let w = mem
            .buffers
            .get(&kernel.ptr().addr())
            .ok_or_else(|| BackendError::Compute("unknown kernel buffer".into()))?
            .clone();
        let out = mem
            .buffers
            .get_mut(&output.ptr().addr())
            .ok_or_else(|| BackendError::Compute("unknown output buffer".into()))?;

        conv2d_blend(&x, &w, out, input, kernel, output, desc, alpha, beta);
        Ok(())
    }
}

/// `out = alpha * conv(x, w) + beta * out`, NCHW, contiguous.
#[allow(clippy::too_many_arguments)]
fn conv2d_blend(
    x: &[f32],
    w: &[f32],
    out: &mut [f32],
    input: &TensorView,
    kernel: &TensorView,
    output: &TensorView,
    desc: &ConvDescriptor,
    alpha: f32,
    beta: f32,
) {
    let [n, c, ih, iw] = [
        input.shape().dim(0).unwrap(),
        input.shape().dim(1).unwrap(),
        input.shape().dim(2).unwrap(),
        input.shape().dim(3).unwrap(),
    ];
    let [oc, kh, kw] = [
        kernel.shape().dim(0).unwrap(),
        kernel.shape().dim(2).unwrap(),
        kernel.shape().dim(3).unwrap(),
    ];
    let [oh, ow] = [
        output.shape().dim(2).unwrap(),
        output.shape().dim(3).unwrap(),
    ];
    let (ph, pw) = (desc.pad()[0], desc.pad()[1]);
    let (sh, sw) = (desc.stride()[0], desc.stride()[1]);
    let (dh, dw) = (desc.dilation()[0], desc.dilation()[1]);

    for b in 0..n {
        for o in 0..oc {
            for y in 0..oh {
                for xo in 0..ow {
                    let mut acc = 0.0f32;
                    for ci in 0..c {
                        for ky in 0..kh {
                            for kx in 0..kw {
                                let iy = (y * sh + ky * dh) as isize - ph as isize;
                                let ix = (xo * sw + kx * dw) as isize - pw as isize;
                                if iy < 0 || ix < 0 || iy as usize >= ih || ix as usize >= iw {
                                    continue;
                                }
                                let (wky, wkx) = match desc.mode() {
                                    ConvMode::CrossCorrelation => (ky, kx),
                                    ConvMode::Convolution => (kh - 1 - ky, kw - 1 - kx),
                                };
                                let x_idx = ((b * c + ci) * ih + iy as usize) * iw + ix as usize;
                                let w_idx = ((o * c + ci) * kh + wky) * kw + wkx;
                                acc += x[x_idx] * w[w_idx];
                            }
                        }
                    }
                    let o_idx = ((b * oc + o) * oh + y) * ow + xo;
                    out[o_idx] = alpha * acc + beta * out[o_idx];
                }
            }
        }
    }
}

/// Pool over the same fake memory, with an acquisition log and an
/// exhaustion switch.
pub struct FakePool {
    mem: Arc<Mutex<FakeMemory>>,
    acquisitions: Mutex<Vec<usize>>,
    exhausted: AtomicBool,
}

impl FakePool {
    /// Every acquired size so far, in bytes.
    pub fn acquisitions(&self) -> Vec<usize> {
        self.acquisitions.lock().clone()
    }

    /// Make every subsequent acquisition fail.
    pub fn exhaust(&self) {
        self.exhausted.store(true, Ordering::SeqCst);
    }
}

impl MemoryPool for FakePool {
    fn acquire(&self, nbytes: usize) -> Option<Workspace> {
        if self.exhausted.load(Ordering::SeqCst) {
            return None;
        }
        let ptr = self.mem.lock().alloc(nbytes.div_ceil(4));
        self.acquisitions.lock().push(nbytes);
        Some(Workspace::new(ptr, nbytes))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_close(a: &[f32], b: &[f32]) {
        assert_eq!(a.len(), b.len());
        for (i, (x, y)) in a.iter().zip(b.iter()).enumerate() {
            assert!((x - y).abs() < 1e-5, "element {i} differs: {x} vs {y}");
        }
    }

    #[test]
    fn test_conv_hand_computed() {
        let backend = FakeBackend::new();
        // 1x1x3x3 input, 1x1x2x2 kernel, valid cross-correlation.
        let input = backend.tensor(
            &[1, 1, 3, 3],
            &[1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0, 9.0],
        );
        let kernel = backend.tensor(&[1, 1, 2, 2], &[1.0, 0.0, 0.0, 1.0]);
        let output = backend.alloc(&[1, 1, 2, 2]);
        let desc = ConvDescriptor::default_2d();

        backend
            .convolve(
                ConvAlgorithm::ImplicitGemm,
                &input,
                &kernel,
                &output,
                &desc,
                1.0,
                0.0,
                None,
            )
            .unwrap();
        // out[y][x] = in[y][x] + in[y+1][x+1]
        assert_close(&backend.read(&output), &[6.0, 8.0, 12.0, 14.0]);
    }

    #[test]
    fn test_conv_true_convolution_flips_kernel() {
        let backend = FakeBackend::new();
        let input = backend.tensor(&[1, 1, 2, 2], &[1.0, 2.0, 3.0, 4.0]);
        let kernel = backend.tensor(&[1, 1, 2, 2], &[1.0, 2.0, 3.0, 4.0]);
        let output = backend.alloc(&[1, 1, 1, 1]);

        let xcorr = ConvDescriptor::default_2d();
        backend
            .convolve(
                ConvAlgorithm::Direct,
                &input,
                &kernel,
                &output,
                &xcorr,
                1.0,
                0.0,
                None,
            )
            .unwrap();
        // 1*1 + 2*2 + 3*3 + 4*4
        assert_close(&backend.read(&output), &[30.0]);

        let flip = ConvDescriptor::new_2d((0, 0), (1, 1), (1, 1), ConvMode::Convolution);
        backend
            .convolve(
                ConvAlgorithm::Direct,
                &input,
                &kernel,
                &output,
                &flip,
                1.0,
                0.0,
                None,
            )
            .unwrap();
        // 1*4 + 2*3 + 3*2 + 4*1
        assert_close(&backend.read(&output), &[20.0]);
    }

    #[test]
    fn test_conv_padding_and_stride() {
        let backend = FakeBackend::new();
        let input = backend.tensor(&[1, 1, 3, 3], &[1.0; 9]);
        let kernel = backend.tensor(&[1, 1, 3, 3], &[1.0; 9]);
        // pad 1, stride 2 → output 2x2; corners see 4 taps, center-ish 6.
        let output = backend.alloc(&[1, 1, 2, 2]);
        let desc = ConvDescriptor::new_2d((1, 1), (2, 2), (1, 1), ConvMode::CrossCorrelation);

        backend
            .convolve(
                ConvAlgorithm::Direct,
                &input,
                &kernel,
                &output,
                &desc,
                1.0,
                0.0,
                None,
            )
            .unwrap();
        assert_close(&backend.read(&output), &[4.0, 4.0, 4.0, 4.0]);
    }

    #[test]
    fn test_blending() {
        let backend = FakeBackend::new();
        let input = backend.tensor(&[1, 1, 2, 2], &[1.0; 4]);
        let kernel = backend.tensor(&[1, 1, 1, 1], &[2.0]);
        let output = backend.tensor(&[1, 1, 2, 2], &[10.0, 20.0, 30.0, 40.0]);
        let desc = ConvDescriptor::default_2d();

        backend
            .convolve(
                ConvAlgorithm::Direct,
                &input,
                &kernel,
                &output,
                &desc,
                0.5,
                0.25,
                None,
            )
            .unwrap();
        // 0.5*2 + 0.25*prev
        assert_close(&backend.read(&output), &[3.5, 6.0, 8.5, 11.0]);
    }

    #[test]
    fn test_pool_logs_and_exhausts() {
        let backend = FakeBackend::new();
        let pool = backend.pool();
        assert!(pool.acquire(1024).is_some());
        assert_eq!(pool.acquisitions(), vec![1024]);
        pool.exhaust();
        assert!(pool.acquire(8).is_none());
    }

    #[test]
    fn test_scripting_and_counters() {
        let backend = FakeBackend::new();
        let input = backend.alloc(&[1, 1, 4, 4]);
        let kernel = backend.alloc(&[1, 1, 3, 3]);
        let output = backend.alloc(&[1, 1, 2, 2]);
        let desc = ConvDescriptor::default_2d();

        backend.set_recommendation(ConvAlgorithm::Fft);
        let algo = backend
            .recommend(&input, &kernel, &output, &desc, 4096)
            .unwrap();
        assert_eq!(algo, ConvAlgorithm::Fft);
        assert_eq!(backend.recommend_calls(), 1);
        assert_eq!(backend.last_ceiling(), 4096);

        backend.set_workspace_size(ConvAlgorithm::Fft, 512);
        let size = backend
            .workspace_size(ConvAlgorithm::Fft, &input, &kernel, &output, &desc)
            .unwrap();
        assert_eq!(size, 512);

        backend.fail_search();
        assert!(backend
            .recommend(&input, &kernel, &output, &desc, 0)
            .is_err());
    }
}
