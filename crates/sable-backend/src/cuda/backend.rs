//! `ConvBackend` implementation over cudarc.
//!
//! F32 NCHW only. Kernels are compiled from embedded CUDA source via
//! NVRTC on first use and cached per device. `ImplicitGemm`/`Direct`
//! run the direct kernel with zero workspace; the GEMM family lowers
//! to im2col into the workspace followed by a GEMM kernel. FFT and
//! Winograd are not implemented and never recommended.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use cudarc::driver::{CudaDevice, CudaSlice, DevicePtr as _, LaunchAsync, LaunchConfig};
use parking_lot::Mutex;

use sable_core::{DType, DevicePtr, TensorView};

use crate::cuda::context::{get_device, get_or_load_func};
use crate::{
    BackendCapabilities, BackendError, ConvAlgorithm, ConvBackend, ConvDescriptor, ConvMode,
    MemoryInfo, Workspace,
};

const CONV_CU: &str = include_str!("kernels/conv.cu");
const CONV_FUNCS: &[&str] = &["conv2d_direct_f32", "im2col_f32", "conv_gemm_f32"];

const BLOCK_SIZE: usize = 256;

/// Version reported to the capability probe for this backend build.
const BACKEND_VERSION: u32 = 7000;

/// Geometry passed to every kernel by value. Field order must match
/// the `ConvParams` struct in `kernels/conv.cu`.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
struct ConvParams {
    n: i32,
    c: i32,
    ih: i32,
    iw: i32,
    oc: i32,
    kh: i32,
    kw: i32,
    oh: i32,
    ow: i32,
    ph: i32,
    pw: i32,
    sh: i32,
    sw: i32,
    dh: i32,
    dw: i32,
    flip: i32,
}

unsafe impl cudarc::driver::DeviceRepr for ConvParams {}

fn grid_1d(n: usize, block: usize) -> LaunchConfig {
    LaunchConfig {
        grid_dim: (n.div_ceil(block) as u32, 1, 1),
        block_dim: (block as u32, 1, 1),
        shared_mem_bytes: 0,
    }
}

pub struct CudaBackend {
    dev: Arc<CudaDevice>,
    device_idx: usize,
    caps: BackendCapabilities,
    /// Output buffers handed out by `alloc_like`, kept alive here and
    /// keyed by device address. Released via [`CudaBackend::release`].
    allocs: Mutex<HashMap<u64, CudaSlice<u8>>>,
}

impl CudaBackend {
    pub fn new(device_idx: usize) -> Result<Self, BackendError> {
        let dev = get_device(device_idx)?;
        Ok(Self {
            dev,
            device_idx,
            // No FFT path in this backend; oversized filters are fine.
            caps: BackendCapabilities {
                version: BACKEND_VERSION,
                fft: false,
                oversized_kernels: true,
            },
            allocs: Mutex::new(HashMap::new()),
        })
    }

    pub fn device(&self) -> &Arc<CudaDevice> {
        &self.dev
    }

    pub fn device_idx(&self) -> usize {
        self.device_idx
    }

    /// Drop an output buffer previously returned by `alloc_like`.
    pub fn release(&self, ptr: DevicePtr) {
        self.allocs.lock().remove(&ptr.addr());
    }

    fn check_supported(
        &self,
        input: &TensorView,
        kernel: &TensorView,
        output: &TensorView,
        desc: &ConvDescriptor,
    ) -> Result<(), BackendError> {
        if input.dtype() != DType::F32 {
            return Err(BackendError::Unsupported(format!(
                "cuda backend is f32-only, got {}",
                input.dtype()
            )));
        }
        if input.ndim() != 4 || desc.spatial_rank() != 2 {
            return Err(BackendError::Unsupported(
                "cuda backend computes rank-4 (NCHW) convolutions only".into(),
            ));
        }
        if !input.is_contiguous() || !kernel.is_contiguous() || !output.is_contiguous() {
            return Err(BackendError::Unsupported(
                "cuda backend requires contiguous NCHW views".into(),
            ));
        }
        Ok(())
    }

    fn params(
        input: &TensorView,
        kernel: &TensorView,
        output: &TensorView,
        desc: &ConvDescriptor,
    ) -> ConvParams {
        let i = input.shape().dims();
        let k = kernel.shape().dims();
        let o = output.shape().dims();
        ConvParams {
            n: i[0] as i32,
            c: i[1] as i32,
            ih: i[2] as i32,
            iw: i[3] as i32,
            oc: k[0] as i32,
            kh: k[2] as i32,
            kw: k[3] as i32,
            oh: o[2] as i32,
            ow: o[3] as i32,
            ph: desc.pad()[0] as i32,
            pw: desc.pad()[1] as i32,
            sh: desc.stride()[0] as i32,
            sw: desc.stride()[1] as i32,
            dh: desc.dilation()[0] as i32,
            dw: desc.dilation()[1] as i32,
            flip: match desc.mode() {
                ConvMode::CrossCorrelation => 0,
                ConvMode::Convolution => 1,
            },
        }
    }

    /// Bytes of im2col expansion the GEMM family needs.
    fn im2col_bytes(
        input: &TensorView,
        kernel: &TensorView,
        output: &TensorView,
    ) -> usize {
        let i = input.shape().dims();
        let k = kernel.shape().dims();
        let o = output.shape().dims();
        let patch = i[1] * k[2] * k[3];
        let span = o[2] * o[3];
        i[0] * patch * span * 4
    }

    /// Algorithms this backend can actually run.
    fn supported(algo: ConvAlgorithm) -> bool {
        matches!(
            algo,
            ConvAlgorithm::ImplicitGemm
                | ConvAlgorithm::ImplicitPrecompGemm
                | ConvAlgorithm::Gemm
                | ConvAlgorithm::Direct
        )
    }

    #[allow(clippy::too_many_arguments)]
    fn launch_direct(
        &self,
        input: &TensorView,
        kernel: &TensorView,
        output: &TensorView,
        desc: &ConvDescriptor,
        alpha: f32,
        beta: f32,
    ) -> Result<(), BackendError> {
        let p = Self::params(input, kernel, output, desc);
        let total = output.numel();
        let f = get_or_load_func(&self.dev, "conv", "conv2d_direct_f32", CONV_CU, CONV_FUNCS)?;
        unsafe {
            f.launch(
                grid_1d(total, BLOCK_SIZE),
                (
                    input.ptr().addr(),
                    kernel.ptr().addr(),
                    output.ptr().addr(),
                    p,
                    alpha,
                    beta,
                ),
            )
            .map_err(|e| BackendError::Compute(format!("direct launch: {e}")))?;
        }
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    fn launch_gemm(
        &self,
        input: &TensorView,
        kernel: &TensorView,
        output: &TensorView,
        desc: &ConvDescriptor,
        alpha: f32,
        beta: f32,
        workspace: &Workspace,
    ) -> Result<(), BackendError> {
        let needed = Self::im2col_bytes(input, kernel, output);
        if workspace.len() < needed {
            return Err(BackendError::Compute(format!(
                "workspace too small: need {} bytes, have {}",
                needed,
                workspace.len()
            )));
        }
        let p = Self::params(input, kernel, output, desc);
        let cols = workspace.ptr().addr();

        let span = (p.oh * p.ow) as usize;
        let patch = (p.c * p.kh * p.kw) as usize;
        let n = p.n as usize;

        let im2col = get_or_load_func(&self.dev, "conv", "im2col_f32", CONV_CU, CONV_FUNCS)?;
        unsafe {
            im2col
                .launch(
                    grid_1d(n * patch * span, BLOCK_SIZE),
                    (input.ptr().addr(), cols, p),
                )
                .map_err(|e| BackendError::Compute(format!("im2col launch: {e}")))?;
        }

        let gemm = get_or_load_func(&self.dev, "conv", "conv_gemm_f32", CONV_CU, CONV_FUNCS)?;
        unsafe {
            gemm.launch(
                grid_1d(output.numel(), BLOCK_SIZE),
                (
                    kernel.ptr().addr(),
                    cols,
                    output.ptr().addr(),
                    p,
                    alpha,
                    beta,
                ),
            )
            .map_err(|e| BackendError::Compute(format!("gemm launch: {e}")))?;
        }
        Ok(())
    }
}

impl ConvBackend for CudaBackend {
    fn capabilities(&self) -> BackendCapabilities {
        self.caps
    }

    fn memory_info(&self) -> Result<MemoryInfo, BackendError> {
        let (free, total) = cudarc::driver::result::mem_get_info()
            .map_err(|e| BackendError::MemoryQuery(e.to_string()))?;
        Ok(MemoryInfo { free, total })
    }

    fn find_fastest(
        &self,
        input: &TensorView,
        kernel: &TensorView,
        output: &TensorView,
        desc: &ConvDescriptor,
    ) -> Result<ConvAlgorithm, BackendError> {
        self.check_supported(input, kernel, output, desc)
            .map_err(|e| BackendError::Search(e.to_string()))?;

        let candidates = [
            ConvAlgorithm::Direct,
            ConvAlgorithm::ImplicitGemm,
            ConvAlgorithm::ImplicitPrecompGemm,
        ];

        let mut best: Option<(ConvAlgorithm, f64)> = None;
        for algo in candidates {
            let nbytes = self.workspace_size(algo, input, kernel, output, desc)?;
            let scratch = if nbytes > 0 {
                let buf = self
                    .dev
                    .alloc_zeros::<u8>(nbytes)
                    .map_err(|e| BackendError::Search(format!("probe scratch: {e}")))?;
                let addr = *buf.device_ptr() as u64;
                Some((buf, Workspace::new(DevicePtr::new(addr), nbytes)))
            } else {
                None
            };

            self.dev
                .synchronize()
                .map_err(|e| BackendError::Search(e.to_string()))?;
            let start = Instant::now();
            self.convolve(
                algo,
                input,
                kernel,
                output,
                desc,
                1.0,
                0.0,
                scratch.as_ref().map(|(_, ws)| ws),
            )
            .map_err(|e| BackendError::Search(format!("probe of {algo}: {e}")))?;
            self.dev
                .synchronize()
                .map_err(|e| BackendError::Search(e.to_string()))?;
            let elapsed = start.elapsed().as_secs_f64();

            tracing::debug!("timed {algo}: {:.3} ms", elapsed * 1e3);
            if best.map_or(true, |(_, t)| elapsed < t) {
                best = Some((algo, elapsed));
            }
        }
        best.map(|(algo, _)| algo)
            .ok_or_else(|| BackendError::Search("no candidate could be timed".into()))
    }

    fn recommend(
        &self,
        input: &TensorView,
        kernel: &TensorView,
        output: &TensorView,
        desc: &ConvDescriptor,
        memory_ceiling: usize,
    ) -> Result<ConvAlgorithm, BackendError> {
        self.check_supported(input, kernel, output, desc)
            .map_err(|e| BackendError::Search(e.to_string()))?;
        // The GEMM expansion trades memory for speed; take it whenever
        // its workspace fits under the ceiling.
        let expanded = Self::im2col_bytes(input, kernel, output);
        if expanded <= memory_ceiling {
            Ok(ConvAlgorithm::ImplicitPrecompGemm)
        } else {
            Ok(ConvAlgorithm::ImplicitGemm)
        }
    }

    fn workspace_size(
        &self,
        algo: ConvAlgorithm,
        input: &TensorView,
        kernel: &TensorView,
        output: &TensorView,
        _desc: &ConvDescriptor,
    ) -> Result<usize, BackendError> {
        match algo {
            ConvAlgorithm::ImplicitGemm | ConvAlgorithm::Direct => Ok(0),
            ConvAlgorithm::ImplicitPrecompGemm | ConvAlgorithm::Gemm => {
                Ok(Self::im2col_bytes(input, kernel, output))
            }
            other => Err(BackendError::Unsupported(format!(
                "no {other} path in this backend"
            ))),
        }
    }

    fn alloc_like(&self, view: &TensorView) -> Result<TensorView, BackendError> {
        let buf = self
            .dev
            .alloc_zeros::<u8>(view.nbytes())
            .map_err(|e| BackendError::Alloc(e.to_string()))?;
        let addr = *buf.device_ptr() as u64;
        self.allocs.lock().insert(addr, buf);
        TensorView::new(
            DevicePtr::new(addr),
            view.shape().clone(),
            view.dtype(),
            view.device(),
        )
        .map_err(|e| BackendError::Alloc(e.to_string()))
    }

    fn copy_into(&self, src: &TensorView, dst: &TensorView) -> Result<(), BackendError> {
        if src.nbytes() != dst.nbytes() {
            return Err(BackendError::Copy(format!(
                "size mismatch: {} vs {} bytes",
                src.nbytes(),
                dst.nbytes()
            )));
        }
        unsafe {
            cudarc::driver::result::memcpy_dtod_sync(
                dst.ptr().addr(),
                src.ptr().addr(),
                src.nbytes(),
            )
            .map_err(|e| BackendError::Copy(e.to_string()))?;
        }
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
        workspace: Option<&Workspace>,
    ) -> Result<(), BackendError> {
        self.check_supported(input, kernel, output, desc)?;
        if !Self::supported(algo) {
            return Err(BackendError::Unsupported(format!(
                "no {algo} path in this backend"
            )));
        }
        match algo {
            ConvAlgorithm::ImplicitGemm | ConvAlgorithm::Direct => {
                self.launch_direct(input, kernel, output, desc, alpha, beta)
            }
            ConvAlgorithm::ImplicitPrecompGemm | ConvAlgorithm::Gemm => {
                let ws = workspace.ok_or_else(|| {
                    BackendError::Compute(format!("{algo} requires a workspace"))
                })?;
                self.launch_gemm(input, kernel, output, desc, alpha, beta, ws)
            }
            _ => unreachable!("filtered by supported()"),
        }
    }
}
