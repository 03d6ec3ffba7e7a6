//! CUDA device context management.
//!
//! Lazy-initialized singleton `CudaDevice` handles per GPU index, via
//! `cudarc`'s safe driver API wrappers.

use std::collections::HashMap;
use std::sync::{Arc, OnceLock};

use cudarc::driver::{CudaDevice, CudaFunction};
use parking_lot::Mutex;

use crate::BackendError;

/// Global registry of CUDA device handles, one per GPU index.
static DEVICES: OnceLock<Mutex<HashMap<usize, Arc<CudaDevice>>>> = OnceLock::new();

fn devices() -> &'static Mutex<HashMap<usize, Arc<CudaDevice>>> {
    DEVICES.get_or_init(|| Mutex::new(HashMap::new()))
}

/// Get or create the CUDA device handle for the given GPU index.
///
/// Initialized on first access and cached for reuse.
pub fn get_device(device_idx: usize) -> Result<Arc<CudaDevice>, BackendError> {
    let mut map = devices().lock();
    if let Some(dev) = map.get(&device_idx) {
        return Ok(Arc::clone(dev));
    }
    let dev = CudaDevice::new(device_idx)
        .map_err(|e| BackendError::Device(format!("device {device_idx}: {e}")))?;
    map.insert(device_idx, Arc::clone(&dev));
    Ok(dev)
}

/// Get a kernel function handle, compiling and loading the module on
/// first use.
pub fn get_or_load_func(
    dev: &Arc<CudaDevice>,
    module_name: &str,
    func_name: &str,
    cu_source: &str,
    func_names: &[&'static str],
) -> Result<CudaFunction, BackendError> {
    // Fast path: module already loaded on this device.
    if let Some(f) = dev.get_func(module_name, func_name) {
        return Ok(f);
    }
    let ptx = cudarc::nvrtc::compile_ptx(cu_source)
        .map_err(|e| BackendError::Device(format!("PTX compile '{module_name}': {e}")))?;
    dev.load_ptx(ptx, module_name, func_names)
        .map_err(|e| BackendError::Device(format!("load module '{module_name}': {e}")))?;
    dev.get_func(module_name, func_name).ok_or_else(|| {
        BackendError::Device(format!("func '{func_name}' not found in '{module_name}'"))
    })
}

/// Whether any CUDA device is available.
pub fn is_cuda_available() -> bool {
    CudaDevice::new(0).is_ok()
}
