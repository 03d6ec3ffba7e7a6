//! Recycling workspace pool over CUDA device memory.
//!
//! The pool owns every buffer it hands out. Acquire reuses the
//! smallest retired buffer that fits before allocating a new one;
//! `reclaim` retires all lent buffers once the device work consuming
//! them has synchronized.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use cudarc::driver::{CudaDevice, CudaSlice, DevicePtr as _, DeviceSlice};
use parking_lot::Mutex;

use sable_core::DevicePtr;

use crate::{MemoryPool, Workspace};

struct PoolState {
    /// Retired buffers by capacity, ready for reuse.
    free: BTreeMap<usize, Vec<CudaSlice<u8>>>,
    /// Buffers currently lent out, keyed by device address.
    lent: HashMap<u64, CudaSlice<u8>>,
}

pub struct CudaMemoryPool {
    dev: Arc<CudaDevice>,
    state: Mutex<PoolState>,
}

impl CudaMemoryPool {
    pub fn new(dev: Arc<CudaDevice>) -> Self {
        Self {
            dev,
            state: Mutex::new(PoolState {
                free: BTreeMap::new(),
                lent: HashMap::new(),
            }),
        }
    }

    /// Retire every lent buffer back into the free list.
    ///
    /// Callers must only do this after synchronizing the device work
    /// that consumed the buffers.
    pub fn reclaim(&self) {
        let mut state = self.state.lock();
        let lent: Vec<CudaSlice<u8>> = state.lent.drain().map(|(_, buf)| buf).collect();
        for buf in lent {
            state.free.entry(buf.len()).or_default().push(buf);
        }
    }

    /// Number of buffers currently lent out.
    pub fn lent_count(&self) -> usize {
        self.state.lock().lent.len()
    }
}

impl MemoryPool for CudaMemoryPool {
    fn acquire(&self, nbytes: usize) -> Option<Workspace> {
        let mut state = self.state.lock();

        // Smallest retired buffer that fits, if any.
        let reuse_cap = state
            .free
            .range(nbytes..)
            .next()
            .map(|(&cap, _)| cap);
        let buf = match reuse_cap {
            Some(cap) => {
                let bucket = state.free.get_mut(&cap).expect("bucket exists");
                let buf = bucket.pop().expect("bucket non-empty");
                if bucket.is_empty() {
                    state.free.remove(&cap);
                }
                buf
            }
            None => {
                tracing::debug!("cuda pool: allocating {nbytes} byte workspace");
                self.dev.alloc_zeros::<u8>(nbytes).ok()?
            }
        };

        let addr = *buf.device_ptr() as u64;
        state.lent.insert(addr, buf);
        Some(Workspace::new(DevicePtr::new(addr), nbytes))
    }
}
