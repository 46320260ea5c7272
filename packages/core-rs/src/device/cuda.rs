use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use cudarc::cublas::sys::cublasOperation_t;
use cudarc::cublas::{CudaBlas, Gemm, GemmConfig};
use cudarc::driver::{CudaContext, CudaSlice, CudaStream};

use super::{staged_gemm, BackendKind, BufferId, DeviceBackend, GemmCall, GemmOperand};
use crate::error::{self, MatResult};
use crate::metrics;

const F32_BYTES: usize = std::mem::size_of::<f32>();

/// NVIDIA device driven through cudarc. Buffers live in device memory;
/// matrix products go to cuBLAS, everything else is staged through the
/// host kernels.
pub struct CudaDevice {
    ordinal: usize,
    stream: Arc<CudaStream>,
    blas: Mutex<CudaBlas>,
    next_id: AtomicU64,
    live_bytes: AtomicUsize,
    buffers: Mutex<HashMap<BufferId, CudaSlice<f32>>>,
}

impl std::fmt::Debug for CudaDevice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CudaDevice")
            .field("ordinal", &self.ordinal)
            .field("live_bytes", &self.live_bytes.load(Ordering::Relaxed))
            .finish()
    }
}

fn cuda_error(context: &str, err: impl std::fmt::Debug) -> error::MatError {
    error::device(format!("CUDA error: {context}: {err:?}"))
}

impl CudaDevice {
    pub fn new(ordinal: usize) -> MatResult<Self> {
        let ctx = CudaContext::new(ordinal)
            .map_err(|e| error::device_select(format!("cuda device {ordinal}: {e:?}")))?;
        let stream = ctx.default_stream();
        let blas = CudaBlas::new(stream.clone()).map_err(|e| error::blas(format!("cublas: {e:?}")))?;
        Ok(Self {
            ordinal,
            stream,
            blas: Mutex::new(blas),
            next_id: AtomicU64::new(1),
            live_bytes: AtomicUsize::new(0),
            buffers: Mutex::new(HashMap::new()),
        })
    }

    fn registry(&self) -> MatResult<MutexGuard<'_, HashMap<BufferId, CudaSlice<f32>>>> {
        self.buffers
            .lock()
            .map_err(|_| error::device("cuda buffer registry poisoned"))
    }
}

fn check_window(len: usize, offset: usize, count: usize, id: BufferId) -> MatResult<std::ops::Range<usize>> {
    match offset.checked_add(count) {
        Some(end) if end <= len => Ok(offset..end),
        _ => Err(error::device(format!(
            "access {offset}+{count} outside buffer {id} of {len} elements"
        ))),
    }
}

fn to_i32(value: usize) -> MatResult<i32> {
    i32::try_from(value).map_err(|_| error::blas("gemm dims exceed i32"))
}

fn op(trans: bool) -> cublasOperation_t {
    if trans {
        cublasOperation_t::CUBLAS_OP_T
    } else {
        cublasOperation_t::CUBLAS_OP_N
    }
}

/// Column-major config: leading dimensions are the stored row counts.
fn gemm_config(call: &GemmCall) -> MatResult<GemmConfig<f32>> {
    let (m, k) = logical(&call.a);
    let (_, n) = logical(&call.b);
    Ok(GemmConfig {
        transa: op(call.a.trans),
        transb: op(call.b.trans),
        m: to_i32(m)?,
        n: to_i32(n)?,
        k: to_i32(k)?,
        alpha: call.alpha,
        lda: to_i32(call.a.rows.max(1))?,
        ldb: to_i32(call.b.rows.max(1))?,
        beta: call.beta,
        ldc: to_i32(call.c.rows.max(1))?,
    })
}

fn logical(operand: &GemmOperand) -> (usize, usize) {
    if operand.trans {
        (operand.cols, operand.rows)
    } else {
        (operand.rows, operand.cols)
    }
}

impl DeviceBackend for CudaDevice {
    fn kind(&self) -> BackendKind {
        BackendKind::Cuda
    }

    fn ordinal(&self) -> usize {
        self.ordinal
    }

    fn name(&self) -> String {
        format!("cuda:{}", self.ordinal)
    }

    fn allocate(&self, len: usize) -> MatResult<BufferId> {
        let slice = self
            .stream
            .alloc_zeros::<f32>(len.max(1))
            .map_err(|e| cuda_error("alloc", e))?;
        let bytes = slice.len() * F32_BYTES;
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.registry()?.insert(id, slice);
        self.live_bytes.fetch_add(bytes, Ordering::Relaxed);
        Ok(id)
    }

    fn free(&self, id: BufferId) {
        if let Ok(mut map) = self.buffers.lock() {
            if let Some(slice) = map.remove(&id) {
                self.live_bytes
                    .fetch_sub(slice.len() * F32_BYTES, Ordering::Relaxed);
            }
        }
    }

    fn upload(&self, id: BufferId, offset: usize, src: &[f32]) -> MatResult<()> {
        let mut map = self.registry()?;
        let slice = map
            .get_mut(&id)
            .ok_or_else(|| error::device(format!("unknown buffer {id}")))?;
        let range = check_window(slice.len(), offset, src.len(), id)?;
        let mut dst = slice.slice_mut(range);
        self.stream
            .memcpy_htod(src, &mut dst)
            .map_err(|e| cuda_error("htod", e))?;
        metrics::record_upload(src.len() * F32_BYTES);
        Ok(())
    }

    fn download(&self, id: BufferId, offset: usize, dst: &mut [f32]) -> MatResult<()> {
        let map = self.registry()?;
        let slice = map
            .get(&id)
            .ok_or_else(|| error::device(format!("unknown buffer {id}")))?;
        let range = check_window(slice.len(), offset, dst.len(), id)?;
        let src = slice.slice(range);
        self.stream
            .memcpy_dtoh(&src, dst)
            .map_err(|e| cuda_error("dtoh", e))?;
        metrics::record_download(dst.len() * F32_BYTES);
        Ok(())
    }

    fn copy_device(
        &self,
        src: BufferId,
        src_offset: usize,
        dst: BufferId,
        dst_offset: usize,
        len: usize,
    ) -> MatResult<()> {
        if src == dst {
            // overlapping windows of one allocation go through the host
            let mut staging = vec![0.0f32; len];
            self.download(src, src_offset, &mut staging)?;
            return self.upload(dst, dst_offset, &staging);
        }
        let mut map = self.registry()?;
        let mut target = map
            .remove(&dst)
            .ok_or_else(|| error::device(format!("unknown buffer {dst}")))?;
        let result = (|| {
            let source = map
                .get(&src)
                .ok_or_else(|| error::device(format!("unknown buffer {src}")))?;
            let from = check_window(source.len(), src_offset, len, src)?;
            let to = check_window(target.len(), dst_offset, len, dst)?;
            let mut dst_view = target.slice_mut(to);
            self.stream
                .memcpy_dtod(&source.slice(from), &mut dst_view)
                .map_err(|e| cuda_error("dtod", e))
        })();
        map.insert(dst, target);
        result?;
        metrics::record_device_copy(len * F32_BYTES);
        Ok(())
    }

    fn gemm(&self, call: &GemmCall) -> MatResult<()> {
        if call.c.buffer == call.a.buffer || call.c.buffer == call.b.buffer {
            log::warn!("gemm target aliases an operand; staging through host");
            return staged_gemm(self, call);
        }
        if call.c.is_empty() {
            return Ok(());
        }
        let cfg = gemm_config(call)?;
        let mut map = self.registry()?;
        let mut c = map
            .remove(&call.c.buffer)
            .ok_or_else(|| error::device(format!("unknown buffer {}", call.c.buffer)))?;
        let result = (|| {
            let a = map
                .get(&call.a.buffer)
                .ok_or_else(|| error::device(format!("unknown buffer {}", call.a.buffer)))?;
            let b = map
                .get(&call.b.buffer)
                .ok_or_else(|| error::device(format!("unknown buffer {}", call.b.buffer)))?;
            let a_view = a.slice(check_window(a.len(), call.a.offset, call.a.len(), call.a.buffer)?);
            let b_view = b.slice(check_window(b.len(), call.b.offset, call.b.len(), call.b.buffer)?);
            let c_range = check_window(c.len(), call.c.offset, call.c.len(), call.c.buffer)?;
            let mut c_view = c.slice_mut(c_range);
            let blas = self
                .blas
                .lock()
                .map_err(|_| error::blas("cublas handle poisoned"))?;
            unsafe { blas.gemm(cfg, &a_view, &b_view, &mut c_view) }
                .map_err(|e| error::blas(format!("sgemm: {e:?}")))
        })();
        map.insert(call.c.buffer, c);
        result
    }

    fn synchronize(&self) -> MatResult<()> {
        self.stream
            .synchronize()
            .map_err(|e| cuda_error("synchronize", e))
    }

    fn live_bytes(&self) -> usize {
        self.live_bytes.load(Ordering::Relaxed)
    }
}
