//! Accelerator abstraction. A backend owns raw `f32` buffers addressed by
//! [`BufferId`]; matrices reach them through reference-counted
//! [`DeviceAllocation`]s so that views and slices keep the memory alive.

use std::fmt;
use std::sync::Arc;

use ndarray::ShapeBuilder;

use crate::config::EngineConfig;
use crate::error::{self, MatResult};
use crate::kernels;

#[cfg(feature = "gpu-cuda")]
mod cuda;
mod host;

#[cfg(feature = "gpu-cuda")]
pub use cuda::CudaDevice;
pub use host::InProcessDevice;

pub type BufferId = u64;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BackendKind {
    /// Device memory emulated by a host-side registry.
    InProcess,
    Cuda,
}

impl BackendKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackendKind::InProcess => "inprocess",
            BackendKind::Cuda => "cuda",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.to_ascii_lowercase().as_str() {
            "inprocess" | "in-process" | "host" => Some(BackendKind::InProcess),
            "cuda" => Some(BackendKind::Cuda),
            _ => None,
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One column-major operand of a device matrix product. `rows`/`cols` are
/// the stored extents; `trans` asks the kernel to read it transposed.
#[derive(Clone, Copy, Debug)]
pub struct GemmOperand {
    pub buffer: BufferId,
    pub offset: usize,
    pub rows: usize,
    pub cols: usize,
    pub trans: bool,
}

impl GemmOperand {
    pub fn len(&self) -> usize {
        self.rows * self.cols
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn logical_shape(&self) -> (usize, usize) {
        if self.trans {
            (self.cols, self.rows)
        } else {
            (self.rows, self.cols)
        }
    }
}

/// `c = alpha * op(a) * op(b) + beta * c` where `c` is never transposed.
/// With `beta == 0` the previous contents of `c` are ignored.
#[derive(Clone, Copy, Debug)]
pub struct GemmCall {
    pub a: GemmOperand,
    pub b: GemmOperand,
    pub c: GemmOperand,
    pub alpha: f32,
    pub beta: f32,
}

pub trait DeviceBackend: Send + Sync + fmt::Debug {
    fn kind(&self) -> BackendKind;

    fn ordinal(&self) -> usize;

    fn name(&self) -> String;

    /// Allocates `len` zero-initialised elements.
    fn allocate(&self, len: usize) -> MatResult<BufferId>;

    /// Releases a buffer. Unknown ids are ignored.
    fn free(&self, id: BufferId);

    fn upload(&self, id: BufferId, offset: usize, src: &[f32]) -> MatResult<()>;

    fn download(&self, id: BufferId, offset: usize, dst: &mut [f32]) -> MatResult<()>;

    fn copy_device(
        &self,
        src: BufferId,
        src_offset: usize,
        dst: BufferId,
        dst_offset: usize,
        len: usize,
    ) -> MatResult<()> {
        let mut staging = vec![0.0f32; len];
        self.download(src, src_offset, &mut staging)?;
        self.upload(dst, dst_offset, &staging)
    }

    fn gemm(&self, call: &GemmCall) -> MatResult<()> {
        staged_gemm(self, call)
    }

    fn synchronize(&self) -> MatResult<()> {
        Ok(())
    }

    /// Bytes currently held by live buffers.
    fn live_bytes(&self) -> usize;
}

/// Runs a product on the host: operands are downloaded, multiplied with
/// ndarray and the result uploaded into `c`.
pub(crate) fn staged_gemm<B: DeviceBackend + ?Sized>(backend: &B, call: &GemmCall) -> MatResult<()> {
    let (m, k) = call.a.logical_shape();
    let (k2, n) = call.b.logical_shape();
    if k != k2 || call.c.rows != m || call.c.cols != n || call.c.trans {
        return Err(error::dimension(format!(
            "gemm operands ({m}x{k}) * ({k2}x{n}) do not fit target {}x{}",
            call.c.rows, call.c.cols
        )));
    }
    let a = download_operand(backend, &call.a)?;
    let b = download_operand(backend, &call.b)?;
    let mut c = if call.beta == 0.0 {
        ndarray::Array2::<f32>::zeros((m, n).f())
    } else {
        download_operand(backend, &call.c)?
    };
    kernels::gemm(call.alpha, &a.view(), &b.view(), call.beta, &mut c.view_mut());
    let flat: Vec<f32> = c.t().iter().copied().collect();
    backend.upload(call.c.buffer, call.c.offset, &flat)
}

fn download_operand<B: DeviceBackend + ?Sized>(
    backend: &B,
    operand: &GemmOperand,
) -> MatResult<ndarray::Array2<f32>> {
    let mut values = vec![0.0f32; operand.len()];
    backend.download(operand.buffer, operand.offset, &mut values)?;
    let stored = ndarray::Array2::from_shape_vec((operand.rows, operand.cols).f(), values)
        .map_err(|err| error::shape(err.to_string()))?;
    Ok(if operand.trans {
        stored.reversed_axes()
    } else {
        stored
    })
}

/// A backend buffer that is freed when the last matrix referencing it
/// goes away.
pub struct DeviceAllocation {
    backend: Arc<dyn DeviceBackend>,
    id: BufferId,
    len: usize,
}

impl DeviceAllocation {
    pub fn id(&self) -> BufferId {
        self.id
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

impl fmt::Debug for DeviceAllocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceAllocation")
            .field("backend", &self.backend.name())
            .field("id", &self.id)
            .field("len", &self.len)
            .finish()
    }
}

impl Drop for DeviceAllocation {
    fn drop(&mut self) {
        log::debug!(
            "freeing buffer {} ({} elements) on {}",
            self.id,
            self.len,
            self.backend.name()
        );
        self.backend.free(self.id);
    }
}

/// A contiguous window `[offset, offset + len)` of an allocation.
#[derive(Clone, Debug)]
pub struct DeviceRegion {
    alloc: Arc<DeviceAllocation>,
    offset: usize,
    len: usize,
}

impl DeviceRegion {
    pub fn whole(alloc: Arc<DeviceAllocation>) -> Self {
        let len = alloc.len;
        Self {
            alloc,
            offset: 0,
            len,
        }
    }

    pub fn buffer(&self) -> BufferId {
        self.alloc.id
    }

    pub fn offset(&self) -> usize {
        self.offset
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn backend(&self) -> &Arc<dyn DeviceBackend> {
        &self.alloc.backend
    }

    /// Sub-window starting `start` elements in.
    pub fn narrow(&self, start: usize, len: usize) -> MatResult<Self> {
        if start + len > self.len {
            return Err(error::shape(format!(
                "region window {start}+{len} exceeds {} elements",
                self.len
            )));
        }
        Ok(Self {
            alloc: Arc::clone(&self.alloc),
            offset: self.offset + start,
            len,
        })
    }

    pub fn shares_allocation(&self, other: &DeviceRegion) -> bool {
        Arc::ptr_eq(&self.alloc, &other.alloc)
    }

    pub fn read(&self) -> MatResult<Vec<f32>> {
        let mut out = vec![0.0f32; self.len];
        self.read_into(&mut out)?;
        Ok(out)
    }

    pub fn read_into(&self, dst: &mut [f32]) -> MatResult<()> {
        if dst.len() != self.len {
            return Err(error::shape(format!(
                "download of {} elements into buffer of {}",
                self.len,
                dst.len()
            )));
        }
        if dst.is_empty() {
            return Ok(());
        }
        log::trace!("download {} floats from buffer {}", self.len, self.alloc.id);
        self.alloc.backend.download(self.alloc.id, self.offset, dst)
    }

    pub fn write(&self, src: &[f32]) -> MatResult<()> {
        if src.len() != self.len {
            return Err(error::shape(format!(
                "upload of {} elements into region of {}",
                src.len(),
                self.len
            )));
        }
        if src.is_empty() {
            return Ok(());
        }
        log::trace!("upload {} floats to buffer {}", self.len, self.alloc.id);
        self.alloc.backend.upload(self.alloc.id, self.offset, src)
    }

    pub fn copy_from(&self, src: &DeviceRegion) -> MatResult<()> {
        if src.len != self.len {
            return Err(error::dimension(format!(
                "device copy of {} elements into region of {}",
                src.len, self.len
            )));
        }
        if self.len == 0 {
            return Ok(());
        }
        if !same_backend(src.backend(), self.backend()) {
            let values = src.read()?;
            return self.write(&values);
        }
        self.alloc.backend.copy_device(
            src.alloc.id,
            src.offset,
            self.alloc.id,
            self.offset,
            self.len,
        )
    }

    pub(crate) fn gemm_operand(&self, rows: usize, cols: usize, trans: bool) -> GemmOperand {
        GemmOperand {
            buffer: self.alloc.id,
            offset: self.offset,
            rows,
            cols,
            trans,
        }
    }
}

pub(crate) fn same_backend(a: &Arc<dyn DeviceBackend>, b: &Arc<dyn DeviceBackend>) -> bool {
    std::ptr::eq(
        Arc::as_ptr(a) as *const (),
        Arc::as_ptr(b) as *const (),
    )
}

/// Cheap, cloneable reference to the selected device.
#[derive(Clone, Debug)]
pub struct DeviceHandle {
    backend: Arc<dyn DeviceBackend>,
}

impl DeviceHandle {
    pub fn new(backend: Arc<dyn DeviceBackend>) -> Self {
        Self { backend }
    }

    /// Opens the backend named by `config` at `ordinal`.
    pub fn select(config: &EngineConfig, ordinal: usize) -> MatResult<Self> {
        let backend: Arc<dyn DeviceBackend> = match config.backend {
            BackendKind::InProcess => {
                if ordinal >= config.device_count {
                    return Err(error::device_select(format!(
                        "device ordinal {ordinal} out of range (0..{})",
                        config.device_count
                    )));
                }
                Arc::new(InProcessDevice::new(ordinal, config.memory_limit))
            }
            BackendKind::Cuda => open_cuda(ordinal)?,
        };
        log::info!("selected device {} ({})", ordinal, backend.name());
        Ok(Self { backend })
    }

    pub fn backend(&self) -> &Arc<dyn DeviceBackend> {
        &self.backend
    }

    pub fn kind(&self) -> BackendKind {
        self.backend.kind()
    }

    pub fn ordinal(&self) -> usize {
        self.backend.ordinal()
    }

    pub fn live_bytes(&self) -> usize {
        self.backend.live_bytes()
    }

    pub fn synchronize(&self) -> MatResult<()> {
        self.backend.synchronize()
    }

    pub fn allocate(&self, len: usize) -> MatResult<DeviceRegion> {
        let id = self.backend.allocate(len)?;
        log::debug!("allocated buffer {id} ({len} floats) on {}", self.backend.name());
        let alloc = Arc::new(DeviceAllocation {
            backend: Arc::clone(&self.backend),
            id,
            len,
        });
        Ok(DeviceRegion::whole(alloc))
    }

    pub fn same_device(&self, other: &DeviceHandle) -> bool {
        same_backend(&self.backend, &other.backend)
    }
}

#[cfg(feature = "gpu-cuda")]
fn open_cuda(ordinal: usize) -> MatResult<Arc<dyn DeviceBackend>> {
    Ok(Arc::new(CudaDevice::new(ordinal)?))
}

#[cfg(not(feature = "gpu-cuda"))]
fn open_cuda(ordinal: usize) -> MatResult<Arc<dyn DeviceBackend>> {
    Err(error::device_select(format!(
        "cuda device {ordinal} requested but the gpu-cuda feature is disabled"
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn handle() -> DeviceHandle {
        DeviceHandle::select(&EngineConfig::default(), 0).unwrap()
    }

    #[test]
    fn backend_kind_parses_aliases() {
        assert_eq!(BackendKind::parse("HOST"), Some(BackendKind::InProcess));
        assert_eq!(BackendKind::parse("cuda"), Some(BackendKind::Cuda));
        assert_eq!(BackendKind::parse("metal"), None);
    }

    #[test]
    fn allocation_is_freed_with_last_region() {
        let device = handle();
        let region = device.allocate(16).unwrap();
        let window = region.narrow(4, 8).unwrap();
        assert_eq!(device.live_bytes(), 64);
        drop(region);
        assert_eq!(device.live_bytes(), 64);
        drop(window);
        assert_eq!(device.live_bytes(), 0);
    }

    #[test]
    fn narrow_rejects_out_of_range_window() {
        let device = handle();
        let region = device.allocate(4).unwrap();
        let err = region.narrow(2, 3).unwrap_err();
        assert_eq!(err.kind(), error::ErrorKind::Shape);
    }

    #[test]
    fn invalid_ordinal_is_a_selection_error() {
        let err = DeviceHandle::select(&EngineConfig::default(), 3).unwrap_err();
        assert_eq!(err.kind(), error::ErrorKind::DeviceSelect);
    }

    #[test]
    fn staged_gemm_honours_transpose_flags() {
        let device = handle();
        // a stored 3x2 column-major, read transposed as 2x3
        let a = device.allocate(6).unwrap();
        a.write(&[1.0, 2.0, 3.0, 4.0, 5.0, 6.0]).unwrap();
        let b = device.allocate(3).unwrap();
        b.write(&[1.0, 1.0, 1.0]).unwrap();
        let c = device.allocate(2).unwrap();
        let call = GemmCall {
            a: a.gemm_operand(3, 2, true),
            b: b.gemm_operand(3, 1, false),
            c: c.gemm_operand(2, 1, false),
            alpha: 1.0,
            beta: 0.0,
        };
        device.backend().gemm(&call).unwrap();
        assert_eq!(c.read().unwrap(), vec![6.0, 15.0]);
    }
}
