use ndarray::{ArrayBase, Data, Ix2};

use crate::blas::BlasContext;
use crate::config::EngineConfig;
use crate::device::DeviceHandle;
use crate::error::{self, MatResult};
use crate::matrix::DenseMatrix;
use crate::random::RandomStreamPool;
use crate::sparse::SparseMatrix;

/// Process context: the selected device, the matrix-product context and
/// the random stream pool. Matrices are created through it and carry a
/// handle to the device they were allocated on.
#[derive(Debug)]
pub struct Engine {
    config: EngineConfig,
    device: DeviceHandle,
    blas: Option<BlasContext>,
    rng: Option<RandomStreamPool>,
    blas_shut_down: bool,
}

impl Engine {
    pub fn new(config: EngineConfig) -> MatResult<Self> {
        crate::threading::ensure_rayon_pool();
        let device = DeviceHandle::select(&config, config.device_ordinal)?;
        Ok(Self {
            config,
            device,
            blas: None,
            rng: None,
            blas_shut_down: false,
        })
    }

    /// Engine configured from `GPUMAT_*` environment variables.
    pub fn from_env() -> MatResult<Self> {
        Self::new(EngineConfig::from_env())
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn device(&self) -> &DeviceHandle {
        &self.device
    }

    /// Switches to another device ordinal. Matrices created earlier stay
    /// bound to their own device; an initialised product context is
    /// rebuilt on the new one.
    pub fn set_device(&mut self, ordinal: usize) -> MatResult<()> {
        let device = DeviceHandle::select(&self.config, ordinal)?;
        self.config.device_ordinal = ordinal;
        self.device = device;
        if self.blas.is_some() {
            self.blas = Some(BlasContext::new(&self.device, self.config.max_ones)?);
        }
        Ok(())
    }

    pub fn init_blas(&mut self) -> MatResult<()> {
        if self.blas.is_some() {
            log::debug!("blas context already initialised");
            return Ok(());
        }
        self.blas = Some(BlasContext::new(&self.device, self.config.max_ones)?);
        self.blas_shut_down = false;
        log::info!("blas context initialised on device {}", self.device.ordinal());
        Ok(())
    }

    pub fn blas(&self) -> MatResult<&BlasContext> {
        self.blas
            .as_ref()
            .ok_or_else(|| error::blas("blas context is not initialised"))
    }

    /// Releases the product context. A second call without re-init fails.
    pub fn shutdown(&mut self) -> MatResult<()> {
        match self.blas.take() {
            Some(_) => {
                self.blas_shut_down = true;
                log::info!("blas context shut down");
                Ok(())
            }
            None if self.blas_shut_down => Err(error::blas("blas context already shut down")),
            None => Err(error::blas("blas context was never initialised")),
        }
    }

    /// Seeds the random stream pool. Seeding happens once per engine.
    pub fn init_random(&mut self, seed: u32) -> MatResult<()> {
        if self.rng.is_some() {
            return Err(error::unsupported("random stream pool is already seeded"));
        }
        log::info!(
            "seeding {} random streams with {seed}",
            self.config.rng_streams
        );
        self.rng = Some(RandomStreamPool::seeded(seed, self.config.rng_streams));
        Ok(())
    }

    pub fn rng(&mut self) -> MatResult<&mut RandomStreamPool> {
        self.rng
            .as_mut()
            .ok_or_else(|| error::rng_not_initialized("call init_random before sampling"))
    }

    /// Blocks until queued device work completes.
    pub fn synchronize(&self) -> MatResult<()> {
        self.device.synchronize()
    }

    pub fn empty(&self, rows: usize, cols: usize) -> MatResult<DenseMatrix> {
        DenseMatrix::empty(&self.device, rows, cols)
    }

    pub fn zeros(&self, rows: usize, cols: usize) -> MatResult<DenseMatrix> {
        DenseMatrix::zeros(&self.device, rows, cols)
    }

    /// Column-major host buffer, uploaded immediately.
    pub fn from_host(&self, data: Vec<f32>, rows: usize, cols: usize) -> MatResult<DenseMatrix> {
        let mut mat = DenseMatrix::from_host(&self.device, data, rows, cols)?;
        mat.copy_to_device()?;
        Ok(mat)
    }

    pub fn from_row_major(&self, data: &[f32], rows: usize, cols: usize) -> MatResult<DenseMatrix> {
        let mut mat = DenseMatrix::from_row_major(&self.device, data, rows, cols)?;
        mat.copy_to_device()?;
        Ok(mat)
    }

    pub fn from_array<S>(&self, array: &ArrayBase<S, Ix2>) -> MatResult<DenseMatrix>
    where
        S: Data<Elem = f32>,
    {
        let mut mat = DenseMatrix::from_array(&self.device, array)?;
        mat.copy_to_device()?;
        Ok(mat)
    }

    pub fn sparse_from_csr(
        &self,
        data: Vec<f32>,
        indices: Vec<i32>,
        indptr: Vec<i32>,
        rows: usize,
        cols: usize,
    ) -> MatResult<SparseMatrix> {
        let mut mat = SparseMatrix::from_csr(&self.device, data, indices, indptr, rows, cols)?;
        mat.copy_to_device()?;
        Ok(mat)
    }
}
