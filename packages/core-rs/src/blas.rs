use crate::device::{same_backend, DeviceHandle, DeviceRegion, GemmCall, GemmOperand};
use crate::error::{self, MatResult};
use crate::matrix::DenseMatrix;

/// Matrix-product context. Holds the resident all-ones vector that axis
/// sums multiply against, so reductions are bounded by its length.
#[derive(Debug)]
pub struct BlasContext {
    device: DeviceHandle,
    ones: DenseMatrix,
}

impl BlasContext {
    pub(crate) fn new(device: &DeviceHandle, max_ones: usize) -> MatResult<Self> {
        let mut ones = DenseMatrix::empty(device, max_ones, 1)
            .map_err(|err| error::blas(format!("ones vector allocation failed: {err}")))?;
        ones.assign(1.0f32)?;
        log::debug!("blas context ready with {max_ones} resident ones");
        Ok(Self {
            device: device.clone(),
            ones,
        })
    }

    pub fn device(&self) -> &DeviceHandle {
        &self.device
    }

    pub fn max_ones(&self) -> usize {
        self.ones.rows()
    }

    /// Leading `len` entries of the ones vector.
    pub(crate) fn ones(&self, len: usize) -> MatResult<DeviceRegion> {
        if len > self.max_ones() {
            return Err(error::dimension(format!(
                "reduction over {len} elements exceeds the {}-element ones vector",
                self.max_ones()
            )));
        }
        self.ones.region()?.narrow(0, len)
    }

    /// `target = beta * target + alpha * a * b` for raw operands.
    pub(crate) fn submit(
        &self,
        a: (&DeviceRegion, GemmOperand),
        b: (&DeviceRegion, GemmOperand),
        target: &DenseMatrix,
        alpha: f32,
        beta: f32,
    ) -> MatResult<()> {
        target.ensure_on_device()?;
        target.ensure_not_trans("product target")?;
        let backend = target.region()?.backend();
        if !same_backend(a.0.backend(), backend) || !same_backend(b.0.backend(), backend) {
            return Err(error::device("product operands live on different devices"));
        }
        let call = GemmCall {
            a: a.1,
            b: b.1,
            c: target.gemm_operand()?,
            alpha,
            beta,
        };
        backend.gemm(&call)
    }

    /// `a * b` scaled by `mult`, in a new matrix.
    pub fn dot(&self, a: &DenseMatrix, b: &DenseMatrix, mult: f32) -> MatResult<DenseMatrix> {
        let mut target = a.new_on_device(a.rows(), b.cols())?;
        self.dot_into(a, b, &mut target, 0.0, mult)?;
        Ok(target)
    }

    /// `target = beta * target + alpha * a * b`. Operands may be transposed
    /// aliases; the target may not.
    pub fn dot_into(
        &self,
        a: &DenseMatrix,
        b: &DenseMatrix,
        target: &mut DenseMatrix,
        beta: f32,
        alpha: f32,
    ) -> MatResult<()> {
        a.ensure_on_device()?;
        b.ensure_on_device()?;
        target.ensure_on_device()?;
        let (m, k) = a.shape();
        let (k2, n) = b.shape();
        if k != k2 || target.shape() != (m, n) {
            return Err(error::dimension(format!(
                "cannot multiply {m}x{k} by {k2}x{n} into {:?}",
                target.shape()
            )));
        }
        self.submit(
            (a.region()?, a.gemm_operand()?),
            (b.region()?, b.gemm_operand()?),
            target,
            alpha,
            beta,
        )
    }

    /// Inner product of two equally sized matrices taken as flat vectors.
    pub fn vdot(&self, a: &DenseMatrix, b: &DenseMatrix) -> MatResult<f32> {
        a.ensure_on_device()?;
        b.ensure_on_device()?;
        if a.len() != b.len() {
            return Err(error::dimension(format!(
                "vdot of {} and {} elements",
                a.len(),
                b.len()
            )));
        }
        let is_vector = |m: &DenseMatrix| m.rows() == 1 || m.cols() == 1;
        if a.is_trans() != b.is_trans() && !(is_vector(a) && is_vector(b)) {
            return Err(error::transpose_mismatch("vdot operands disagree on transposedness"));
        }
        let len = a.len();
        let a_region = a.region()?;
        let b_region = b.region()?;
        self.flat_product(
            (a_region, a_region.gemm_operand(len, 1, true)),
            (b_region, b_region.gemm_operand(len, 1, false)),
        )
    }

    fn flat_product(&self, a: (&DeviceRegion, GemmOperand), b: (&DeviceRegion, GemmOperand)) -> MatResult<f32> {
        let scratch = DenseMatrix::empty(&self.device, 1, 1)?;
        self.submit(a, b, &scratch, 1.0, 0.0)?;
        scratch.read_value(0, 0)
    }

    /// Sum of every element of `mat`.
    pub fn sum_all(&self, mat: &DenseMatrix) -> MatResult<f32> {
        mat.ensure_on_device()?;
        let len = mat.len();
        let ones = self.ones(len)?;
        let region = mat.region()?;
        self.flat_product(
            (region, region.gemm_operand(len, 1, true)),
            (&ones, ones.gemm_operand(len, 1, false)),
        )
    }
}

impl DenseMatrix {
    /// `self += mult * a * b`.
    pub fn add_dot(&mut self, blas: &BlasContext, a: &DenseMatrix, b: &DenseMatrix, mult: f32) -> MatResult<()> {
        blas.dot_into(a, b, self, 1.0, mult)
    }

    /// `self -= mult * a * b`.
    pub fn subtract_dot(&mut self, blas: &BlasContext, a: &DenseMatrix, b: &DenseMatrix, mult: f32) -> MatResult<()> {
        blas.dot_into(a, b, self, 1.0, -mult)
    }

    /// Euclidean norm of all elements.
    pub fn euclid_norm(&self, blas: &BlasContext) -> MatResult<f32> {
        Ok(blas.vdot(self, self)?.sqrt())
    }
}
