//! Compressed-row sparse matrices and the sparse-times-dense product.
//! Index arrays travel to the device bit-cast into `f32` buffers so that
//! every backend only ever manages one element type.

use ndarray::{Array2, ArrayView2};

use crate::device::{DeviceHandle, DeviceRegion};
use crate::error::{self, MatResult};
use crate::matrix::DenseMatrix;

#[cfg(feature = "sparse-native")]
mod sprs;
#[cfg(feature = "sparse-native")]
use self::sprs::SprsBackend;

/// Backend contract for CSR products.
pub trait SparseBackend {
    fn name(&self) -> &'static str;

    /// `csr * dense` with logical shapes.
    fn csrmm(&self, csr: &CsrMatrixView<'_>, dense: ArrayView2<'_, f32>) -> MatResult<Array2<f32>>;
}

struct FallbackBackend;

impl SparseBackend for FallbackBackend {
    fn name(&self) -> &'static str {
        "fallback"
    }

    fn csrmm(&self, csr: &CsrMatrixView<'_>, dense: ArrayView2<'_, f32>) -> MatResult<Array2<f32>> {
        check_product(csr, &dense)?;
        let mut out = Array2::<f32>::zeros((csr.rows, dense.ncols()));
        for row in 0..csr.rows {
            let start = csr.indptr[row] as usize;
            let end = csr.indptr[row + 1] as usize;
            let mut out_row = out.row_mut(row);
            for k in start..end {
                let col = csr.indices[k] as usize;
                out_row.scaled_add(csr.data[k], &dense.row(col));
            }
        }
        Ok(out)
    }
}

fn check_product(csr: &CsrMatrixView<'_>, dense: &ArrayView2<'_, f32>) -> MatResult<()> {
    if csr.cols != dense.nrows() {
        return Err(error::dimension(format!(
            "cannot multiply sparse {}x{} by dense {}x{}",
            csr.rows,
            csr.cols,
            dense.nrows(),
            dense.ncols()
        )));
    }
    Ok(())
}

/// Borrowed, validated CSR arrays.
#[derive(Clone, Copy, Debug)]
pub struct CsrMatrixView<'a> {
    rows: usize,
    cols: usize,
    indptr: &'a [i32],
    indices: &'a [i32],
    data: &'a [f32],
}

impl<'a> CsrMatrixView<'a> {
    pub fn new(
        rows: usize,
        cols: usize,
        indptr: &'a [i32],
        indices: &'a [i32],
        data: &'a [f32],
    ) -> MatResult<Self> {
        let view = CsrMatrixView {
            rows,
            cols,
            indptr,
            indices,
            data,
        };
        view.validate()?;
        Ok(view)
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    pub fn nnz(&self) -> usize {
        self.data.len()
    }

    pub fn indptr(&self) -> &'a [i32] {
        self.indptr
    }

    pub fn indices(&self) -> &'a [i32] {
        self.indices
    }

    pub fn data(&self) -> &'a [f32] {
        self.data
    }

    pub fn to_dense(&self) -> Array2<f32> {
        let mut dense = Array2::<f32>::zeros((self.rows, self.cols));
        for row in 0..self.rows {
            let start = self.indptr[row] as usize;
            let end = self.indptr[row + 1] as usize;
            for k in start..end {
                dense[[row, self.indices[k] as usize]] += self.data[k];
            }
        }
        dense
    }

    fn validate(&self) -> MatResult<()> {
        if self.indptr.len() != self.rows + 1 {
            return Err(error::shape("CSR indptr length must equal rows + 1"));
        }
        if self.indptr[0] != 0 {
            return Err(error::shape("CSR indptr must start at 0"));
        }
        let mut prev = 0i32;
        for &value in self.indptr {
            if value < prev {
                return Err(error::shape("CSR indptr must be non-decreasing"));
            }
            prev = value;
        }
        let nnz = prev as usize;
        if self.indices.len() != nnz || self.data.len() != nnz {
            return Err(error::shape(format!(
                "CSR arrays disagree on nnz: indptr says {nnz}, indices {}, data {}",
                self.indices.len(),
                self.data.len()
            )));
        }
        if self
            .indices
            .iter()
            .any(|&col| col < 0 || col as usize >= self.cols)
        {
            return Err(error::shape("CSR indices contain a column out of bounds"));
        }
        Ok(())
    }
}

/// `csr * dense`, trying the native backend before the reference loop.
pub fn csr_matmul(csr: &CsrMatrixView<'_>, dense: ArrayView2<'_, f32>) -> MatResult<Array2<f32>> {
    #[cfg(feature = "sparse-native")]
    {
        let backend = SprsBackend;
        match backend.csrmm(csr, dense.view()) {
            Ok(result) => return Ok(result),
            Err(err) => {
                log::warn!(
                    "{} sparse product failed: {err}; falling back to {}",
                    backend.name(),
                    FallbackBackend.name()
                );
            }
        }
    }
    FallbackBackend.csrmm(csr, dense)
}

#[derive(Debug)]
struct CsrHost {
    data: Vec<f32>,
    indices: Vec<i32>,
    indptr: Vec<i32>,
}

impl CsrHost {
    fn view(&self, rows: usize, cols: usize) -> MatResult<CsrMatrixView<'_>> {
        CsrMatrixView::new(rows, cols, &self.indptr, &self.indices, &self.data)
    }
}

#[derive(Debug)]
struct CsrDevice {
    data: DeviceRegion,
    indices: DeviceRegion,
    indptr: DeviceRegion,
}

fn indices_to_words(indices: &[i32]) -> Vec<f32> {
    indices.iter().map(|&i| f32::from_bits(i as u32)).collect()
}

fn words_to_indices(words: &[f32]) -> Vec<i32> {
    words.iter().map(|w| w.to_bits() as i32).collect()
}

/// Sparse matrix in compressed-row form with the same host/device
/// residency rules as [`DenseMatrix`].
#[derive(Debug)]
pub struct SparseMatrix {
    device: DeviceHandle,
    rows: usize,
    cols: usize,
    nnz: usize,
    host: Option<CsrHost>,
    resident: Option<CsrDevice>,
}

impl SparseMatrix {
    /// Host-only CSR matrix; arrays are validated and adopted.
    pub fn from_csr(
        device: &DeviceHandle,
        data: Vec<f32>,
        indices: Vec<i32>,
        indptr: Vec<i32>,
        rows: usize,
        cols: usize,
    ) -> MatResult<Self> {
        let host = CsrHost {
            data,
            indices,
            indptr,
        };
        let nnz = host.view(rows, cols)?.nnz();
        Ok(Self {
            device: device.clone(),
            rows,
            cols,
            nnz,
            host: Some(host),
            resident: None,
        })
    }

    /// Converts an sprs matrix; compressed-column input is converted first.
    #[cfg(feature = "sparse-native")]
    pub fn from_csmat(device: &DeviceHandle, mat: &::sprs::CsMat<f32>) -> MatResult<Self> {
        let csr = mat.to_csr();
        let to_i32 = |v: usize| {
            i32::try_from(v).map_err(|_| error::shape(format!("CSR index {v} exceeds i32")))
        };
        let indptr = csr
            .indptr()
            .raw_storage()
            .iter()
            .map(|&v| to_i32(v))
            .collect::<MatResult<Vec<_>>>()?;
        let indices = csr
            .indices()
            .iter()
            .map(|&v| to_i32(v))
            .collect::<MatResult<Vec<_>>>()?;
        Self::from_csr(
            device,
            csr.data().to_vec(),
            indices,
            indptr,
            csr.rows(),
            csr.cols(),
        )
    }

    pub fn shape(&self) -> (usize, usize) {
        (self.rows, self.cols)
    }

    pub fn nnz(&self) -> usize {
        self.nnz
    }

    pub fn on_host(&self) -> bool {
        self.host.is_some()
    }

    pub fn on_device(&self) -> bool {
        self.resident.is_some()
    }

    pub fn copy_to_device(&mut self) -> MatResult<()> {
        let host = self
            .host
            .as_ref()
            .ok_or_else(|| error::unsupported("sparse matrix has no host arrays to upload"))?;
        let data = self.device.allocate(host.data.len())?;
        data.write(&host.data)?;
        let indices = self.device.allocate(host.indices.len())?;
        indices.write(&indices_to_words(&host.indices))?;
        let indptr = self.device.allocate(host.indptr.len())?;
        indptr.write(&indices_to_words(&host.indptr))?;
        self.resident = Some(CsrDevice {
            data,
            indices,
            indptr,
        });
        Ok(())
    }

    pub fn copy_to_host(&mut self) -> MatResult<()> {
        let host = self.download()?;
        self.host = Some(host);
        Ok(())
    }

    /// Drops the device arrays. Returns whether any were held.
    pub fn release(&mut self) -> bool {
        self.resident.take().is_some()
    }

    fn download(&self) -> MatResult<CsrHost> {
        let resident = self
            .resident
            .as_ref()
            .ok_or_else(|| error::not_on_device("sparse matrix is not in device memory"))?;
        Ok(CsrHost {
            data: resident.data.read()?,
            indices: words_to_indices(&resident.indices.read()?),
            indptr: words_to_indices(&resident.indptr.read()?),
        })
    }

    /// Dense copy of the contents.
    pub fn to_array(&self) -> MatResult<Array2<f32>> {
        match &self.host {
            Some(host) => Ok(host.view(self.rows, self.cols)?.to_dense()),
            None => Ok(self.download()?.view(self.rows, self.cols)?.to_dense()),
        }
    }

    /// `mult * self * dense` in a new matrix.
    pub fn dot(&self, dense: &DenseMatrix, mult: f32) -> MatResult<DenseMatrix> {
        let mut target = dense.new_on_device(self.rows, dense.cols())?;
        self.dot_into(dense, &mut target, 0.0, mult)?;
        Ok(target)
    }

    /// `target = beta * target + alpha * self * dense`.
    pub fn dot_into(&self, dense: &DenseMatrix, target: &mut DenseMatrix, beta: f32, alpha: f32) -> MatResult<()> {
        let csr = self.download()?;
        let view = csr.view(self.rows, self.cols)?;
        let rhs = dense.logical_values()?;
        if target.shape() != (self.rows, rhs.ncols()) {
            return Err(error::dimension(format!(
                "sparse product is {}x{} but target is {:?}",
                self.rows,
                rhs.ncols(),
                target.shape()
            )));
        }
        let product = csr_matmul(&view, rhs.view())?;
        let mut out = if beta == 0.0 {
            Array2::<f32>::zeros(product.dim())
        } else {
            target.logical_values()? * beta
        };
        out.scaled_add(alpha, &product);
        target.store_array(&out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn validation_rejects_bad_indptr() {
        let err = CsrMatrixView::new(2, 2, &[0, 2, 1], &[0], &[1.0]).unwrap_err();
        assert_eq!(err.kind(), error::ErrorKind::Shape);
        assert!(CsrMatrixView::new(2, 2, &[0, 1], &[0], &[1.0]).is_err());
        assert!(CsrMatrixView::new(1, 2, &[0, 1], &[2], &[1.0]).is_err());
    }

    #[test]
    fn fallback_matches_dense_product() {
        let csr = CsrMatrixView::new(2, 3, &[0, 2, 3], &[0, 2, 1], &[1.0, 2.0, 3.0]).unwrap();
        let dense = array![[1.0f32, 0.0], [0.0, 1.0], [1.0, 1.0]];
        let expected = csr.to_dense().dot(&dense);
        let got = FallbackBackend.csrmm(&csr, dense.view()).unwrap();
        assert_eq!(got, expected);
        assert_eq!(csr_matmul(&csr, dense.view()).unwrap(), expected);
    }

    #[test]
    fn index_words_survive_the_round_trip() {
        let indices = vec![0, 1, 7, i32::MAX];
        assert_eq!(words_to_indices(&indices_to_words(&indices)), indices);
    }
}
