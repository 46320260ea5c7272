use ndarray::{Array2, ArrayView2};
use sprs::CsMat;

use super::{check_product, CsrMatrixView, SparseBackend};
use crate::error::{self, MatResult};

pub(crate) struct SprsBackend;

impl SparseBackend for SprsBackend {
    fn name(&self) -> &'static str {
        "sprs"
    }

    fn csrmm(&self, csr: &CsrMatrixView<'_>, dense: ArrayView2<'_, f32>) -> MatResult<Array2<f32>> {
        check_product(csr, &dense)?;
        let mat = csr_to_sprs(csr)?;
        Ok(&mat * &dense)
    }
}

/// sprs rejects unsorted or duplicate column indices; callers fall back to
/// the reference loop in that case.
fn csr_to_sprs(csr: &CsrMatrixView<'_>) -> MatResult<CsMat<f32>> {
    let indptr: Vec<usize> = csr.indptr().iter().map(|&v| v as usize).collect();
    let indices: Vec<usize> = csr.indices().iter().map(|&v| v as usize).collect();
    CsMat::try_new(
        (csr.rows(), csr.cols()),
        indptr,
        indices,
        csr.data().to_vec(),
    )
    .map_err(|(_, _, _, err)| error::shape(format!("sprs rejected CSR arrays: {err}")))
}
