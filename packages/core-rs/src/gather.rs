//! Column gather/scatter driven by float-encoded index vectors. Indices
//! are truncated toward zero and negative values count from the end.
//! Out-of-range indices never fail: gathers write NaN columns and scatters
//! skip the column.

use ndarray::{s, Array2, Axis as NdAxis};

use crate::error::{self, MatResult};
use crate::kernels::resolve_index;
use crate::matrix::DenseMatrix;

fn index_vector(indices: &DenseMatrix) -> MatResult<Vec<f32>> {
    let (r, c) = indices.shape();
    if r != 1 && c != 1 && !indices.is_empty() {
        return Err(error::dimension(format!("index matrix must be a vector, got {r}x{c}")));
    }
    indices.device_values()
}

fn check_rows(what: &str, expected: usize, got: usize) -> MatResult<()> {
    if expected != got {
        return Err(error::dimension(format!(
            "{what} has {got} rows, expected {expected}"
        )));
    }
    Ok(())
}

impl DenseMatrix {
    /// `target[:, c] = self[:, indices[c]]`.
    pub fn select_columns(&self, indices: &DenseMatrix, target: &mut DenseMatrix) -> MatResult<()> {
        let idx = index_vector(indices)?;
        let source = self.logical_values()?;
        let (rows, cols) = source.dim();
        if target.shape() != (rows, idx.len()) {
            return Err(error::dimension(format!(
                "selecting {} columns of {rows}x{cols} into {:?}",
                idx.len(),
                target.shape()
            )));
        }
        let mut out = Array2::<f32>::zeros((rows, idx.len()));
        for (c, &raw) in idx.iter().enumerate() {
            let mut dst = out.column_mut(c);
            match resolve_index(raw, cols) {
                Some(j) => dst.assign(&source.column(j)),
                None => dst.fill(f32::NAN),
            }
        }
        target.store_array(&out)
    }

    /// `self[:, indices[c]] = source[:, c]`.
    pub fn set_selected_columns(&mut self, indices: &DenseMatrix, source: &DenseMatrix) -> MatResult<()> {
        let idx = index_vector(indices)?;
        let src = source.logical_values()?;
        let mut values = self.logical_values()?;
        let (rows, cols) = values.dim();
        check_rows("source", rows, src.nrows())?;
        if src.ncols() != idx.len() {
            return Err(error::dimension(format!(
                "{} indices for {} source columns",
                idx.len(),
                src.ncols()
            )));
        }
        for (c, &raw) in idx.iter().enumerate() {
            if let Some(j) = resolve_index(raw, cols) {
                values.column_mut(j).assign(&src.column(c));
            }
        }
        self.store_array(&values)
    }

    /// Exchanges `self[:, indices1[c]]` with `target[:, indices2[c]]`,
    /// pair by pair. Without a target the exchange happens within `self`.
    /// A pair whose source index is out of range writes NaN into the
    /// destination column.
    pub fn swap_columns(
        &mut self,
        indices1: &DenseMatrix,
        indices2: &DenseMatrix,
        target: Option<&mut DenseMatrix>,
    ) -> MatResult<()> {
        let first = index_vector(indices1)?;
        let second = index_vector(indices2)?;
        if first.len() != second.len() {
            return Err(error::dimension(format!(
                "index vectors of length {} and {}",
                first.len(),
                second.len()
            )));
        }
        let mut values = self.logical_values()?;
        let src_cols = values.ncols();
        match target {
            None => {
                for (&a, &b) in first.iter().zip(&second) {
                    match (resolve_index(a, src_cols), resolve_index(b, src_cols)) {
                        (Some(i), Some(j)) if i != j => {
                            let (mut left, mut right) = values.multi_slice_mut((s![.., i], s![.., j]));
                            ndarray::Zip::from(&mut left)
                                .and(&mut right)
                                .for_each(|x, y| std::mem::swap(x, y));
                        }
                        (None, Some(j)) => values.column_mut(j).fill(f32::NAN),
                        _ => {}
                    }
                }
                self.store_array(&values)
            }
            Some(target) => {
                let mut other = target.logical_values()?;
                check_rows("target", values.nrows(), other.nrows())?;
                let dst_cols = other.ncols();
                for (&a, &b) in first.iter().zip(&second) {
                    let Some(j) = resolve_index(b, dst_cols) else {
                        continue;
                    };
                    match resolve_index(a, src_cols) {
                        Some(i) => {
                            let mut left = values.column_mut(i);
                            let mut right = other.column_mut(j);
                            ndarray::Zip::from(&mut left)
                                .and(&mut right)
                                .for_each(|x, y| std::mem::swap(x, y));
                        }
                        None => other.column_mut(j).fill(f32::NAN),
                    }
                }
                self.store_array(&values)?;
                target.store_array(&other)
            }
        }
    }

    /// Permutes columns in place: `self[:, c] = old[:, permutation[c]]`.
    /// The permutation needs one entry per column.
    pub fn shuffle_columns(&mut self, permutation: &DenseMatrix) -> MatResult<()> {
        let idx = index_vector(permutation)?;
        let source = self.logical_values()?;
        let (rows, cols) = source.dim();
        if idx.len() != cols {
            return Err(error::dimension(format!(
                "permutation of length {} for {cols} columns",
                idx.len()
            )));
        }
        let mut out = Array2::<f32>::zeros((rows, cols));
        for (c, &raw) in idx.iter().enumerate() {
            let mut dst = out.column_mut(c);
            match resolve_index(raw, cols) {
                Some(j) => dst.assign(&source.column(j)),
                None => dst.fill(f32::NAN),
            }
        }
        self.store_array(&out)
    }

    /// `target[:, indices[c]] += mult * self[:, c]`. With `avg` each
    /// destination receives the mean of its contributions instead of the
    /// sum.
    pub fn accumulate_columns(
        &self,
        indices: &DenseMatrix,
        target: &mut DenseMatrix,
        mult: f32,
        avg: bool,
    ) -> MatResult<()> {
        let idx = index_vector(indices)?;
        let source = self.logical_values()?;
        let mut out = target.logical_values()?;
        check_rows("target", source.nrows(), out.nrows())?;
        if idx.len() != source.ncols() {
            return Err(error::dimension(format!(
                "{} indices for {} columns",
                idx.len(),
                source.ncols()
            )));
        }
        let dst_cols = out.ncols();
        let mut sums = Array2::<f32>::zeros(out.dim());
        let mut counts = vec![0usize; dst_cols];
        for (c, &raw) in idx.iter().enumerate() {
            if let Some(j) = resolve_index(raw, dst_cols) {
                let mut acc = sums.column_mut(j);
                acc += &source.column(c);
                counts[j] += 1;
            }
        }
        for (j, mut col) in out.axis_iter_mut(NdAxis(1)).enumerate() {
            if counts[j] == 0 {
                continue;
            }
            let scale = if avg { mult / counts[j] as f32 } else { mult };
            col.scaled_add(scale, &sums.column(j));
        }
        target.store_array(&out)
    }

    /// `target[:, c] = self[:, c] + mult * val[:, indices[c]]`; writes to
    /// `self` without a target.
    pub fn expand_and_add(
        &mut self,
        val: &DenseMatrix,
        indices: &DenseMatrix,
        mult: f32,
        target: Option<&mut DenseMatrix>,
    ) -> MatResult<()> {
        self.check_target(target.as_deref())?;
        let idx = index_vector(indices)?;
        let expansion = val.logical_values()?;
        let mut values = self.logical_values()?;
        check_rows("value matrix", values.nrows(), expansion.nrows())?;
        if idx.len() != values.ncols() {
            return Err(error::dimension(format!(
                "{} indices for {} columns",
                idx.len(),
                values.ncols()
            )));
        }
        let val_cols = expansion.ncols();
        for (c, mut col) in values.axis_iter_mut(NdAxis(1)).enumerate() {
            match resolve_index(idx[c], val_cols) {
                Some(j) => col.scaled_add(mult, &expansion.column(j)),
                None => col.fill(f32::NAN),
            }
        }
        match target {
            Some(target) => target.store_array(&values),
            None => self.store_array(&values),
        }
    }
}
