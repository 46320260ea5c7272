//! Row/column vector broadcasts and diagonal updates. These kernels index
//! the stored layout directly and so reject transposed operands.

use crate::elementwise::Operand;
use crate::error::{self, MatResult};
use crate::kernels;
use crate::matrix::DenseMatrix;

#[derive(Clone, Copy, PartialEq, Eq)]
enum Along {
    /// Vector has one entry per row and is applied to every column.
    Column,
    /// Vector has one entry per column and is applied to every row.
    Row,
}

impl DenseMatrix {
    fn broadcast<F>(
        &mut self,
        vec: &DenseMatrix,
        along: Along,
        target: Option<&mut DenseMatrix>,
        f: F,
    ) -> MatResult<()>
    where
        F: Fn(f32, f32) -> f32 + Send + Sync,
    {
        self.ensure_not_trans("broadcast")?;
        vec.ensure_not_trans("broadcast vector")?;
        vec.ensure_on_device()?;
        self.check_target(target.as_deref())?;
        let (rows, cols) = self.shape();
        let expected = match along {
            Along::Column => (rows, 1),
            Along::Row => (1, cols),
        };
        let (vr, vc) = vec.shape();
        if (vr, vc) != expected {
            return Err(error::dimension(format!(
                "vector {vr}x{vc} cannot broadcast over {rows}x{cols}"
            )));
        }
        let v = vec.device_values()?;
        let mut values = self.device_values()?;
        match along {
            Along::Column => kernels::for_each_column(&mut values, rows, |_, col| {
                col.iter_mut().zip(&v).for_each(|(x, &b)| *x = f(*x, b));
            }),
            Along::Row => kernels::for_each_column(&mut values, rows, |j, col| {
                let b = v[j];
                col.iter_mut().for_each(|x| *x = f(*x, b));
            }),
        }
        self.commit(target, &values)
    }

    /// Adds a column vector to every column.
    pub fn add_col_vec(&mut self, vec: &DenseMatrix, target: Option<&mut DenseMatrix>) -> MatResult<()> {
        self.broadcast(vec, Along::Column, target, |x, b| x + b)
    }

    /// Adds `mult * vec` to every column.
    pub fn add_col_mult(&mut self, vec: &DenseMatrix, mult: f32, target: Option<&mut DenseMatrix>) -> MatResult<()> {
        self.broadcast(vec, Along::Column, target, |x, b| x + mult * b)
    }

    /// Adds a row vector to every row.
    pub fn add_row_vec(&mut self, vec: &DenseMatrix, target: Option<&mut DenseMatrix>) -> MatResult<()> {
        self.broadcast(vec, Along::Row, target, |x, b| x + b)
    }

    pub fn add_row_mult(&mut self, vec: &DenseMatrix, mult: f32, target: Option<&mut DenseMatrix>) -> MatResult<()> {
        self.broadcast(vec, Along::Row, target, |x, b| x + mult * b)
    }

    pub fn mult_by_col(&mut self, vec: &DenseMatrix, target: Option<&mut DenseMatrix>) -> MatResult<()> {
        self.broadcast(vec, Along::Column, target, |x, b| x * b)
    }

    pub fn mult_by_row(&mut self, vec: &DenseMatrix, target: Option<&mut DenseMatrix>) -> MatResult<()> {
        self.broadcast(vec, Along::Row, target, |x, b| x * b)
    }

    pub fn div_by_col(&mut self, vec: &DenseMatrix, target: Option<&mut DenseMatrix>) -> MatResult<()> {
        self.broadcast(vec, Along::Column, target, |x, b| x / b)
    }

    pub fn div_by_row(&mut self, vec: &DenseMatrix, target: Option<&mut DenseMatrix>) -> MatResult<()> {
        self.broadcast(vec, Along::Row, target, |x, b| x / b)
    }

    fn diagonal<F>(&mut self, val: Operand<'_>, target: Option<&mut DenseMatrix>, f: F) -> MatResult<()>
    where
        F: Fn(f32, f32) -> f32,
    {
        self.ensure_not_trans("diagonal update")?;
        self.check_target(target.as_deref())?;
        let (rows, cols) = self.shape();
        if rows != cols {
            return Err(error::dimension(format!(
                "diagonal update needs a square matrix, got {rows}x{cols}"
            )));
        }
        let diag = match val {
            Operand::Scalar(s) => vec![s; rows],
            Operand::Matrix(vec) => {
                vec.ensure_on_device()?;
                let (vr, vc) = vec.shape();
                if (vr != 1 && vc != 1) || vec.len() != rows {
                    return Err(error::dimension(format!(
                        "diagonal vector {vr}x{vc} does not match {rows}x{cols}"
                    )));
                }
                vec.device_values()?
            }
        };
        let mut values = self.device_values()?;
        for (i, &d) in diag.iter().enumerate() {
            let at = i * rows + i;
            values[at] = f(values[at], d);
        }
        self.commit(target, &values)
    }

    /// Adds a scalar or vector to the main diagonal of a square matrix.
    pub fn add_diagonal<'a>(&mut self, val: impl Into<Operand<'a>>, target: Option<&mut DenseMatrix>) -> MatResult<()> {
        self.diagonal(val.into(), target, |x, d| x + d)
    }

    pub fn mult_diagonal<'a>(&mut self, val: impl Into<Operand<'a>>, target: Option<&mut DenseMatrix>) -> MatResult<()> {
        self.diagonal(val.into(), target, |x, d| x * d)
    }
}
