//! Axis reductions and the column-wise normalisations built on them.
//! Sums run as products against the resident ones vector; the remaining
//! reductions are host kernels over logical lanes.

use ndarray::{Array1, Array2, ArrayView1, Axis as NdAxis};

use crate::blas::BlasContext;
use crate::error::{self, MatResult};
use crate::kernels;
use crate::matrix::DenseMatrix;

/// Reduction direction. `Leading` collapses rows and yields one value per
/// column (a `1 x n` row); `NonLeading` collapses columns (an `m x 1`
/// column).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Axis {
    Leading,
    NonLeading,
}

impl Axis {
    /// `0` is the leading axis, `1` the non-leading one.
    pub fn from_index(index: usize) -> MatResult<Self> {
        match index {
            0 => Ok(Axis::Leading),
            1 => Ok(Axis::NonLeading),
            other => Err(error::dimension(format!("axis {other} is not 0 or 1"))),
        }
    }

    fn reduced_shape(self, (rows, cols): (usize, usize)) -> (usize, usize) {
        match self {
            Axis::Leading => (1, cols),
            Axis::NonLeading => (rows, 1),
        }
    }

    fn nd(self) -> NdAxis {
        match self {
            Axis::Leading => NdAxis(0),
            Axis::NonLeading => NdAxis(1),
        }
    }
}

fn lanes_to_matrix(values: Array1<f32>, axis: Axis) -> Array2<f32> {
    match axis {
        Axis::Leading => values.insert_axis(NdAxis(0)),
        Axis::NonLeading => values.insert_axis(NdAxis(1)),
    }
}

fn lane_norm(lane: ArrayView1<'_, f32>) -> f32 {
    lane.iter().map(|x| x * x).sum::<f32>().sqrt()
}

fn label_index(raw: f32, len: usize) -> Option<usize> {
    if raw.is_finite() && raw >= 0.0 && (raw.trunc() as usize) < len {
        Some(raw.trunc() as usize)
    } else {
        None
    }
}

fn store_result(this: &mut DenseMatrix, target: Option<&mut DenseMatrix>, result: &Array2<f32>) -> MatResult<()> {
    match target {
        Some(target) => target.store_array(result),
        None => this.store_array(result),
    }
}

impl DenseMatrix {
    fn sum_product(
        &self,
        blas: &BlasContext,
        axis: Axis,
        target: &DenseMatrix,
        mult: f32,
        beta: f32,
    ) -> MatResult<()> {
        self.ensure_on_device()?;
        let (rows, cols) = self.shape();
        let expected = axis.reduced_shape((rows, cols));
        if target.shape() != expected {
            return Err(error::dimension(format!(
                "sum of {rows}x{cols} along {axis:?} is {expected:?}, target is {:?}",
                target.shape()
            )));
        }
        let mat = (self.region()?, self.gemm_operand()?);
        match axis {
            Axis::Leading => {
                let ones = blas.ones(rows)?;
                let ones_row = ones.gemm_operand(rows, 1, true);
                blas.submit((&ones, ones_row), mat, target, mult, beta)
            }
            Axis::NonLeading => {
                let ones = blas.ones(cols)?;
                let ones_col = ones.gemm_operand(cols, 1, false);
                blas.submit(mat, (&ones, ones_col), target, mult, beta)
            }
        }
    }

    /// `mult * sum(self, axis)` in a new matrix.
    pub fn sum(&self, blas: &BlasContext, axis: Axis, mult: f32) -> MatResult<DenseMatrix> {
        let (rows, cols) = axis.reduced_shape(self.shape());
        let target = self.new_on_device(rows, cols)?;
        self.sum_product(blas, axis, &target, mult, 0.0)?;
        Ok(target)
    }

    pub fn sum_into(&self, blas: &BlasContext, axis: Axis, target: &mut DenseMatrix, mult: f32) -> MatResult<()> {
        self.sum_product(blas, axis, target, mult, 0.0)
    }

    /// `self = beta * self + mult * sum(mat, axis)`.
    pub fn add_sums(
        &mut self,
        blas: &BlasContext,
        mat: &DenseMatrix,
        axis: Axis,
        mult: f32,
        beta: f32,
    ) -> MatResult<()> {
        mat.sum_product(blas, axis, self, mult, beta)
    }

    /// Sum of squares along `axis`, scaled by `mult`.
    pub fn sqsum(&self, axis: Axis, mult: f32) -> MatResult<DenseMatrix> {
        let (rows, cols) = axis.reduced_shape(self.shape());
        let mut target = self.new_on_device(rows, cols)?;
        self.sqsum_into(axis, &mut target, mult)?;
        Ok(target)
    }

    pub fn sqsum_into(&self, axis: Axis, target: &mut DenseMatrix, mult: f32) -> MatResult<()> {
        let sums = self.squared_lanes(axis)?;
        target.store_array(&lanes_to_matrix(sums.mapv(|s| mult * s), axis))
    }

    /// `self = beta * self + mult * sqsum(mat, axis)`.
    pub fn add_sqsums(&mut self, mat: &DenseMatrix, axis: Axis, mult: f32, beta: f32) -> MatResult<()> {
        let sums = lanes_to_matrix(mat.squared_lanes(axis)?, axis);
        let mut current = self.logical_values()?;
        if current.dim() != sums.dim() {
            return Err(error::dimension(format!(
                "squared sums {:?} do not fit {:?}",
                sums.dim(),
                current.dim()
            )));
        }
        current.zip_mut_with(&sums, |x, &s| *x = beta * *x + mult * s);
        self.store_array(&current)
    }

    fn squared_lanes(&self, axis: Axis) -> MatResult<Array1<f32>> {
        let values = self.logical_values()?;
        Ok(values.map_axis(axis.nd(), |lane| lane.iter().map(|x| x * x).sum::<f32>()))
    }

    /// Maximum along `axis`, ignoring NaN.
    pub fn max(&self, axis: Axis) -> MatResult<DenseMatrix> {
        let (rows, cols) = axis.reduced_shape(self.shape());
        let mut target = self.new_on_device(rows, cols)?;
        self.max_into(axis, &mut target)?;
        Ok(target)
    }

    pub fn max_into(&self, axis: Axis, target: &mut DenseMatrix) -> MatResult<()> {
        let values = self.logical_values()?;
        let maxima = values.map_axis(axis.nd(), |lane| kernels::max_ignore_nan(lane.iter()));
        target.store_array(&lanes_to_matrix(maxima, axis))
    }

    /// Position of the first maximum along `axis`, as floats.
    pub fn argmax(&self, axis: Axis) -> MatResult<DenseMatrix> {
        let (rows, cols) = axis.reduced_shape(self.shape());
        let mut target = self.new_on_device(rows, cols)?;
        self.argmax_into(axis, &mut target)?;
        Ok(target)
    }

    pub fn argmax_into(&self, axis: Axis, target: &mut DenseMatrix) -> MatResult<()> {
        let values = self.logical_values()?;
        let positions = values.map_axis(axis.nd(), |lane| kernels::argmax_ignore_nan(lane.iter()) as f32);
        target.store_array(&lanes_to_matrix(positions, axis))
    }

    /// Running sum down each column. Only the leading axis is supported.
    pub fn cumsum(&self, axis: Axis) -> MatResult<DenseMatrix> {
        let (rows, cols) = self.shape();
        let mut target = self.new_on_device(rows, cols)?;
        self.cumsum_into(axis, &mut target)?;
        Ok(target)
    }

    pub fn cumsum_into(&self, axis: Axis, target: &mut DenseMatrix) -> MatResult<()> {
        if axis != Axis::Leading {
            return Err(error::unsupported("cumsum is only implemented along the leading axis"));
        }
        let mut values = self.logical_values()?;
        for mut col in values.axis_iter_mut(NdAxis(1)) {
            let mut running = 0.0f32;
            col.iter_mut().for_each(|x| {
                running += *x;
                *x = running;
            });
        }
        target.store_array(&values)
    }

    /// Rescales each lane along `axis` to Euclidean norm `norm`. With
    /// `constraint` only lanes whose norm exceeds `norm` are touched.
    pub fn norm_limit(
        &mut self,
        norm: f32,
        axis: Axis,
        constraint: bool,
        target: Option<&mut DenseMatrix>,
    ) -> MatResult<()> {
        self.check_target(target.as_deref())?;
        let mut values = self.logical_values()?;
        for mut lane in values.lanes_mut(axis.nd()) {
            let current = lane_norm(lane.view());
            if current > 0.0 && (!constraint || current > norm) {
                let scale = norm / current;
                lane.mapv_inplace(|x| x * scale);
            }
        }
        store_result(self, target, &values)
    }

    /// One-hot of the per-column maximum. Only the leading axis is
    /// supported.
    pub fn choose_max(&mut self, axis: Axis, target: Option<&mut DenseMatrix>) -> MatResult<()> {
        if axis != Axis::Leading {
            return Err(error::unsupported("choose_max is only implemented along the leading axis"));
        }
        self.check_target(target.as_deref())?;
        let one_hot = self.column_one_hot()?;
        store_result(self, target, &one_hot)
    }

    /// `acc += one_hot(argmax of each column)`.
    pub fn choose_max_and_accumulate(&self, acc: &mut DenseMatrix) -> MatResult<()> {
        self.check_same_layout(acc)?;
        let one_hot = self.column_one_hot()?;
        let mut current = acc.logical_values()?;
        current += &one_hot;
        acc.store_array(&current)
    }

    fn column_one_hot(&self) -> MatResult<Array2<f32>> {
        let values = self.logical_values()?;
        let mut one_hot = Array2::<f32>::zeros(values.dim());
        if values.nrows() == 0 {
            return Ok(one_hot);
        }
        for (j, col) in values.axis_iter(NdAxis(1)).enumerate() {
            one_hot[[kernels::argmax_ignore_nan(col.iter()), j]] = 1.0;
        }
        Ok(one_hot)
    }

    /// Column-wise softmax.
    pub fn apply_softmax(&mut self, target: Option<&mut DenseMatrix>) -> MatResult<()> {
        self.check_target(target.as_deref())?;
        let mut values = self.logical_values()?;
        for mut col in values.axis_iter_mut(NdAxis(1)) {
            let peak = kernels::max_ignore_nan(col.iter());
            col.mapv_inplace(|x| (x - peak).exp());
            let total = col.sum();
            col.mapv_inplace(|x| x / total);
        }
        store_result(self, target, &values)
    }

    /// Softmax over consecutive runs of `width` elements taken in logical
    /// row-major order. `None` uses the column count, i.e. each row is
    /// normalised on its own.
    pub fn apply_softmax_row_major(&mut self, width: Option<usize>) -> MatResult<()> {
        let (rows, cols) = self.shape();
        if self.is_empty() {
            return self.ensure_on_device();
        }
        let width = width.unwrap_or(cols);
        if width == 0 || self.len() % width != 0 {
            return Err(error::dimension(format!(
                "{rows}x{cols} matrix cannot be split into runs of {width}"
            )));
        }
        let values = self.logical_values()?;
        let mut flat: Vec<f32> = values.iter().copied().collect();
        for run in flat.chunks_mut(width) {
            let peak = kernels::max_ignore_nan(run.iter());
            run.iter_mut().for_each(|x| *x = (*x - peak).exp());
            let total: f32 = run.iter().sum();
            run.iter_mut().for_each(|x| *x /= total);
        }
        let result = Array2::from_shape_vec((rows, cols), flat)
            .map_err(|err| error::shape(err.to_string()))?;
        self.store_array(&result)
    }

    fn check_labels(&self, labels: &DenseMatrix) -> MatResult<Vec<f32>> {
        let cols = self.cols();
        if labels.shape() != (1, cols) {
            return Err(error::dimension(format!(
                "labels must be 1x{cols}, got {:?}",
                labels.shape()
            )));
        }
        labels.device_values()
    }

    /// `target = self - one_hot(labels)`, column by column.
    pub fn apply_softmax_grad(&mut self, labels: &DenseMatrix, target: Option<&mut DenseMatrix>) -> MatResult<()> {
        self.check_target(target.as_deref())?;
        let labels = self.check_labels(labels)?;
        let mut values = self.logical_values()?;
        let rows = values.nrows();
        for (j, &raw) in labels.iter().enumerate() {
            if let Some(i) = label_index(raw, rows) {
                values[[i, j]] -= 1.0;
            }
        }
        store_result(self, target, &values)
    }

    /// `target[j] = 1` when the column maximum sits at `labels[j]`.
    pub fn get_softmax_correct(&self, labels: &DenseMatrix, target: &mut DenseMatrix) -> MatResult<()> {
        let labels = self.check_labels(labels)?;
        let values = self.logical_values()?;
        let rows = values.nrows();
        let hits: Array1<f32> = values
            .axis_iter(NdAxis(1))
            .zip(&labels)
            .map(|(col, &raw)| match label_index(raw, rows) {
                Some(i) if kernels::argmax_ignore_nan(col.iter()) == i => 1.0,
                _ => 0.0,
            })
            .collect();
        target.store_array(&hits.insert_axis(NdAxis(0)))
    }

    /// `target[j] = -ln(self[labels[j], j] + tiny)`; out-of-range labels
    /// yield NaN.
    pub fn get_softmax_cross_entropy(&self, labels: &DenseMatrix, target: &mut DenseMatrix, tiny: f32) -> MatResult<()> {
        let labels = self.check_labels(labels)?;
        let values = self.logical_values()?;
        let rows = values.nrows();
        let losses: Array1<f32> = labels
            .iter()
            .enumerate()
            .map(|(j, &raw)| match label_index(raw, rows) {
                Some(i) => -(values[[i, j]] + tiny).ln(),
                None => f32::NAN,
            })
            .collect();
        target.store_array(&losses.insert_axis(NdAxis(0)))
    }
}
