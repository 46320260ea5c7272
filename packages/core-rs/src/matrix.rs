use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use ndarray::{s, Array2, ArrayBase, Data, Ix2, ShapeBuilder};

use crate::device::{DeviceHandle, DeviceRegion, GemmOperand};
use crate::error::{self, MatResult};
use crate::storage::{checked_len, MatrixStorage};

static NEXT_MATRIX_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique identity of a matrix handle.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MatrixId(u64);

impl MatrixId {
    fn next() -> Self {
        MatrixId(NEXT_MATRIX_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for MatrixId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "m{}", self.0)
    }
}

/// A dense column-major `f32` matrix that can live on the host, the
/// device, or both.
///
/// Aliases created by [`t`](Self::t), [`view`](Self::view) and
/// [`slice`](Self::slice) share device memory with their source and
/// remember the owning matrix in [`slice_of`](Self::slice_of). Device
/// memory is returned to the backend once the last handle over it is
/// released or dropped.
#[derive(Debug)]
pub struct DenseMatrix {
    id: MatrixId,
    storage: MatrixStorage,
    slice_of: Option<MatrixId>,
}

impl DenseMatrix {
    fn wrap(storage: MatrixStorage, slice_of: Option<MatrixId>) -> Self {
        Self {
            id: MatrixId::next(),
            storage,
            slice_of,
        }
    }

    /// Device-resident matrix. Fresh allocations start zeroed.
    pub fn empty(device: &DeviceHandle, rows: usize, cols: usize) -> MatResult<Self> {
        Ok(Self::wrap(MatrixStorage::allocate(device, rows, cols)?, None))
    }

    pub fn zeros(device: &DeviceHandle, rows: usize, cols: usize) -> MatResult<Self> {
        Self::empty(device, rows, cols)
    }

    /// Adopts a column-major host buffer without copying it. The matrix is
    /// host-only until [`copy_to_device`](Self::copy_to_device).
    pub fn from_host(device: &DeviceHandle, data: Vec<f32>, rows: usize, cols: usize) -> MatResult<Self> {
        Ok(Self::wrap(
            MatrixStorage::from_host(device, data, rows, cols)?,
            None,
        ))
    }

    pub fn from_row_major(device: &DeviceHandle, data: &[f32], rows: usize, cols: usize) -> MatResult<Self> {
        let len = checked_len(rows, cols)?;
        if data.len() != len {
            return Err(error::shape(format!(
                "row-major buffer of {} elements cannot back a {rows}x{cols} matrix",
                data.len()
            )));
        }
        let mut column_major = Vec::with_capacity(len);
        for j in 0..cols {
            column_major.extend((0..rows).map(|i| data[i * cols + j]));
        }
        Self::from_host(device, column_major, rows, cols)
    }

    pub fn from_array<S>(device: &DeviceHandle, array: &ArrayBase<S, Ix2>) -> MatResult<Self>
    where
        S: Data<Elem = f32>,
    {
        let (rows, cols) = array.dim();
        let data: Vec<f32> = array.t().iter().copied().collect();
        Self::from_host(device, data, rows, cols)
    }

    pub fn id(&self) -> MatrixId {
        self.id
    }

    pub fn device(&self) -> &DeviceHandle {
        self.storage.device()
    }

    /// Logical shape.
    pub fn shape(&self) -> (usize, usize) {
        self.storage.shape()
    }

    pub fn rows(&self) -> usize {
        self.shape().0
    }

    pub fn cols(&self) -> usize {
        self.shape().1
    }

    pub fn leading_dimension(&self) -> usize {
        self.rows()
    }

    pub fn nonleading_dimension(&self) -> usize {
        self.cols()
    }

    pub fn len(&self) -> usize {
        self.storage.len()
    }

    pub fn is_empty(&self) -> bool {
        self.storage.is_empty()
    }

    pub fn is_trans(&self) -> bool {
        self.storage.is_trans()
    }

    pub fn owns_data(&self) -> bool {
        self.storage.owns_data()
    }

    pub fn is_view(&self) -> bool {
        !self.storage.owns_data()
    }

    pub fn on_host(&self) -> bool {
        self.storage.on_host()
    }

    pub fn on_device(&self) -> bool {
        self.storage.on_device()
    }

    /// Root matrix whose memory this alias shares.
    pub fn slice_of(&self) -> Option<MatrixId> {
        self.slice_of
    }

    /// Host mirror in stored column-major order, if any.
    pub fn host_data(&self) -> Option<&[f32]> {
        self.storage.host()
    }

    pub fn copy_to_device(&mut self) -> MatResult<()> {
        self.storage.copy_to_device()
    }

    pub fn copy_to_host(&mut self) -> MatResult<()> {
        self.storage.copy_to_host()
    }

    /// Refreshes the host mirror from the device when resident and returns
    /// the logical contents.
    pub fn to_array(&mut self) -> MatResult<Array2<f32>> {
        if self.on_device() {
            self.copy_to_host()?;
        }
        let host = self
            .storage
            .host()
            .ok_or_else(|| error::not_on_device("matrix holds neither host nor device data"))?
            .to_vec();
        self.physical_to_logical(host)
    }

    /// Logical contents flattened column-major.
    pub fn to_vec(&mut self) -> MatResult<Vec<f32>> {
        let array = self.to_array()?;
        Ok(array.t().iter().copied().collect())
    }

    /// Drops this handle's claim on device memory. Returns whether the
    /// handle held a device buffer; repeated calls are no-ops.
    pub fn release(&mut self) -> bool {
        let released = self.storage.release();
        if released {
            log::debug!("released device buffer of {}", self.id);
        }
        released
    }

    /// Replaces the contents with a new column-major host buffer. Device
    /// memory is released; call [`copy_to_device`](Self::copy_to_device) to
    /// upload the new data.
    pub fn overwrite(&mut self, data: Vec<f32>, rows: usize, cols: usize) -> MatResult<()> {
        if self.is_view() {
            return Err(error::view_unsupported("cannot overwrite the storage of a view"));
        }
        self.storage.replace_host(data, rows, cols)?;
        self.slice_of = None;
        Ok(())
    }

    /// Reinterprets the stored buffer with a new shape. One extent may be
    /// `-1` and is inferred from the element count.
    pub fn reshape(&mut self, rows: isize, cols: isize) -> MatResult<()> {
        if self.is_trans() {
            return Err(error::transpose_unsupported("cannot reshape a transposed matrix"));
        }
        let len = self.len();
        let (rows, cols) = match (rows, cols) {
            (-1, -1) => {
                return Err(error::shape("only one reshape extent may be inferred"));
            }
            (-1, c) if c > 0 && len % c as usize == 0 => (len / c as usize, c as usize),
            (r, -1) if r > 0 && len % r as usize == 0 => (r as usize, len / r as usize),
            (r, c) if r >= 0 && c >= 0 => (r as usize, c as usize),
            (r, c) => {
                return Err(error::shape(format!(
                    "cannot reshape {} elements into {r}x{c}",
                    len
                )));
            }
        };
        self.storage.reshape(rows, cols)
    }

    /// Flips the transpose flag in place without moving data.
    pub fn set_trans(&mut self, is_trans: bool) {
        self.storage.set_trans(is_trans);
    }

    fn root(&self) -> MatrixId {
        self.slice_of.unwrap_or(self.id)
    }

    /// Transposed alias over the same device memory.
    pub fn t(&self) -> MatResult<DenseMatrix> {
        let (rows, cols) = self.storage.physical_shape();
        let storage = self.storage.alias(0, rows, cols, !self.is_trans())?;
        Ok(Self::wrap(storage, Some(self.root())))
    }

    /// Non-owning alias with identical shape and layout.
    pub fn view(&self) -> MatResult<DenseMatrix> {
        let (rows, cols) = self.storage.physical_shape();
        let storage = self.storage.alias(0, rows, cols, self.is_trans())?;
        Ok(Self::wrap(storage, Some(self.root())))
    }

    /// Alias over columns `first_col..last_col`. On a vector the range
    /// addresses elements instead and the alias keeps the orientation.
    pub fn slice(&self, first_col: usize, last_col: usize) -> MatResult<DenseMatrix> {
        let (rows, cols) = self.shape();
        if rows == 1 || cols == 1 {
            return self.vector_slice(first_col, last_col);
        }
        if self.is_trans() {
            return Err(error::transpose_unsupported("cannot slice a transposed matrix"));
        }
        check_range("column", first_col, last_col, cols)?;
        let storage = self
            .storage
            .alias(first_col * rows, rows, last_col - first_col, false)?;
        Ok(Self::wrap(storage, Some(self.root())))
    }

    fn vector_slice(&self, first: usize, last: usize) -> MatResult<DenseMatrix> {
        check_range("element", first, last, self.len())?;
        let len = last - first;
        let (stored_rows, _) = self.storage.physical_shape();
        let (rows, cols) = if stored_rows == 1 { (1, len) } else { (len, 1) };
        let storage = self.storage.alias(first, rows, cols, self.is_trans())?;
        Ok(Self::wrap(storage, Some(self.root())))
    }

    /// Copies columns `first_col..last_col` into `target`.
    pub fn get_col_slice(&self, first_col: usize, last_col: usize, target: &mut DenseMatrix) -> MatResult<()> {
        let src = self.slice(first_col, last_col)?;
        target.ensure_not_trans("column slice target")?;
        if target.shape() != src.shape() {
            return Err(error::dimension(format!(
                "column slice is {:?} but target is {:?}",
                src.shape(),
                target.shape()
            )));
        }
        target.region()?.copy_from(src.region()?)
    }

    /// Overwrites columns `first_col..last_col` with `src`.
    pub fn set_col_slice(&mut self, first_col: usize, last_col: usize, src: &DenseMatrix) -> MatResult<()> {
        let dst = self.slice(first_col, last_col)?;
        src.ensure_not_trans("column slice source")?;
        if src.shape() != dst.shape() {
            return Err(error::dimension(format!(
                "column slice is {:?} but source is {:?}",
                dst.shape(),
                src.shape()
            )));
        }
        dst.region()?.copy_from(src.region()?)
    }

    /// Copies rows `start..end` into a new matrix.
    pub fn get_row_slice(&self, start: usize, end: usize) -> MatResult<DenseMatrix> {
        check_range("row", start, end, self.rows())?;
        let mut target = self.new_on_device(end - start, self.cols())?;
        self.get_row_slice_into(start, end, &mut target)?;
        Ok(target)
    }

    pub fn get_row_slice_into(&self, start: usize, end: usize, target: &mut DenseMatrix) -> MatResult<()> {
        self.ensure_not_trans("row slice")?;
        target.ensure_not_trans("row slice target")?;
        check_range("row", start, end, self.rows())?;
        if target.shape() != (end - start, self.cols()) {
            return Err(error::dimension(format!(
                "row slice is {}x{} but target is {:?}",
                end - start,
                self.cols(),
                target.shape()
            )));
        }
        let values = self.logical_values()?;
        target.store_array(&values.slice(s![start..end, ..]))
    }

    /// Overwrites rows `start..end` with `src`.
    pub fn set_row_slice(&mut self, start: usize, end: usize, src: &DenseMatrix) -> MatResult<()> {
        self.ensure_not_trans("row slice")?;
        src.ensure_not_trans("row slice source")?;
        check_range("row", start, end, self.rows())?;
        if src.shape() != (end - start, self.cols()) {
            return Err(error::dimension(format!(
                "row slice is {}x{} but source is {:?}",
                end - start,
                self.cols(),
                src.shape()
            )));
        }
        let mut values = self.logical_values()?;
        values
            .slice_mut(s![start..end, ..])
            .assign(&src.logical_values()?);
        self.store_array(&values)
    }

    /// Materialised transpose in a new matrix.
    pub fn copy_transpose(&self) -> MatResult<DenseMatrix> {
        let (rows, cols) = self.shape();
        let mut target = self.new_on_device(cols, rows)?;
        self.copy_transpose_into(&mut target)?;
        Ok(target)
    }

    pub fn copy_transpose_into(&self, target: &mut DenseMatrix) -> MatResult<()> {
        let (rows, cols) = self.shape();
        if target.shape() != (cols, rows) {
            return Err(error::dimension(format!(
                "transpose of {rows}x{cols} does not fit target {:?}",
                target.shape()
            )));
        }
        let values = self.logical_values()?;
        target.store_array(&values.t())
    }

    pub fn read_value(&self, row: usize, col: usize) -> MatResult<f32> {
        let offset = self.physical_offset(row, col)?;
        let mut out = [0.0f32];
        self.region()?.narrow(offset, 1)?.read_into(&mut out)?;
        Ok(out[0])
    }

    pub fn write_value(&mut self, row: usize, col: usize, value: f32) -> MatResult<()> {
        let offset = self.physical_offset(row, col)?;
        self.region()?.narrow(offset, 1)?.write(&[value])
    }

    fn physical_offset(&self, row: usize, col: usize) -> MatResult<usize> {
        let (rows, cols) = self.shape();
        if row >= rows || col >= cols {
            return Err(error::shape(format!(
                "index ({row}, {col}) outside {rows}x{cols} matrix"
            )));
        }
        let (stored_rows, _) = self.storage.physical_shape();
        Ok(if self.is_trans() {
            col + row * stored_rows
        } else {
            row + col * stored_rows
        })
    }

    fn physical_to_logical(&self, values: Vec<f32>) -> MatResult<Array2<f32>> {
        let stored = Array2::from_shape_vec(self.storage.physical_shape().f(), values)
            .map_err(|err| error::shape(err.to_string()))?;
        Ok(if self.is_trans() {
            stored.reversed_axes()
        } else {
            stored
        })
    }

    /// Operand description for a device matrix product.
    pub(crate) fn gemm_operand(&self) -> MatResult<GemmOperand> {
        let (rows, cols) = self.physical_shape();
        Ok(self.region()?.gemm_operand(rows, cols, self.is_trans()))
    }

    pub(crate) fn physical_shape(&self) -> (usize, usize) {
        self.storage.physical_shape()
    }

    pub(crate) fn region(&self) -> MatResult<&DeviceRegion> {
        self.storage.region()
    }

    /// Allocates a matrix on the same device.
    pub(crate) fn new_on_device(&self, rows: usize, cols: usize) -> MatResult<DenseMatrix> {
        DenseMatrix::empty(self.device(), rows, cols)
    }

    /// Device contents in stored order.
    pub(crate) fn device_values(&self) -> MatResult<Vec<f32>> {
        self.storage.read_device()
    }

    pub(crate) fn store_values(&mut self, values: &[f32]) -> MatResult<()> {
        self.storage.write_device(values)
    }

    /// Device contents with the logical shape.
    pub(crate) fn logical_values(&self) -> MatResult<Array2<f32>> {
        let values = self.device_values()?;
        self.physical_to_logical(values)
    }

    /// Writes a logical-shaped array into the stored layout.
    pub(crate) fn store_array<S>(&mut self, array: &ArrayBase<S, Ix2>) -> MatResult<()>
    where
        S: Data<Elem = f32>,
    {
        if array.dim() != self.shape() {
            return Err(error::dimension(format!(
                "result {:?} does not fit {:?} matrix",
                array.dim(),
                self.shape()
            )));
        }
        let values: Vec<f32> = if self.is_trans() {
            array.iter().copied().collect()
        } else {
            array.t().iter().copied().collect()
        };
        self.store_values(&values)
    }

    pub(crate) fn ensure_on_device(&self) -> MatResult<()> {
        if self.on_device() {
            Ok(())
        } else {
            Err(error::not_on_device(format!("{} is not in device memory", self.id)))
        }
    }

    pub(crate) fn ensure_not_trans(&self, what: &str) -> MatResult<()> {
        if self.is_trans() {
            Err(error::transpose_unsupported(format!(
                "{what} does not accept transposed matrices"
            )))
        } else {
            Ok(())
        }
    }

    /// Elementwise operands must agree on residency, transpose flag and
    /// stored shape.
    pub(crate) fn check_same_layout(&self, other: &DenseMatrix) -> MatResult<()> {
        self.ensure_on_device()?;
        other.ensure_on_device()?;
        if self.is_trans() != other.is_trans() {
            return Err(error::transpose_mismatch(format!(
                "{} and {} disagree on transposedness",
                self.id, other.id
            )));
        }
        if self.physical_shape() != other.physical_shape() {
            return Err(error::dimension(format!(
                "shapes {:?} and {:?} differ",
                self.shape(),
                other.shape()
            )));
        }
        Ok(())
    }

    /// Stores `values` (stored order) into `target`, or into `self` when
    /// no target is given.
    pub(crate) fn commit(&mut self, target: Option<&mut DenseMatrix>, values: &[f32]) -> MatResult<()> {
        match target {
            Some(target) => target.store_values(values),
            None => self.store_values(values),
        }
    }

    pub(crate) fn check_target(&self, target: Option<&DenseMatrix>) -> MatResult<()> {
        match target {
            Some(target) => self.check_same_layout(target),
            None => self.ensure_on_device(),
        }
    }
}

fn check_range(what: &str, start: usize, end: usize, extent: usize) -> MatResult<()> {
    if start > end || end > extent {
        return Err(error::shape(format!(
            "{what} range {start}..{end} outside 0..{extent}"
        )));
    }
    Ok(())
}
