use std::path::Path;

use ndarray::Array2;
use ndarray_npy::{read_npy, write_npy};

use crate::device::DeviceHandle;
use crate::error::{self, MatResult};
use crate::matrix::DenseMatrix;

impl DenseMatrix {
    /// Writes the logical contents to a `.npy` file.
    pub fn save_npy<P: AsRef<Path>>(&mut self, path: P) -> MatResult<()> {
        let array = self.to_array()?;
        write_npy(path.as_ref(), &array)
            .map_err(|err| error::io(format!("{}: {err}", path.as_ref().display())))
    }

    /// Reads a 2-D `f32` `.npy` file into a host-only matrix.
    pub fn load_npy<P: AsRef<Path>>(device: &DeviceHandle, path: P) -> MatResult<DenseMatrix> {
        let array: Array2<f32> = read_npy(path.as_ref())
            .map_err(|err| error::io(format!("{}: {err}", path.as_ref().display())))?;
        DenseMatrix::from_array(device, &array)
    }
}
