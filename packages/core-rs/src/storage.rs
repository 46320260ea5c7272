use crate::device::{DeviceHandle, DeviceRegion};
use crate::error::{self, MatResult};

/// Column-major backing store of a matrix: an optional host mirror and an
/// optional device region, both in the stored (physical) layout. The
/// logical shape swaps `rows`/`cols` when `is_trans` is set.
#[derive(Debug)]
pub struct MatrixStorage {
    device: DeviceHandle,
    rows: usize,
    cols: usize,
    is_trans: bool,
    owns_data: bool,
    host: Option<Vec<f32>>,
    region: Option<DeviceRegion>,
}

impl MatrixStorage {
    /// Fresh device allocation with no host mirror.
    pub fn allocate(device: &DeviceHandle, rows: usize, cols: usize) -> MatResult<Self> {
        let len = checked_len(rows, cols)?;
        let region = device.allocate(len)?;
        Ok(Self {
            device: device.clone(),
            rows,
            cols,
            is_trans: false,
            owns_data: true,
            host: None,
            region: Some(region),
        })
    }

    /// Host-only storage adopting `data` without copying.
    pub fn from_host(device: &DeviceHandle, data: Vec<f32>, rows: usize, cols: usize) -> MatResult<Self> {
        let len = checked_len(rows, cols)?;
        if data.len() != len {
            return Err(error::shape(format!(
                "host buffer of {} elements cannot back a {rows}x{cols} matrix",
                data.len()
            )));
        }
        Ok(Self {
            device: device.clone(),
            rows,
            cols,
            is_trans: false,
            owns_data: true,
            host: Some(data),
            region: None,
        })
    }

    /// Non-owning storage over `len` elements of this region starting at
    /// `start`. The host mirror is not shared.
    pub fn alias(&self, start: usize, rows: usize, cols: usize, is_trans: bool) -> MatResult<Self> {
        let region = self.region()?.narrow(start, checked_len(rows, cols)?)?;
        Ok(Self {
            device: self.device.clone(),
            rows,
            cols,
            is_trans,
            owns_data: false,
            host: None,
            region: Some(region),
        })
    }

    pub fn device(&self) -> &DeviceHandle {
        &self.device
    }

    /// Stored extents.
    pub fn physical_shape(&self) -> (usize, usize) {
        (self.rows, self.cols)
    }

    pub fn shape(&self) -> (usize, usize) {
        if self.is_trans {
            (self.cols, self.rows)
        } else {
            (self.rows, self.cols)
        }
    }

    pub fn len(&self) -> usize {
        self.rows * self.cols
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_trans(&self) -> bool {
        self.is_trans
    }

    pub fn set_trans(&mut self, is_trans: bool) {
        self.is_trans = is_trans;
    }

    pub fn owns_data(&self) -> bool {
        self.owns_data
    }

    pub fn on_host(&self) -> bool {
        self.host.is_some()
    }

    pub fn on_device(&self) -> bool {
        self.region.is_some()
    }

    pub fn host(&self) -> Option<&[f32]> {
        self.host.as_deref()
    }

    pub fn region(&self) -> MatResult<&DeviceRegion> {
        self.region
            .as_ref()
            .ok_or_else(|| error::not_on_device("matrix has no device buffer"))
    }

    pub fn copy_to_device(&mut self) -> MatResult<()> {
        let host = self
            .host
            .as_ref()
            .ok_or_else(|| error::unsupported("matrix has no host buffer to upload"))?;
        if self.region.is_none() {
            self.region = Some(self.device.allocate(host.len())?);
        }
        self.region()?.write(host)
    }

    pub fn copy_to_host(&mut self) -> MatResult<()> {
        let region = self
            .region
            .as_ref()
            .ok_or_else(|| error::not_on_device("matrix has no device buffer to download"))?;
        let host = match self.host.as_mut() {
            Some(host) => host,
            None => {
                let mut fresh = Vec::new();
                fresh
                    .try_reserve_exact(region.len())
                    .map_err(|err| error::allocation(format!("host mirror: {err}")))?;
                fresh.resize(region.len(), 0.0);
                self.host.insert(fresh)
            }
        };
        region.read_into(host)
    }

    /// Drops this handle's device region. The memory itself is returned to
    /// the backend once no alias references it.
    pub fn release(&mut self) -> bool {
        self.region.take().is_some()
    }

    /// Relabels the stored extents; the element count must not change.
    pub fn reshape(&mut self, rows: usize, cols: usize) -> MatResult<()> {
        if checked_len(rows, cols)? != self.len() {
            return Err(error::shape(format!(
                "cannot reshape {}x{} into {rows}x{cols}",
                self.rows, self.cols
            )));
        }
        self.rows = rows;
        self.cols = cols;
        Ok(())
    }

    /// Replaces the host mirror, dropping any device region.
    pub fn replace_host(&mut self, data: Vec<f32>, rows: usize, cols: usize) -> MatResult<()> {
        let len = checked_len(rows, cols)?;
        if data.len() != len {
            return Err(error::shape(format!(
                "host buffer of {} elements cannot back a {rows}x{cols} matrix",
                data.len()
            )));
        }
        self.region = None;
        self.host = Some(data);
        self.rows = rows;
        self.cols = cols;
        self.is_trans = false;
        self.owns_data = true;
        Ok(())
    }

    pub fn read_device(&self) -> MatResult<Vec<f32>> {
        self.region()?.read()
    }

    pub fn write_device(&self, values: &[f32]) -> MatResult<()> {
        self.region()?.write(values)
    }
}

pub(crate) fn checked_len(rows: usize, cols: usize) -> MatResult<usize> {
    rows.checked_mul(cols)
        .ok_or_else(|| error::shape(format!("{rows}x{cols} overflows the address space")))
}
