//! Dense `f32` matrices resident on an accelerator.
//!
//! Matrices are stored column-major. A matrix may hold a host mirror, a
//! device buffer, or both; operations run on the device copy and results
//! reach the host only through an explicit [`DenseMatrix::copy_to_host`].
//! Transposes, views and column slices are zero-copy aliases that keep the
//! shared device memory alive.
//!
//! ```no_run
//! use gpumat_core::{Axis, Engine, EngineConfig};
//!
//! let mut engine = Engine::new(EngineConfig::default())?;
//! engine.init_blas()?;
//! let a = engine.from_row_major(&[1.0, 2.0, 3.0, 4.0, 5.0, 6.0], 2, 3)?;
//! let mut sums = a.sum(engine.blas()?, Axis::Leading, 1.0)?;
//! assert_eq!(sums.to_vec()?, vec![5.0, 7.0, 9.0]);
//! # Ok::<(), gpumat_core::MatError>(())
//! ```

pub mod blas;
mod broadcast;
pub mod config;
pub mod device;
mod elementwise;
pub mod engine;
pub mod error;
mod gather;
pub mod kernels;
pub mod matrix;
pub mod metrics;
#[cfg(feature = "npy")]
mod npy;
pub mod random;
pub mod reduce;
pub mod sparse;
pub mod storage;
mod threading;

pub use blas::BlasContext;
pub use config::EngineConfig;
pub use device::{BackendKind, DeviceBackend, DeviceHandle, InProcessDevice};
pub use elementwise::Operand;
pub use engine::Engine;
pub use error::{ErrorKind, MatError, MatResult};
pub use matrix::{DenseMatrix, MatrixId};
pub use metrics::{reset_transfer_stats, take_transfer_stats, transfer_stats, TransferStats};
pub use random::RandomStreamPool;
pub use reduce::Axis;
pub use sparse::{CsrMatrixView, SparseMatrix};

#[cfg(feature = "gpu-cuda")]
pub use device::CudaDevice;
