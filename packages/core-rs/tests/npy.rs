#![cfg(feature = "npy")]

use gpumat_core::{DenseMatrix, Engine, EngineConfig, ErrorKind};
use ndarray::array;

#[test]
fn save_and_load_npy() {
    let engine = Engine::new(EngineConfig::default().with_max_ones(16)).expect("engine");
    let mut mat = engine
        .from_row_major(&[1.0, 2.0, 3.0, 4.0, 5.0, 6.0], 2, 3)
        .expect("upload");
    let path = std::env::temp_dir().join(format!("gpumat-{}.npy", std::process::id()));
    mat.save_npy(&path).expect("save");

    let mut loaded = DenseMatrix::load_npy(engine.device(), &path).expect("load");
    assert!(!loaded.on_device());
    loaded.copy_to_device().expect("upload");
    assert_eq!(
        loaded.to_array().expect("download"),
        array![[1.0, 2.0, 3.0], [4.0, 5.0, 6.0]]
    );
    std::fs::remove_file(&path).expect("cleanup");
}

#[test]
fn missing_file_is_an_io_error() {
    let engine = Engine::new(EngineConfig::default().with_max_ones(16)).expect("engine");
    let err = DenseMatrix::load_npy(engine.device(), "/nonexistent/gpumat.npy").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Io);
}
