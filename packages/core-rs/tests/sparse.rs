use gpumat_core::sparse::csr_matmul;
use gpumat_core::{CsrMatrixView, Engine, EngineConfig, ErrorKind, SparseMatrix};
use ndarray::array;

fn engine() -> Engine {
    Engine::new(EngineConfig::default().with_max_ones(16)).expect("engine")
}

fn sample_csr() -> (Vec<i32>, Vec<i32>, Vec<f32>) {
    // 3x3 matrix
    // [1, 0, 2]
    // [0, 3, 0]
    // [4, 0, 5]
    (
        vec![0, 2, 3, 5],
        vec![0, 2, 1, 0, 2],
        vec![1.0, 2.0, 3.0, 4.0, 5.0],
    )
}

fn sample(engine: &Engine) -> SparseMatrix {
    let (indptr, indices, data) = sample_csr();
    engine
        .sparse_from_csr(data, indices, indptr, 3, 3)
        .expect("sparse upload")
}

#[test]
fn csr_to_dense() {
    let (indptr, indices, data) = sample_csr();
    let view = CsrMatrixView::new(3, 3, &indptr, &indices, &data).expect("csr view");
    assert_eq!(view.nnz(), 5);
    assert_eq!(
        view.to_dense(),
        array![[1.0, 0.0, 2.0], [0.0, 3.0, 0.0], [4.0, 0.0, 5.0]]
    );
}

#[test]
fn csr_validation() {
    let err = CsrMatrixView::new(3, 3, &[0, 1, 1], &[0], &[1.0]).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Shape);
    let err = CsrMatrixView::new(3, 3, &[0, 1, 1, 1], &[5], &[1.0]).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Shape);
}

#[test]
fn host_product_matches_dense() {
    let (indptr, indices, data) = sample_csr();
    let view = CsrMatrixView::new(3, 3, &indptr, &indices, &data).expect("csr view");
    let rhs = array![[1.0f32, 0.0], [2.0, 1.0], [3.0, -1.0]];
    let sparse = csr_matmul(&view, rhs.view()).expect("sparse product");
    assert_eq!(sparse, view.to_dense().dot(&rhs));
}

#[test]
fn device_product_with_scaling() {
    let engine = engine();
    let sparse = sample(&engine);
    assert!(sparse.on_device());
    assert_eq!(sparse.shape(), (3, 3));

    let rhs = engine.from_row_major(&[1.0, 0.0, 2.0, 1.0, 3.0, -1.0], 3, 2).expect("upload");
    let mut product = sparse.dot(&rhs, 2.0).expect("dot");
    assert_eq!(
        product.to_array().expect("download"),
        array![[14.0, -4.0], [12.0, 6.0], [38.0, -10.0]]
    );

    let mut acc = engine.from_row_major(&[1.0; 6], 3, 2).expect("upload");
    sparse.dot_into(&rhs, &mut acc, 3.0, 1.0).expect("dot_into");
    assert_eq!(
        acc.to_array().expect("download"),
        array![[10.0, 1.0], [9.0, 6.0], [22.0, -2.0]]
    );
}

#[test]
fn product_accepts_transposed_dense_operand() {
    let engine = engine();
    let sparse = sample(&engine);
    let rhs = engine.from_row_major(&[1.0, 2.0, 3.0], 1, 3).expect("upload");
    let col = rhs.t().expect("alias");
    let mut product = sparse.dot(&col, 1.0).expect("dot");
    assert_eq!(product.to_array().expect("download"), array![[7.0], [6.0], [19.0]]);
}

#[test]
fn residency_rules() {
    let engine = engine();
    let mut sparse = sample(&engine);
    assert!(sparse.release());
    assert!(!sparse.on_device());
    let rhs = engine.zeros(3, 1).expect("alloc");
    assert_eq!(sparse.dot(&rhs, 1.0).unwrap_err().kind(), ErrorKind::NotOnDevice);
    assert_eq!(sparse.to_array().expect("host copy")[[2, 2]], 5.0);

    sparse.copy_to_device().expect("upload");
    sparse.copy_to_host().expect("download");
    assert_eq!(sparse.nnz(), 5);
}

#[test]
fn inner_dimension_must_match() {
    let engine = engine();
    let sparse = sample(&engine);
    let rhs = engine.zeros(2, 2).expect("alloc");
    assert_eq!(sparse.dot(&rhs, 1.0).unwrap_err().kind(), ErrorKind::Dimension);
}

#[cfg(feature = "sparse-native")]
#[test]
fn converts_from_sprs() {
    use sprs::TriMat;

    let engine = engine();
    let mut tri = TriMat::new((2, 3));
    tri.add_triplet(0, 1, 2.0f32);
    tri.add_triplet(1, 0, -1.0);
    tri.add_triplet(1, 2, 4.0);
    let csc = tri.to_csc::<usize>();
    let mut sparse = SparseMatrix::from_csmat(engine.device(), &csc).expect("convert");
    assert_eq!(sparse.nnz(), 3);
    sparse.copy_to_device().expect("upload");
    assert_eq!(
        sparse.to_array().expect("dense"),
        array![[0.0, 2.0, 0.0], [-1.0, 0.0, 4.0]]
    );
}
