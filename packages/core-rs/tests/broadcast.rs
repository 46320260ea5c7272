use gpumat_core::{DenseMatrix, Engine, EngineConfig, ErrorKind};
use ndarray::array;

fn engine() -> Engine {
    Engine::new(EngineConfig::default().with_max_ones(1024)).expect("engine")
}

fn resident(engine: &Engine, data: &[f32], rows: usize, cols: usize) -> DenseMatrix {
    engine.from_row_major(data, rows, cols).expect("upload")
}

#[test]
fn column_vector_broadcasts() {
    let engine = engine();
    let mut a = resident(&engine, &[1.0, 2.0, 3.0, 4.0, 5.0, 6.0], 2, 3);
    let col = resident(&engine, &[10.0, 20.0], 2, 1);
    let mut out = engine.zeros(2, 3).expect("alloc");

    a.add_col_vec(&col, Some(&mut out)).expect("add_col_vec");
    assert_eq!(
        out.to_array().expect("download"),
        array![[11.0, 12.0, 13.0], [24.0, 25.0, 26.0]]
    );
    a.add_col_mult(&col, -0.5, Some(&mut out)).expect("add_col_mult");
    assert_eq!(
        out.to_array().expect("download"),
        array![[-4.0, -3.0, -2.0], [-6.0, -5.0, -4.0]]
    );
    a.mult_by_col(&col, Some(&mut out)).expect("mult_by_col");
    assert_eq!(
        out.to_array().expect("download"),
        array![[10.0, 20.0, 30.0], [80.0, 100.0, 120.0]]
    );
    a.div_by_col(&col, None).expect("div_by_col");
    assert_eq!(
        a.to_array().expect("download"),
        array![[0.1, 0.2, 0.3], [0.2, 0.25, 0.3]]
    );
}

#[test]
fn row_vector_broadcasts() {
    let engine = engine();
    let mut a = resident(&engine, &[1.0, 2.0, 3.0, 4.0, 5.0, 6.0], 2, 3);
    let row = resident(&engine, &[1.0, 2.0, 4.0], 1, 3);
    let mut out = engine.zeros(2, 3).expect("alloc");

    a.add_row_vec(&row, Some(&mut out)).expect("add_row_vec");
    assert_eq!(
        out.to_array().expect("download"),
        array![[2.0, 4.0, 7.0], [5.0, 7.0, 10.0]]
    );
    a.add_row_mult(&row, 2.0, Some(&mut out)).expect("add_row_mult");
    assert_eq!(
        out.to_array().expect("download"),
        array![[3.0, 6.0, 11.0], [6.0, 9.0, 14.0]]
    );
    a.mult_by_row(&row, Some(&mut out)).expect("mult_by_row");
    assert_eq!(
        out.to_array().expect("download"),
        array![[1.0, 4.0, 12.0], [4.0, 10.0, 24.0]]
    );
    a.div_by_row(&row, None).expect("div_by_row");
    assert_eq!(
        a.to_array().expect("download"),
        array![[1.0, 1.0, 0.75], [4.0, 2.5, 1.5]]
    );
}

#[test]
fn vector_length_must_match() {
    let engine = engine();
    let mut a = engine.zeros(2, 3).expect("alloc");
    let short = engine.zeros(1, 2).expect("alloc");
    assert_eq!(a.add_row_vec(&short, None).unwrap_err().kind(), ErrorKind::Dimension);
    let grid = engine.zeros(2, 3).expect("alloc");
    assert_eq!(a.add_col_vec(&grid, None).unwrap_err().kind(), ErrorKind::Dimension);
}

#[test]
fn vector_orientation_must_match() {
    let engine = engine();
    let mut a = engine.zeros(2, 3).expect("alloc");
    let row_of_two = engine.zeros(1, 2).expect("alloc");
    assert_eq!(a.add_col_vec(&row_of_two, None).unwrap_err().kind(), ErrorKind::Dimension);
    let col_of_three = engine.zeros(3, 1).expect("alloc");
    assert_eq!(a.mult_by_row(&col_of_three, None).unwrap_err().kind(), ErrorKind::Dimension);
}

#[test]
fn transposed_operands_are_rejected() {
    let engine = engine();
    let a = engine.zeros(3, 2).expect("alloc");
    let mut at = a.t().expect("alias");
    let col = engine.zeros(2, 1).expect("alloc");
    assert_eq!(
        at.add_col_vec(&col, None).unwrap_err().kind(),
        ErrorKind::TransposeUnsupported
    );
    let mut b = engine.zeros(2, 3).expect("alloc");
    let row_t = engine.zeros(3, 1).expect("alloc").t().expect("alias");
    assert_eq!(
        b.add_row_vec(&row_t, None).unwrap_err().kind(),
        ErrorKind::TransposeUnsupported
    );
}

#[test]
fn diagonal_updates() {
    let engine = engine();
    let mut a = resident(&engine, &[1.0, 2.0, 3.0, 4.0], 2, 2);
    a.add_diagonal(10.0f32, None).expect("add scalar");
    assert_eq!(a.to_array().expect("download"), array![[11.0, 2.0], [3.0, 14.0]]);
    let diag = resident(&engine, &[2.0, 0.5], 1, 2);
    a.mult_diagonal(&diag, None).expect("mult vector");
    assert_eq!(a.to_array().expect("download"), array![[22.0, 2.0], [3.0, 7.0]]);

    let mut rect = engine.zeros(2, 3).expect("alloc");
    assert_eq!(
        rect.add_diagonal(1.0f32, None).unwrap_err().kind(),
        ErrorKind::Dimension
    );
}
