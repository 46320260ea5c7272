use gpumat_core::{Axis, DenseMatrix, Engine, EngineConfig, ErrorKind};
use ndarray::array;

fn engine() -> Engine {
    let mut engine = Engine::new(EngineConfig::default().with_max_ones(16)).expect("engine");
    engine.init_blas().expect("blas");
    engine
}

fn resident(engine: &Engine, data: &[f32], rows: usize, cols: usize) -> DenseMatrix {
    engine.from_row_major(data, rows, cols).expect("upload")
}

#[test]
fn sums_along_each_axis() {
    let engine = engine();
    let blas = engine.blas().expect("blas");
    let a = resident(&engine, &[1.0, 2.0, 3.0, 4.0, 5.0, 6.0], 2, 3);

    let mut cols = a.sum(blas, Axis::Leading, 1.0).expect("axis 0");
    assert_eq!(cols.to_array().expect("download"), array![[5.0, 7.0, 9.0]]);
    let mut rows = a.sum(blas, Axis::from_index(1).expect("axis"), 1.0).expect("axis 1");
    assert_eq!(rows.to_array().expect("download"), array![[6.0], [15.0]]);

    let mut scaled = engine.zeros(1, 3).expect("alloc");
    a.sum_into(blas, Axis::Leading, &mut scaled, 0.5).expect("scaled");
    assert_eq!(scaled.to_array().expect("download"), array![[2.5, 3.5, 4.5]]);
    assert_eq!(Axis::from_index(2).unwrap_err().kind(), ErrorKind::Dimension);
}

#[test]
fn sums_of_a_transposed_alias() {
    let engine = engine();
    let blas = engine.blas().expect("blas");
    let a = resident(&engine, &[1.0, 2.0, 3.0, 4.0, 5.0, 6.0], 2, 3);
    let at = a.t().expect("alias");
    let mut sums = at.sum(blas, Axis::Leading, 1.0).expect("sum");
    assert_eq!(sums.to_array().expect("download"), array![[6.0, 15.0]]);
}

#[test]
fn add_sums_accumulates_with_beta() {
    let engine = engine();
    let blas = engine.blas().expect("blas");
    let a = resident(&engine, &[1.0, 2.0, 3.0, 4.0, 5.0, 6.0], 2, 3);
    let mut acc = resident(&engine, &[1.0, 1.0], 2, 1);
    acc.add_sums(blas, &a, Axis::NonLeading, 2.0, 3.0).expect("add_sums");
    assert_eq!(acc.to_array().expect("download"), array![[15.0], [33.0]]);
}

#[test]
fn reduction_longer_than_ones_vector_fails() {
    let engine = engine();
    let blas = engine.blas().expect("blas");
    let tall = engine.zeros(17, 2).expect("alloc");
    assert_eq!(
        tall.sum(blas, Axis::Leading, 1.0).unwrap_err().kind(),
        ErrorKind::Dimension
    );
    tall.sum(blas, Axis::NonLeading, 1.0).expect("short axis fits");
}

#[test]
fn blas_lifecycle() {
    let mut engine = Engine::new(EngineConfig::default().with_max_ones(4)).expect("engine");
    assert_eq!(engine.blas().unwrap_err().kind(), ErrorKind::Blas);
    assert_eq!(engine.shutdown().unwrap_err().kind(), ErrorKind::Blas);
    engine.init_blas().expect("init");
    engine.init_blas().expect("second init is a no-op");
    assert_eq!(engine.blas().expect("blas").max_ones(), 4);
    engine.shutdown().expect("shutdown");
    assert_eq!(engine.shutdown().unwrap_err().code(), -2);
}

#[test]
fn squared_sums() {
    let engine = engine();
    let a = resident(&engine, &[1.0, 2.0, 3.0, 4.0], 2, 2);
    let mut cols = a.sqsum(Axis::Leading, 1.0).expect("sqsum");
    assert_eq!(cols.to_array().expect("download"), array![[10.0, 20.0]]);
    let mut acc = resident(&engine, &[1.0, 1.0], 2, 1);
    acc.add_sqsums(&a, Axis::NonLeading, 0.5, 2.0).expect("add_sqsums");
    assert_eq!(acc.to_array().expect("download"), array![[4.5], [14.5]]);
}

#[test]
fn max_and_argmax_ignore_nan() {
    let engine = engine();
    let a = resident(&engine, &[1.0, f32::NAN, 7.0, 4.0, 2.0, 7.0], 2, 3);
    let mut maxima = a.max(Axis::Leading).expect("max");
    assert_eq!(maxima.to_array().expect("download"), array![[4.0, 2.0, 7.0]]);
    let mut positions = a.argmax(Axis::Leading).expect("argmax");
    assert_eq!(positions.to_array().expect("download"), array![[1.0, 1.0, 0.0]]);
    let mut row_max = a.max(Axis::NonLeading).expect("max");
    assert_eq!(row_max.to_array().expect("download"), array![[7.0], [7.0]]);
}

#[test]
fn cumsum_runs_down_columns() {
    let engine = engine();
    let a = resident(&engine, &[1.0, 2.0, 3.0, 4.0, 5.0, 6.0], 3, 2);
    let mut sums = a.cumsum(Axis::Leading).expect("cumsum");
    assert_eq!(
        sums.to_array().expect("download"),
        array![[1.0, 2.0], [4.0, 6.0], [9.0, 12.0]]
    );
    assert_eq!(
        a.cumsum(Axis::NonLeading).unwrap_err().kind(),
        ErrorKind::UnsupportedOperation
    );
}

#[test]
fn norm_limit_rescales_columns() {
    let engine = engine();
    let mut a = resident(&engine, &[3.0, 0.0, 0.3, 4.0, 0.0, 0.4], 2, 3);
    let mut out = engine.zeros(2, 3).expect("alloc");
    a.norm_limit(1.0, Axis::Leading, true, Some(&mut out)).expect("constrained");
    let limited = out.to_array().expect("download");
    assert!((limited[[0, 0]] - 0.6).abs() < 1e-6);
    assert!((limited[[1, 0]] - 0.8).abs() < 1e-6);
    assert_eq!(limited[[0, 1]], 0.0);
    assert_eq!(limited[[0, 2]], 0.3);

    a.norm_limit(1.0, Axis::Leading, false, None).expect("unconstrained");
    let normalised = a.to_array().expect("download");
    assert!((normalised[[0, 2]] - 0.6).abs() < 1e-6);
    assert!((normalised[[1, 2]] - 0.8).abs() < 1e-6);
}

#[test]
fn choose_max_builds_one_hot() {
    let engine = engine();
    let mut a = resident(&engine, &[0.1, 0.9, 0.7, 0.2, 0.2, 0.1], 3, 2);
    let mut acc = engine.zeros(3, 2).expect("alloc");
    a.choose_max_and_accumulate(&mut acc).expect("accumulate");
    a.choose_max_and_accumulate(&mut acc).expect("accumulate");
    assert_eq!(
        acc.to_array().expect("download"),
        array![[0.0, 2.0], [2.0, 0.0], [0.0, 0.0]]
    );
    a.choose_max(Axis::Leading, None).expect("choose");
    assert_eq!(
        a.to_array().expect("download"),
        array![[0.0, 1.0], [1.0, 0.0], [0.0, 0.0]]
    );
    assert_eq!(
        a.choose_max(Axis::NonLeading, None).unwrap_err().kind(),
        ErrorKind::UnsupportedOperation
    );
}

#[test]
fn softmax_columns_sum_to_one() {
    let engine = engine();
    let blas = engine.blas().expect("blas");
    let mut a = resident(&engine, &[1.0, 100.0, 2.0, 100.0, 3.0, 100.0], 3, 2);
    a.apply_softmax(None).expect("softmax");
    let totals = a
        .sum(blas, Axis::Leading, 1.0)
        .expect("sum")
        .to_array()
        .expect("download");
    for total in totals.iter() {
        assert!((total - 1.0).abs() < 1e-5);
    }
    let probs = a.to_array().expect("download");
    assert!((probs[[0, 1]] - 1.0 / 3.0).abs() < 1e-6);
    assert!(probs[[2, 0]] > probs[[1, 0]]);
}

#[test]
fn row_major_softmax_normalises_runs() {
    let engine = engine();
    let mut a = resident(&engine, &[0.0, 0.0, 7.0, 7.0, 1.0, 2.0, 3.0, 4.0], 2, 4);
    a.apply_softmax_row_major(None).expect("softmax");
    let probs = a.to_array().expect("download");
    for row in probs.rows() {
        assert!((row.sum() - 1.0).abs() < 1e-5);
    }
    assert!((probs[[0, 0]] - probs[[0, 1]]).abs() < 1e-7);
    assert!(probs[[0, 2]] > 0.49 && probs[[0, 2]] < 0.5);

    let mut b = resident(&engine, &[5.0, 5.0, 1.0, 3.0, 2.0, 2.0], 1, 6);
    b.apply_softmax_row_major(Some(2)).expect("softmax");
    let pairs = b.to_array().expect("download");
    assert_eq!(pairs[[0, 0]], 0.5);
    assert!((pairs[[0, 2]] + pairs[[0, 3]] - 1.0).abs() < 1e-6);
    assert!(pairs[[0, 3]] > pairs[[0, 2]]);
    assert_eq!(pairs[[0, 5]], 0.5);

    assert_eq!(
        b.apply_softmax_row_major(Some(4)).unwrap_err().kind(),
        ErrorKind::Dimension
    );
}

#[test]
fn softmax_label_kernels() {
    let engine = engine();
    let probs = resident(&engine, &[0.7, 0.2, 0.2, 0.5, 0.1, 0.3], 3, 2);
    let labels = resident(&engine, &[0.0, 2.0], 1, 2);

    let mut correct = engine.zeros(1, 2).expect("alloc");
    probs.get_softmax_correct(&labels, &mut correct).expect("correct");
    assert_eq!(correct.to_array().expect("download"), array![[1.0, 0.0]]);

    let mut loss = engine.zeros(1, 2).expect("alloc");
    probs.get_softmax_cross_entropy(&labels, &mut loss, 0.0).expect("loss");
    let loss = loss.to_array().expect("download");
    assert!((loss[[0, 0]] + 0.7f32.ln()).abs() < 1e-6);
    assert!((loss[[0, 1]] + 0.3f32.ln()).abs() < 1e-6);

    let mut grad = resident(&engine, &[0.7, 0.2, 0.2, 0.5, 0.1, 0.3], 3, 2);
    grad.apply_softmax_grad(&labels, None).expect("grad");
    let grad = grad.to_array().expect("download");
    assert!((grad[[0, 0]] + 0.3).abs() < 1e-6);
    assert!((grad[[2, 1]] + 0.7).abs() < 1e-6);
    assert_eq!(grad[[1, 1]], 0.5);
}

#[test]
fn out_of_range_labels() {
    let engine = engine();
    let probs = resident(&engine, &[0.5, 0.5], 2, 1);
    let labels = resident(&engine, &[5.0], 1, 1);
    let mut loss = engine.zeros(1, 1).expect("alloc");
    probs.get_softmax_cross_entropy(&labels, &mut loss, 1e-9).expect("loss");
    assert!(loss.read_value(0, 0).expect("read").is_nan());
    let mut correct = engine.zeros(1, 1).expect("alloc");
    probs.get_softmax_correct(&labels, &mut correct).expect("correct");
    assert_eq!(correct.read_value(0, 0).expect("read"), 0.0);

    let short = engine.zeros(1, 3).expect("alloc");
    assert_eq!(
        probs.get_softmax_correct(&short, &mut correct).unwrap_err().kind(),
        ErrorKind::Dimension
    );
}

#[test]
fn products_with_transposed_operands() {
    let engine = engine();
    let blas = engine.blas().expect("blas");
    let a = resident(&engine, &[1.0, 2.0, 3.0, 4.0, 5.0, 6.0], 2, 3);
    let b = resident(&engine, &[1.0, 0.0, 0.0, 1.0, 1.0, 1.0], 3, 2);

    let mut ab = blas.dot(&a, &b, 1.0).expect("dot");
    assert_eq!(ab.to_array().expect("download"), array![[4.0, 5.0], [10.0, 11.0]]);

    let at = a.t().expect("alias");
    let mut ata = blas.dot(&at, &a, 1.0).expect("dot");
    assert_eq!(
        ata.to_array().expect("download"),
        array![[17.0, 22.0, 27.0], [22.0, 29.0, 36.0], [27.0, 36.0, 45.0]]
    );

    let bt = b.t().expect("alias");
    let mut btat = blas.dot(&bt, &at, 2.0).expect("dot");
    assert_eq!(btat.to_array().expect("download"), array![[8.0, 20.0], [10.0, 22.0]]);

    assert_eq!(blas.dot(&a, &a, 1.0).unwrap_err().kind(), ErrorKind::Dimension);
}

#[test]
fn dot_into_honours_alpha_and_beta() {
    let engine = engine();
    let blas = engine.blas().expect("blas");
    let a = resident(&engine, &[1.0, 2.0, 3.0, 4.0], 2, 2);
    let eye = resident(&engine, &[1.0, 0.0, 0.0, 1.0], 2, 2);
    let mut c = resident(&engine, &[1.0, 1.0, 1.0, 1.0], 2, 2);
    blas.dot_into(&a, &eye, &mut c, 2.0, 3.0).expect("gemm");
    assert_eq!(c.to_array().expect("download"), array![[5.0, 8.0], [11.0, 14.0]]);

    c.add_dot(blas, &eye, &eye, 1.0).expect("add_dot");
    c.subtract_dot(blas, &a, &eye, 1.0).expect("subtract_dot");
    assert_eq!(c.to_array().expect("download"), array![[5.0, 6.0], [8.0, 11.0]]);

    let mut ct = c.t().expect("alias");
    assert_eq!(
        blas.dot_into(&a, &eye, &mut ct, 0.0, 1.0).unwrap_err().kind(),
        ErrorKind::TransposeUnsupported
    );
}

#[test]
fn flat_products() {
    let engine = engine();
    let blas = engine.blas().expect("blas");
    let a = resident(&engine, &[1.0, 2.0, 3.0, 4.0], 2, 2);
    let b = resident(&engine, &[1.0, -1.0, 2.0, 0.5], 2, 2);
    assert_eq!(blas.vdot(&a, &b).expect("vdot"), 1.0 - 2.0 + 6.0 + 2.0);
    assert_eq!(blas.sum_all(&a).expect("sum_all"), 10.0);
    assert_eq!(a.euclid_norm(blas).expect("norm"), 30.0f32.sqrt());

    let row = resident(&engine, &[1.0, 2.0, 3.0], 1, 3);
    let col = resident(&engine, &[1.0, 1.0, 1.0], 3, 1).t().expect("alias");
    assert_eq!(blas.vdot(&row, &col).expect("vector vdot"), 6.0);

    let at = a.t().expect("alias");
    assert_eq!(blas.vdot(&at, &b).unwrap_err().kind(), ErrorKind::TransposeMismatch);
}
