use gpumat_core::{Axis, Engine, EngineConfig};

fn main() -> Result<(), gpumat_core::MatError> {
    let mut engine = Engine::new(EngineConfig::from_env().with_max_ones(1 << 10))?;
    engine.init_blas()?;

    // [1.0 0.0 2.0]
    // [0.0 3.0 0.0]
    // [4.0 0.0 5.0]
    let sparse = engine.sparse_from_csr(
        vec![1.0, 2.0, 3.0, 4.0, 5.0],
        vec![0, 2, 1, 0, 2],
        vec![0, 2, 3, 5],
        3,
        3,
    )?;
    let rhs = engine.from_row_major(&[1.0, 0.0, 2.0, 1.0, 3.0, -1.0], 3, 2)?;

    let mut product = sparse.dot(&rhs, 1.0)?;
    let blas = engine.blas()?;
    let mut dense = blas.dot(&engine.from_array(&sparse.to_array()?)?, &rhs, 1.0)?;
    println!("sparse product: {:?}", product.to_array()?);
    println!("dense product : {:?}", dense.to_array()?);

    let mut column_sums = product.sum(blas, Axis::Leading, 1.0)?;
    println!("column sums   : {:?}", column_sums.to_vec()?);
    println!("transfers     : {:?}", gpumat_core::transfer_stats());
    Ok(())
}
