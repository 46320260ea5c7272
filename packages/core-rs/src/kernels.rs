//! Host reference kernels. Backends without native support for an
//! operation stage operands through these loops; large inputs fan out to
//! rayon when the `parallel` feature is on.

use ndarray::linalg::general_mat_mul;
use ndarray::{ArrayView2, ArrayViewMut2};

#[cfg(feature = "parallel")]
use rayon::prelude::*;

#[cfg(feature = "parallel")]
use crate::threading::{ensure_rayon_pool, should_parallelize};

pub fn map_in_place<F>(values: &mut [f32], f: F)
where
    F: Fn(f32) -> f32 + Send + Sync,
{
    #[cfg(feature = "parallel")]
    {
        if should_parallelize(values.len()) {
            ensure_rayon_pool();
            values.par_iter_mut().for_each(|v| *v = f(*v));
            return;
        }
    }
    values.iter_mut().for_each(|v| *v = f(*v));
}

/// `lhs[i] = f(lhs[i], rhs[i])`.
pub fn zip_in_place<F>(lhs: &mut [f32], rhs: &[f32], f: F)
where
    F: Fn(f32, f32) -> f32 + Send + Sync,
{
    debug_assert_eq!(lhs.len(), rhs.len());
    #[cfg(feature = "parallel")]
    {
        if should_parallelize(lhs.len()) {
            ensure_rayon_pool();
            lhs.par_iter_mut()
                .zip(rhs.par_iter())
                .for_each(|(l, &r)| *l = f(*l, r));
            return;
        }
    }
    lhs.iter_mut().zip(rhs).for_each(|(l, &r)| *l = f(*l, r));
}

/// Visits each stored column of a column-major buffer with its index.
pub fn for_each_column<F>(values: &mut [f32], rows: usize, f: F)
where
    F: Fn(usize, &mut [f32]) + Send + Sync,
{
    if rows == 0 || values.is_empty() {
        return;
    }
    #[cfg(feature = "parallel")]
    {
        if should_parallelize(values.len()) {
            ensure_rayon_pool();
            values
                .par_chunks_mut(rows)
                .enumerate()
                .for_each(|(j, col)| f(j, col));
            return;
        }
    }
    values
        .chunks_mut(rows)
        .enumerate()
        .for_each(|(j, col)| f(j, col));
}

/// `c = alpha * a * b + beta * c`.
pub fn gemm(
    alpha: f32,
    a: &ArrayView2<'_, f32>,
    b: &ArrayView2<'_, f32>,
    beta: f32,
    c: &mut ArrayViewMut2<'_, f32>,
) {
    general_mat_mul(alpha, a, b, beta, c);
}

/// Largest value, skipping NaN. An all-NaN or empty lane yields NaN.
pub fn max_ignore_nan<'a, I>(values: I) -> f32
where
    I: IntoIterator<Item = &'a f32>,
{
    let mut any_valid = false;
    let mut best = f32::NEG_INFINITY;
    for &v in values {
        if v.is_nan() {
            continue;
        }
        any_valid = true;
        if v > best {
            best = v;
        }
    }
    if any_valid {
        best
    } else {
        f32::NAN
    }
}

/// Index of the first maximum, skipping NaN; 0 when nothing is valid.
pub fn argmax_ignore_nan<'a, I>(values: I) -> usize
where
    I: IntoIterator<Item = &'a f32>,
{
    let mut best_idx: Option<usize> = None;
    let mut best_val = f32::NEG_INFINITY;
    for (idx, &value) in values.into_iter().enumerate() {
        if value.is_nan() {
            continue;
        }
        if best_idx.is_none() || value > best_val {
            best_idx = Some(idx);
            best_val = value;
        }
    }
    best_idx.unwrap_or(0)
}

/// Resolves a float-encoded index against `len`: truncated toward zero,
/// negatives count from the end. Out of range yields `None`.
pub fn resolve_index(raw: f32, len: usize) -> Option<usize> {
    if !raw.is_finite() {
        return None;
    }
    let mut idx = raw.trunc() as i64;
    if idx < 0 {
        idx += len as i64;
    }
    if idx < 0 || idx >= len as i64 {
        None
    } else {
        Some(idx as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn max_skips_nan() {
        assert_eq!(max_ignore_nan(&[f32::NAN, 1.0, 3.0, 2.0]), 3.0);
        assert!(max_ignore_nan(&[f32::NAN]).is_nan());
        assert!(max_ignore_nan(std::iter::empty()).is_nan());
    }

    #[test]
    fn argmax_picks_first_tie() {
        assert_eq!(argmax_ignore_nan(&[1.0, 5.0, 5.0]), 1);
        assert_eq!(argmax_ignore_nan(&[f32::NAN, -1.0]), 1);
    }

    #[test]
    fn index_resolution_wraps_negatives() {
        assert_eq!(resolve_index(-1.0, 4), Some(3));
        assert_eq!(resolve_index(2.9, 4), Some(2));
        assert_eq!(resolve_index(4.0, 4), None);
        assert_eq!(resolve_index(-5.0, 4), None);
        assert_eq!(resolve_index(f32::NAN, 4), None);
    }

    #[test]
    fn columns_are_visited_in_order() {
        let mut values = vec![0.0f32; 6];
        for_each_column(&mut values, 2, |j, col| col.iter_mut().for_each(|v| *v = j as f32));
        assert_eq!(values, vec![0.0, 0.0, 1.0, 1.0, 2.0, 2.0]);
    }
}
